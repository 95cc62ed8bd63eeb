use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::types::{NestedField, PrimitiveType, StructType, Type};
use crate::error::ValidationError;

pub const DEFAULT_SCHEMA_ID: i32 = 0;

pub type SchemaRef = std::sync::Arc<Schema>;

/// A validated table schema.
///
/// Field ids are unique across all nesting levels and every identifier field
/// resolves to a required, non floating point primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaSerde", into = "SchemaSerde")]
pub struct Schema {
    schema_id: i32,
    fields: Vec<NestedField>,
    identifier_field_ids: Vec<i32>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SchemaSerde {
    #[serde(rename = "type", default = "struct_kind")]
    kind: String,
    schema_id: i32,
    #[serde(default)]
    identifier_field_ids: Vec<i32>,
    fields: Vec<NestedField>,
}

fn struct_kind() -> String {
    "struct".to_string()
}

impl TryFrom<SchemaSerde> for Schema {
    type Error = ValidationError;

    fn try_from(value: SchemaSerde) -> Result<Self, Self::Error> {
        if value.kind != "struct" {
            return Err(ValidationError::new(format!(
                "Schema must be a struct, got `{}`",
                value.kind
            )));
        }
        Schema::builder()
            .with_schema_id(value.schema_id)
            .with_fields(value.fields)
            .with_identifier_field_ids(value.identifier_field_ids)
            .build()
    }
}

impl From<Schema> for SchemaSerde {
    fn from(value: Schema) -> Self {
        Self {
            kind: struct_kind(),
            schema_id: value.schema_id,
            identifier_field_ids: value.identifier_field_ids,
            fields: value.fields,
        }
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    schema_id: i32,
    fields: Vec<NestedField>,
    identifier_field_ids: Vec<i32>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn with_schema_id(mut self, schema_id: i32) -> Self {
        self.schema_id = schema_id;
        self
    }

    #[must_use]
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = NestedField>) -> Self {
        self.fields.extend(fields);
        self
    }

    #[must_use]
    pub fn with_identifier_field_ids(mut self, ids: impl IntoIterator<Item = i32>) -> Self {
        self.identifier_field_ids.extend(ids);
        self
    }

    pub fn build(self) -> Result<Schema, ValidationError> {
        if self.schema_id < 0 {
            return Err(ValidationError::for_key(
                format!("Schema id must not be negative, got {}", self.schema_id),
                self.schema_id.to_string(),
            ));
        }
        let mut identifier_field_ids = self.identifier_field_ids;
        identifier_field_ids.sort_unstable();
        identifier_field_ids.dedup();

        let schema = Schema {
            schema_id: self.schema_id,
            fields: self.fields,
            identifier_field_ids,
        };
        schema.validate()?;
        Ok(schema)
    }
}

/// A field reached by walking struct nesting from the schema root.
#[derive(Debug, Clone)]
pub(crate) struct IndexedField<'a> {
    pub(crate) full_name: String,
    pub(crate) field: &'a NestedField,
    /// Every enclosing struct field is required.
    pub(crate) ancestors_required: bool,
}

impl Schema {
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    #[must_use]
    pub fn schema_id(&self) -> i32 {
        self.schema_id
    }

    #[must_use]
    pub fn fields(&self) -> &[NestedField] {
        &self.fields
    }

    #[must_use]
    pub fn identifier_field_ids(&self) -> &[i32] {
        &self.identifier_field_ids
    }

    #[must_use]
    pub fn as_struct(&self) -> StructType {
        StructType::new(self.fields.clone())
    }

    #[must_use]
    pub(crate) fn with_schema_id(mut self, schema_id: i32) -> Self {
        self.schema_id = schema_id;
        self
    }

    /// Same columns and identifier fields, ignoring the schema id.
    #[must_use]
    pub fn same_content(&self, other: &Schema) -> bool {
        self.fields == other.fields && self.identifier_field_ids == other.identifier_field_ids
    }

    /// All fields reachable through struct nesting, in depth-first order.
    pub(crate) fn index(&self) -> Vec<IndexedField<'_>> {
        fn walk<'a>(
            fields: &'a [NestedField],
            prefix: Option<&str>,
            ancestors_required: bool,
            out: &mut Vec<IndexedField<'a>>,
        ) {
            for field in fields {
                let full_name = match prefix {
                    Some(prefix) => format!("{prefix}.{}", field.name),
                    None => field.name.clone(),
                };
                out.push(IndexedField {
                    full_name: full_name.clone(),
                    field,
                    ancestors_required,
                });
                if let Type::Struct(s) = &field.field_type {
                    walk(
                        &s.fields,
                        Some(&full_name),
                        ancestors_required && field.required,
                        out,
                    );
                }
            }
        }

        let mut out = Vec::new();
        walk(&self.fields, None, true, &mut out);
        out
    }

    #[must_use]
    pub fn field_by_id(&self, id: i32) -> Option<&NestedField> {
        self.index()
            .into_iter()
            .find(|f| f.field.id == id)
            .map(|f| f.field)
    }

    /// Looks up a field by its full dotted name, e.g. `"location.lat"`.
    #[must_use]
    pub fn field_by_name(&self, name: &str) -> Option<&NestedField> {
        self.index()
            .into_iter()
            .find(|f| f.full_name == name)
            .map(|f| f.field)
    }

    #[must_use]
    pub fn name_by_id(&self, id: i32) -> Option<String> {
        self.index()
            .into_iter()
            .find(|f| f.field.id == id)
            .map(|f| f.full_name)
    }

    #[must_use]
    pub fn field_names_by_id(&self) -> HashMap<i32, String> {
        self.index()
            .into_iter()
            .map(|f| (f.field.id, f.full_name))
            .collect()
    }

    /// Every field id declared in the schema, including list and map children.
    #[must_use]
    pub fn field_ids(&self) -> Vec<i32> {
        let mut ids = Vec::new();
        for field in &self.fields {
            ids.push(field.id);
            field.field_type.collect_ids(&mut ids);
        }
        ids
    }

    /// Type declared for every field id, including list and map children.
    pub(crate) fn types_by_id(&self) -> HashMap<i32, &Type> {
        let mut fields = Vec::new();
        for field in &self.fields {
            fields.push((field.id, &field.field_type));
            field.field_type.collect_fields(&mut fields);
        }
        fields.into_iter().collect()
    }

    #[must_use]
    pub fn highest_field_id(&self) -> i32 {
        self.field_ids().into_iter().max().unwrap_or(0)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for id in self.field_ids() {
            if !seen.insert(id) {
                return Err(ValidationError::for_key(
                    format!("Duplicate field id {id} in schema"),
                    id.to_string(),
                ));
            }
        }

        validate_names(&self.fields, None)?;

        let index = self.index();
        for id in &self.identifier_field_ids {
            let Some(indexed) = index.iter().find(|f| f.field.id == *id) else {
                return Err(ValidationError::for_key(
                    format!("Cannot find identifier field id {id} in schema"),
                    id.to_string(),
                ));
            };
            let name = &indexed.full_name;
            let field = indexed.field;
            let Some(primitive) = field.field_type.as_primitive() else {
                return Err(ValidationError::for_key(
                    format!(
                        "Identifier field `{name}` must be a primitive type, got {}",
                        field.field_type
                    ),
                    name.clone(),
                ));
            };
            if primitive.is_floating_point() {
                return Err(ValidationError::for_key(
                    format!("Identifier field `{name}` must not be float or double"),
                    name.clone(),
                ));
            }
            if !field.required || !indexed.ancestors_required {
                return Err(ValidationError::for_key(
                    format!("Identifier field `{name}` must be required"),
                    name.clone(),
                ));
            }
        }
        Ok(())
    }
}

fn validate_names(fields: &[NestedField], parent: Option<&str>) -> Result<(), ValidationError> {
    let mut names = HashSet::new();
    for field in fields {
        let full_name = match parent {
            Some(parent) => format!("{parent}.{}", field.name),
            None => field.name.clone(),
        };
        if field.name.is_empty() {
            return Err(ValidationError::new(format!(
                "Field {} has an empty name",
                field.id
            )));
        }
        if !names.insert(field.name.as_str()) {
            return Err(ValidationError::for_key(
                format!("Duplicate field name `{full_name}` in schema"),
                full_name,
            ));
        }
        validate_nested_names(&field.field_type, &full_name)?;
    }
    Ok(())
}

fn validate_nested_names(field_type: &Type, full_name: &str) -> Result<(), ValidationError> {
    match field_type {
        Type::Primitive(_) => Ok(()),
        Type::Struct(s) => validate_names(&s.fields, Some(full_name)),
        Type::List(l) => validate_nested_names(&l.element, &format!("{full_name}.element")),
        Type::Map(m) => {
            validate_nested_names(&m.key, &format!("{full_name}.key"))?;
            validate_nested_names(&m.value, &format!("{full_name}.value"))
        }
    }
}

/// Returns a copy of `schema` with ids assigned sequentially from 1,
/// together with the mapping from old to new field id.
pub(crate) fn assign_fresh_schema_ids(
    schema: &Schema,
) -> Result<(Schema, HashMap<i32, i32>), ValidationError> {
    let mut next = 0;
    let mut mapping = HashMap::new();
    let fields = super::types::reassign_field_ids(&schema.fields, &mut |old| {
        next += 1;
        mapping.insert(old, next);
        next
    });
    let identifier_field_ids = schema
        .identifier_field_ids
        .iter()
        .map(|id| {
            mapping.get(id).copied().ok_or_else(|| {
                ValidationError::for_key(
                    format!("Cannot find identifier field id {id} in schema"),
                    id.to_string(),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let fresh = Schema::builder()
        .with_schema_id(DEFAULT_SCHEMA_ID)
        .with_fields(fields)
        .with_identifier_field_ids(identifier_field_ids)
        .build()?;
    Ok((fresh, mapping))
}

/// Primitive type of a field reachable by struct nesting, if any.
pub(crate) fn primitive_source<'s>(schema: &'s Schema, id: i32) -> Option<&'s PrimitiveType> {
    schema
        .field_by_id(id)
        .and_then(|f| f.field_type.as_primitive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::types::{ListType, MapType};

    pub(crate) fn sample_schema() -> Schema {
        Schema::builder()
            .with_schema_id(0)
            .with_fields(vec![
                NestedField::optional(1, "x", PrimitiveType::Long),
                NestedField::required(2, "y", PrimitiveType::Long).with_doc("comment"),
                NestedField::required(3, "z", PrimitiveType::Long),
            ])
            .build()
            .unwrap()
    }

    #[test]
    fn test_schema_json_round_trip() {
        let schema = Schema::builder()
            .with_schema_id(1)
            .with_fields(vec![
                NestedField::required(1, "id", PrimitiveType::Long),
                NestedField::optional(
                    2,
                    "tags",
                    MapType {
                        key_id: 3,
                        key: Box::new(PrimitiveType::String.into()),
                        value_id: 4,
                        value_required: false,
                        value: Box::new(PrimitiveType::String.into()),
                    },
                ),
            ])
            .with_identifier_field_ids([1])
            .build()
            .unwrap();
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains(r#""schema-id":1"#));
        assert!(json.contains(r#""identifier-field-ids":[1]"#));
        let parsed: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, schema);
        assert_eq!(parsed.highest_field_id(), 4);
    }

    #[test]
    fn test_duplicate_field_ids_rejected() {
        let err = Schema::builder()
            .with_fields(vec![
                NestedField::required(1, "a", PrimitiveType::Int),
                NestedField::optional(
                    2,
                    "b",
                    ListType {
                        element_id: 1,
                        element_required: false,
                        element: Box::new(PrimitiveType::Int.into()),
                    },
                ),
            ])
            .build()
            .unwrap_err();
        assert_eq!(err.key.as_deref(), Some("1"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = Schema::builder()
            .with_fields(vec![
                NestedField::required(1, "a", PrimitiveType::Int),
                NestedField::optional(2, "a", PrimitiveType::Int),
            ])
            .build()
            .unwrap_err();
        assert_eq!(err.key.as_deref(), Some("a"));
    }

    #[test]
    fn test_identifier_fields_must_be_required_primitives() {
        let optional = Schema::builder()
            .with_fields(vec![NestedField::optional(1, "a", PrimitiveType::Int)])
            .with_identifier_field_ids([1])
            .build();
        assert!(optional.is_err());

        let double = Schema::builder()
            .with_fields(vec![NestedField::required(1, "a", PrimitiveType::Double)])
            .with_identifier_field_ids([1])
            .build();
        assert!(double.is_err());

        let missing = Schema::builder()
            .with_fields(vec![NestedField::required(1, "a", PrimitiveType::Int)])
            .with_identifier_field_ids([7])
            .build();
        assert!(missing.is_err());
    }

    #[test]
    fn test_lookup_nested_fields() {
        let schema = Schema::builder()
            .with_fields(vec![NestedField::required(
                1,
                "location",
                StructType::new(vec![
                    NestedField::required(2, "lat", PrimitiveType::Double),
                    NestedField::required(3, "long", PrimitiveType::Double),
                ]),
            )])
            .build()
            .unwrap();
        assert_eq!(schema.field_by_name("location.lat").unwrap().id, 2);
        assert_eq!(schema.name_by_id(3).as_deref(), Some("location.long"));
        assert!(schema.field_by_name("lat").is_none());
    }

    #[test]
    fn test_assign_fresh_ids() {
        let schema = Schema::builder()
            .with_schema_id(4)
            .with_fields(vec![
                NestedField::required(10, "a", PrimitiveType::Int),
                NestedField::optional(20, "b", PrimitiveType::String),
            ])
            .with_identifier_field_ids([10])
            .build()
            .unwrap();
        let (fresh, mapping) = assign_fresh_schema_ids(&schema).unwrap();
        assert_eq!(fresh.schema_id(), 0);
        assert_eq!(fresh.field_ids(), vec![1, 2]);
        assert_eq!(fresh.identifier_field_ids(), &[1]);
        assert_eq!(mapping[&20], 2);

        // Sequential ids survive unchanged
        let (again, _) = assign_fresh_schema_ids(&sample_schema()).unwrap();
        assert!(again.same_content(&sample_schema()));
    }
}
