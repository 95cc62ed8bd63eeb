use std::collections::HashSet;

use super::Transaction;
use crate::{
    error::ValidationError,
    spec::{ListType, MapType, NestedField, PrimitiveType, Schema, TableMetadata, Type},
    update::{LAST_ADDED, TableRequirement, TableUpdate},
};

/// Schema evolution session.
///
/// Every edit is validated against the schema as evolved so far in this
/// session. Columns are addressed by dotted path; `element`, `key` and
/// `value` address the children of lists and maps and may be omitted when
/// descending into a struct nested in a list element or map value.
///
/// ```ignore
/// let mut update = tx.update_schema();
/// update
///     .add_column("new_column", PrimitiveType::Int, None)?
///     .rename_column("x", "x_renamed")?;
/// update.commit()?;
/// ```
#[derive(Debug)]
pub struct UpdateSchema<'t> {
    transaction: &'t mut Transaction,
    fields: Vec<NestedField>,
    identifier_field_ids: Vec<i32>,
    last_column_id: i32,
    allow_incompatible_changes: bool,
}

/// The type and nullability of a named field, list element or map value.
struct Slot<'a> {
    field_type: &'a mut Type,
    required: &'a mut bool,
}

impl<'t> UpdateSchema<'t> {
    pub(crate) fn new(transaction: &'t mut Transaction) -> Self {
        let metadata = transaction.metadata();
        let schema = metadata.current_schema();
        Self {
            fields: schema.fields().to_vec(),
            identifier_field_ids: schema.identifier_field_ids().to_vec(),
            last_column_id: metadata.last_column_id(),
            allow_incompatible_changes: false,
            transaction,
        }
    }

    /// Permits changes that may break readers of existing data, such as
    /// requiring an optional column.
    pub fn allow_incompatible_changes(&mut self) -> &mut Self {
        self.allow_incompatible_changes = true;
        self
    }

    /// Adds an optional column. Nested struct ids of `field_type` are reassigned.
    pub fn add_column(
        &mut self,
        path: &str,
        field_type: impl Into<Type>,
        doc: Option<&str>,
    ) -> Result<&mut Self, ValidationError> {
        self.add(path, field_type.into(), doc, false)
    }

    /// Adds a required column. Existing data has no value for it, so this is
    /// an incompatible change.
    pub fn add_required_column(
        &mut self,
        path: &str,
        field_type: impl Into<Type>,
        doc: Option<&str>,
    ) -> Result<&mut Self, ValidationError> {
        if !self.allow_incompatible_changes {
            return Err(ValidationError::for_key(
                format!("Incompatible change: cannot add required column `{path}`"),
                path,
            ));
        }
        self.add(path, field_type.into(), doc, true)
    }

    fn add(
        &mut self,
        path: &str,
        field_type: Type,
        doc: Option<&str>,
        required: bool,
    ) -> Result<&mut Self, ValidationError> {
        let (parent, name) = match path.rsplit_once('.') {
            Some((parent, name)) => (Some(parent), name),
            None => (None, path),
        };
        if name.is_empty() {
            return Err(ValidationError::for_key(
                format!("Cannot add column with an empty name: `{path}`"),
                path,
            ));
        }

        let parent_id = parent.map(|parent| self.resolve(parent)).transpose()?;
        let container = match parent_id {
            None => &mut self.fields,
            Some(parent_id) => slot_in_fields(&mut self.fields, parent_id)
                .and_then(|slot| struct_fields_mut(slot.field_type))
                .ok_or_else(|| {
                    ValidationError::for_key(
                        format!(
                            "Cannot add column `{path}`: parent `{}` is not a struct",
                            parent.unwrap_or_default()
                        ),
                        path,
                    )
                })?,
        };
        if container.iter().any(|f| f.name == name) {
            return Err(ValidationError::for_key(
                format!("Cannot add column, name already exists: `{path}`"),
                path,
            ));
        }

        let next_id = &mut self.last_column_id;
        let mut assign = |_old: i32| {
            *next_id += 1;
            *next_id
        };
        let id = assign(0);
        let field_type = field_type.reassign_ids(&mut assign);
        container.push(NestedField {
            id,
            name: name.to_string(),
            required,
            field_type,
            doc: doc.map(ToString::to_string),
        });
        Ok(self)
    }

    /// Deletes a column and everything nested in it.
    pub fn delete_column(&mut self, path: &str) -> Result<&mut Self, ValidationError> {
        let id = self.resolve_named(path)?;
        let mut removed_ids = vec![id];
        if let Some(field) = field_mut(&mut self.fields, id) {
            field.field_type.collect_ids(&mut removed_ids);
        }

        if removed_ids
            .iter()
            .any(|id| self.identifier_field_ids.contains(id))
        {
            return Err(ValidationError::for_key(
                format!("Cannot delete identifier field `{path}`"),
                path,
            ));
        }
        let metadata = self.transaction.metadata();
        if let Some(kind) = referencing_default(metadata, &removed_ids) {
            return Err(ValidationError::for_key(
                format!("Cannot delete column `{path}`: it is referenced by the default {kind}"),
                path,
            ));
        }

        if let Some(container) = container_of(&mut self.fields, id) {
            container.retain(|f| f.id != id);
        }
        Ok(self)
    }

    pub fn rename_column(
        &mut self,
        path: &str,
        new_name: &str,
    ) -> Result<&mut Self, ValidationError> {
        if new_name.is_empty() {
            return Err(ValidationError::for_key(
                format!("Cannot rename column `{path}` to an empty name"),
                path,
            ));
        }
        let id = self.resolve_named(path)?;
        let container = self.container(path, id)?;
        if container.iter().any(|f| f.name == new_name && f.id != id) {
            return Err(ValidationError::for_key(
                format!("Cannot rename column `{path}`: name `{new_name}` already exists"),
                new_name,
            ));
        }
        if let Some(field) = container.iter_mut().find(|f| f.id == id) {
            field.name = new_name.to_string();
        }
        Ok(self)
    }

    /// Widens a primitive column, list element or map value.
    pub fn update_column_type(
        &mut self,
        path: &str,
        new_type: PrimitiveType,
    ) -> Result<&mut Self, ValidationError> {
        let id = self.resolve(path)?;
        let slot = self.slot(path, id)?;
        let Type::Primitive(current) = &*slot.field_type else {
            return Err(ValidationError::for_key(
                format!("Cannot change column type: `{path}` is not a primitive"),
                path,
            ));
        };
        if !current.is_promotable_to(&new_type) {
            return Err(ValidationError::for_key(
                format!("Cannot change column type: `{path}`: {current} -> {new_type}"),
                path,
            ));
        }
        *slot.field_type = Type::Primitive(new_type);
        Ok(self)
    }

    pub fn update_column_doc(
        &mut self,
        path: &str,
        doc: impl Into<String>,
    ) -> Result<&mut Self, ValidationError> {
        let id = self.resolve_named(path)?;
        if let Some(field) = field_mut(&mut self.fields, id) {
            field.doc = Some(doc.into());
        }
        Ok(self)
    }

    pub fn make_column_optional(&mut self, path: &str) -> Result<&mut Self, ValidationError> {
        let id = self.resolve(path)?;
        if self.identifier_field_ids.contains(&id) {
            return Err(ValidationError::for_key(
                format!("Cannot make identifier field `{path}` optional"),
                path,
            ));
        }
        *self.slot(path, id)?.required = false;
        Ok(self)
    }

    /// Requires a column. Incompatible unless the column is already required.
    pub fn require_column(&mut self, path: &str) -> Result<&mut Self, ValidationError> {
        let id = self.resolve(path)?;
        let allow_incompatible_changes = self.allow_incompatible_changes;
        let slot = self.slot(path, id)?;
        if *slot.required {
            return Ok(self);
        }
        if !allow_incompatible_changes {
            return Err(ValidationError::for_key(
                format!("Cannot change column nullability: `{path}`: optional -> required"),
                path,
            ));
        }
        *slot.required = true;
        Ok(self)
    }

    pub fn move_first(&mut self, path: &str) -> Result<&mut Self, ValidationError> {
        let id = self.resolve_named(path)?;
        let container = self.container(path, id)?;
        let field = take_field(container, id);
        container.insert(0, field);
        Ok(self)
    }

    pub fn move_before(
        &mut self,
        path: &str,
        before_path: &str,
    ) -> Result<&mut Self, ValidationError> {
        self.move_relative(path, before_path, 0)
    }

    pub fn move_after(
        &mut self,
        path: &str,
        after_path: &str,
    ) -> Result<&mut Self, ValidationError> {
        self.move_relative(path, after_path, 1)
    }

    fn move_relative(
        &mut self,
        path: &str,
        reference_path: &str,
        offset: usize,
    ) -> Result<&mut Self, ValidationError> {
        let id = self.resolve_named(path)?;
        let reference_id = self.resolve_named(reference_path)?;
        if id == reference_id {
            return Err(ValidationError::for_key(
                format!("Cannot move column `{path}` relative to itself"),
                path,
            ));
        }
        let container = self.container(path, id)?;
        if !container.iter().any(|f| f.id == reference_id) {
            return Err(ValidationError::for_key(
                format!("Cannot move column `{path}`: `{reference_path}` has a different parent"),
                path,
            ));
        }
        let field = take_field(container, id);
        let position = container
            .iter()
            .position(|f| f.id == reference_id)
            .map_or(container.len(), |p| p + offset);
        container.insert(position, field);
        Ok(self)
    }

    /// Replaces the identifier fields. Checked when the schema is built.
    pub fn set_identifier_fields<I, S>(&mut self, paths: I) -> Result<&mut Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = paths
            .into_iter()
            .map(|path| self.resolve_named(path.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.identifier_field_ids = ids;
        Ok(self)
    }

    /// Last field id assigned in this session.
    #[must_use]
    pub fn last_column_id(&self) -> i32 {
        self.last_column_id
    }

    /// The evolved schema, with the id it would receive on commit.
    pub fn apply(&self) -> Result<Schema, ValidationError> {
        let schema = Schema::builder()
            .with_fields(self.fields.clone())
            .with_identifier_field_ids(self.identifier_field_ids.clone())
            .build()?;
        let metadata = self.transaction.metadata();
        let schema_id = metadata
            .schemas()
            .iter()
            .find(|s| s.same_content(&schema))
            .map(Schema::schema_id)
            .or_else(|| metadata.highest_schema_id().map(|id| id + 1))
            .unwrap_or_default();
        Ok(schema.with_schema_id(schema_id))
    }

    /// Stages the evolved schema in the transaction.
    ///
    /// Nothing is staged if the schema did not change. A schema equal to a
    /// historical one is re-selected instead of added again.
    pub fn commit(self) -> Result<(), ValidationError> {
        let schema = self.apply()?;
        let metadata = self.transaction.metadata();
        if schema.same_content(metadata.current_schema()) {
            return Ok(());
        }

        let base = self.transaction.base_metadata();
        let mut requirements = vec![TableRequirement::CurrentSchemaIdMatch {
            current_schema_id: base.current_schema_id(),
        }];
        let reselects_existing = metadata.schema_by_id(schema.schema_id()).is_some();
        let updates = if reselects_existing {
            vec![TableUpdate::SetCurrentSchema {
                schema_id: schema.schema_id(),
            }]
        } else {
            requirements.push(TableRequirement::LastAssignedFieldIdMatch {
                last_assigned_field_id: base.last_column_id(),
            });
            vec![
                TableUpdate::AddSchema {
                    schema,
                    last_column_id: Some(self.last_column_id),
                },
                TableUpdate::SetCurrentSchema {
                    schema_id: LAST_ADDED,
                },
            ]
        };
        self.transaction.stage(updates, requirements)
    }

    fn resolve(&self, path: &str) -> Result<i32, ValidationError> {
        let segments: Vec<&str> = path.split('.').collect();
        find_in_fields(&self.fields, &segments)
            .map(|(id, _)| id)
            .ok_or_else(|| {
                ValidationError::for_key(format!("Cannot find column `{path}` in schema"), path)
            })
    }

    /// Like `resolve`, but rejects list elements and map keys or values.
    fn resolve_named(&self, path: &str) -> Result<i32, ValidationError> {
        let segments: Vec<&str> = path.split('.').collect();
        match find_in_fields(&self.fields, &segments) {
            Some((id, true)) => Ok(id),
            Some((_, false)) => Err(ValidationError::for_key(
                format!("Column `{path}` is a list element or map entry, not a named field"),
                path,
            )),
            None => Err(ValidationError::for_key(
                format!("Cannot find column `{path}` in schema"),
                path,
            )),
        }
    }

    fn container(&mut self, path: &str, id: i32) -> Result<&mut Vec<NestedField>, ValidationError> {
        container_of(&mut self.fields, id).ok_or_else(|| {
            ValidationError::for_key(format!("Cannot find parent of column `{path}`"), path)
        })
    }

    fn slot(&mut self, path: &str, id: i32) -> Result<Slot<'_>, ValidationError> {
        slot_in_fields(&mut self.fields, id).ok_or_else(|| {
            ValidationError::for_key(
                format!("Cannot change `{path}`: map keys cannot be modified"),
                path,
            )
        })
    }
}

/// Which default layout of the table references any of `ids`, if any.
fn referencing_default(metadata: &TableMetadata, ids: &[i32]) -> Option<&'static str> {
    let ids: HashSet<i32> = ids.iter().copied().collect();
    if metadata
        .default_partition_spec()
        .fields
        .iter()
        .any(|f| ids.contains(&f.source_id))
    {
        return Some("partition spec");
    }
    if metadata
        .default_sort_order()
        .fields
        .iter()
        .any(|f| ids.contains(&f.source_id))
    {
        return Some("sort order");
    }
    None
}

/// Resolves path segments to an id. The flag is `true` for named fields.
fn find_in_fields(fields: &[NestedField], segments: &[&str]) -> Option<(i32, bool)> {
    let (first, rest) = segments.split_first()?;
    let field = fields.iter().find(|f| f.name == *first)?;
    if rest.is_empty() {
        return Some((field.id, true));
    }
    find_in_type(&field.field_type, rest)
}

fn find_in_type(field_type: &Type, segments: &[&str]) -> Option<(i32, bool)> {
    let (first, rest) = segments.split_first()?;
    match field_type {
        Type::Primitive(_) => None,
        Type::Struct(s) => find_in_fields(&s.fields, segments),
        Type::List(ListType {
            element_id,
            element,
            ..
        }) => match (*first, rest.is_empty()) {
            ("element", true) => Some((*element_id, false)),
            ("element", false) => find_in_type(element, rest),
            _ => find_in_type(element, segments),
        },
        Type::Map(MapType {
            key_id,
            value_id,
            value,
            ..
        }) => match (*first, rest.is_empty()) {
            ("key", true) => Some((*key_id, false)),
            ("value", true) => Some((*value_id, false)),
            ("value", false) => find_in_type(value, rest),
            _ => find_in_type(value, segments),
        },
    }
}

/// Fields of the struct reached through `field_type`, looking through list
/// elements and map values.
fn struct_fields_mut(field_type: &mut Type) -> Option<&mut Vec<NestedField>> {
    match field_type {
        Type::Primitive(_) => None,
        Type::Struct(s) => Some(&mut s.fields),
        Type::List(l) => struct_fields_mut(&mut l.element),
        Type::Map(m) => struct_fields_mut(&mut m.value),
    }
}

/// The field list that directly contains the named field `id`.
fn container_of(fields: &mut Vec<NestedField>, id: i32) -> Option<&mut Vec<NestedField>> {
    if fields.iter().any(|f| f.id == id) {
        return Some(fields);
    }
    for field in fields.iter_mut() {
        if let Some(nested) = struct_fields_mut(&mut field.field_type) {
            if let Some(found) = container_of(nested, id) {
                return Some(found);
            }
        }
    }
    None
}

fn field_mut(fields: &mut Vec<NestedField>, id: i32) -> Option<&mut NestedField> {
    container_of(fields, id)?.iter_mut().find(|f| f.id == id)
}

fn slot_in_fields(fields: &mut [NestedField], id: i32) -> Option<Slot<'_>> {
    for field in fields.iter_mut() {
        let NestedField {
            id: field_id,
            field_type,
            required,
            ..
        } = field;
        if *field_id == id {
            return Some(Slot {
                field_type,
                required,
            });
        }
        if let Some(slot) = slot_in_type(field_type, id) {
            return Some(slot);
        }
    }
    None
}

fn slot_in_type(field_type: &mut Type, id: i32) -> Option<Slot<'_>> {
    match field_type {
        Type::Primitive(_) => None,
        Type::Struct(s) => slot_in_fields(&mut s.fields, id),
        Type::List(ListType {
            element_id,
            element_required,
            element,
        }) => {
            if *element_id == id {
                Some(Slot {
                    field_type: element.as_mut(),
                    required: element_required,
                })
            } else {
                slot_in_type(element, id)
            }
        }
        Type::Map(MapType {
            key,
            value_id,
            value_required,
            value,
            ..
        }) => {
            if *value_id == id {
                Some(Slot {
                    field_type: value.as_mut(),
                    required: value_required,
                })
            } else {
                slot_in_type(key, id).or_else(|| slot_in_type(value, id))
            }
        }
    }
}

fn take_field(container: &mut Vec<NestedField>, id: i32) -> NestedField {
    let position = container
        .iter()
        .position(|f| f.id == id)
        .unwrap_or_default();
    container.remove(position)
}
