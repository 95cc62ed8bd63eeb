use std::{fmt::Display, str::FromStr};

use lazy_regex::regex_captures;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

pub const MAX_DECIMAL_PRECISION: u32 = 38;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Boolean,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    Long,
    Float,
    Double,
    Decimal {
        precision: u32,
        scale: u32,
    },
    Date,
    Time,
    Timestamp,
    Timestamptz,
    String,
    Uuid,
    Fixed(u64),
    Binary,
}

impl PrimitiveType {
    /// Whether values of `self` can be read as `target` without loss.
    ///
    /// Allowed: identity, `int -> long`, `float -> double` and
    /// `decimal(P, S) -> decimal(P', S)` with `P' >= P`.
    #[must_use]
    pub fn is_promotable_to(&self, target: &PrimitiveType) -> bool {
        match (self, target) {
            (a, b) if a == b => true,
            (PrimitiveType::Int, PrimitiveType::Long)
            | (PrimitiveType::Float, PrimitiveType::Double) => true,
            (
                PrimitiveType::Decimal { precision, scale },
                PrimitiveType::Decimal {
                    precision: target_precision,
                    scale: target_scale,
                },
            ) => scale == target_scale && target_precision >= precision,
            _ => false,
        }
    }

    /// Floating point types cannot serve as identifier fields.
    #[must_use]
    pub fn is_floating_point(&self) -> bool {
        matches!(self, PrimitiveType::Float | PrimitiveType::Double)
    }
}

impl Display for PrimitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimitiveType::Boolean => write!(f, "boolean"),
            PrimitiveType::Int => write!(f, "int"),
            PrimitiveType::Long => write!(f, "long"),
            PrimitiveType::Float => write!(f, "float"),
            PrimitiveType::Double => write!(f, "double"),
            PrimitiveType::Decimal { precision, scale } => {
                write!(f, "decimal({precision},{scale})")
            }
            PrimitiveType::Date => write!(f, "date"),
            PrimitiveType::Time => write!(f, "time"),
            PrimitiveType::Timestamp => write!(f, "timestamp"),
            PrimitiveType::Timestamptz => write!(f, "timestamptz"),
            PrimitiveType::String => write!(f, "string"),
            PrimitiveType::Uuid => write!(f, "uuid"),
            PrimitiveType::Fixed(length) => write!(f, "fixed[{length}]"),
            PrimitiveType::Binary => write!(f, "binary"),
        }
    }
}

impl FromStr for PrimitiveType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let primitive = match s {
            "boolean" => PrimitiveType::Boolean,
            "int" => PrimitiveType::Int,
            "long" => PrimitiveType::Long,
            "float" => PrimitiveType::Float,
            "double" => PrimitiveType::Double,
            "date" => PrimitiveType::Date,
            "time" => PrimitiveType::Time,
            "timestamp" => PrimitiveType::Timestamp,
            "timestamptz" => PrimitiveType::Timestamptz,
            "string" => PrimitiveType::String,
            "uuid" => PrimitiveType::Uuid,
            "binary" => PrimitiveType::Binary,
            other => {
                if let Some((_, precision, scale)) =
                    regex_captures!(r"^decimal\(\s*(\d+)\s*,\s*(\d+)\s*\)$", other)
                {
                    let precision = precision.parse::<u32>().map_err(|_| invalid_type(other))?;
                    let scale = scale.parse::<u32>().map_err(|_| invalid_type(other))?;
                    if precision == 0 || precision > MAX_DECIMAL_PRECISION || scale > precision {
                        return Err(invalid_type(other));
                    }
                    PrimitiveType::Decimal { precision, scale }
                } else if let Some((_, length)) = regex_captures!(r"^fixed\[\s*(\d+)\s*\]$", other)
                {
                    PrimitiveType::Fixed(length.parse().map_err(|_| invalid_type(other))?)
                } else {
                    return Err(invalid_type(other));
                }
            }
        };
        Ok(primitive)
    }
}

fn invalid_type(value: &str) -> ValidationError {
    ValidationError::for_key(format!("Unsupported primitive type `{value}`"), value)
}

impl Serialize for PrimitiveType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PrimitiveType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Type {
    Primitive(PrimitiveType),
    Struct(StructType),
    List(ListType),
    Map(MapType),
}

impl Type {
    #[must_use]
    pub fn as_primitive(&self) -> Option<&PrimitiveType> {
        match self {
            Type::Primitive(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self, Type::Primitive(_))
    }

    /// Every field id declared inside this type, at any depth.
    pub(crate) fn collect_ids(&self, ids: &mut Vec<i32>) {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        ids.extend(fields.into_iter().map(|(id, _)| id));
    }

    /// Like [`Type::collect_ids`], paired with the type declared for each id.
    pub(crate) fn collect_fields<'a>(&'a self, out: &mut Vec<(i32, &'a Type)>) {
        match self {
            Type::Primitive(_) => {}
            Type::Struct(s) => {
                for field in &s.fields {
                    out.push((field.id, &field.field_type));
                    field.field_type.collect_fields(out);
                }
            }
            Type::List(l) => {
                out.push((l.element_id, l.element.as_ref()));
                l.element.collect_fields(out);
            }
            Type::Map(m) => {
                out.push((m.key_id, m.key.as_ref()));
                out.push((m.value_id, m.value.as_ref()));
                m.key.collect_fields(out);
                m.value.collect_fields(out);
            }
        }
    }

    /// Rebuilds the type with ids drawn from `next_id`, which receives the old id.
    /// Fields of a struct receive their ids before any nested type does.
    pub(crate) fn reassign_ids(&self, next_id: &mut dyn FnMut(i32) -> i32) -> Type {
        match self {
            Type::Primitive(p) => Type::Primitive(p.clone()),
            Type::Struct(s) => Type::Struct(StructType::new(reassign_field_ids(
                &s.fields, next_id,
            ))),
            Type::List(l) => {
                let element_id = next_id(l.element_id);
                Type::List(ListType {
                    element_id,
                    element_required: l.element_required,
                    element: Box::new(l.element.reassign_ids(next_id)),
                })
            }
            Type::Map(m) => {
                let key_id = next_id(m.key_id);
                let value_id = next_id(m.value_id);
                Type::Map(MapType {
                    key_id,
                    key: Box::new(m.key.reassign_ids(next_id)),
                    value_id,
                    value_required: m.value_required,
                    value: Box::new(m.value.reassign_ids(next_id)),
                })
            }
        }
    }
}

pub(crate) fn reassign_field_ids(
    fields: &[NestedField],
    next_id: &mut dyn FnMut(i32) -> i32,
) -> Vec<NestedField> {
    let ids: Vec<i32> = fields.iter().map(|f| next_id(f.id)).collect();
    fields
        .iter()
        .zip(ids)
        .map(|(field, id)| NestedField {
            id,
            name: field.name.clone(),
            required: field.required,
            field_type: field.field_type.reassign_ids(next_id),
            doc: field.doc.clone(),
        })
        .collect()
}

impl Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Primitive(p) => write!(f, "{p}"),
            Type::Struct(s) => {
                write!(f, "struct<")?;
                for (i, field) in s.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.field_type)?;
                }
                write!(f, ">")
            }
            Type::List(l) => write!(f, "list<{}>", l.element),
            Type::Map(m) => write!(f, "map<{}, {}>", m.key, m.value),
        }
    }
}

impl From<PrimitiveType> for Type {
    fn from(value: PrimitiveType) -> Self {
        Type::Primitive(value)
    }
}

impl From<StructType> for Type {
    fn from(value: StructType) -> Self {
        Type::Struct(value)
    }
}

impl From<ListType> for Type {
    fn from(value: ListType) -> Self {
        Type::List(value)
    }
}

impl From<MapType> for Type {
    fn from(value: MapType) -> Self {
        Type::Map(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StructTypeSerde", into = "StructTypeSerde")]
pub struct StructType {
    pub fields: Vec<NestedField>,
}

impl StructType {
    #[must_use]
    pub fn new(fields: Vec<NestedField>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn field_by_name(&self, name: &str) -> Option<&NestedField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Serialize, Deserialize)]
struct StructTypeSerde {
    #[serde(rename = "type")]
    kind: String,
    fields: Vec<NestedField>,
}

impl TryFrom<StructTypeSerde> for StructType {
    type Error = String;

    fn try_from(value: StructTypeSerde) -> Result<Self, Self::Error> {
        if value.kind != "struct" {
            return Err(format!("Expected type `struct`, got `{}`", value.kind));
        }
        Ok(StructType::new(value.fields))
    }
}

impl From<StructType> for StructTypeSerde {
    fn from(value: StructType) -> Self {
        Self {
            kind: "struct".to_string(),
            fields: value.fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ListTypeSerde", into = "ListTypeSerde")]
pub struct ListType {
    pub element_id: i32,
    pub element_required: bool,
    pub element: Box<Type>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ListTypeSerde {
    #[serde(rename = "type")]
    kind: String,
    element_id: i32,
    element_required: bool,
    element: Box<Type>,
}

impl TryFrom<ListTypeSerde> for ListType {
    type Error = String;

    fn try_from(value: ListTypeSerde) -> Result<Self, Self::Error> {
        if value.kind != "list" {
            return Err(format!("Expected type `list`, got `{}`", value.kind));
        }
        Ok(ListType {
            element_id: value.element_id,
            element_required: value.element_required,
            element: value.element,
        })
    }
}

impl From<ListType> for ListTypeSerde {
    fn from(value: ListType) -> Self {
        Self {
            kind: "list".to_string(),
            element_id: value.element_id,
            element_required: value.element_required,
            element: value.element,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MapTypeSerde", into = "MapTypeSerde")]
pub struct MapType {
    pub key_id: i32,
    pub key: Box<Type>,
    pub value_id: i32,
    pub value_required: bool,
    pub value: Box<Type>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MapTypeSerde {
    #[serde(rename = "type")]
    kind: String,
    key_id: i32,
    key: Box<Type>,
    value_id: i32,
    value_required: bool,
    value: Box<Type>,
}

impl TryFrom<MapTypeSerde> for MapType {
    type Error = String;

    fn try_from(value: MapTypeSerde) -> Result<Self, Self::Error> {
        if value.kind != "map" {
            return Err(format!("Expected type `map`, got `{}`", value.kind));
        }
        Ok(MapType {
            key_id: value.key_id,
            key: value.key,
            value_id: value.value_id,
            value_required: value.value_required,
            value: value.value,
        })
    }
}

impl From<MapType> for MapTypeSerde {
    fn from(value: MapType) -> Self {
        Self {
            kind: "map".to_string(),
            key_id: value.key_id,
            key: value.key,
            value_id: value.value_id,
            value_required: value.value_required,
            value: value.value,
        }
    }
}

/// A named column, or a named field of a struct column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NestedField {
    pub id: i32,
    pub name: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub field_type: Type,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl NestedField {
    pub fn required(id: i32, name: impl Into<String>, field_type: impl Into<Type>) -> Self {
        Self {
            id,
            name: name.into(),
            required: true,
            field_type: field_type.into(),
            doc: None,
        }
    }

    pub fn optional(id: i32, name: impl Into<String>, field_type: impl Into<Type>) -> Self {
        Self {
            id,
            name: name.into(),
            required: false,
            field_type: field_type.into(),
            doc: None,
        }
    }

    #[must_use]
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion_lattice() {
        use PrimitiveType::{Decimal, Double, Float, Int, Long, String};
        assert!(Int.is_promotable_to(&Long));
        assert!(Float.is_promotable_to(&Double));
        assert!(Long.is_promotable_to(&Long));
        assert!(!Long.is_promotable_to(&Int));
        assert!(!Int.is_promotable_to(&String));
        assert!(!Double.is_promotable_to(&Float));

        let d_10_2 = Decimal {
            precision: 10,
            scale: 2,
        };
        assert!(d_10_2.is_promotable_to(&Decimal {
            precision: 12,
            scale: 2
        }));
        assert!(!d_10_2.is_promotable_to(&Decimal {
            precision: 9,
            scale: 2
        }));
        assert!(!d_10_2.is_promotable_to(&Decimal {
            precision: 12,
            scale: 3
        }));
    }

    #[test]
    fn test_parse_primitive_types() {
        assert_eq!(
            "decimal(10, 2)".parse::<PrimitiveType>().unwrap(),
            PrimitiveType::Decimal {
                precision: 10,
                scale: 2
            }
        );
        assert_eq!(
            "fixed[16]".parse::<PrimitiveType>().unwrap(),
            PrimitiveType::Fixed(16)
        );
        assert!("decimal(40,2)".parse::<PrimitiveType>().is_err());
        assert!("varchar".parse::<PrimitiveType>().is_err());
    }

    #[test]
    fn test_nested_type_json() {
        let field = NestedField::optional(
            1,
            "points",
            ListType {
                element_id: 2,
                element_required: true,
                element: Box::new(Type::Struct(StructType::new(vec![NestedField::required(
                    3,
                    "x",
                    PrimitiveType::Long,
                )]))),
            },
        );
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 1,
                "name": "points",
                "required": false,
                "type": {
                    "type": "list",
                    "element-id": 2,
                    "element-required": true,
                    "element": {
                        "type": "struct",
                        "fields": [{"id": 3, "name": "x", "required": true, "type": "long"}]
                    }
                }
            })
        );
        let parsed: NestedField = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, field);
    }

    #[test]
    fn test_reassign_ids_assigns_struct_level_first() {
        let nested = Type::Struct(StructType::new(vec![
            NestedField::required(
                10,
                "a",
                StructType::new(vec![NestedField::required(11, "inner", PrimitiveType::Int)]),
            ),
            NestedField::optional(12, "b", PrimitiveType::String),
        ]));
        let mut next = 0;
        let reassigned = nested.reassign_ids(&mut |_| {
            next += 1;
            next
        });
        let Type::Struct(s) = reassigned else {
            panic!("expected struct");
        };
        assert_eq!(s.fields[0].id, 1);
        assert_eq!(s.fields[1].id, 2);
        let Type::Struct(inner) = &s.fields[0].field_type else {
            panic!("expected struct");
        };
        assert_eq!(inner.fields[0].id, 3);
    }
}
