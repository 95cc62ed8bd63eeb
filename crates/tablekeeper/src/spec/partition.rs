use std::{fmt::Display, str::FromStr};

use lazy_regex::regex_captures;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{
    schema::{Schema, primitive_source},
    types::PrimitiveType,
};
use crate::error::ValidationError;

pub const DEFAULT_PARTITION_SPEC_ID: i32 = 0;
/// Partition field ids start above this value.
pub const PARTITION_DATA_ID_START: i32 = 1000;
/// `last-partition-id` of a table that never had a partition field.
pub const UNPARTITIONED_LAST_ASSIGNED_ID: i32 = PARTITION_DATA_ID_START - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    Identity,
    Bucket(u32),
    Truncate(u32),
    Year,
    Month,
    Day,
    Hour,
    /// Always produces null. Used to retire a partition field in format v1.
    Void,
}

impl Transform {
    /// Whether the transform can be applied to a source column of type `source`.
    #[must_use]
    pub fn can_transform(&self, source: &PrimitiveType) -> bool {
        use PrimitiveType as P;
        match self {
            Transform::Identity | Transform::Void => true,
            Transform::Bucket(_) => matches!(
                source,
                P::Int
                    | P::Long
                    | P::Decimal { .. }
                    | P::Date
                    | P::Time
                    | P::Timestamp
                    | P::Timestamptz
                    | P::String
                    | P::Uuid
                    | P::Fixed(_)
                    | P::Binary
            ),
            Transform::Truncate(_) => matches!(
                source,
                P::Int | P::Long | P::Decimal { .. } | P::String | P::Binary
            ),
            Transform::Year | Transform::Month | Transform::Day => {
                matches!(source, P::Date | P::Timestamp | P::Timestamptz)
            }
            Transform::Hour => matches!(source, P::Timestamp | P::Timestamptz),
        }
    }

    /// Default partition field name for a source column.
    #[must_use]
    pub fn default_field_name(&self, source_name: &str) -> String {
        match self {
            Transform::Identity => source_name.to_string(),
            Transform::Bucket(n) => format!("{source_name}_bucket_{n}"),
            Transform::Truncate(w) => format!("{source_name}_trunc_{w}"),
            Transform::Year => format!("{source_name}_year"),
            Transform::Month => format!("{source_name}_month"),
            Transform::Day => format!("{source_name}_day"),
            Transform::Hour => format!("{source_name}_hour"),
            Transform::Void => format!("{source_name}_null"),
        }
    }
}

impl Display for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transform::Identity => write!(f, "identity"),
            Transform::Bucket(n) => write!(f, "bucket[{n}]"),
            Transform::Truncate(w) => write!(f, "truncate[{w}]"),
            Transform::Year => write!(f, "year"),
            Transform::Month => write!(f, "month"),
            Transform::Day => write!(f, "day"),
            Transform::Hour => write!(f, "hour"),
            Transform::Void => write!(f, "void"),
        }
    }
}

impl FromStr for Transform {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let transform = match s {
            "identity" => Transform::Identity,
            "year" => Transform::Year,
            "month" => Transform::Month,
            "day" => Transform::Day,
            "hour" => Transform::Hour,
            "void" => Transform::Void,
            other => {
                let invalid =
                    || ValidationError::for_key(format!("Unsupported transform `{other}`"), other);
                if let Some((_, kind, arg)) = regex_captures!(r"^(bucket|truncate)\[(\d+)\]$", other)
                {
                    let arg = arg.parse::<u32>().map_err(|_| invalid())?;
                    if arg == 0 {
                        return Err(invalid());
                    }
                    if kind == "bucket" {
                        Transform::Bucket(arg)
                    } else {
                        Transform::Truncate(arg)
                    }
                } else {
                    return Err(invalid());
                }
            }
        };
        Ok(transform)
    }
}

impl Serialize for Transform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Transform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionField {
    pub source_id: i32,
    pub field_id: i32,
    pub name: String,
    pub transform: Transform,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionSpec {
    pub spec_id: i32,
    pub fields: Vec<PartitionField>,
}

pub type PartitionSpecRef = std::sync::Arc<PartitionSpec>;

impl PartitionSpec {
    #[must_use]
    pub fn unpartitioned() -> Self {
        Self {
            spec_id: DEFAULT_PARTITION_SPEC_ID,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn new(spec_id: i32, fields: Vec<PartitionField>) -> Self {
        Self { spec_id, fields }
    }

    #[must_use]
    pub fn is_unpartitioned(&self) -> bool {
        self.fields.iter().all(|f| f.transform == Transform::Void)
    }

    #[must_use]
    pub fn highest_field_id(&self) -> Option<i32> {
        self.fields.iter().map(|f| f.field_id).max()
    }

    /// Same fields, ignoring the spec id.
    #[must_use]
    pub fn same_fields(&self, other: &PartitionSpec) -> bool {
        self.fields == other.fields
    }

    /// Checks the spec against the schema it is bound to.
    pub fn validate(&self, schema: &Schema) -> Result<(), ValidationError> {
        let mut names = std::collections::HashSet::new();
        let mut field_ids = std::collections::HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(ValidationError::new(format!(
                    "Partition field {} has an empty name",
                    field.field_id
                )));
            }
            if !names.insert(field.name.as_str()) {
                return Err(ValidationError::for_key(
                    format!("Duplicate partition field name `{}`", field.name),
                    field.name.clone(),
                ));
            }
            if !field_ids.insert(field.field_id) {
                return Err(ValidationError::for_key(
                    format!("Duplicate partition field id {}", field.field_id),
                    field.field_id.to_string(),
                ));
            }
            if field.field_id < PARTITION_DATA_ID_START {
                return Err(ValidationError::for_key(
                    format!(
                        "Partition field id {} must be at least {PARTITION_DATA_ID_START}",
                        field.field_id
                    ),
                    field.field_id.to_string(),
                ));
            }
            let Some(source) = primitive_source(schema, field.source_id) else {
                return Err(ValidationError::for_key(
                    format!(
                        "Partition field `{}` references unknown or non-primitive source field {}",
                        field.name, field.source_id
                    ),
                    field.name.clone(),
                ));
            };
            if !field.transform.can_transform(source) {
                return Err(ValidationError::for_key(
                    format!(
                        "Transform {} cannot be applied to source type {source} of partition field `{}`",
                        field.transform, field.name
                    ),
                    field.name.clone(),
                ));
            }
            // Identity partitions may reuse the name of their own source column only
            if let Some(column) = schema.field_by_name(&field.name) {
                if !(field.transform == Transform::Identity && column.id == field.source_id) {
                    return Err(ValidationError::for_key(
                        format!(
                            "Partition field name `{}` conflicts with a schema column",
                            field.name
                        ),
                        field.name.clone(),
                    ));
                }
            }
        }
        Ok(())
    }
}
