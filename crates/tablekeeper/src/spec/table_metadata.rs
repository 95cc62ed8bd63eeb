use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::{
    partition::{PartitionField, PartitionSpec, UNPARTITIONED_LAST_ASSIGNED_ID},
    properties::PROPERTY_FORMAT_VERSION,
    schema::{Schema, assign_fresh_schema_ids},
    snapshot::{MAIN_BRANCH, MetadataLog, Snapshot, SnapshotLog, SnapshotReference},
    sort::{SortField, SortOrder, UNSORTED_ORDER_ID},
};
use crate::error::ValidationError;

pub const INITIAL_SPEC_ID: i32 = 0;
pub const INITIAL_SORT_ORDER_ID: i32 = 1;
pub const INITIAL_SEQUENCE_NUMBER: i64 = 0;

pub type TableMetadataRef = Arc<TableMetadata>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum FormatVersion {
    V1 = 1,
    #[default]
    V2 = 2,
}

impl TryFrom<u8> for FormatVersion {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FormatVersion::V1),
            2 => Ok(FormatVersion::V2),
            other => Err(ValidationError::for_key(
                format!("Unsupported format version {other}"),
                PROPERTY_FORMAT_VERSION,
            )),
        }
    }
}

impl From<FormatVersion> for u8 {
    fn from(value: FormatVersion) -> Self {
        value as u8
    }
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", u8::from(*self))
    }
}

impl std::str::FromStr for FormatVersion {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let version = s.trim().parse::<u8>().map_err(|_| {
            ValidationError::for_key(
                format!("Invalid format version `{s}`"),
                PROPERTY_FORMAT_VERSION,
            )
        })?;
        FormatVersion::try_from(version)
    }
}

/// One immutable generation of a table's structure.
///
/// Instances handed out by this crate are always validated: the current
/// schema, default spec and default sort order resolve, ids are unique per
/// list and `last_column_id` covers every assigned field id. Deserialization
/// runs the same validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(remote = "Self", rename_all = "kebab-case")]
pub struct TableMetadata {
    pub(crate) format_version: FormatVersion,
    pub(crate) table_uuid: Uuid,
    pub(crate) location: String,
    #[serde(default)]
    pub(crate) last_sequence_number: i64,
    pub(crate) last_updated_ms: i64,
    pub(crate) last_column_id: i32,
    pub(crate) schemas: Vec<Schema>,
    pub(crate) current_schema_id: i32,
    pub(crate) partition_specs: Vec<PartitionSpec>,
    pub(crate) default_spec_id: i32,
    pub(crate) last_partition_id: i32,
    #[serde(default)]
    pub(crate) properties: HashMap<String, String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_snapshot_id"
    )]
    pub(crate) current_snapshot_id: Option<i64>,
    #[serde(default)]
    pub(crate) snapshots: Vec<Snapshot>,
    #[serde(default)]
    pub(crate) snapshot_log: Vec<SnapshotLog>,
    #[serde(default)]
    pub(crate) metadata_log: Vec<MetadataLog>,
    pub(crate) sort_orders: Vec<SortOrder>,
    pub(crate) default_sort_order_id: i32,
    #[serde(default)]
    pub(crate) refs: HashMap<String, SnapshotReference>,
}

impl Serialize for TableMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TableMetadata::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for TableMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let metadata = TableMetadata::deserialize(deserializer)?;
        metadata.validate().map_err(serde::de::Error::custom)?;
        Ok(metadata)
    }
}

/// Some writers encode "no current snapshot" as `-1`.
fn deserialize_snapshot_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<i64>, D::Error> {
    let id = Option::<i64>::deserialize(deserializer)?;
    Ok(id.filter(|id| *id != -1))
}

impl TableMetadata {
    /// Parses and validates a metadata file.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, MetadataParseError> {
        let mut deserializer = serde_json::Deserializer::from_slice(bytes);
        let metadata =
            TableMetadata::deserialize(&mut deserializer).map_err(MetadataParseError::Json)?;
        deserializer.end().map_err(MetadataParseError::Json)?;
        metadata.validate().map_err(MetadataParseError::Invalid)?;
        Ok(metadata)
    }

    #[must_use]
    pub fn format_version(&self) -> FormatVersion {
        self.format_version
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.table_uuid
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn last_sequence_number(&self) -> i64 {
        self.last_sequence_number
    }

    #[must_use]
    pub fn last_updated_ms(&self) -> i64 {
        self.last_updated_ms
    }

    #[must_use]
    pub fn last_column_id(&self) -> i32 {
        self.last_column_id
    }

    #[must_use]
    pub fn schemas(&self) -> &[Schema] {
        &self.schemas
    }

    #[must_use]
    pub fn schema_by_id(&self, schema_id: i32) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.schema_id() == schema_id)
    }

    #[must_use]
    pub fn current_schema_id(&self) -> i32 {
        self.current_schema_id
    }

    /// # Panics
    /// Never for validated metadata.
    #[must_use]
    pub fn current_schema(&self) -> &Schema {
        self.schema_by_id(self.current_schema_id)
            .expect("Validated metadata always contains its current schema")
    }

    #[must_use]
    pub fn partition_specs(&self) -> &[PartitionSpec] {
        &self.partition_specs
    }

    #[must_use]
    pub fn partition_spec_by_id(&self, spec_id: i32) -> Option<&PartitionSpec> {
        self.partition_specs.iter().find(|s| s.spec_id == spec_id)
    }

    #[must_use]
    pub fn default_spec_id(&self) -> i32 {
        self.default_spec_id
    }

    /// # Panics
    /// Never for validated metadata.
    #[must_use]
    pub fn default_partition_spec(&self) -> &PartitionSpec {
        self.partition_spec_by_id(self.default_spec_id)
            .expect("Validated metadata always contains its default partition spec")
    }

    #[must_use]
    pub fn last_partition_id(&self) -> i32 {
        self.last_partition_id
    }

    #[must_use]
    pub fn sort_orders(&self) -> &[SortOrder] {
        &self.sort_orders
    }

    #[must_use]
    pub fn sort_order_by_id(&self, order_id: i32) -> Option<&SortOrder> {
        self.sort_orders.iter().find(|o| o.order_id == order_id)
    }

    #[must_use]
    pub fn default_sort_order_id(&self) -> i32 {
        self.default_sort_order_id
    }

    /// The unsorted order is returned when the default is the unsorted sentinel.
    #[must_use]
    pub fn default_sort_order(&self) -> SortOrder {
        self.sort_order_by_id(self.default_sort_order_id)
            .cloned()
            .unwrap_or_else(SortOrder::unsorted)
    }

    #[must_use]
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    #[must_use]
    pub fn current_snapshot_id(&self) -> Option<i64> {
        self.current_snapshot_id
    }

    #[must_use]
    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        self.current_snapshot_id
            .and_then(|id| self.snapshot_by_id(id))
    }

    #[must_use]
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    #[must_use]
    pub fn snapshot_by_id(&self, snapshot_id: i64) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.snapshot_id == snapshot_id)
    }

    #[must_use]
    pub fn snapshot_log(&self) -> &[SnapshotLog] {
        &self.snapshot_log
    }

    #[must_use]
    pub fn metadata_log(&self) -> &[MetadataLog] {
        &self.metadata_log
    }

    #[must_use]
    pub fn refs(&self) -> &HashMap<String, SnapshotReference> {
        &self.refs
    }

    #[must_use]
    pub fn highest_schema_id(&self) -> Option<i32> {
        self.schemas.iter().map(Schema::schema_id).max()
    }

    /// Checks every structural invariant of a metadata generation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.location.is_empty() {
            return Err(ValidationError::new("Table location must not be empty"));
        }
        if self.location.ends_with('/') {
            return Err(ValidationError::for_key(
                format!(
                    "Table location `{}` must not end with a separator",
                    self.location
                ),
                self.location.clone(),
            ));
        }

        check_unique_ids("schema", self.schemas.iter().map(Schema::schema_id))?;
        check_unique_ids("partition spec", self.partition_specs.iter().map(|s| s.spec_id))?;
        check_unique_ids("sort order", self.sort_orders.iter().map(|o| o.order_id))?;

        if self.schema_by_id(self.current_schema_id).is_none() {
            return Err(ValidationError::for_key(
                format!("Current schema {} does not exist", self.current_schema_id),
                self.current_schema_id.to_string(),
            ));
        }
        if self.partition_spec_by_id(self.default_spec_id).is_none() {
            return Err(ValidationError::for_key(
                format!("Default partition spec {} does not exist", self.default_spec_id),
                self.default_spec_id.to_string(),
            ));
        }
        if self.default_sort_order_id != UNSORTED_ORDER_ID
            && self.sort_order_by_id(self.default_sort_order_id).is_none()
        {
            return Err(ValidationError::for_key(
                format!(
                    "Default sort order {} does not exist",
                    self.default_sort_order_id
                ),
                self.default_sort_order_id.to_string(),
            ));
        }

        let all_field_ids: HashSet<i32> = self.schemas.iter().flat_map(Schema::field_ids).collect();
        if let Some(max_id) = all_field_ids.iter().max() {
            if *max_id > self.last_column_id {
                return Err(ValidationError::new(format!(
                    "Last column id {} is lower than assigned field id {max_id}",
                    self.last_column_id
                )));
            }
        }
        for spec in &self.partition_specs {
            for field in &spec.fields {
                if !all_field_ids.contains(&field.source_id) {
                    return Err(ValidationError::for_key(
                        format!(
                            "Partition field `{}` of spec {} references unknown field {}",
                            field.name, spec.spec_id, field.source_id
                        ),
                        field.name.clone(),
                    ));
                }
                if field.field_id > self.last_partition_id {
                    return Err(ValidationError::new(format!(
                        "Last partition id {} is lower than partition field id {}",
                        self.last_partition_id, field.field_id
                    )));
                }
            }
        }
        for order in &self.sort_orders {
            for field in &order.fields {
                if !all_field_ids.contains(&field.source_id) {
                    return Err(ValidationError::for_key(
                        format!(
                            "Sort order {} references unknown field {}",
                            order.order_id, field.source_id
                        ),
                        field.source_id.to_string(),
                    ));
                }
            }
        }

        check_unique_ids_i64(self.snapshots.iter().map(|s| s.snapshot_id))?;
        for (name, reference) in &self.refs {
            if self.snapshot_by_id(reference.snapshot_id).is_none() {
                return Err(ValidationError::for_key(
                    format!(
                        "Ref `{name}` points to unknown snapshot {}",
                        reference.snapshot_id
                    ),
                    name.clone(),
                ));
            }
        }
        if let Some(id) = self.current_snapshot_id {
            if self.snapshot_by_id(id).is_none() {
                return Err(ValidationError::new(format!(
                    "Current snapshot {id} does not exist"
                )));
            }
            if self
                .refs
                .get(MAIN_BRANCH)
                .is_some_and(|r| r.snapshot_id != id)
            {
                return Err(ValidationError::new(format!(
                    "Current snapshot {id} does not match the `{MAIN_BRANCH}` branch"
                )));
            }
        }
        Ok(())
    }
}

fn check_unique_ids(kind: &str, ids: impl Iterator<Item = i32>) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ValidationError::for_key(
                format!("Duplicate {kind} id {id}"),
                id.to_string(),
            ));
        }
    }
    Ok(())
}

fn check_unique_ids_i64(ids: impl Iterator<Item = i64>) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ValidationError::for_key(
                format!("Duplicate snapshot id {id}"),
                id.to_string(),
            ));
        }
    }
    Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum MetadataParseError {
    #[error(transparent)]
    Json(serde_json::Error),
    #[error(transparent)]
    Invalid(ValidationError),
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Materializes the first metadata generation of a table.
///
/// Field ids are reassigned from 1, partition and sort-order sources are
/// remapped onto the fresh ids, partition fields are numbered from 1000 and a
/// `format-version` property selects the format version without being stored.
pub fn new_table_metadata(
    schema: &Schema,
    partition_spec: &PartitionSpec,
    sort_order: &SortOrder,
    location: &str,
    mut properties: HashMap<String, String>,
    table_uuid: Option<Uuid>,
) -> Result<TableMetadata, ValidationError> {
    let format_version = match properties.remove(PROPERTY_FORMAT_VERSION) {
        Some(v) => v.parse::<FormatVersion>()?,
        None => FormatVersion::default(),
    };

    let (fresh_schema, id_mapping) = assign_fresh_schema_ids(schema)?;
    let remap = |source_id: i32, what: &str| {
        id_mapping.get(&source_id).copied().ok_or_else(|| {
            ValidationError::for_key(
                format!("{what} references unknown field {source_id}"),
                source_id.to_string(),
            )
        })
    };

    let mut last_partition_id = UNPARTITIONED_LAST_ASSIGNED_ID;
    let mut partition_fields = Vec::with_capacity(partition_spec.fields.len());
    for field in &partition_spec.fields {
        last_partition_id += 1;
        partition_fields.push(PartitionField {
            source_id: remap(field.source_id, "Partition field")?,
            field_id: last_partition_id,
            name: field.name.clone(),
            transform: field.transform,
        });
    }
    let fresh_spec = PartitionSpec::new(INITIAL_SPEC_ID, partition_fields);
    fresh_spec.validate(&fresh_schema)?;

    let fresh_order = if sort_order.is_unsorted() {
        SortOrder::unsorted()
    } else {
        let fields = sort_order
            .fields
            .iter()
            .map(|f| {
                Ok(SortField {
                    source_id: remap(f.source_id, "Sort field")?,
                    ..f.clone()
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;
        SortOrder::new(INITIAL_SORT_ORDER_ID, fields)
    };
    fresh_order.validate(&fresh_schema)?;

    let location = location.trim_end_matches('/').to_string();
    let metadata = TableMetadata {
        format_version,
        table_uuid: table_uuid.unwrap_or_else(Uuid::new_v4),
        location,
        last_sequence_number: INITIAL_SEQUENCE_NUMBER,
        last_updated_ms: now_ms(),
        last_column_id: fresh_schema.highest_field_id(),
        current_schema_id: fresh_schema.schema_id(),
        schemas: vec![fresh_schema],
        default_spec_id: fresh_spec.spec_id,
        partition_specs: vec![fresh_spec],
        last_partition_id,
        properties,
        current_snapshot_id: None,
        snapshots: Vec::new(),
        snapshot_log: Vec::new(),
        metadata_log: Vec::new(),
        default_sort_order_id: fresh_order.order_id,
        sort_orders: vec![fresh_order],
        refs: HashMap::new(),
    };
    metadata.validate()?;
    Ok(metadata)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::spec::{
        partition::Transform,
        sort::{NullOrder, SortDirection},
        types::{NestedField, PrimitiveType},
    };

    pub(crate) fn test_schema() -> Schema {
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

    pub(crate) fn test_metadata() -> TableMetadata {
        new_table_metadata(
            &test_schema(),
            &PartitionSpec::unpartitioned(),
            &SortOrder::unsorted(),
            "memory://warehouse/ns/t",
            HashMap::new(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_new_table_metadata_defaults() {
        let metadata = new_table_metadata(
            &test_schema(),
            &PartitionSpec::unpartitioned(),
            &SortOrder::unsorted(),
            "file:///tmp/warehouse/com/my_table/",
            HashMap::from([("owner".to_string(), "me".to_string())]),
            None,
        )
        .unwrap();
        assert_eq!(metadata.format_version(), FormatVersion::V2);
        assert_eq!(metadata.location(), "file:///tmp/warehouse/com/my_table");
        assert_eq!(metadata.current_schema_id(), 0);
        assert_eq!(metadata.last_column_id(), 3);
        assert_eq!(metadata.default_spec_id(), 0);
        assert_eq!(metadata.last_partition_id(), 999);
        assert_eq!(metadata.default_sort_order_id(), UNSORTED_ORDER_ID);
        assert_eq!(metadata.properties()["owner"], "me");
        assert!(metadata.current_snapshot().is_none());
    }

    #[test]
    fn test_new_table_metadata_remaps_sources() {
        let schema = Schema::builder()
            .with_fields(vec![
                NestedField::required(10, "id", PrimitiveType::Long),
                NestedField::optional(20, "ts", PrimitiveType::Timestamp),
            ])
            .build()
            .unwrap();
        let spec = PartitionSpec::new(
            5,
            vec![PartitionField {
                source_id: 20,
                field_id: 2000,
                name: "ts_day".to_string(),
                transform: Transform::Day,
            }],
        );
        let order = SortOrder::new(
            3,
            vec![SortField {
                source_id: 10,
                transform: Transform::Identity,
                direction: SortDirection::Ascending,
                null_order: NullOrder::First,
            }],
        );
        let metadata = new_table_metadata(
            &schema,
            &spec,
            &order,
            "memory://wh/t",
            HashMap::from([(PROPERTY_FORMAT_VERSION.to_string(), "1".to_string())]),
            None,
        )
        .unwrap();

        assert_eq!(metadata.format_version(), FormatVersion::V1);
        assert!(!metadata.properties().contains_key(PROPERTY_FORMAT_VERSION));
        let spec = metadata.default_partition_spec();
        assert_eq!(spec.spec_id, 0);
        assert_eq!(spec.fields[0].source_id, 2);
        assert_eq!(spec.fields[0].field_id, 1000);
        assert_eq!(metadata.last_partition_id(), 1000);
        let order = metadata.default_sort_order();
        assert_eq!(order.order_id, INITIAL_SORT_ORDER_ID);
        assert_eq!(order.fields[0].source_id, 1);
    }

    #[test]
    fn test_invalid_format_version_rejected() {
        let err = new_table_metadata(
            &test_schema(),
            &PartitionSpec::unpartitioned(),
            &SortOrder::unsorted(),
            "memory://wh/t",
            HashMap::from([(PROPERTY_FORMAT_VERSION.to_string(), "7".to_string())]),
            None,
        )
        .unwrap_err();
        assert_eq!(err.key.as_deref(), Some(PROPERTY_FORMAT_VERSION));
    }

    #[test]
    fn test_metadata_json_round_trip() {
        let metadata = test_metadata();
        let json = serde_json::to_vec(&metadata).unwrap();
        let parsed = TableMetadata::from_json_slice(&json).unwrap();
        assert_eq!(parsed, metadata);

        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["format-version"], 2);
        assert_eq!(value["current-schema-id"], 0);
        assert!(value.get("current-snapshot-id").is_none());
    }

    #[test]
    fn test_from_json_rejects_dangling_current_schema() {
        let mut value = serde_json::to_value(test_metadata()).unwrap();
        value["current-schema-id"] = serde_json::json!(9);
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            TableMetadata::from_json_slice(&bytes),
            Err(MetadataParseError::Invalid(_))
        ));
        let err = serde_json::from_slice::<TableMetadata>(&bytes).unwrap_err();
        assert!(err.to_string().contains("Current schema 9 does not exist"), "{err}");
    }
}
