//! The table metadata model: types, schemas, partitioning, sort orders,
//! snapshots and the metadata generation that ties them together.

mod partition;
mod properties;
mod schema;
mod snapshot;
mod sort;
mod table_metadata;
mod types;

pub use partition::{
    DEFAULT_PARTITION_SPEC_ID, PARTITION_DATA_ID_START, PartitionField, PartitionSpec,
    PartitionSpecRef, Transform, UNPARTITIONED_LAST_ASSIGNED_ID,
};
pub use properties::{
    PROPERTY_FORMAT_VERSION, PROPERTY_METADATA_DELETE_AFTER_COMMIT_ENABLED,
    PROPERTY_METADATA_DELETE_AFTER_COMMIT_ENABLED_DEFAULT,
    PROPERTY_METADATA_PREVIOUS_VERSIONS_MAX, PROPERTY_METADATA_PREVIOUS_VERSIONS_MAX_DEFAULT,
    PropertyValue, RESERVED_PROPERTIES, stringify_properties,
};
pub(crate) use properties::property_or_default;
pub use schema::{DEFAULT_SCHEMA_ID, Schema, SchemaBuilder, SchemaRef};
pub(crate) use schema::primitive_source;
pub use snapshot::{
    MAIN_BRANCH, MetadataLog, Operation, Snapshot, SnapshotLog, SnapshotReference,
    SnapshotRetention, Summary,
};
pub use sort::{NullOrder, SortDirection, SortField, SortOrder, SortOrderRef, UNSORTED_ORDER_ID};
pub(crate) use table_metadata::now_ms;
#[cfg(test)]
pub(crate) use table_metadata::tests::{test_metadata, test_schema};
pub use table_metadata::{
    FormatVersion, INITIAL_SORT_ORDER_ID, INITIAL_SPEC_ID, MetadataParseError, TableMetadata,
    TableMetadataRef, new_table_metadata,
};
pub use types::{
    ListType, MAX_DECIMAL_PRECISION, MapType, NestedField, PrimitiveType, StructType, Type,
};
pub(crate) use types::reassign_field_ids;
