use std::sync::Arc;

use bytes::Bytes;
use lazy_regex::regex_captures;
use tablekeeper_io::{ErrorKind, IOError, Location, Storage, StorageBackend, WritePrecondition};
use uuid::Uuid;

use super::{
    TableCreation,
    cache::{metadata_cache_get, metadata_cache_insert, metadata_cache_invalidate},
    default_table_location, parse_location,
};
use crate::{
    error::{CommitTableError, SerializationError, StorageError, ValidationError},
    identifier::TableIdent,
    spec::{
        MetadataLog, MetadataParseError, PROPERTY_METADATA_DELETE_AFTER_COMMIT_ENABLED,
        PROPERTY_METADATA_DELETE_AFTER_COMMIT_ENABLED_DEFAULT,
        PROPERTY_METADATA_PREVIOUS_VERSIONS_MAX, PROPERTY_METADATA_PREVIOUS_VERSIONS_MAX_DEFAULT,
        PartitionSpec, SortOrder, TableMetadata, TableMetadataRef, new_table_metadata,
        property_or_default, stringify_properties,
    },
    update::{TableRequirement, TableUpdate, update_table_metadata},
};

pub(super) const METADATA_DIR: &str = "metadata";
pub(super) const INITIAL_METADATA_VERSION: u64 = 1;

/// `{table location}/metadata/{version:05}-{uuid}.metadata.json`
pub(super) fn metadata_location_for_version(
    table_location: &str,
    version: u64,
) -> Result<Location, ValidationError> {
    let mut location = parse_location(table_location)?;
    location
        .push(METADATA_DIR)
        .push(&format!("{version:05}-{}.metadata.json", Uuid::now_v7()));
    Ok(location)
}

/// Version encoded in a metadata file name. Unrecognized names count as version 0.
pub(super) fn parse_metadata_version(metadata_location: &Location) -> u64 {
    let Some(file_name) = metadata_location.file_name() else {
        return 0;
    };
    let version = regex_captures!(r"^(\d+)-[0-9a-fA-F-]+\.metadata\.json$", file_name)
        .or_else(|| regex_captures!(r"^v(\d+)\.metadata\.json$", file_name))
        .map(|(_, version)| version);
    version.and_then(|v| v.parse().ok()).unwrap_or_else(|| {
        tracing::debug!(
            "Metadata file name {file_name} carries no version, treating it as version 0"
        );
        0
    })
}

pub(super) fn next_metadata_location(
    table_location: &str,
    live_location: &Location,
) -> Result<Location, ValidationError> {
    metadata_location_for_version(table_location, parse_metadata_version(live_location) + 1)
}

/// First metadata generation of a new table and the location it is written to.
pub(super) fn create_metadata(
    creation: TableCreation,
    warehouse: &Location,
) -> Result<(TableMetadata, Location), ValidationError> {
    let TableCreation {
        identifier,
        schema,
        location,
        partition_spec,
        sort_order,
        properties,
        uuid,
    } = creation;

    let properties = stringify_properties(properties)?;
    let location = match location {
        Some(location) => parse_location(location.trim_end_matches('/'))?,
        None => default_table_location(warehouse, &identifier),
    };
    let metadata = new_table_metadata(
        &schema,
        &partition_spec.unwrap_or_else(PartitionSpec::unpartitioned),
        &sort_order.unwrap_or_else(SortOrder::unsorted),
        location.as_str(),
        properties,
        uuid,
    )?;
    let metadata_location =
        metadata_location_for_version(metadata.location(), INITIAL_METADATA_VERSION)?;
    Ok((metadata, metadata_location))
}

#[derive(Debug)]
pub(super) struct StagedCommit {
    pub(super) metadata: TableMetadata,
    /// Metadata log entries trimmed by this commit.
    pub(super) expired: Vec<MetadataLog>,
}

/// Checks `requirements` against the live generation and folds `updates`
/// onto it. Returns `None` if the result equals the live generation.
pub(super) fn stage_commit(
    table: &TableIdent,
    live: &TableMetadata,
    live_location: &Location,
    requirements: &[TableRequirement],
    updates: &[TableUpdate],
) -> Result<Option<StagedCommit>, CommitTableError> {
    for requirement in requirements {
        requirement
            .check(Some(live))
            .map_err(|e| e.with_table(table.clone()))?;
    }

    let mut metadata = update_table_metadata(live, updates)?;
    if metadata == *live {
        tracing::debug!("Commit on table {table} leaves the metadata unchanged");
        return Ok(None);
    }

    metadata.metadata_log.push(MetadataLog {
        metadata_file: live_location.to_string(),
        timestamp_ms: live.last_updated_ms(),
    });
    let max_entries = property_or_default(
        metadata.properties(),
        PROPERTY_METADATA_PREVIOUS_VERSIONS_MAX,
        PROPERTY_METADATA_PREVIOUS_VERSIONS_MAX_DEFAULT,
    )
    .max(1);
    let excess = metadata.metadata_log.len().saturating_sub(max_entries);
    let expired = metadata.metadata_log.drain(..excess).collect();

    tracing::debug!(
        "Staged commit on table {table} with {} updates and {} requirements",
        updates.len(),
        requirements.len()
    );
    Ok(Some(StagedCommit { metadata, expired }))
}

/// Storage for `location`: the catalog's shared backend if the scheme matches
/// the warehouse, a fresh backend otherwise.
pub(super) fn storage_for(
    shared: &StorageBackend,
    warehouse: &Location,
    location: &Location,
) -> Result<StorageBackend, StorageError> {
    if location.scheme() == warehouse.scheme() {
        Ok(shared.clone())
    } else {
        Ok(StorageBackend::for_location(location)?)
    }
}

/// Root location of the table described by `metadata`.
pub(super) fn table_location(metadata: &TableMetadata) -> Result<Location, StorageError> {
    Location::parse_value(metadata.location()).map_err(|e| {
        StorageError::new(IOError::new(
            ErrorKind::ConfigInvalid,
            format!("Invalid table location: {e}"),
            metadata.location(),
        ))
    })
}

/// Writes a new generation. Existing files are never overwritten.
///
/// The generation is not cached until the caller has made it visible with
/// [`publish_metadata`].
pub(super) async fn write_metadata<E>(
    io: &StorageBackend,
    location: &Location,
    metadata: TableMetadataRef,
) -> Result<(), E>
where
    E: From<StorageError> + From<SerializationError>,
{
    let bytes = serde_json::to_vec(metadata.as_ref())
        .map_err(|e| SerializationError::new(location.as_str(), e))?;
    io.write(location, Bytes::from(bytes), WritePrecondition::DoesNotExist)
        .await
        .map_err(StorageError::new)?;
    Ok(())
}

/// Caches a generation once the table pointer names it.
pub(super) async fn publish_metadata(location: &Location, metadata: TableMetadataRef) {
    metadata_cache_insert(location.as_str(), metadata).await;
}

pub(super) async fn read_metadata<E>(
    io: &StorageBackend,
    location: &Location,
) -> Result<TableMetadataRef, E>
where
    E: From<StorageError> + From<SerializationError>,
{
    if let Some(metadata) = metadata_cache_get(location.as_str()).await {
        return Ok(metadata);
    }
    let bytes = io.read(location).await.map_err(StorageError::new)?;
    let metadata = TableMetadata::from_json_slice(&bytes).map_err(|e| {
        let source = match e {
            MetadataParseError::Json(e) => e,
            MetadataParseError::Invalid(e) => <serde_json::Error as serde::de::Error>::custom(e),
        };
        SerializationError::new(location.as_str(), source)
    })?;
    let metadata = Arc::new(metadata);
    metadata_cache_insert(location.as_str(), metadata.clone()).await;
    Ok(metadata)
}

/// Removes a generation that lost the pointer swap.
pub(super) async fn delete_orphan(io: &StorageBackend, location: &Location) {
    metadata_cache_invalidate(location.as_str()).await;
    if let Err(e) = io.delete(location).await {
        tracing::warn!("Failed to delete orphaned metadata file {location}: {e}");
    }
}

/// Deletes metadata files trimmed from the log, if the table opts in.
pub(super) async fn delete_expired(
    io: &StorageBackend,
    metadata: &TableMetadata,
    expired: &[MetadataLog],
) {
    let enabled = property_or_default(
        metadata.properties(),
        PROPERTY_METADATA_DELETE_AFTER_COMMIT_ENABLED,
        PROPERTY_METADATA_DELETE_AFTER_COMMIT_ENABLED_DEFAULT,
    );
    if !enabled {
        return;
    }
    let locations: Vec<Location> = expired
        .iter()
        .filter_map(|entry| match Location::parse_value(&entry.metadata_file) {
            Ok(location) => Some(location),
            Err(e) => {
                tracing::warn!(
                    "Skipping deletion of expired metadata file {}: {e}",
                    entry.metadata_file
                );
                None
            }
        })
        .collect();
    futures::future::join_all(locations.iter().map(|location| async move {
        metadata_cache_invalidate(location.as_str()).await;
        if let Err(e) = io.delete(location).await {
            tracing::warn!("Failed to delete expired metadata file {location}: {e}");
        }
    }))
    .await;
}

/// Drops the current generation and every logged one from the cache.
pub(super) async fn forget_generations(metadata: &TableMetadata, metadata_location: &Location) {
    metadata_cache_invalidate(metadata_location.as_str()).await;
    for entry in metadata.metadata_log() {
        metadata_cache_invalidate(&entry.metadata_file).await;
    }
}
