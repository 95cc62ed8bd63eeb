//! Atomic metadata changes and the preconditions guarding them.
//!
//! A commit is an ordered list of [`TableRequirement`]s checked against the
//! live metadata, followed by an ordered list of [`TableUpdate`]s folded onto
//! it by [`update_table_metadata`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::spec::{FormatVersion, PartitionSpec, Schema, Snapshot, SnapshotReference, SortOrder};

mod reducer;
mod requirement;

pub use reducer::update_table_metadata;
pub use requirement::TableRequirement;

/// Refers to the schema, spec or sort order added last within the same update list.
pub const LAST_ADDED: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum TableUpdate {
    #[serde(rename_all = "kebab-case")]
    UpgradeFormatVersion { format_version: FormatVersion },
    #[serde(rename_all = "kebab-case")]
    AssignUuid { uuid: Uuid },
    #[serde(rename_all = "kebab-case")]
    AddSchema {
        schema: Schema,
        /// New high-water mark. Defaults to the highest id of the table or schema.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_column_id: Option<i32>,
    },
    /// `schema_id` [`LAST_ADDED`] selects the schema added last in the same list.
    #[serde(rename_all = "kebab-case")]
    SetCurrentSchema { schema_id: i32 },
    #[serde(rename_all = "kebab-case")]
    AddSpec { spec: PartitionSpec },
    #[serde(rename_all = "kebab-case")]
    SetDefaultSpec { spec_id: i32 },
    #[serde(rename_all = "kebab-case")]
    AddSortOrder { sort_order: SortOrder },
    #[serde(rename_all = "kebab-case")]
    SetDefaultSortOrder { sort_order_id: i32 },
    #[serde(rename_all = "kebab-case")]
    AddSnapshot { snapshot: Snapshot },
    /// Setting the `main` branch also sets the current snapshot.
    #[serde(rename_all = "kebab-case")]
    SetSnapshotRef {
        ref_name: String,
        #[serde(flatten)]
        reference: SnapshotReference,
    },
    #[serde(rename_all = "kebab-case")]
    RemoveSnapshots { snapshot_ids: Vec<i64> },
    #[serde(rename_all = "kebab-case")]
    RemoveSnapshotRef { ref_name: String },
    #[serde(rename_all = "kebab-case")]
    SetLocation { location: String },
    #[serde(rename_all = "kebab-case")]
    SetProperties { updates: HashMap<String, String> },
    #[serde(rename_all = "kebab-case")]
    RemoveProperties { removals: Vec<String> },
    #[serde(rename_all = "kebab-case")]
    RemovePartitionSpecs { spec_ids: Vec<i32> },
}

impl TableUpdate {
    /// Short name used in logs and error context.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            TableUpdate::UpgradeFormatVersion { .. } => "upgrade-format-version",
            TableUpdate::AssignUuid { .. } => "assign-uuid",
            TableUpdate::AddSchema { .. } => "add-schema",
            TableUpdate::SetCurrentSchema { .. } => "set-current-schema",
            TableUpdate::AddSpec { .. } => "add-spec",
            TableUpdate::SetDefaultSpec { .. } => "set-default-spec",
            TableUpdate::AddSortOrder { .. } => "add-sort-order",
            TableUpdate::SetDefaultSortOrder { .. } => "set-default-sort-order",
            TableUpdate::AddSnapshot { .. } => "add-snapshot",
            TableUpdate::SetSnapshotRef { .. } => "set-snapshot-ref",
            TableUpdate::RemoveSnapshots { .. } => "remove-snapshots",
            TableUpdate::RemoveSnapshotRef { .. } => "remove-snapshot-ref",
            TableUpdate::SetLocation { .. } => "set-location",
            TableUpdate::SetProperties { .. } => "set-properties",
            TableUpdate::RemoveProperties { .. } => "remove-properties",
            TableUpdate::RemovePartitionSpecs { .. } => "remove-partition-specs",
        }
    }
}
