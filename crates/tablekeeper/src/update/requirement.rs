use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::RequirementFailed, spec::TableMetadata};

/// A precondition on the live metadata of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TableRequirement {
    /// The table must not exist yet.
    #[serde(rename = "assert-create")]
    NotExist,
    #[serde(rename = "assert-table-uuid")]
    UuidMatch { uuid: Uuid },
    /// `snapshot_id: None` asserts that the ref does not exist.
    #[serde(rename = "assert-ref-snapshot-id")]
    RefSnapshotIdMatch {
        r#ref: String,
        #[serde(rename = "snapshot-id")]
        snapshot_id: Option<i64>,
    },
    #[serde(rename = "assert-last-assigned-field-id")]
    LastAssignedFieldIdMatch {
        #[serde(rename = "last-assigned-field-id")]
        last_assigned_field_id: i32,
    },
    #[serde(rename = "assert-current-schema-id")]
    CurrentSchemaIdMatch {
        #[serde(rename = "current-schema-id")]
        current_schema_id: i32,
    },
    #[serde(rename = "assert-last-assigned-partition-id")]
    LastAssignedPartitionIdMatch {
        #[serde(rename = "last-assigned-partition-id")]
        last_assigned_partition_id: i32,
    },
    #[serde(rename = "assert-default-spec-id")]
    DefaultSpecIdMatch {
        #[serde(rename = "default-spec-id")]
        default_spec_id: i32,
    },
    #[serde(rename = "assert-default-sort-order-id")]
    DefaultSortOrderIdMatch {
        #[serde(rename = "default-sort-order-id")]
        default_sort_order_id: i32,
    },
}

impl TableRequirement {
    /// Checks the requirement against the live metadata, `None` if the table does not exist.
    pub fn check(&self, metadata: Option<&TableMetadata>) -> Result<(), RequirementFailed> {
        let Some(metadata) = metadata else {
            return match self {
                TableRequirement::NotExist => Ok(()),
                _ => Err(RequirementFailed::new(
                    "Table does not exist, but the requirement expects existing metadata",
                )),
            };
        };

        match self {
            TableRequirement::NotExist => Err(RequirementFailed::new(format!(
                "Table with uuid {} already exists",
                metadata.uuid()
            ))),
            TableRequirement::UuidMatch { uuid } => {
                if metadata.uuid() != *uuid {
                    return Err(RequirementFailed::new(format!(
                        "Table UUID does not match: expected {uuid}, found {}",
                        metadata.uuid()
                    )));
                }
                Ok(())
            }
            TableRequirement::RefSnapshotIdMatch {
                r#ref,
                snapshot_id,
            } => {
                let current = metadata.refs().get(r#ref).map(|r| r.snapshot_id);
                match (snapshot_id, current) {
                    (Some(expected), Some(found)) if *expected != found => {
                        Err(RequirementFailed::new(format!(
                            "Branch or tag `{ref}`'s snapshot has changed: expected id {expected}, found {found}"
                        )))
                    }
                    (Some(expected), None) => Err(RequirementFailed::new(format!(
                        "Branch or tag `{ref}` is missing, expected snapshot id {expected}"
                    ))),
                    (None, Some(found)) => Err(RequirementFailed::new(format!(
                        "Branch or tag `{ref}` was created concurrently, found snapshot id {found}"
                    ))),
                    _ => Ok(()),
                }
            }
            TableRequirement::LastAssignedFieldIdMatch {
                last_assigned_field_id,
            } => {
                if metadata.last_column_id() != *last_assigned_field_id {
                    return Err(RequirementFailed::new(format!(
                        "Table last assigned field id has changed: expected {last_assigned_field_id}, found {}",
                        metadata.last_column_id()
                    )));
                }
                Ok(())
            }
            TableRequirement::CurrentSchemaIdMatch { current_schema_id } => {
                if metadata.current_schema_id() != *current_schema_id {
                    return Err(RequirementFailed::new(format!(
                        "Table current schema id has changed: expected {current_schema_id}, found {}",
                        metadata.current_schema_id()
                    )));
                }
                Ok(())
            }
            TableRequirement::LastAssignedPartitionIdMatch {
                last_assigned_partition_id,
            } => {
                if metadata.last_partition_id() != *last_assigned_partition_id {
                    return Err(RequirementFailed::new(format!(
                        "Table last assigned partition id has changed: expected {last_assigned_partition_id}, found {}",
                        metadata.last_partition_id()
                    )));
                }
                Ok(())
            }
            TableRequirement::DefaultSpecIdMatch { default_spec_id } => {
                if metadata.default_spec_id() != *default_spec_id {
                    return Err(RequirementFailed::new(format!(
                        "Table default spec id has changed: expected {default_spec_id}, found {}",
                        metadata.default_spec_id()
                    )));
                }
                Ok(())
            }
            TableRequirement::DefaultSortOrderIdMatch {
                default_sort_order_id,
            } => {
                if metadata.default_sort_order_id() != *default_sort_order_id {
                    return Err(RequirementFailed::new(format!(
                        "Table default sort order id has changed: expected {default_sort_order_id}, found {}",
                        metadata.default_sort_order_id()
                    )));
                }
                Ok(())
            }
        }
    }

    /// Two requirements guard the same piece of state.
    #[must_use]
    pub(crate) fn guards_same_state(&self, other: &TableRequirement) -> bool {
        match (self, other) {
            (
                TableRequirement::RefSnapshotIdMatch { r#ref: a, .. },
                TableRequirement::RefSnapshotIdMatch { r#ref: b, .. },
            ) => a == b,
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}
