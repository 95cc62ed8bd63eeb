use std::collections::HashMap;

use super::{LAST_ADDED, TableUpdate};
use crate::{
    error::ValidationError,
    spec::{
        FormatVersion, MAIN_BRANCH, PartitionSpec, RESERVED_PROPERTIES, Schema, Snapshot,
        SnapshotLog, SnapshotReference, SortOrder, TableMetadata, Type, UNSORTED_ORDER_ID, now_ms,
    },
};

/// Folds `updates` onto `base` and returns the resulting metadata generation.
///
/// The function is pure: `base` is never modified and applying no updates,
/// or updates that cancel out, yields metadata equal to `base`. The
/// `last_updated_ms` timestamp only moves when the content changes.
///
/// # Errors
/// Returns the first [`ValidationError`] raised by an update or by the
/// structural validation of the result.
pub fn update_table_metadata(
    base: &TableMetadata,
    updates: &[TableUpdate],
) -> Result<TableMetadata, ValidationError> {
    let mut reducer = MetadataReducer::new(base);
    for update in updates {
        reducer.apply(update).map_err(|e| {
            e.append_detail(format!("Failed to apply `{}` update", update.action()))
        })?;
    }
    reducer.finish(base)
}

#[derive(Debug)]
struct MetadataReducer {
    metadata: TableMetadata,
    last_added_schema_id: Option<i32>,
    last_added_spec_id: Option<i32>,
    last_added_order_id: Option<i32>,
}

impl MetadataReducer {
    fn new(base: &TableMetadata) -> Self {
        Self {
            metadata: base.clone(),
            last_added_schema_id: None,
            last_added_spec_id: None,
            last_added_order_id: None,
        }
    }

    fn finish(self, base: &TableMetadata) -> Result<TableMetadata, ValidationError> {
        let mut metadata = self.metadata;
        metadata.last_updated_ms = base.last_updated_ms;
        if metadata == *base {
            return Ok(metadata);
        }
        metadata.last_updated_ms = now_ms().max(base.last_updated_ms);
        metadata.validate()?;
        Ok(metadata)
    }

    fn apply(&mut self, update: &TableUpdate) -> Result<(), ValidationError> {
        match update {
            TableUpdate::UpgradeFormatVersion { format_version } => {
                self.upgrade_format_version(*format_version)
            }
            TableUpdate::AssignUuid { uuid } => {
                self.metadata.table_uuid = *uuid;
                Ok(())
            }
            TableUpdate::AddSchema {
                schema,
                last_column_id,
            } => self.add_schema(schema, *last_column_id),
            TableUpdate::SetCurrentSchema { schema_id } => self.set_current_schema(*schema_id),
            TableUpdate::AddSpec { spec } => self.add_spec(spec),
            TableUpdate::SetDefaultSpec { spec_id } => self.set_default_spec(*spec_id),
            TableUpdate::AddSortOrder { sort_order } => self.add_sort_order(sort_order),
            TableUpdate::SetDefaultSortOrder { sort_order_id } => {
                self.set_default_sort_order(*sort_order_id)
            }
            TableUpdate::AddSnapshot { snapshot } => self.add_snapshot(snapshot),
            TableUpdate::SetSnapshotRef {
                ref_name,
                reference,
            } => self.set_ref(ref_name, reference),
            TableUpdate::RemoveSnapshots { snapshot_ids } => {
                self.remove_snapshots(snapshot_ids);
                Ok(())
            }
            TableUpdate::RemoveSnapshotRef { ref_name } => {
                self.remove_ref(ref_name);
                Ok(())
            }
            TableUpdate::SetLocation { location } => self.set_location(location),
            TableUpdate::SetProperties { updates } => {
                if let Some(reserved) = updates
                    .keys()
                    .find(|k| RESERVED_PROPERTIES.contains(&k.as_str()))
                {
                    return Err(ValidationError::for_key(
                        format!("Table property `{reserved}` is reserved and cannot be set"),
                        reserved.clone(),
                    ));
                }
                self.metadata
                    .properties
                    .extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(())
            }
            TableUpdate::RemoveProperties { removals } => {
                for key in removals {
                    self.metadata.properties.remove(key);
                }
                Ok(())
            }
            TableUpdate::RemovePartitionSpecs { spec_ids } => {
                if spec_ids.contains(&self.metadata.default_spec_id) {
                    return Err(ValidationError::for_key(
                        format!(
                            "Cannot remove the default partition spec {}",
                            self.metadata.default_spec_id
                        ),
                        self.metadata.default_spec_id.to_string(),
                    ));
                }
                self.metadata
                    .partition_specs
                    .retain(|s| !spec_ids.contains(&s.spec_id));
                Ok(())
            }
        }
    }

    fn upgrade_format_version(&mut self, target: FormatVersion) -> Result<(), ValidationError> {
        if target < self.metadata.format_version {
            return Err(ValidationError::new(format!(
                "Cannot downgrade format version from {} to {target}",
                self.metadata.format_version
            )));
        }
        self.metadata.format_version = target;
        Ok(())
    }

    fn add_schema(
        &mut self,
        schema: &Schema,
        last_column_id: Option<i32>,
    ) -> Result<(), ValidationError> {
        let base_last_column_id = self.metadata.last_column_id;
        let schema_highest = schema.highest_field_id();
        let new_last_column_id =
            last_column_id.unwrap_or_else(|| base_last_column_id.max(schema_highest));

        if new_last_column_id < base_last_column_id {
            return Err(ValidationError::for_key(
                format!(
                    "Invalid last column id {new_last_column_id}, must be at least the current last column id {base_last_column_id}"
                ),
                new_last_column_id.to_string(),
            ));
        }
        if new_last_column_id < schema_highest {
            return Err(ValidationError::for_key(
                format!(
                    "Invalid last column id {new_last_column_id}, schema assigns field id {schema_highest}"
                ),
                new_last_column_id.to_string(),
            ));
        }
        self.metadata.last_column_id = new_last_column_id;

        if let Some(existing) = self
            .metadata
            .schemas
            .iter()
            .find(|s| s.same_content(schema))
        {
            self.last_added_schema_id = Some(existing.schema_id());
            return Ok(());
        }
        self.check_known_field_ids(schema, base_last_column_id)?;

        let schema_id = self
            .metadata
            .highest_schema_id()
            .map_or(0, |highest| highest + 1);
        self.metadata
            .schemas
            .push(schema.clone().with_schema_id(schema_id));
        self.last_added_schema_id = Some(schema_id);
        Ok(())
    }

    /// Ids up to `last_column_id` were handed out before, so they must keep
    /// naming the column they were assigned to: the most recent schema holding
    /// the id fixes the kind of type, and primitives may only be promoted.
    fn check_known_field_ids(
        &self,
        schema: &Schema,
        last_column_id: i32,
    ) -> Result<(), ValidationError> {
        let mut history: Vec<(i32, HashMap<i32, &Type>)> = self
            .metadata
            .schemas
            .iter()
            .map(|s| (s.schema_id(), s.types_by_id()))
            .collect();
        history.sort_by_key(|(schema_id, _)| std::cmp::Reverse(*schema_id));

        for (id, field_type) in schema.types_by_id() {
            if id > last_column_id {
                continue;
            }
            let Some(historic) = history.iter().find_map(|(_, types)| types.get(&id).copied())
            else {
                return Err(ValidationError::for_key(
                    format!(
                        "Field id {id} was assigned before and dropped, ids of deleted fields cannot be reused"
                    ),
                    id.to_string(),
                ));
            };
            if !is_compatible_evolution(historic, field_type) {
                return Err(ValidationError::for_key(
                    format!("Field id {id} cannot change its type from {historic} to {field_type}"),
                    id.to_string(),
                ));
            }
        }
        Ok(())
    }

    fn set_current_schema(&mut self, schema_id: i32) -> Result<(), ValidationError> {
        let schema_id = resolve_last_added(schema_id, self.last_added_schema_id, "schema")?;
        if self.metadata.schema_by_id(schema_id).is_none() {
            return Err(ValidationError::for_key(
                format!("Cannot set current schema to unknown schema {schema_id}"),
                schema_id.to_string(),
            ));
        }
        self.metadata.current_schema_id = schema_id;
        Ok(())
    }

    fn add_spec(&mut self, spec: &PartitionSpec) -> Result<(), ValidationError> {
        spec.validate(self.metadata.current_schema())?;

        if let Some(existing) = self
            .metadata
            .partition_specs
            .iter()
            .find(|s| s.same_fields(spec))
        {
            self.last_added_spec_id = Some(existing.spec_id);
            return Ok(());
        }

        let spec_id = self
            .metadata
            .partition_specs
            .iter()
            .map(|s| s.spec_id)
            .max()
            .map_or(0, |highest| highest + 1);
        if let Some(highest) = spec.highest_field_id() {
            self.metadata.last_partition_id = self.metadata.last_partition_id.max(highest);
        }
        self.metadata
            .partition_specs
            .push(PartitionSpec::new(spec_id, spec.fields.clone()));
        self.last_added_spec_id = Some(spec_id);
        Ok(())
    }

    fn set_default_spec(&mut self, spec_id: i32) -> Result<(), ValidationError> {
        let spec_id = resolve_last_added(spec_id, self.last_added_spec_id, "partition spec")?;
        if self.metadata.partition_spec_by_id(spec_id).is_none() {
            return Err(ValidationError::for_key(
                format!("Cannot set default partition spec to unknown spec {spec_id}"),
                spec_id.to_string(),
            ));
        }
        self.metadata.default_spec_id = spec_id;
        Ok(())
    }

    fn add_sort_order(&mut self, sort_order: &SortOrder) -> Result<(), ValidationError> {
        if sort_order.is_unsorted() {
            if self.metadata.sort_order_by_id(UNSORTED_ORDER_ID).is_none() {
                self.metadata.sort_orders.push(SortOrder::unsorted());
            }
            self.last_added_order_id = Some(UNSORTED_ORDER_ID);
            return Ok(());
        }

        if let Some(existing) = self
            .metadata
            .sort_orders
            .iter()
            .find(|o| o.fields == sort_order.fields)
        {
            self.last_added_order_id = Some(existing.order_id);
            return Ok(());
        }

        let order_id = self
            .metadata
            .sort_orders
            .iter()
            .map(|o| o.order_id)
            .max()
            .unwrap_or(UNSORTED_ORDER_ID)
            + 1;
        let order = SortOrder::new(order_id, sort_order.fields.clone());
        order.validate(self.metadata.current_schema())?;
        self.metadata.sort_orders.push(order);
        self.last_added_order_id = Some(order_id);
        Ok(())
    }

    fn set_default_sort_order(&mut self, order_id: i32) -> Result<(), ValidationError> {
        let order_id = resolve_last_added(order_id, self.last_added_order_id, "sort order")?;
        if order_id != UNSORTED_ORDER_ID && self.metadata.sort_order_by_id(order_id).is_none() {
            return Err(ValidationError::for_key(
                format!("Cannot set default sort order to unknown order {order_id}"),
                order_id.to_string(),
            ));
        }
        self.metadata.default_sort_order_id = order_id;
        Ok(())
    }

    fn add_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), ValidationError> {
        if self.metadata.snapshot_by_id(snapshot.snapshot_id).is_some() {
            return Err(ValidationError::for_key(
                format!("Snapshot {} already exists", snapshot.snapshot_id),
                snapshot.snapshot_id.to_string(),
            ));
        }
        if let Some(schema_id) = snapshot.schema_id {
            if self.metadata.schema_by_id(schema_id).is_none() {
                return Err(ValidationError::for_key(
                    format!(
                        "Snapshot {} references unknown schema {schema_id}",
                        snapshot.snapshot_id
                    ),
                    snapshot.snapshot_id.to_string(),
                ));
            }
        }
        if self.metadata.format_version > FormatVersion::V1
            && snapshot.parent_snapshot_id.is_some()
            && snapshot.sequence_number <= self.metadata.last_sequence_number
        {
            return Err(ValidationError::for_key(
                format!(
                    "Snapshot {} has sequence number {}, which is not newer than the last sequence number {}",
                    snapshot.snapshot_id,
                    snapshot.sequence_number,
                    self.metadata.last_sequence_number
                ),
                snapshot.snapshot_id.to_string(),
            ));
        }

        self.metadata.last_sequence_number = self
            .metadata
            .last_sequence_number
            .max(snapshot.sequence_number);
        self.metadata.snapshots.push(snapshot.clone());
        Ok(())
    }

    fn set_ref(
        &mut self,
        ref_name: &str,
        reference: &SnapshotReference,
    ) -> Result<(), ValidationError> {
        let Some(snapshot) = self.metadata.snapshot_by_id(reference.snapshot_id) else {
            return Err(ValidationError::for_key(
                format!(
                    "Cannot point ref `{ref_name}` at unknown snapshot {}",
                    reference.snapshot_id
                ),
                ref_name,
            ));
        };
        if ref_name == MAIN_BRANCH && !reference.is_branch() {
            return Err(ValidationError::for_key(
                format!("Ref `{MAIN_BRANCH}` must be a branch"),
                ref_name,
            ));
        }
        if self.metadata.refs.get(ref_name) == Some(reference) {
            return Ok(());
        }

        if ref_name == MAIN_BRANCH {
            let log_entry = SnapshotLog {
                snapshot_id: snapshot.snapshot_id,
                timestamp_ms: snapshot.timestamp_ms,
            };
            self.metadata.current_snapshot_id = Some(reference.snapshot_id);
            self.metadata.snapshot_log.push(log_entry);
        }
        self.metadata
            .refs
            .insert(ref_name.to_string(), reference.clone());
        Ok(())
    }

    fn remove_snapshots(&mut self, snapshot_ids: &[i64]) {
        self.metadata
            .snapshots
            .retain(|s| !snapshot_ids.contains(&s.snapshot_id));
        self.metadata
            .snapshot_log
            .retain(|l| !snapshot_ids.contains(&l.snapshot_id));

        let dangling_refs: Vec<String> = self
            .metadata
            .refs
            .iter()
            .filter(|(_, r)| snapshot_ids.contains(&r.snapshot_id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in dangling_refs {
            self.remove_ref(&name);
        }
        if self
            .metadata
            .current_snapshot_id
            .is_some_and(|id| snapshot_ids.contains(&id))
        {
            self.metadata.current_snapshot_id = None;
        }
    }

    fn remove_ref(&mut self, ref_name: &str) {
        if self.metadata.refs.remove(ref_name).is_some() && ref_name == MAIN_BRANCH {
            self.metadata.current_snapshot_id = None;
        }
    }

    fn set_location(&mut self, location: &str) -> Result<(), ValidationError> {
        let location = location.trim_end_matches('/');
        if location.is_empty() {
            return Err(ValidationError::new("Table location must not be empty"));
        }
        self.metadata.location = location.to_string();
        Ok(())
    }
}

fn is_compatible_evolution(historic: &Type, evolved: &Type) -> bool {
    match (historic, evolved) {
        (Type::Primitive(from), Type::Primitive(to)) => from.is_promotable_to(to),
        (Type::Struct(_), Type::Struct(_))
        | (Type::List(_), Type::List(_))
        | (Type::Map(_), Type::Map(_)) => true,
        _ => false,
    }
}

fn resolve_last_added(id: i32, last_added: Option<i32>, kind: &str) -> Result<i32, ValidationError> {
    if id != LAST_ADDED {
        return Ok(id);
    }
    last_added.ok_or_else(|| {
        ValidationError::for_key(
            format!("Cannot refer to the last added {kind}: no {kind} was added"),
            LAST_ADDED.to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::spec::{
        NestedField, NullOrder, Operation, PartitionField, PrimitiveType, SnapshotRetention,
        SortDirection, SortField, Summary, Transform, test_metadata,
    };

    fn wider_schema() -> Schema {
        Schema::builder()
            .with_schema_id(0)
            .with_fields(vec![
                NestedField::optional(1, "x", PrimitiveType::Long),
                NestedField::required(2, "y", PrimitiveType::Long).with_doc("comment"),
                NestedField::required(3, "z", PrimitiveType::Long),
                NestedField::optional(4, "new_column", PrimitiveType::Int),
            ])
            .build()
            .unwrap()
    }

    fn snapshot(id: i64, parent: Option<i64>, sequence_number: i64) -> Snapshot {
        let snapshot = Snapshot::builder()
            .snapshot_id(id)
            .sequence_number(sequence_number)
            .timestamp_ms(1_700_000_000_000 + id)
            .manifest_list(format!("memory://warehouse/ns/t/metadata/snap-{id}.avro"))
            .summary(Summary::new(Operation::Append));
        match parent {
            Some(parent) => snapshot.parent_snapshot_id(parent).build(),
            None => snapshot.build(),
        }
    }

    #[test]
    fn test_no_updates_returns_base() {
        let base = test_metadata();
        assert_eq!(update_table_metadata(&base, &[]).unwrap(), base);
    }

    #[test]
    fn test_cancelling_updates_return_base() {
        let base = test_metadata();
        let updates = [
            TableUpdate::SetProperties {
                updates: HashMap::from([("k".to_string(), "v".to_string())]),
            },
            TableUpdate::RemoveProperties {
                removals: vec!["k".to_string()],
            },
        ];
        let result = update_table_metadata(&base, &updates).unwrap();
        assert_eq!(result, base);
        assert_eq!(result.last_updated_ms(), base.last_updated_ms());
    }

    #[test]
    fn test_add_schema_and_set_last_added() {
        let base = test_metadata();
        let updates = [
            TableUpdate::AddSchema {
                schema: wider_schema(),
                last_column_id: None,
            },
            TableUpdate::SetCurrentSchema {
                schema_id: LAST_ADDED,
            },
        ];
        let result = update_table_metadata(&base, &updates).unwrap();
        assert_eq!(result.current_schema_id(), 1);
        assert_eq!(result.last_column_id(), 4);
        assert_eq!(result.schemas().len(), 2);
        assert!(result.last_updated_ms() >= base.last_updated_ms());
        // base is untouched
        assert_eq!(base.schemas().len(), 1);

        let again = update_table_metadata(&result, &updates).unwrap();
        assert_eq!(again.schemas().len(), 2);
    }

    #[test]
    fn test_add_existing_schema_reuses_id() {
        let base = test_metadata();
        let updates = [
            TableUpdate::AddSchema {
                schema: base.current_schema().clone().with_schema_id(7),
                last_column_id: None,
            },
            TableUpdate::SetCurrentSchema {
                schema_id: LAST_ADDED,
            },
        ];
        let result = update_table_metadata(&base, &updates).unwrap();
        assert_eq!(result, base);
    }

    #[test]
    fn test_last_column_id_must_not_decrease() {
        let base = test_metadata();
        let err = update_table_metadata(
            &base,
            &[TableUpdate::AddSchema {
                schema: wider_schema(),
                last_column_id: Some(2),
            }],
        )
        .unwrap_err();
        assert!(err.message.starts_with("Invalid last column id 2"));
        assert_eq!(err.stack, vec!["Failed to apply `add-schema` update"]);
    }

    fn add_current_schema(fields: Vec<NestedField>) -> [TableUpdate; 2] {
        [
            TableUpdate::AddSchema {
                schema: Schema::builder()
                    .with_schema_id(0)
                    .with_fields(fields)
                    .build()
                    .unwrap(),
                last_column_id: None,
            },
            TableUpdate::SetCurrentSchema {
                schema_id: LAST_ADDED,
            },
        ]
    }

    #[test]
    fn test_deleted_field_id_is_not_reused() {
        let base = test_metadata();
        let dropped = update_table_metadata(
            &base,
            &add_current_schema(vec![
                NestedField::optional(1, "x", PrimitiveType::Long),
                NestedField::required(2, "y", PrimitiveType::Long),
            ]),
        )
        .unwrap();
        assert_eq!(dropped.last_column_id(), 3);

        // Id 3 is still part of the first schema, a new name keeps its type.
        let renamed = update_table_metadata(
            &dropped,
            &add_current_schema(vec![
                NestedField::optional(1, "x", PrimitiveType::Long),
                NestedField::optional(3, "w", PrimitiveType::Long),
            ]),
        )
        .unwrap();
        assert_eq!(renamed.current_schema().field_by_id(3).unwrap().name, "w");

        let err = update_table_metadata(
            &dropped,
            &add_current_schema(vec![
                NestedField::optional(1, "x", PrimitiveType::Long),
                NestedField::optional(3, "w", PrimitiveType::String),
            ]),
        )
        .unwrap_err();
        assert_eq!(err.key.as_deref(), Some("3"));
        assert_eq!(
            err.message,
            "Field id 3 cannot change its type from long to string"
        );
    }

    #[test]
    fn test_unassigned_field_id_below_last_column_id_rejected() {
        let mut base = test_metadata();
        base.last_column_id = 5;
        let err = update_table_metadata(
            &base,
            &add_current_schema(vec![
                NestedField::optional(1, "x", PrimitiveType::Long),
                NestedField::optional(4, "ghost", PrimitiveType::Int),
            ]),
        )
        .unwrap_err();
        assert_eq!(err.key.as_deref(), Some("4"));
        assert_eq!(err.stack, vec!["Failed to apply `add-schema` update"]);
    }

    #[test]
    fn test_known_field_id_may_be_promoted() {
        let base = test_metadata();
        let err = update_table_metadata(
            &base,
            &add_current_schema(vec![NestedField::optional(
                1,
                "x",
                PrimitiveType::Int,
            )]),
        )
        .unwrap_err();
        assert_eq!(err.key.as_deref(), Some("1"));

        let widened = update_table_metadata(
            &base,
            &add_current_schema(vec![
                NestedField::optional(1, "x", PrimitiveType::Long),
                NestedField::required(2, "y", PrimitiveType::Long),
                NestedField::required(3, "z", PrimitiveType::Long),
                NestedField::optional(4, "amount", PrimitiveType::Float),
            ]),
        )
        .unwrap();
        let promoted = update_table_metadata(
            &widened,
            &add_current_schema(vec![
                NestedField::optional(1, "x", PrimitiveType::Long),
                NestedField::optional(4, "amount", PrimitiveType::Double),
            ]),
        )
        .unwrap();
        assert_eq!(promoted.last_column_id(), 4);
    }

    #[test]
    fn test_last_added_without_add_fails() {
        let base = test_metadata();
        for update in [
            TableUpdate::SetCurrentSchema {
                schema_id: LAST_ADDED,
            },
            TableUpdate::SetDefaultSpec {
                spec_id: LAST_ADDED,
            },
            TableUpdate::SetDefaultSortOrder {
                sort_order_id: LAST_ADDED,
            },
        ] {
            assert!(update_table_metadata(&base, &[update]).is_err());
        }
    }

    #[test]
    fn test_unknown_current_schema_fails() {
        let base = test_metadata();
        let err =
            update_table_metadata(&base, &[TableUpdate::SetCurrentSchema { schema_id: 5 }])
                .unwrap_err();
        assert_eq!(err.key.as_deref(), Some("5"));
    }

    #[test]
    fn test_add_spec_and_sort_order() {
        let base = test_metadata();
        let spec = PartitionSpec::new(
            0,
            vec![PartitionField {
                source_id: 1,
                field_id: 1000,
                name: "x_bucket_16".to_string(),
                transform: Transform::Bucket(16),
            }],
        );
        let order = SortOrder::new(
            0,
            vec![SortField {
                source_id: 2,
                transform: Transform::Identity,
                direction: SortDirection::Descending,
                null_order: NullOrder::Last,
            }],
        );
        let result = update_table_metadata(
            &base,
            &[
                TableUpdate::AddSpec { spec },
                TableUpdate::SetDefaultSpec {
                    spec_id: LAST_ADDED,
                },
                TableUpdate::AddSortOrder { sort_order: order },
                TableUpdate::SetDefaultSortOrder {
                    sort_order_id: LAST_ADDED,
                },
            ],
        )
        .unwrap();
        assert_eq!(result.default_spec_id(), 1);
        assert_eq!(result.last_partition_id(), 1000);
        assert_eq!(result.default_sort_order_id(), 1);
        assert_eq!(result.default_sort_order().fields.len(), 1);
    }

    #[test]
    fn test_remove_default_spec_fails() {
        let base = test_metadata();
        assert!(
            update_table_metadata(
                &base,
                &[TableUpdate::RemovePartitionSpecs { spec_ids: vec![0] }]
            )
            .is_err()
        );
    }

    #[test]
    fn test_format_version_cannot_be_downgraded() {
        let base = test_metadata();
        let err = update_table_metadata(
            &base,
            &[TableUpdate::UpgradeFormatVersion {
                format_version: FormatVersion::V1,
            }],
        )
        .unwrap_err();
        assert_eq!(err.message, "Cannot downgrade format version from v2 to v1");
    }

    #[test]
    fn test_reserved_property_rejected() {
        let base = test_metadata();
        let err = update_table_metadata(
            &base,
            &[TableUpdate::SetProperties {
                updates: HashMap::from([("format-version".to_string(), "1".to_string())]),
            }],
        )
        .unwrap_err();
        assert_eq!(err.key.as_deref(), Some("format-version"));
    }

    #[test]
    fn test_main_branch_sets_current_snapshot() {
        let base = test_metadata();
        let result = update_table_metadata(
            &base,
            &[
                TableUpdate::AddSnapshot {
                    snapshot: snapshot(1, None, 1),
                },
                TableUpdate::SetSnapshotRef {
                    ref_name: MAIN_BRANCH.to_string(),
                    reference: SnapshotReference::new(1, SnapshotRetention::branch()),
                },
                TableUpdate::AddSnapshot {
                    snapshot: snapshot(2, Some(1), 2),
                },
                TableUpdate::SetSnapshotRef {
                    ref_name: MAIN_BRANCH.to_string(),
                    reference: SnapshotReference::new(2, SnapshotRetention::branch()),
                },
            ],
        )
        .unwrap();
        assert_eq!(result.current_snapshot_id(), Some(2));
        assert_eq!(result.last_sequence_number(), 2);
        assert_eq!(result.snapshot_log().len(), 2);

        let removed = update_table_metadata(
            &result,
            &[TableUpdate::RemoveSnapshots {
                snapshot_ids: vec![2],
            }],
        )
        .unwrap();
        assert_eq!(removed.current_snapshot_id(), None);
        assert!(removed.refs().is_empty());
        assert_eq!(removed.snapshots().len(), 1);
    }

    #[test]
    fn test_stale_sequence_number_rejected() {
        let base = test_metadata();
        let err = update_table_metadata(
            &base,
            &[
                TableUpdate::AddSnapshot {
                    snapshot: snapshot(1, None, 3),
                },
                TableUpdate::AddSnapshot {
                    snapshot: snapshot(2, Some(1), 3),
                },
            ],
        )
        .unwrap_err();
        assert_eq!(err.key.as_deref(), Some("2"));
    }

    #[test]
    fn test_ref_to_unknown_snapshot_fails() {
        let base = test_metadata();
        assert!(
            update_table_metadata(
                &base,
                &[TableUpdate::SetSnapshotRef {
                    ref_name: "audit".to_string(),
                    reference: SnapshotReference::new(42, SnapshotRetention::tag()),
                }]
            )
            .is_err()
        );
    }

    #[test]
    fn test_set_location_trims_separator() {
        let base = test_metadata();
        let result = update_table_metadata(
            &base,
            &[TableUpdate::SetLocation {
                location: "memory://warehouse/moved/".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(result.location(), "memory://warehouse/moved");
    }
}
