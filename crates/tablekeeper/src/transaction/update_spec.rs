use super::Transaction;
use crate::{
    error::ValidationError,
    spec::{FormatVersion, PartitionField, PartitionSpec, Schema, Transform},
    update::{LAST_ADDED, TableRequirement, TableUpdate},
};

/// Partition spec evolution session.
///
/// Partition fields are addressed by their partition name, sources by their
/// dotted column name in the current schema. Format v1 tables cannot drop a
/// partition field, so removing one replaces its transform with `void`.
#[derive(Debug)]
pub struct UpdateSpec<'t> {
    transaction: &'t mut Transaction,
    schema: Schema,
    fields: Vec<PartitionField>,
    last_partition_id: i32,
}

impl<'t> UpdateSpec<'t> {
    pub(crate) fn new(transaction: &'t mut Transaction) -> Self {
        let metadata = transaction.metadata();
        Self {
            schema: metadata.current_schema().clone(),
            fields: metadata.default_partition_spec().fields.clone(),
            last_partition_id: metadata.last_partition_id(),
            transaction,
        }
    }

    pub fn add_identity(&mut self, source_name: &str) -> Result<&mut Self, ValidationError> {
        self.add_field(source_name, Transform::Identity, None)
    }

    /// Adds a partition field. The name defaults to one derived from the
    /// source column and the transform.
    pub fn add_field(
        &mut self,
        source_name: &str,
        transform: Transform,
        name: Option<&str>,
    ) -> Result<&mut Self, ValidationError> {
        let source = self.schema.field_by_name(source_name).ok_or_else(|| {
            ValidationError::for_key(
                format!("Cannot find partition source column `{source_name}`"),
                source_name,
            )
        })?;
        let Some(source_type) = source.field_type.as_primitive() else {
            return Err(ValidationError::for_key(
                format!("Cannot partition by non-primitive column `{source_name}`"),
                source_name,
            ));
        };
        if !transform.can_transform(source_type) {
            return Err(ValidationError::for_key(
                format!(
                    "Transform {transform} cannot be applied to `{source_name}` of type {source_type}"
                ),
                source_name,
            ));
        }
        let source_id = source.id;

        if self
            .fields
            .iter()
            .any(|f| f.source_id == source_id && f.transform == transform)
        {
            return Err(ValidationError::for_key(
                format!("Cannot add duplicate partition field {transform}({source_name})"),
                source_name,
            ));
        }

        let name = name.map_or_else(
            || transform.default_field_name(source_name),
            ToString::to_string,
        );
        if let Some(existing) = self.fields.iter_mut().find(|f| f.name == name) {
            if existing.transform != Transform::Void {
                return Err(ValidationError::for_key(
                    format!("Cannot add partition field, name already exists: `{name}`"),
                    name,
                ));
            }
            existing.name = format!("{}_{}", existing.name, existing.field_id);
        }

        let field_id = self.reusable_field_id(source_id, transform).unwrap_or_else(|| {
            self.last_partition_id += 1;
            self.last_partition_id
        });
        self.fields.push(PartitionField {
            source_id,
            field_id,
            name,
            transform,
        });
        Ok(self)
    }

    /// Id of an equivalent field in any historical spec of the table.
    fn reusable_field_id(&self, source_id: i32, transform: Transform) -> Option<i32> {
        // v1 field ids must stay sequential within a spec
        if self.transaction.metadata().format_version() == FormatVersion::V1 {
            return None;
        }
        self.transaction
            .metadata()
            .partition_specs()
            .iter()
            .flat_map(|spec| &spec.fields)
            .find(|f| f.source_id == source_id && f.transform == transform)
            .map(|f| f.field_id)
    }

    pub fn remove_field(&mut self, name: &str) -> Result<&mut Self, ValidationError> {
        let Some(position) = self
            .fields
            .iter()
            .position(|f| f.name == name && f.transform != Transform::Void)
        else {
            return Err(ValidationError::for_key(
                format!("Cannot find partition field to remove: `{name}`"),
                name,
            ));
        };
        if self.transaction.metadata().format_version() == FormatVersion::V1 {
            self.fields[position].transform = Transform::Void;
        } else {
            self.fields.remove(position);
        }
        Ok(self)
    }

    pub fn rename_field(&mut self, name: &str, new_name: &str) -> Result<&mut Self, ValidationError> {
        if self.fields.iter().any(|f| f.name == new_name) {
            return Err(ValidationError::for_key(
                format!("Cannot rename partition field `{name}`: name `{new_name}` already exists"),
                new_name,
            ));
        }
        let field = self
            .fields
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| {
                ValidationError::for_key(
                    format!("Cannot find partition field to rename: `{name}`"),
                    name,
                )
            })?;
        field.name = new_name.to_string();
        Ok(self)
    }

    /// The evolved spec, with the id it would receive on commit.
    pub fn apply(&self) -> Result<PartitionSpec, ValidationError> {
        let metadata = self.transaction.metadata();
        let spec_id = metadata
            .partition_specs()
            .iter()
            .find(|s| s.fields == self.fields)
            .map(|s| s.spec_id)
            .unwrap_or_else(|| {
                metadata
                    .partition_specs()
                    .iter()
                    .map(|s| s.spec_id)
                    .max()
                    .map_or(0, |highest| highest + 1)
            });
        let spec = PartitionSpec::new(spec_id, self.fields.clone());
        spec.validate(&self.schema)?;
        Ok(spec)
    }

    /// Stages the evolved spec as the new default.
    pub fn commit(self) -> Result<(), ValidationError> {
        let spec = self.apply()?;
        let metadata = self.transaction.metadata();
        if spec.same_fields(metadata.default_partition_spec()) {
            return Ok(());
        }

        let base = self.transaction.base_metadata();
        let mut requirements = vec![TableRequirement::DefaultSpecIdMatch {
            default_spec_id: base.default_spec_id(),
        }];
        if self.last_partition_id > metadata.last_partition_id() {
            requirements.push(TableRequirement::LastAssignedPartitionIdMatch {
                last_assigned_partition_id: base.last_partition_id(),
            });
        }
        self.transaction.stage(
            vec![
                TableUpdate::AddSpec { spec },
                TableUpdate::SetDefaultSpec {
                    spec_id: LAST_ADDED,
                },
            ],
            requirements,
        )
    }
}

#[cfg(test)]
mod tests {
    use maplit::hashmap;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        spec::PropertyValue,
        tests::{memory_table, memory_table_with_properties},
    };

    #[tokio::test]
    async fn test_add_identity_and_bucket() {
        let table = memory_table().await;
        let mut tx = table.transaction();
        let mut update = tx.update_spec();
        update
            .add_identity("x")
            .unwrap()
            .add_field("y", Transform::Bucket(16), None)
            .unwrap();
        let spec = update.apply().unwrap();
        assert_eq!(spec.spec_id, 1);
        assert_eq!(
            spec.fields
                .iter()
                .map(|f| (f.field_id, f.name.as_str()))
                .collect::<Vec<_>>(),
            vec![(1000, "x"), (1001, "y_bucket_16")]
        );
        update.commit().unwrap();

        assert_eq!(tx.metadata().default_spec_id(), 1);
        assert_eq!(tx.metadata().last_partition_id(), 1001);
        assert_eq!(
            tx.requirements(),
            &[
                TableRequirement::DefaultSpecIdMatch { default_spec_id: 0 },
                TableRequirement::LastAssignedPartitionIdMatch {
                    last_assigned_partition_id: 999
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_partition_fields() {
        let table = memory_table().await;
        let mut tx = table.transaction();
        let mut update = tx.update_spec();
        assert!(update.add_identity("missing").is_err());
        assert!(update.add_field("x", Transform::Day, None).is_err());
        update.add_field("x", Transform::Bucket(4), Some("shard")).unwrap();
        let err = update
            .add_field("x", Transform::Bucket(4), None)
            .unwrap_err();
        assert_eq!(
            err.message,
            "Cannot add duplicate partition field bucket[4](x)"
        );
        assert!(update.add_field("y", Transform::Identity, Some("shard")).is_err());
        // Only an identity partition of `y` itself may be called `y`
        update.add_field("z", Transform::Identity, Some("y")).unwrap();
        assert!(update.apply().is_err());
    }

    #[tokio::test]
    async fn test_remove_and_re_add_reuses_field_id() {
        let table = memory_table().await;
        let mut tx = table.transaction();

        let mut update = tx.update_spec();
        update.add_identity("x").unwrap();
        update.commit().unwrap();

        let mut update = tx.update_spec();
        update.remove_field("x").unwrap();
        update.commit().unwrap();
        // Equal to the unpartitioned spec, which is re-selected
        assert_eq!(tx.metadata().default_spec_id(), 0);

        let mut update = tx.update_spec();
        update.add_identity("x").unwrap();
        assert_eq!(update.apply().unwrap().fields[0].field_id, 1000);
        update.commit().unwrap();
        assert_eq!(tx.metadata().default_spec_id(), 1);
        assert_eq!(tx.metadata().partition_specs().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_field_in_v1_voids_it() {
        let table = memory_table_with_properties(hashmap! {
            "format-version".to_string() => PropertyValue::from("1"),
        })
        .await;
        let mut tx = table.transaction();
        let mut update = tx.update_spec();
        update.add_identity("x").unwrap();
        update.commit().unwrap();

        let mut update = tx.update_spec();
        update.remove_field("x").unwrap().add_identity("x").unwrap();
        let spec = update.apply().unwrap();
        assert_eq!(spec.fields.len(), 2);
        assert_eq!(spec.fields[0].transform, Transform::Void);
        assert_eq!(spec.fields[0].name, "x_1000");
        assert_eq!(spec.fields[1].field_id, 1001);
    }

    #[tokio::test]
    async fn test_rename_field() {
        let table = memory_table().await;
        let mut tx = table.transaction();
        let mut update = tx.update_spec();
        update
            .add_field("y", Transform::Truncate(10), None)
            .unwrap()
            .rename_field("y_trunc_10", "y_prefix")
            .unwrap();
        assert!(update.rename_field("unknown", "other").is_err());
        assert_eq!(update.apply().unwrap().fields[0].name, "y_prefix");
    }

    #[tokio::test]
    async fn test_partition_source_cannot_be_deleted() {
        let table = memory_table().await;
        let mut tx = table.transaction();
        let mut update = tx.update_spec();
        update.add_identity("z").unwrap();
        update.commit().unwrap();

        let mut update = tx.update_schema();
        let err = update.delete_column("z").unwrap_err();
        assert_eq!(
            err.message,
            "Cannot delete column `z`: it is referenced by the default partition spec"
        );
    }

    #[tokio::test]
    async fn test_unchanged_spec_stages_nothing() {
        let table = memory_table().await;
        let mut tx = table.transaction();
        tx.update_spec().commit().unwrap();
        assert!(tx.updates().is_empty());
    }
}
