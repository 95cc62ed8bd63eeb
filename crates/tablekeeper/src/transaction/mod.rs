//! Batched changes against a single table.
//!
//! Builders stage their updates into a [`Transaction`] which validates them
//! against a working copy of the metadata right away. Nothing reaches the
//! catalog until [`Transaction::commit_transaction`], which issues exactly
//! one `commit_table` call for everything staged.

use std::sync::Arc;

use crate::{
    catalog::TableCommit,
    error::{CommitTableError, ValidationError},
    spec::{FormatVersion, TableMetadata, TableMetadataRef},
    table::Table,
    update::{TableRequirement, TableUpdate, update_table_metadata},
};

mod replace_sort_order;
mod update_properties;
mod update_schema;
mod update_spec;

pub use replace_sort_order::ReplaceSortOrder;
pub use update_properties::UpdateProperties;
pub use update_schema::UpdateSchema;
pub use update_spec::UpdateSpec;

#[derive(Debug, Clone)]
pub struct Transaction {
    table: Table,
    /// Metadata with every staged update applied.
    working: TableMetadataRef,
    updates: Vec<TableUpdate>,
    requirements: Vec<TableRequirement>,
}

impl Transaction {
    #[must_use]
    pub fn new(table: &Table) -> Self {
        Self {
            working: table.metadata_ref(),
            table: table.clone(),
            updates: Vec::new(),
            requirements: Vec::new(),
        }
    }

    #[must_use]
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Metadata the transaction was opened on. Requirements refer to it.
    #[must_use]
    pub fn base_metadata(&self) -> &TableMetadata {
        self.table.metadata()
    }

    /// Metadata as it will look once the staged updates are committed.
    #[must_use]
    pub fn metadata(&self) -> &TableMetadata {
        &self.working
    }

    #[must_use]
    pub fn updates(&self) -> &[TableUpdate] {
        &self.updates
    }

    #[must_use]
    pub fn requirements(&self) -> &[TableRequirement] {
        &self.requirements
    }

    /// Applies `updates` to the working metadata and records them.
    ///
    /// Only the first requirement guarding a given piece of state is kept.
    pub(crate) fn stage(
        &mut self,
        updates: Vec<TableUpdate>,
        requirements: Vec<TableRequirement>,
    ) -> Result<(), ValidationError> {
        if updates.is_empty() {
            return Ok(());
        }
        let working = update_table_metadata(&self.working, &updates)?;
        self.working = Arc::new(working);
        self.updates.extend(updates);
        for requirement in requirements {
            if !self
                .requirements
                .iter()
                .any(|r| r.guards_same_state(&requirement))
            {
                self.requirements.push(requirement);
            }
        }
        Ok(())
    }

    pub fn update_schema(&mut self) -> UpdateSchema<'_> {
        UpdateSchema::new(self)
    }

    pub fn update_spec(&mut self) -> UpdateSpec<'_> {
        UpdateSpec::new(self)
    }

    pub fn replace_sort_order(&mut self) -> ReplaceSortOrder<'_> {
        ReplaceSortOrder::new(self)
    }

    pub fn update_properties(&mut self) -> UpdateProperties<'_> {
        UpdateProperties::new(self)
    }

    pub fn set_location(&mut self, location: impl Into<String>) -> Result<(), ValidationError> {
        self.stage(
            vec![TableUpdate::SetLocation {
                location: location.into(),
            }],
            vec![],
        )
    }

    pub fn upgrade_format_version(
        &mut self,
        format_version: FormatVersion,
    ) -> Result<(), ValidationError> {
        if format_version == self.working.format_version() {
            return Ok(());
        }
        self.stage(
            vec![TableUpdate::UpgradeFormatVersion { format_version }],
            vec![],
        )
    }

    /// Commits every staged update with one catalog call.
    ///
    /// Returns the handle rebound to the committed generation. A transaction
    /// without updates returns the original handle without contacting the
    /// catalog.
    pub async fn commit_transaction(self) -> Result<Table, CommitTableError> {
        let Transaction {
            table,
            working: _,
            updates,
            mut requirements,
        } = self;
        if updates.is_empty() {
            return Ok(table);
        }

        let uuid_requirement = TableRequirement::UuidMatch {
            uuid: table.metadata().uuid(),
        };
        if !requirements
            .iter()
            .any(|r| r.guards_same_state(&uuid_requirement))
        {
            requirements.push(uuid_requirement);
        }

        tracing::debug!(
            "Committing transaction on table {} with {} updates and {} requirements",
            table.identifier(),
            updates.len(),
            requirements.len()
        );
        let commit = TableCommit::builder()
            .identifier(table.identifier().clone())
            .requirements(requirements)
            .updates(updates)
            .build();
        let response = table.catalog().commit_table(commit).await?;
        Ok(table.with_generation(response.metadata, response.metadata_location))
    }
}
