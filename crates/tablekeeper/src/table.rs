use std::{collections::HashMap, sync::Arc};

use tablekeeper_io::{Location, StorageBackend};

use crate::{
    catalog::Catalog,
    error::{CommitTableError, LoadTableError, ValidationError},
    identifier::TableIdent,
    spec::{PartitionSpec, Schema, SortOrder, TableMetadata, TableMetadataRef},
    transaction::{ReplaceSortOrder, Transaction, UpdateProperties, UpdateSchema, UpdateSpec},
};

/// Client-side handle of a table, bound to one metadata generation.
///
/// A handle behaves as a value snapshot. It only moves to another generation
/// through [`Table::refresh`] or a commit issued through the handle itself.
#[derive(Clone, derive_more::Debug)]
pub struct Table {
    identifier: TableIdent,
    #[debug(skip)]
    metadata: TableMetadataRef,
    metadata_location: Location,
    #[debug(skip)]
    io: StorageBackend,
    #[debug(skip)]
    catalog: Arc<dyn Catalog>,
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
            && self.metadata_location == other.metadata_location
            && self.metadata == other.metadata
    }
}

impl Table {
    pub(crate) fn new(
        identifier: TableIdent,
        metadata: TableMetadataRef,
        metadata_location: Location,
        io: StorageBackend,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            identifier,
            metadata,
            metadata_location,
            io,
            catalog,
        }
    }

    #[must_use]
    pub fn identifier(&self) -> &TableIdent {
        &self.identifier
    }

    #[must_use]
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn metadata_ref(&self) -> TableMetadataRef {
        self.metadata.clone()
    }

    #[must_use]
    pub fn metadata_location(&self) -> &Location {
        &self.metadata_location
    }

    #[must_use]
    pub fn io(&self) -> &StorageBackend {
        &self.io
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        self.metadata.current_schema()
    }

    #[must_use]
    pub fn spec(&self) -> &PartitionSpec {
        self.metadata.default_partition_spec()
    }

    #[must_use]
    pub fn sort_order(&self) -> SortOrder {
        self.metadata.default_sort_order()
    }

    #[must_use]
    pub fn properties(&self) -> &HashMap<String, String> {
        self.metadata.properties()
    }

    #[must_use]
    pub fn location(&self) -> &str {
        self.metadata.location()
    }

    /// Rebinds the handle to the generation the catalog currently points at.
    pub async fn refresh(&mut self) -> Result<(), LoadTableError> {
        let fresh = self.catalog.load_table(&self.identifier).await?;
        self.metadata = fresh.metadata;
        self.metadata_location = fresh.metadata_location;
        Ok(())
    }

    pub(crate) fn with_generation(
        mut self,
        metadata: TableMetadataRef,
        metadata_location: Location,
    ) -> Self {
        self.metadata = metadata;
        self.metadata_location = metadata_location;
        self
    }

    /// Opens a transaction bound to the current generation of this handle.
    #[must_use]
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self)
    }

    /// Runs `f` in a transaction and commits it if `f` succeeds.
    ///
    /// Staged changes are discarded if `f` fails; nothing reaches the catalog.
    pub async fn with_transaction<F>(&mut self, f: F) -> Result<(), CommitTableError>
    where
        F: FnOnce(&mut Transaction) -> Result<(), ValidationError>,
    {
        let mut transaction = self.transaction();
        f(&mut transaction)?;
        *self = transaction.commit_transaction().await?;
        Ok(())
    }

    /// Evolves the schema in a single-operation commit.
    pub async fn update_schema<F>(&mut self, f: F) -> Result<(), CommitTableError>
    where
        F: FnOnce(&mut UpdateSchema<'_>) -> Result<(), ValidationError>,
    {
        self.with_transaction(|tx| {
            let mut update = tx.update_schema();
            f(&mut update)?;
            update.commit()
        })
        .await
    }

    pub async fn update_spec<F>(&mut self, f: F) -> Result<(), CommitTableError>
    where
        F: FnOnce(&mut UpdateSpec<'_>) -> Result<(), ValidationError>,
    {
        self.with_transaction(|tx| {
            let mut update = tx.update_spec();
            f(&mut update)?;
            update.commit()
        })
        .await
    }

    pub async fn replace_sort_order<F>(&mut self, f: F) -> Result<(), CommitTableError>
    where
        F: FnOnce(&mut ReplaceSortOrder<'_>) -> Result<(), ValidationError>,
    {
        self.with_transaction(|tx| {
            let mut update = tx.replace_sort_order();
            f(&mut update)?;
            update.commit()
        })
        .await
    }

    pub async fn update_properties<F>(&mut self, f: F) -> Result<(), CommitTableError>
    where
        F: FnOnce(&mut UpdateProperties<'_>) -> Result<(), ValidationError>,
    {
        self.with_transaction(|tx| {
            let mut update = tx.update_properties();
            f(&mut update)?;
            update.commit()
        })
        .await
    }
}
