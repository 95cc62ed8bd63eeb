use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tablekeeper_io::{Location, Storage, StorageBackend};
use tokio::sync::RwLock;

use super::{
    Catalog, CommitTableResponse, PROPERTY_WAREHOUSE, PropertiesUpdateSummary, TableCommit,
    TableCreation,
    commit::{
        create_metadata, delete_expired, delete_orphan, forget_generations,
        next_metadata_location, publish_metadata, read_metadata, stage_commit, storage_for,
        table_location, write_metadata,
    },
};
use crate::{
    CONFIG,
    error::{
        CatalogConfigurationError, CommitConflict, CommitTableError, CreateNamespaceError,
        CreateTableError, DropNamespaceError, DropTableError, LoadCatalogError, LoadTableError,
        NamespaceAlreadyExists, NamespaceNotEmpty, NamespaceOpError, NoSuchNamespace, NoSuchTable,
        RenameTableError, StorageError, TableAlreadyExists,
    },
    identifier::{NamespaceIdent, TableIdent},
    spec::TableMetadataRef,
    table::Table,
};

#[derive(Debug, Clone)]
struct TableRecord {
    metadata_location: Location,
    metadata: TableMetadataRef,
}

#[derive(Debug, Default)]
struct MemoryCatalogState {
    namespaces: HashMap<NamespaceIdent, HashMap<String, String>>,
    tables: HashMap<TableIdent, TableRecord>,
}

/// Process-local catalog. Clones share the same registry.
#[derive(Debug, Clone)]
pub struct MemoryCatalog {
    name: String,
    properties: HashMap<String, String>,
    warehouse: Location,
    io: StorageBackend,
    state: Arc<RwLock<MemoryCatalogState>>,
}

impl MemoryCatalog {
    /// Uses the `warehouse` property, or the configured default warehouse.
    pub fn new(
        name: impl Into<String>,
        properties: HashMap<String, String>,
    ) -> Result<Self, LoadCatalogError> {
        let warehouse = properties
            .get(PROPERTY_WAREHOUSE)
            .cloned()
            .unwrap_or_else(|| CONFIG.default_warehouse.clone());
        let warehouse = Location::parse_value(&warehouse).map_err(|e| {
            CatalogConfigurationError::new(format!("Invalid warehouse location: {e}"))
        })?;
        let io = StorageBackend::for_location(&warehouse).map_err(StorageError::new)?;
        Ok(Self {
            name: name.into(),
            properties,
            warehouse,
            io,
            state: Arc::new(RwLock::new(MemoryCatalogState::default())),
        })
    }

    #[must_use]
    pub fn warehouse(&self) -> &Location {
        &self.warehouse
    }

    /// Backend holding the metadata files of tables below the warehouse.
    #[must_use]
    pub fn storage(&self) -> &StorageBackend {
        &self.io
    }

    fn storage_for(&self, location: &Location) -> Result<StorageBackend, StorageError> {
        storage_for(&self.io, &self.warehouse, location)
    }

    fn table_handle(
        &self,
        identifier: TableIdent,
        record: TableRecord,
    ) -> Result<Table, StorageError> {
        let io = self.storage_for(&record.metadata_location)?;
        Ok(Table::new(
            identifier,
            record.metadata,
            record.metadata_location,
            io,
            self.handle(),
        ))
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    fn handle(&self) -> Arc<dyn Catalog> {
        Arc::new(self.clone())
    }

    #[tracing::instrument(skip(self, properties))]
    async fn create_namespace(
        &self,
        namespace: &NamespaceIdent,
        properties: HashMap<String, String>,
    ) -> Result<(), CreateNamespaceError> {
        let mut state = self.state.write().await;
        if state.namespaces.contains_key(namespace) {
            return Err(NamespaceAlreadyExists::new(namespace.clone()).into());
        }
        state.namespaces.insert(namespace.clone(), properties);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn drop_namespace(&self, namespace: &NamespaceIdent) -> Result<(), DropNamespaceError> {
        let mut state = self.state.write().await;
        if !state.namespaces.contains_key(namespace) {
            return Err(NoSuchNamespace::new(namespace.clone()).into());
        }
        if state
            .tables
            .keys()
            .any(|t| t.namespace().parts().starts_with(namespace.parts()))
        {
            return Err(NamespaceNotEmpty::new(namespace.clone()).into());
        }
        state.namespaces.remove(namespace);
        Ok(())
    }

    async fn list_namespaces(
        &self,
        parent: Option<&NamespaceIdent>,
    ) -> Result<Vec<NamespaceIdent>, NamespaceOpError> {
        let state = self.state.read().await;
        let mut namespaces: Vec<NamespaceIdent> = state
            .namespaces
            .keys()
            .filter(|ns| parent.is_none_or(|parent| ns.is_direct_child_of(parent)))
            .cloned()
            .collect();
        namespaces.sort();
        Ok(namespaces)
    }

    async fn namespace_exists(&self, namespace: &NamespaceIdent) -> Result<bool, NamespaceOpError> {
        Ok(self.state.read().await.namespaces.contains_key(namespace))
    }

    async fn load_namespace_properties(
        &self,
        namespace: &NamespaceIdent,
    ) -> Result<HashMap<String, String>, NamespaceOpError> {
        self.state
            .read()
            .await
            .namespaces
            .get(namespace)
            .cloned()
            .ok_or_else(|| NoSuchNamespace::new(namespace.clone()).into())
    }

    #[tracing::instrument(skip(self))]
    async fn update_namespace_properties(
        &self,
        namespace: &NamespaceIdent,
        removals: Vec<String>,
        updates: HashMap<String, String>,
    ) -> Result<PropertiesUpdateSummary, NamespaceOpError> {
        let mut state = self.state.write().await;
        let properties = state
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| NoSuchNamespace::new(namespace.clone()))?;
        Ok(PropertiesUpdateSummary::apply(properties, removals, updates))
    }

    #[tracing::instrument(skip(self, creation), fields(table = %creation.identifier))]
    async fn create_table(&self, creation: TableCreation) -> Result<Table, CreateTableError> {
        let identifier = creation.identifier.clone();
        if self.state.read().await.tables.contains_key(&identifier) {
            return Err(TableAlreadyExists::new(identifier).into());
        }

        let (metadata, metadata_location) = create_metadata(creation, &self.warehouse)?;
        let io = self.storage_for(&metadata_location)?;
        let metadata = Arc::new(metadata);
        write_metadata::<CreateTableError>(&io, &metadata_location, metadata.clone()).await?;

        let record = TableRecord {
            metadata_location,
            metadata,
        };
        {
            let mut state = self.state.write().await;
            if state.tables.contains_key(&identifier) {
                drop(state);
                delete_orphan(&io, &record.metadata_location).await;
                return Err(TableAlreadyExists::new(identifier).into());
            }
            state
                .namespaces
                .entry(identifier.namespace().clone())
                .or_default();
            state.tables.insert(identifier.clone(), record.clone());
        }
        publish_metadata(&record.metadata_location, record.metadata.clone()).await;
        tracing::info!(
            "Created table {identifier} at {}",
            record.metadata_location
        );
        Ok(self.table_handle(identifier, record)?)
    }

    #[tracing::instrument(skip(self))]
    async fn register_table(
        &self,
        table: &TableIdent,
        metadata_location: &Location,
    ) -> Result<Table, CreateTableError> {
        let io = self.storage_for(metadata_location)?;
        let metadata = read_metadata::<CreateTableError>(&io, metadata_location).await?;
        let record = TableRecord {
            metadata_location: metadata_location.clone(),
            metadata,
        };
        {
            let mut state = self.state.write().await;
            if state.tables.contains_key(table) {
                return Err(TableAlreadyExists::new(table.clone()).into());
            }
            state.namespaces.entry(table.namespace().clone()).or_default();
            state.tables.insert(table.clone(), record.clone());
        }
        Ok(self.table_handle(table.clone(), record)?)
    }

    #[tracing::instrument(skip(self))]
    async fn load_table(&self, table: &TableIdent) -> Result<Table, LoadTableError> {
        let record = self
            .state
            .read()
            .await
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| NoSuchTable::new(table.clone()))?;
        Ok(self.table_handle(table.clone(), record)?)
    }

    async fn table_exists(&self, table: &TableIdent) -> Result<bool, LoadTableError> {
        Ok(self.state.read().await.tables.contains_key(table))
    }

    async fn list_tables(
        &self,
        namespace: Option<&NamespaceIdent>,
    ) -> Result<Vec<TableIdent>, NamespaceOpError> {
        let state = self.state.read().await;
        let mut tables: Vec<TableIdent> = state
            .tables
            .keys()
            .filter(|t| namespace.is_none_or(|ns| t.namespace() == ns))
            .cloned()
            .collect();
        tables.sort();
        Ok(tables)
    }

    #[tracing::instrument(skip(self))]
    async fn drop_table(&self, table: &TableIdent) -> Result<(), DropTableError> {
        self.state
            .write()
            .await
            .tables
            .remove(table)
            .ok_or_else(|| NoSuchTable::new(table.clone()))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn purge_table(&self, table: &TableIdent) -> Result<(), DropTableError> {
        let record = self
            .state
            .write()
            .await
            .tables
            .remove(table)
            .ok_or_else(|| NoSuchTable::new(table.clone()))?;
        let table_location = table_location(&record.metadata)?;
        let io = self.storage_for(&table_location)?;
        io.remove_all(&table_location)
            .await
            .map_err(StorageError::new)?;
        forget_generations(&record.metadata, &record.metadata_location).await;
        tracing::info!("Purged table {table} at {table_location}");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn rename_table(
        &self,
        from: &TableIdent,
        to: &TableIdent,
    ) -> Result<Table, RenameTableError> {
        let record = {
            let mut state = self.state.write().await;
            if state.tables.contains_key(to) {
                return Err(TableAlreadyExists::new(to.clone()).into());
            }
            let record = state
                .tables
                .remove(from)
                .ok_or_else(|| NoSuchTable::new(from.clone()))?;
            state.namespaces.entry(to.namespace().clone()).or_default();
            state.tables.insert(to.clone(), record.clone());
            record
        };
        Ok(self.table_handle(to.clone(), record)?)
    }

    #[tracing::instrument(skip(self, commit), fields(table = %commit.identifier))]
    async fn commit_table(
        &self,
        commit: TableCommit,
    ) -> Result<CommitTableResponse, CommitTableError> {
        let TableCommit {
            identifier,
            requirements,
            updates,
        } = commit;

        let live = self
            .state
            .read()
            .await
            .tables
            .get(&identifier)
            .cloned()
            .ok_or_else(|| NoSuchTable::new(identifier.clone()))?;

        let Some(staged) = stage_commit(
            &identifier,
            &live.metadata,
            &live.metadata_location,
            &requirements,
            &updates,
        )?
        else {
            return Ok(CommitTableResponse {
                metadata: live.metadata,
                metadata_location: live.metadata_location,
            });
        };

        let new_location =
            next_metadata_location(staged.metadata.location(), &live.metadata_location)?;
        let io = self.storage_for(&new_location)?;
        let metadata = Arc::new(staged.metadata);
        write_metadata::<CommitTableError>(&io, &new_location, metadata.clone()).await?;

        {
            let mut state = self.state.write().await;
            let current = state
                .tables
                .get_mut(&identifier)
                .filter(|current| current.metadata_location == live.metadata_location);
            let Some(current) = current else {
                drop(state);
                delete_orphan(&io, &new_location).await;
                return Err(CommitConflict::new(identifier, live.metadata_location.as_str()).into());
            };
            current.metadata_location = new_location.clone();
            current.metadata = metadata.clone();
        }
        publish_metadata(&new_location, metadata.clone()).await;
        tracing::info!(
            "Advanced table {identifier} from {} to {new_location}",
            live.metadata_location
        );

        delete_expired(&io, &metadata, &staged.expired).await;
        Ok(CommitTableResponse {
            metadata,
            metadata_location: new_location,
        })
    }
}
