use std::{collections::HashMap, str::FromStr, sync::Arc};

use async_trait::async_trait;
use sqlx::{
    SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tablekeeper_io::{Location, Storage, StorageBackend};

use super::{
    Catalog, CommitTableResponse, PROPERTY_WAREHOUSE, PropertiesUpdateSummary, TableCommit,
    TableCreation,
    commit::{
        create_metadata, delete_expired, delete_orphan, forget_generations,
        next_metadata_location, publish_metadata, read_metadata, stage_commit, storage_for,
        table_location, write_metadata,
    },
    loader::PROPERTY_URI,
    parse_location,
};
use crate::{
    CONFIG,
    error::{
        CatalogBackendError, CatalogBackendErrorType, CatalogConfigurationError, CommitConflict,
        CommitTableError, CreateNamespaceError, CreateTableError, DropNamespaceError,
        DropTableError, LoadCatalogError, LoadTableError, NamespaceAlreadyExists,
        NamespaceNotEmpty, NamespaceOpError, NoSuchNamespace, NoSuchTable, RenameTableError,
        StorageError, TableAlreadyExists, ValidationError,
    },
    identifier::{NamespaceIdent, TableIdent},
    table::Table,
};

/// Property row marking that a namespace exists, independent of its user properties.
const NAMESPACE_MARKER_KEY: &str = "exists";
const NAMESPACE_MARKER_VALUE: &str = "true";
const MEMORY_URI_PREFIX: &str = "sqlite::memory:";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

const CREATE_TABLES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS tablekeeper_tables (
    catalog_name TEXT NOT NULL,
    table_namespace TEXT NOT NULL,
    table_name TEXT NOT NULL,
    metadata_location TEXT NOT NULL,
    previous_metadata_location TEXT,
    PRIMARY KEY (catalog_name, table_namespace, table_name)
)";

const CREATE_NAMESPACE_PROPERTIES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS tablekeeper_namespace_properties (
    catalog_name TEXT NOT NULL,
    namespace TEXT NOT NULL,
    property_key TEXT NOT NULL,
    property_value TEXT,
    PRIMARY KEY (catalog_name, namespace, property_key)
)";

pub(crate) trait DBErrorHandler
where
    Self: ToString + Sized + Send + Sync + std::error::Error + 'static,
{
    fn into_catalog_backend_error(self) -> CatalogBackendError;
}

impl DBErrorHandler for sqlx::Error {
    fn into_catalog_backend_error(self) -> CatalogBackendError {
        match self {
            Self::Database(ref db) => match db.code().as_deref() {
                // https://www.sqlite.org/rescode.html
                // SQLITE_BUSY, SQLITE_LOCKED and their extended codes
                Some("5" | "6" | "261" | "262" | "517" | "773") => CatalogBackendError::new(
                    self,
                    CatalogBackendErrorType::ConcurrentModification,
                )
                .append_detail("Database is busy or locked."),
                _ => CatalogBackendError::new_unexpected(self),
            },
            _ => CatalogBackendError::new_unexpected(self),
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn corrupt_row(err: ValidationError) -> CatalogBackendError {
    CatalogBackendError::new_unexpected(err).append_detail("Catalog database holds an invalid row")
}

fn reject_marker_key<'k>(keys: impl IntoIterator<Item = &'k String>) -> Result<(), ValidationError> {
    if keys.into_iter().any(|k| k == NAMESPACE_MARKER_KEY) {
        return Err(ValidationError::for_key(
            format!("Namespace property `{NAMESPACE_MARKER_KEY}` is reserved"),
            NAMESPACE_MARKER_KEY,
        ));
    }
    Ok(())
}

/// Rewrites the marker row of `namespace`. The write takes the database write
/// lock, so the rest of the transaction sees no concurrent namespace changes.
/// Returns `false` if the namespace does not exist.
async fn lock_namespace(
    conn: &mut SqliteConnection,
    catalog_name: &str,
    namespace: &str,
) -> Result<bool, CatalogBackendError> {
    let touched = sqlx::query(
        "UPDATE tablekeeper_namespace_properties SET property_value = ?
         WHERE catalog_name = ? AND namespace = ? AND property_key = ?",
    )
    .bind(NAMESPACE_MARKER_VALUE)
    .bind(catalog_name)
    .bind(namespace)
    .bind(NAMESPACE_MARKER_KEY)
    .execute(&mut *conn)
    .await
    .map_err(DBErrorHandler::into_catalog_backend_error)?;
    Ok(touched.rows_affected() > 0)
}

/// Catalog persisting the namespace registry and the table pointers in SQLite.
#[derive(Debug, Clone)]
pub struct SqlCatalog {
    name: String,
    properties: HashMap<String, String>,
    warehouse: Location,
    io: StorageBackend,
    pool: SqlitePool,
}

impl SqlCatalog {
    /// Connects to the database named by the `uri` property and creates the
    /// catalog tables if they are missing.
    pub async fn connect(
        name: impl Into<String>,
        properties: HashMap<String, String>,
    ) -> Result<Self, LoadCatalogError> {
        let uri = properties.get(PROPERTY_URI).ok_or_else(|| {
            CatalogConfigurationError::new(format!(
                "Could not initialize Catalog: property `{PROPERTY_URI}` is required for the SQL catalog"
            ))
        })?;
        let warehouse = properties
            .get(PROPERTY_WAREHOUSE)
            .cloned()
            .unwrap_or_else(|| CONFIG.default_warehouse.clone());
        let warehouse = Location::parse_value(&warehouse).map_err(|e| {
            CatalogConfigurationError::new(format!("Invalid warehouse location: {e}"))
        })?;
        let io = StorageBackend::for_location(&warehouse).map_err(StorageError::new)?;

        let options = SqliteConnectOptions::from_str(uri)
            .map_err(|e| {
                CatalogConfigurationError::new(format!("Invalid catalog uri `{uri}`: {e}"))
            })?
            .create_if_missing(true);
        // Every connection to an in-memory database opens a database of its own.
        let pool = if uri.starts_with(MEMORY_URI_PREFIX) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(DEFAULT_MAX_CONNECTIONS)
        }
        .connect_with(options)
        .await
        .map_err(DBErrorHandler::into_catalog_backend_error)?;

        for statement in [CREATE_TABLES_TABLE, CREATE_NAMESPACE_PROPERTIES_TABLE] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(DBErrorHandler::into_catalog_backend_error)?;
        }
        tracing::debug!("Connected SQL catalog to {uri}");

        Ok(Self {
            name: name.into(),
            properties,
            warehouse,
            io,
            pool,
        })
    }

    #[must_use]
    pub fn warehouse(&self) -> &Location {
        &self.warehouse
    }

    fn storage_for(&self, location: &Location) -> Result<StorageBackend, StorageError> {
        storage_for(&self.io, &self.warehouse, location)
    }

    async fn namespace_exists_inner(
        &self,
        namespace: &NamespaceIdent,
    ) -> Result<bool, CatalogBackendError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT namespace FROM tablekeeper_namespace_properties
             WHERE catalog_name = ? AND namespace = ? AND property_key = ?",
        )
        .bind(&self.name)
        .bind(namespace.to_string())
        .bind(NAMESPACE_MARKER_KEY)
        .fetch_optional(&self.pool)
        .await
        .map_err(DBErrorHandler::into_catalog_backend_error)?;
        Ok(row.is_some())
    }

    async fn metadata_location_of(
        &self,
        table: &TableIdent,
    ) -> Result<Option<Location>, CatalogBackendError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT metadata_location FROM tablekeeper_tables
             WHERE catalog_name = ? AND table_namespace = ? AND table_name = ?",
        )
        .bind(&self.name)
        .bind(table.namespace().to_string())
        .bind(table.name())
        .fetch_optional(&self.pool)
        .await
        .map_err(DBErrorHandler::into_catalog_backend_error)?;
        row.map(|(location,)| parse_location(&location).map_err(corrupt_row))
            .transpose()
    }

    async fn load_table_inner(&self, table: &TableIdent) -> Result<Table, LoadTableError> {
        let metadata_location = self
            .metadata_location_of(table)
            .await?
            .ok_or_else(|| NoSuchTable::new(table.clone()))?;
        let io = self.storage_for(&metadata_location)?;
        let metadata = read_metadata::<LoadTableError>(&io, &metadata_location).await?;
        Ok(Table::new(
            table.clone(),
            metadata,
            metadata_location,
            io,
            self.handle(),
        ))
    }

    /// Inserts the table row and, if missing, the namespace marker.
    async fn insert_table_row(
        &self,
        table: &TableIdent,
        metadata_location: &Location,
    ) -> Result<(), CreateTableError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(DBErrorHandler::into_catalog_backend_error)?;
        sqlx::query(
            "INSERT OR IGNORE INTO tablekeeper_namespace_properties
             (catalog_name, namespace, property_key, property_value) VALUES (?, ?, ?, ?)",
        )
        .bind(&self.name)
        .bind(table.namespace().to_string())
        .bind(NAMESPACE_MARKER_KEY)
        .bind(NAMESPACE_MARKER_VALUE)
        .execute(&mut *tx)
        .await
        .map_err(DBErrorHandler::into_catalog_backend_error)?;
        let inserted = sqlx::query(
            "INSERT INTO tablekeeper_tables
             (catalog_name, table_namespace, table_name, metadata_location) VALUES (?, ?, ?, ?)",
        )
        .bind(&self.name)
        .bind(table.namespace().to_string())
        .bind(table.name())
        .bind(metadata_location.as_str())
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(TableAlreadyExists::new(table.clone()).into());
            }
            Err(e) => return Err(e.into_catalog_backend_error().into()),
        }
        tx.commit()
            .await
            .map_err(DBErrorHandler::into_catalog_backend_error)?;
        Ok(())
    }
}

#[async_trait]
impl Catalog for SqlCatalog {
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
        reject_marker_key(properties.keys())?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(DBErrorHandler::into_catalog_backend_error)?;
        let marker = sqlx::query(
            "INSERT INTO tablekeeper_namespace_properties
             (catalog_name, namespace, property_key, property_value) VALUES (?, ?, ?, ?)",
        )
        .bind(&self.name)
        .bind(namespace.to_string())
        .bind(NAMESPACE_MARKER_KEY)
        .bind(NAMESPACE_MARKER_VALUE)
        .execute(&mut *tx)
        .await;
        match marker {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(NamespaceAlreadyExists::new(namespace.clone()).into());
            }
            Err(e) => return Err(e.into_catalog_backend_error().into()),
        }
        for (key, value) in &properties {
            sqlx::query(
                "INSERT INTO tablekeeper_namespace_properties
                 (catalog_name, namespace, property_key, property_value) VALUES (?, ?, ?, ?)",
            )
            .bind(&self.name)
            .bind(namespace.to_string())
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(DBErrorHandler::into_catalog_backend_error)?;
        }
        tx.commit()
            .await
            .map_err(DBErrorHandler::into_catalog_backend_error)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn drop_namespace(&self, namespace: &NamespaceIdent) -> Result<(), DropNamespaceError> {
        let key = namespace.to_string();
        let prefix = format!("{key}.");
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(DBErrorHandler::into_catalog_backend_error)?;
        if !lock_namespace(&mut tx, &self.name, &key).await? {
            return Err(NoSuchNamespace::new(namespace.clone()).into());
        }
        let (tables,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tablekeeper_tables
             WHERE catalog_name = ? AND (table_namespace = ? OR substr(table_namespace, 1, ?) = ?)",
        )
        .bind(&self.name)
        .bind(&key)
        .bind(i64::try_from(prefix.chars().count()).unwrap_or(i64::MAX))
        .bind(&prefix)
        .fetch_one(&mut *tx)
        .await
        .map_err(DBErrorHandler::into_catalog_backend_error)?;
        if tables > 0 {
            return Err(NamespaceNotEmpty::new(namespace.clone()).into());
        }
        sqlx::query(
            "DELETE FROM tablekeeper_namespace_properties WHERE catalog_name = ? AND namespace = ?",
        )
        .bind(&self.name)
        .bind(&key)
        .execute(&mut *tx)
        .await
        .map_err(DBErrorHandler::into_catalog_backend_error)?;
        tx.commit()
            .await
            .map_err(DBErrorHandler::into_catalog_backend_error)?;
        Ok(())
    }

    async fn list_namespaces(
        &self,
        parent: Option<&NamespaceIdent>,
    ) -> Result<Vec<NamespaceIdent>, NamespaceOpError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT namespace FROM tablekeeper_namespace_properties
             WHERE catalog_name = ? AND property_key = ?",
        )
        .bind(&self.name)
        .bind(NAMESPACE_MARKER_KEY)
        .fetch_all(&self.pool)
        .await
        .map_err(DBErrorHandler::into_catalog_backend_error)?;
        let mut namespaces = rows
            .into_iter()
            .map(|(ns,)| NamespaceIdent::from_dotted(&ns).map_err(corrupt_row))
            .collect::<Result<Vec<_>, _>>()?;
        namespaces.retain(|ns| parent.is_none_or(|parent| ns.is_direct_child_of(parent)));
        namespaces.sort();
        Ok(namespaces)
    }

    async fn namespace_exists(&self, namespace: &NamespaceIdent) -> Result<bool, NamespaceOpError> {
        Ok(self.namespace_exists_inner(namespace).await?)
    }

    async fn load_namespace_properties(
        &self,
        namespace: &NamespaceIdent,
    ) -> Result<HashMap<String, String>, NamespaceOpError> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT property_key, property_value FROM tablekeeper_namespace_properties
             WHERE catalog_name = ? AND namespace = ?",
        )
        .bind(&self.name)
        .bind(namespace.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DBErrorHandler::into_catalog_backend_error)?;
        if !rows.iter().any(|(key, _)| key == NAMESPACE_MARKER_KEY) {
            return Err(NoSuchNamespace::new(namespace.clone()).into());
        }
        Ok(rows
            .into_iter()
            .filter(|(key, _)| key != NAMESPACE_MARKER_KEY)
            .map(|(key, value)| (key, value.unwrap_or_default()))
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn update_namespace_properties(
        &self,
        namespace: &NamespaceIdent,
        removals: Vec<String>,
        updates: HashMap<String, String>,
    ) -> Result<PropertiesUpdateSummary, NamespaceOpError> {
        reject_marker_key(removals.iter().chain(updates.keys()))?;
        let key = namespace.to_string();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(DBErrorHandler::into_catalog_backend_error)?;
        if !lock_namespace(&mut tx, &self.name, &key).await? {
            return Err(NoSuchNamespace::new(namespace.clone()).into());
        }
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT property_key, property_value FROM tablekeeper_namespace_properties
             WHERE catalog_name = ? AND namespace = ? AND property_key != ?",
        )
        .bind(&self.name)
        .bind(&key)
        .bind(NAMESPACE_MARKER_KEY)
        .fetch_all(&mut *tx)
        .await
        .map_err(DBErrorHandler::into_catalog_backend_error)?;
        let mut properties: HashMap<String, String> = rows
            .into_iter()
            .map(|(key, value)| (key, value.unwrap_or_default()))
            .collect();
        let summary = PropertiesUpdateSummary::apply(&mut properties, removals, updates);

        for removed in &summary.removed {
            sqlx::query(
                "DELETE FROM tablekeeper_namespace_properties
                 WHERE catalog_name = ? AND namespace = ? AND property_key = ?",
            )
            .bind(&self.name)
            .bind(&key)
            .bind(removed)
            .execute(&mut *tx)
            .await
            .map_err(DBErrorHandler::into_catalog_backend_error)?;
        }
        for updated in &summary.updated {
            sqlx::query(
                "INSERT INTO tablekeeper_namespace_properties
                 (catalog_name, namespace, property_key, property_value) VALUES (?, ?, ?, ?)
                 ON CONFLICT (catalog_name, namespace, property_key)
                 DO UPDATE SET property_value = excluded.property_value",
            )
            .bind(&self.name)
            .bind(&key)
            .bind(updated)
            .bind(properties.get(updated).cloned())
            .execute(&mut *tx)
            .await
            .map_err(DBErrorHandler::into_catalog_backend_error)?;
        }
        tx.commit()
            .await
            .map_err(DBErrorHandler::into_catalog_backend_error)?;
        Ok(summary)
    }

    #[tracing::instrument(skip(self, creation), fields(table = %creation.identifier))]
    async fn create_table(&self, creation: TableCreation) -> Result<Table, CreateTableError> {
        let identifier = creation.identifier.clone();
        if self.metadata_location_of(&identifier).await?.is_some() {
            return Err(TableAlreadyExists::new(identifier).into());
        }

        let (metadata, metadata_location) = create_metadata(creation, &self.warehouse)?;
        let io = self.storage_for(&metadata_location)?;
        let metadata = Arc::new(metadata);
        write_metadata::<CreateTableError>(&io, &metadata_location, metadata.clone()).await?;

        if let Err(e) = self.insert_table_row(&identifier, &metadata_location).await {
            delete_orphan(&io, &metadata_location).await;
            return Err(e);
        }
        publish_metadata(&metadata_location, metadata.clone()).await;
        tracing::info!("Created table {identifier} at {metadata_location}");
        Ok(Table::new(
            identifier,
            metadata,
            metadata_location,
            io,
            self.handle(),
        ))
    }

    #[tracing::instrument(skip(self))]
    async fn register_table(
        &self,
        table: &TableIdent,
        metadata_location: &Location,
    ) -> Result<Table, CreateTableError> {
        let io = self.storage_for(metadata_location)?;
        let metadata = read_metadata::<CreateTableError>(&io, metadata_location).await?;
        self.insert_table_row(table, metadata_location).await?;
        Ok(Table::new(
            table.clone(),
            metadata,
            metadata_location.clone(),
            io,
            self.handle(),
        ))
    }

    #[tracing::instrument(skip(self))]
    async fn load_table(&self, table: &TableIdent) -> Result<Table, LoadTableError> {
        self.load_table_inner(table).await
    }

    async fn table_exists(&self, table: &TableIdent) -> Result<bool, LoadTableError> {
        Ok(self.metadata_location_of(table).await?.is_some())
    }

    async fn list_tables(
        &self,
        namespace: Option<&NamespaceIdent>,
    ) -> Result<Vec<TableIdent>, NamespaceOpError> {
        let rows: Vec<(String, String)> = match namespace {
            Some(namespace) => sqlx::query_as(
                "SELECT table_namespace, table_name FROM tablekeeper_tables
                 WHERE catalog_name = ? AND table_namespace = ?",
            )
            .bind(&self.name)
            .bind(namespace.to_string()),
            None => sqlx::query_as(
                "SELECT table_namespace, table_name FROM tablekeeper_tables
                 WHERE catalog_name = ?",
            )
            .bind(&self.name),
        }
        .fetch_all(&self.pool)
        .await
        .map_err(DBErrorHandler::into_catalog_backend_error)?;

        let mut tables = rows
            .into_iter()
            .map(|(ns, name)| {
                NamespaceIdent::from_dotted(&ns)
                    .and_then(|ns| TableIdent::new(ns, name))
                    .map_err(corrupt_row)
            })
            .collect::<Result<Vec<_>, _>>()?;
        tables.sort();
        Ok(tables)
    }

    #[tracing::instrument(skip(self))]
    async fn drop_table(&self, table: &TableIdent) -> Result<(), DropTableError> {
        let deleted = sqlx::query(
            "DELETE FROM tablekeeper_tables
             WHERE catalog_name = ? AND table_namespace = ? AND table_name = ?",
        )
        .bind(&self.name)
        .bind(table.namespace().to_string())
        .bind(table.name())
        .execute(&self.pool)
        .await
        .map_err(DBErrorHandler::into_catalog_backend_error)?;
        if deleted.rows_affected() == 0 {
            return Err(NoSuchTable::new(table.clone()).into());
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn purge_table(&self, table: &TableIdent) -> Result<(), DropTableError> {
        let metadata_location = self
            .metadata_location_of(table)
            .await?
            .ok_or_else(|| NoSuchTable::new(table.clone()))?;
        let io = self.storage_for(&metadata_location)?;
        let metadata = read_metadata::<DropTableError>(&io, &metadata_location).await?;
        self.drop_table(table).await?;

        let table_location = table_location(&metadata)?;
        let io = self.storage_for(&table_location)?;
        io.remove_all(&table_location)
            .await
            .map_err(StorageError::new)?;
        forget_generations(&metadata, &metadata_location).await;
        tracing::info!("Purged table {table} at {table_location}");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn rename_table(
        &self,
        from: &TableIdent,
        to: &TableIdent,
    ) -> Result<Table, RenameTableError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(DBErrorHandler::into_catalog_backend_error)?;
        let occupied: Option<(String,)> = sqlx::query_as(
            "SELECT metadata_location FROM tablekeeper_tables
             WHERE catalog_name = ? AND table_namespace = ? AND table_name = ?",
        )
        .bind(&self.name)
        .bind(to.namespace().to_string())
        .bind(to.name())
        .fetch_optional(&mut *tx)
        .await
        .map_err(DBErrorHandler::into_catalog_backend_error)?;
        if occupied.is_some() {
            return Err(TableAlreadyExists::new(to.clone()).into());
        }

        let renamed = sqlx::query(
            "UPDATE tablekeeper_tables SET table_namespace = ?, table_name = ?
             WHERE catalog_name = ? AND table_namespace = ? AND table_name = ?",
        )
        .bind(to.namespace().to_string())
        .bind(to.name())
        .bind(&self.name)
        .bind(from.namespace().to_string())
        .bind(from.name())
        .execute(&mut *tx)
        .await
        .map_err(DBErrorHandler::into_catalog_backend_error)?;
        if renamed.rows_affected() == 0 {
            return Err(NoSuchTable::new(from.clone()).into());
        }

        sqlx::query(
            "INSERT OR IGNORE INTO tablekeeper_namespace_properties
             (catalog_name, namespace, property_key, property_value) VALUES (?, ?, ?, ?)",
        )
        .bind(&self.name)
        .bind(to.namespace().to_string())
        .bind(NAMESPACE_MARKER_KEY)
        .bind(NAMESPACE_MARKER_VALUE)
        .execute(&mut *tx)
        .await
        .map_err(DBErrorHandler::into_catalog_backend_error)?;
        tx.commit()
            .await
            .map_err(DBErrorHandler::into_catalog_backend_error)?;

        Ok(self.load_table_inner(to).await?)
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

        let live = self.load_table_inner(&identifier).await?;
        let live_location = live.metadata_location().clone();
        let Some(staged) = stage_commit(
            &identifier,
            live.metadata(),
            &live_location,
            &requirements,
            &updates,
        )?
        else {
            return Ok(CommitTableResponse {
                metadata: live.metadata_ref(),
                metadata_location: live_location,
            });
        };

        let new_location = next_metadata_location(staged.metadata.location(), &live_location)?;
        let io = self.storage_for(&new_location)?;
        let metadata = Arc::new(staged.metadata);
        write_metadata::<CommitTableError>(&io, &new_location, metadata.clone()).await?;

        let swapped = sqlx::query(
            "UPDATE tablekeeper_tables SET metadata_location = ?, previous_metadata_location = ?
             WHERE catalog_name = ? AND table_namespace = ? AND table_name = ?
             AND metadata_location = ?",
        )
        .bind(new_location.as_str())
        .bind(live_location.as_str())
        .bind(&self.name)
        .bind(identifier.namespace().to_string())
        .bind(identifier.name())
        .bind(live_location.as_str())
        .execute(&self.pool)
        .await;
        let swapped = match swapped {
            Ok(result) => result.rows_affected(),
            Err(e) => {
                delete_orphan(&io, &new_location).await;
                return Err(e.into_catalog_backend_error().into());
            }
        };
        if swapped == 0 {
            delete_orphan(&io, &new_location).await;
            return Err(CommitConflict::new(identifier, live_location.as_str()).into());
        }
        publish_metadata(&new_location, metadata.clone()).await;
        tracing::info!("Advanced table {identifier} from {live_location} to {new_location}");

        delete_expired(&io, &metadata, &staged.expired).await;
        Ok(CommitTableResponse {
            metadata,
            metadata_location: new_location,
        })
    }
}

#[cfg(test)]
mod tests {
    use maplit::hashmap;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::spec::test_schema;

    async fn sql_catalog(name: &str) -> SqlCatalog {
        SqlCatalog::connect(
            name,
            hashmap! {
                PROPERTY_URI.to_string() => "sqlite::memory:".to_string(),
                PROPERTY_WAREHOUSE.to_string() => "memory://sql-warehouse".to_string(),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_uri_is_required() {
        let err = SqlCatalog::connect("test", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, LoadCatalogError::CatalogConfigurationError(_)));
    }

    #[tokio::test]
    async fn test_namespace_marker_is_hidden_and_reserved() {
        let catalog = sql_catalog("marker").await;
        let ns = NamespaceIdent::new("ns");
        catalog
            .create_namespace(&ns, hashmap! { "owner".to_string() => "me".to_string() })
            .await
            .unwrap();
        assert_eq!(
            catalog.load_namespace_properties(&ns).await.unwrap(),
            hashmap! { "owner".to_string() => "me".to_string() }
        );

        let err = catalog
            .update_namespace_properties(&ns, vec![NAMESPACE_MARKER_KEY.to_string()], HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NamespaceOpError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_namespace_with_nested_tables_is_not_empty() {
        let catalog = sql_catalog("nested").await;
        let ns = NamespaceIdent::new("a");
        catalog.create_namespace(&ns, HashMap::new()).await.unwrap();
        catalog
            .create_table(
                TableCreation::builder()
                    .identifier(TableIdent::from_strs(["a", "b", "t"]).unwrap())
                    .schema(test_schema())
                    .build(),
            )
            .await
            .unwrap();

        let err = catalog.drop_namespace(&ns).await.unwrap_err();
        assert!(matches!(err, DropNamespaceError::NamespaceNotEmpty(_)));
        assert_eq!(
            catalog.list_namespaces(Some(&ns)).await.unwrap(),
            vec![NamespaceIdent::from_strs(["a", "b"]).unwrap()]
        );
    }

    #[tokio::test]
    async fn test_load_fails_when_pointer_names_missing_file() {
        let catalog = sql_catalog("conflict").await;
        let ident = TableIdent::from_strs(["ns", "t"]).unwrap();
        let table = catalog
            .create_table(
                TableCreation::builder()
                    .identifier(ident.clone())
                    .schema(test_schema())
                    .build(),
            )
            .await
            .unwrap();

        // Move the pointer behind the catalog's back.
        sqlx::query("UPDATE tablekeeper_tables SET metadata_location = ? WHERE table_name = ?")
            .bind(format!("{}/moved.metadata.json", table.location()))
            .bind("t")
            .execute(&catalog.pool)
            .await
            .unwrap();
        assert!(matches!(
            catalog.load_table(&ident).await.unwrap_err(),
            LoadTableError::StorageError(_)
        ));
    }
}
