//! The catalog capability and its backends.
//!
//! A catalog owns the namespace registry and, per table, a pointer to the
//! live metadata file. Metadata generations are immutable files written next
//! to the table; a commit writes a new generation and then swaps the pointer
//! with a compare-and-swap on the previous location.

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use tablekeeper_io::Location;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::{
    error::{
        CommitTableError, CreateNamespaceError, CreateTableError, DropNamespaceError,
        DropTableError, LoadTableError, NamespaceOpError, RenameTableError, ValidationError,
    },
    identifier::{NamespaceIdent, TableIdent},
    spec::{PartitionSpec, PropertyValue, Schema, SortOrder, TableMetadataRef},
    table::Table,
    update::{TableRequirement, TableUpdate},
};

mod cache;
mod commit;
mod loader;
mod memory;
#[cfg(feature = "sqlx-sqlite")]
mod sql;

pub use loader::{
    CATALOG_IMPL_IN_MEMORY, CATALOG_IMPL_SQL, PROPERTY_CATALOG_IMPL, PROPERTY_TYPE, PROPERTY_URI,
    TYPE_IN_MEMORY, TYPE_SQL, load_catalog,
};
pub use memory::MemoryCatalog;
#[cfg(feature = "sqlx-sqlite")]
pub use sql::SqlCatalog;

/// Catalog property naming the root under which default table locations are derived.
pub const PROPERTY_WAREHOUSE: &str = "warehouse";

#[async_trait]
pub trait Catalog: Debug + Send + Sync + 'static {
    fn name(&self) -> &str;

    fn properties(&self) -> &HashMap<String, String>;

    /// Shared handle stored in the [`Table`]s this catalog hands out.
    fn handle(&self) -> Arc<dyn Catalog>;

    async fn create_namespace(
        &self,
        namespace: &NamespaceIdent,
        properties: HashMap<String, String>,
    ) -> Result<(), CreateNamespaceError>;

    /// Fails if any table lives in the namespace.
    async fn drop_namespace(&self, namespace: &NamespaceIdent) -> Result<(), DropNamespaceError>;

    /// All namespaces, or the direct children of `parent`.
    async fn list_namespaces(
        &self,
        parent: Option<&NamespaceIdent>,
    ) -> Result<Vec<NamespaceIdent>, NamespaceOpError>;

    async fn namespace_exists(&self, namespace: &NamespaceIdent) -> Result<bool, NamespaceOpError>;

    async fn load_namespace_properties(
        &self,
        namespace: &NamespaceIdent,
    ) -> Result<HashMap<String, String>, NamespaceOpError>;

    /// Applies `removals`, then `updates`.
    async fn update_namespace_properties(
        &self,
        namespace: &NamespaceIdent,
        removals: Vec<String>,
        updates: HashMap<String, String>,
    ) -> Result<PropertiesUpdateSummary, NamespaceOpError>;

    /// Creates the table and its namespace, if missing, and writes the first
    /// metadata generation.
    async fn create_table(&self, creation: TableCreation) -> Result<Table, CreateTableError>;

    /// Registers an existing metadata file as the live generation of `table`.
    async fn register_table(
        &self,
        table: &TableIdent,
        metadata_location: &Location,
    ) -> Result<Table, CreateTableError>;

    async fn load_table(&self, table: &TableIdent) -> Result<Table, LoadTableError>;

    async fn table_exists(&self, table: &TableIdent) -> Result<bool, LoadTableError>;

    /// Tables directly in `namespace`, or all tables. Unknown namespaces have no tables.
    async fn list_tables(
        &self,
        namespace: Option<&NamespaceIdent>,
    ) -> Result<Vec<TableIdent>, NamespaceOpError>;

    /// Removes the registry entry. Files are left in place.
    async fn drop_table(&self, table: &TableIdent) -> Result<(), DropTableError>;

    /// Removes the registry entry and every file below the table location.
    async fn purge_table(&self, table: &TableIdent) -> Result<(), DropTableError>;

    /// Moves the table to `to`, creating its namespace if missing. The
    /// metadata location is preserved. Returns the table under its new name.
    async fn rename_table(
        &self,
        from: &TableIdent,
        to: &TableIdent,
    ) -> Result<Table, RenameTableError>;

    /// Validates `commit` against the live metadata and advances the pointer.
    ///
    /// A commit whose updates leave the metadata unchanged succeeds without
    /// writing and returns the live generation.
    async fn commit_table(
        &self,
        commit: TableCommit,
    ) -> Result<CommitTableResponse, CommitTableError>;
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct TableCreation {
    pub identifier: TableIdent,
    pub schema: Schema,
    /// Derived from the warehouse and the identifier if unset.
    #[builder(default, setter(strip_option, into))]
    pub location: Option<String>,
    #[builder(default, setter(strip_option))]
    pub partition_spec: Option<PartitionSpec>,
    #[builder(default, setter(strip_option))]
    pub sort_order: Option<SortOrder>,
    #[builder(default)]
    pub properties: HashMap<String, PropertyValue>,
    #[builder(default, setter(strip_option))]
    pub uuid: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct TableCommit {
    pub identifier: TableIdent,
    #[builder(default)]
    pub requirements: Vec<TableRequirement>,
    #[builder(default)]
    pub updates: Vec<TableUpdate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitTableResponse {
    pub metadata: TableMetadataRef,
    pub metadata_location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertiesUpdateSummary {
    pub removed: Vec<String>,
    pub updated: Vec<String>,
    pub missing: Vec<String>,
}

impl PropertiesUpdateSummary {
    /// Applies removals then updates to `properties`, recording the effect.
    pub(crate) fn apply(
        properties: &mut HashMap<String, String>,
        removals: Vec<String>,
        updates: HashMap<String, String>,
    ) -> Self {
        let mut summary = Self::default();
        for key in removals {
            if properties.remove(&key).is_some() {
                summary.removed.push(key);
            } else {
                summary.missing.push(key);
            }
        }
        for (key, value) in updates {
            properties.insert(key.clone(), value);
            summary.updated.push(key);
        }
        summary.removed.sort();
        summary.updated.sort();
        summary.missing.sort();
        summary
    }
}

/// `{warehouse}/{namespace parts}/{table name}`.
pub(crate) fn default_table_location(warehouse: &Location, table: &TableIdent) -> Location {
    let mut location = warehouse.clone();
    for part in table.namespace().parts() {
        location.push(part);
    }
    location.push(table.name());
    location.without_trailing_slash();
    location
}

pub(crate) fn parse_location(value: &str) -> Result<Location, ValidationError> {
    Location::parse_value(value)
        .map_err(|e| ValidationError::for_key(format!("Invalid location `{value}`: {e}"), value))
}

#[cfg(test)]
mod tests {
    use maplit::hashmap;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_properties_update_summary() {
        let mut properties = hashmap! {
            "key1".to_string() => "v1".to_string(),
            "key2".to_string() => "v2".to_string(),
        };
        let summary = PropertiesUpdateSummary::apply(
            &mut properties,
            vec!["key1".to_string(), "key4".to_string()],
            hashmap! { "key3".to_string() => "v3".to_string() },
        );
        assert_eq!(
            summary,
            PropertiesUpdateSummary {
                removed: vec!["key1".to_string()],
                updated: vec!["key3".to_string()],
                missing: vec!["key4".to_string()],
            }
        );
        assert_eq!(
            properties,
            hashmap! {
                "key2".to_string() => "v2".to_string(),
                "key3".to_string() => "v3".to_string(),
            }
        );
    }

    #[test]
    fn test_default_table_location() {
        let warehouse = Location::parse_value("memory://warehouse/").unwrap();
        let table = TableIdent::from_strs(["com", "org", "my_table"]).unwrap();
        assert_eq!(
            default_table_location(&warehouse, &table).as_str(),
            "memory://warehouse/com/org/my_table"
        );
    }
}
