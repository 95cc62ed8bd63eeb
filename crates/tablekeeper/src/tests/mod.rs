use std::collections::HashMap;

use maplit::hashmap;

use crate::{
    catalog::{Catalog, MemoryCatalog, PROPERTY_WAREHOUSE, TableCreation},
    identifier::TableIdent,
    spec::{PropertyValue, test_schema},
    table::Table,
};

mod commits;
mod local_storage;

pub(crate) const TEST_WAREHOUSE: &str = "memory://warehouse";

pub(crate) fn memory_catalog() -> MemoryCatalog {
    MemoryCatalog::new(
        "test",
        hashmap! { PROPERTY_WAREHOUSE.to_string() => TEST_WAREHOUSE.to_string() },
    )
    .unwrap()
}

pub(crate) fn table_ident(value: &str) -> TableIdent {
    value.parse().unwrap()
}

/// Creates `ns.t` with the `x`, `y`, `z` test schema in a fresh in-memory catalog.
pub(crate) async fn memory_table() -> Table {
    memory_table_with_properties(HashMap::new()).await
}

pub(crate) async fn memory_table_with_properties(
    properties: HashMap<String, PropertyValue>,
) -> Table {
    create_test_table(&memory_catalog(), "ns.t", properties).await
}

pub(crate) async fn create_test_table(
    catalog: &dyn Catalog,
    identifier: &str,
    properties: HashMap<String, PropertyValue>,
) -> Table {
    catalog
        .create_table(
            TableCreation::builder()
                .identifier(table_ident(identifier))
                .schema(test_schema())
                .properties(properties)
                .build(),
        )
        .await
        .unwrap()
}
