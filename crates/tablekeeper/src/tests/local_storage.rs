use std::collections::HashMap;

use maplit::hashmap;
use pretty_assertions::assert_eq;
use tablekeeper_io::{Location, Storage};

use crate::{
    catalog::{Catalog, MemoryCatalog, PROPERTY_WAREHOUSE},
    spec::PrimitiveType,
    tests::create_test_table,
};

/// Test that generations are written as files below the table location
#[tokio::test]
async fn test_metadata_files_on_local_disk() {
    let dir = tempfile::tempdir().unwrap();
    let warehouse = Location::parse_value(dir.path().to_str().unwrap()).unwrap();
    let catalog = MemoryCatalog::new(
        "local",
        hashmap! { PROPERTY_WAREHOUSE.to_string() => warehouse.to_string() },
    )
    .unwrap();

    let mut table = create_test_table(&catalog, "db.events", HashMap::new()).await;
    assert_eq!(
        table.location(),
        warehouse.cloning_push("db").push("events").as_str()
    );

    table
        .update_schema(|update| {
            update.add_column("ts", PrimitiveType::Timestamptz, None)?;
            Ok(())
        })
        .await
        .unwrap();

    let metadata_dir = Location::parse_value(&format!("{}/metadata", table.location())).unwrap();
    let files = table.io().list(&metadata_dir).await.unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.contains(table.metadata_location()));

    let path = table.metadata_location().url().to_file_path().unwrap();
    let on_disk = std::fs::read(path).unwrap();
    let parsed = crate::spec::TableMetadata::from_json_slice(&on_disk).unwrap();
    assert_eq!(&parsed, table.metadata());

    catalog.purge_table(table.identifier()).await.unwrap();
    assert!(table.io().list(&metadata_dir).await.unwrap().is_empty());
}
