use std::collections::HashMap;

use maplit::hashmap;
use pretty_assertions::assert_eq;
use tablekeeper_io::Storage;
use tracing_test::traced_test;

use crate::{
    catalog::{Catalog, TableCommit},
    error::{CommitTableError, CreateTableError, ValidationError},
    spec::{
        NestedField, NullOrder, PROPERTY_METADATA_DELETE_AFTER_COMMIT_ENABLED,
        PROPERTY_METADATA_PREVIOUS_VERSIONS_MAX, PrimitiveType, PropertyValue, Schema, Transform,
    },
    tests::{
        create_test_table, memory_catalog, memory_table, memory_table_with_properties, table_ident,
    },
    update::{LAST_ADDED, TableRequirement, TableUpdate},
};

pub(super) async fn check_noop_commit_keeps_generation(catalog: &dyn Catalog) {
    let table = create_test_table(
        catalog,
        "ns.noop",
        hashmap! { "owner".to_string() => PropertyValue::from("me") },
    )
    .await;
    let response = catalog
        .commit_table(
            TableCommit::builder()
                .identifier(table.identifier().clone())
                .updates(vec![TableUpdate::SetProperties {
                    updates: hashmap! { "owner".to_string() => "me".to_string() },
                }])
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(&response.metadata_location, table.metadata_location());
    assert_eq!(response.metadata.as_ref(), table.metadata());
}

pub(super) async fn check_stale_handle_is_rejected(catalog: &dyn Catalog) {
    let mut first = create_test_table(catalog, "ns.stale", HashMap::new()).await;
    let mut second = catalog.load_table(first.identifier()).await.unwrap();

    first
        .update_schema(|update| {
            update.add_column("a", PrimitiveType::Long, None)?;
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(first.schema().schema_id(), 1);
    assert_eq!(first.schema().field_by_name("a").unwrap().id, 4);

    let err = second
        .update_schema(|update| {
            update.add_column("b", PrimitiveType::String, None)?;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(
        matches!(err, CommitTableError::RequirementFailed(_)),
        "{err:?}"
    );
    assert!(err.is_retryable());

    // A refreshed handle recomputes against the new generation.
    second.refresh().await.unwrap();
    second
        .update_schema(|update| {
            update.add_column("b", PrimitiveType::String, None)?;
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(second.schema().schema_id(), 2);
    assert_eq!(second.schema().field_by_name("a").unwrap().id, 4);
    assert_eq!(second.schema().field_by_name("b").unwrap().id, 5);
    assert_eq!(second.metadata().last_column_id(), 5);
    assert_eq!(second.metadata().metadata_log().len(), 2);
}

pub(super) async fn check_transaction_commits_once(catalog: &dyn Catalog) {
    let mut table = create_test_table(catalog, "ns.batched", HashMap::new()).await;
    let created_at = table.metadata_location().clone();

    table
        .with_transaction(|tx| {
            let mut schema = tx.update_schema();
            schema.add_column("category", PrimitiveType::String, Some("product category"))?;
            schema.commit()?;

            let mut spec = tx.update_spec();
            spec.add_identity("category")?
                .add_field("x", Transform::Bucket(16), None)?;
            spec.commit()?;

            let mut order = tx.replace_sort_order();
            order.asc("y", NullOrder::First)?;
            order.commit()?;

            let mut properties = tx.update_properties();
            properties.set("owner", "analytics")?;
            properties.commit()
        })
        .await
        .unwrap();

    assert_eq!(table.metadata().metadata_log().len(), 1);
    assert_eq!(
        table.metadata().metadata_log()[0].metadata_file,
        created_at.to_string()
    );
    assert!(
        table
            .metadata_location()
            .file_name()
            .unwrap()
            .starts_with("00002-")
    );
    assert_eq!(table.spec().fields.len(), 2);
    assert_eq!(
        table
            .spec()
            .fields
            .iter()
            .map(|f| f.field_id)
            .collect::<Vec<_>>(),
        vec![1000, 1001]
    );
    assert!(!table.sort_order().is_unsorted());
    assert_eq!(table.properties()["owner"], "analytics");

    let loaded = catalog.load_table(table.identifier()).await.unwrap();
    assert_eq!(loaded, table);
}

pub(super) async fn check_delete_after_commit(catalog: &dyn Catalog) {
    let mut table = create_test_table(
        catalog,
        "ns.expiring",
        hashmap! {
            PROPERTY_METADATA_PREVIOUS_VERSIONS_MAX.to_string() => PropertyValue::from(1),
            PROPERTY_METADATA_DELETE_AFTER_COMMIT_ENABLED.to_string() => PropertyValue::from(true),
        },
    )
    .await;

    let mut generations = vec![table.metadata_location().clone()];
    for i in 0..3 {
        table
            .update_properties(|update| {
                update.set("round", i)?;
                Ok(())
            })
            .await
            .unwrap();
        generations.push(table.metadata_location().clone());
    }

    assert_eq!(table.metadata().metadata_log().len(), 1);
    assert_eq!(
        table.metadata().metadata_log()[0].metadata_file,
        generations[2].to_string()
    );
    for expired in &generations[..2] {
        assert!(!table.io().exists(expired).await.unwrap(), "{expired}");
        let err = catalog
            .register_table(&table_ident("ns.expired"), expired)
            .await
            .unwrap_err();
        assert!(matches!(err, CreateTableError::StorageError(_)), "{err:?}");
    }
    for kept in &generations[2..] {
        assert!(table.io().exists(kept).await.unwrap(), "{kept}");
    }
}

pub(super) async fn check_deleted_column_id_is_not_reused(catalog: &dyn Catalog) {
    let mut table = create_test_table(catalog, "ns.recycled", HashMap::new()).await;
    table
        .update_schema(|update| {
            update.delete_column("z")?;
            Ok(())
        })
        .await
        .unwrap();
    assert!(table.schema().field_by_name("z").is_none());
    assert_eq!(table.metadata().last_column_id(), 3);

    table
        .update_schema(|update| {
            update.add_column("z", PrimitiveType::String, None)?;
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(table.schema().field_by_name("z").unwrap().id, 4);
    assert_eq!(table.metadata().last_column_id(), 4);

    // A hand-written schema may not hand out the dropped id again.
    let recycled = Schema::builder()
        .with_schema_id(0)
        .with_fields(vec![
            NestedField::optional(1, "x", PrimitiveType::Long),
            NestedField::optional(3, "w", PrimitiveType::String),
        ])
        .build()
        .unwrap();
    let err = catalog
        .commit_table(
            TableCommit::builder()
                .identifier(table.identifier().clone())
                .updates(vec![
                    TableUpdate::AddSchema {
                        schema: recycled,
                        last_column_id: None,
                    },
                    TableUpdate::SetCurrentSchema {
                        schema_id: LAST_ADDED,
                    },
                ])
                .build(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CommitTableError::ValidationError(_)), "{err:?}");
    let loaded = catalog.load_table(table.identifier()).await.unwrap();
    assert_eq!(loaded.metadata_location(), table.metadata_location());
}

/// Test that a failing transaction body leaves the catalog untouched
#[tokio::test]
async fn test_failed_transaction_is_discarded() {
    let mut table = memory_table().await;
    let before = table.clone();

    let err = table
        .with_transaction(|tx| {
            let mut properties = tx.update_properties();
            properties.set("owner", "me")?;
            properties.commit()?;
            Err(ValidationError::new("abort"))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CommitTableError::ValidationError(_)));
    assert_eq!(table, before);

    let loaded = table.catalog().load_table(table.identifier()).await.unwrap();
    assert_eq!(loaded.metadata_location(), before.metadata_location());
}

/// Test that a commit which changes nothing does not write a new generation
#[tokio::test]
async fn test_noop_commit_keeps_generation() {
    check_noop_commit_keeps_generation(&memory_catalog()).await;
}

/// Test that requirements are checked against the live metadata
#[tokio::test]
#[traced_test]
async fn test_stale_handle_is_rejected() {
    check_stale_handle_is_rejected(&memory_catalog()).await;
    assert!(logs_contain("Advanced table ns.stale"));
}

#[tokio::test]
async fn test_transaction_commits_once() {
    check_transaction_commits_once(&memory_catalog()).await;
}

#[tokio::test]
async fn test_commit_on_missing_table() {
    let catalog = memory_catalog();
    let err = catalog
        .commit_table(
            TableCommit::builder()
                .identifier("ns.missing".parse().unwrap())
                .requirements(vec![TableRequirement::NotExist])
                .build(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CommitTableError::NoSuchTable(_)));
}

/// Test that expired metadata files are deleted after a commit when enabled
#[tokio::test]
async fn test_delete_after_commit() {
    check_delete_after_commit(&memory_catalog()).await;
}

#[tokio::test]
async fn test_deleted_column_id_is_not_reused() {
    check_deleted_column_id_is_not_reused(&memory_catalog()).await;
}

/// Test that the metadata log keeps entries when deletion is disabled
#[tokio::test]
async fn test_metadata_log_is_trimmed_without_deletion() {
    let mut table = memory_table_with_properties(hashmap! {
        PROPERTY_METADATA_PREVIOUS_VERSIONS_MAX.to_string() => PropertyValue::from(2),
    })
    .await;
    let first = table.metadata_location().clone();
    for i in 0..4 {
        table
            .update_properties(|update| {
                update.set("round", i)?;
                Ok(())
            })
            .await
            .unwrap();
    }
    assert_eq!(table.metadata().metadata_log().len(), 2);
    assert!(table.io().exists(&first).await.unwrap());
}

/// Test that concurrent writers never lose a successful commit
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits() {
    const WRITERS: usize = 16;

    let mut table = memory_table().await;
    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let mut table = table.clone();
            tokio::spawn(async move {
                table
                    .update_properties(|update| {
                        update.set(format!("writer-{i}"), "done")?;
                        Ok(())
                    })
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => successes += 1,
            Err(e) => assert!(
                matches!(
                    e,
                    CommitTableError::CommitConflict(_) | CommitTableError::RequirementFailed(_)
                ),
                "{e:?}"
            ),
        }
    }
    assert!(successes >= 1);

    table.refresh().await.unwrap();
    assert_eq!(table.metadata().metadata_log().len(), successes);
    assert_eq!(
        table
            .properties()
            .keys()
            .filter(|k| k.starts_with("writer-"))
            .count(),
        successes
    );
}
