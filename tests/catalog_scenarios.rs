//! End-to-end `Catalog` scenarios driven against the in-memory engine/metastore/object
//! store stack, covering the concrete cases a live Postgres/SQLite/filesystem run would
//! hit the same way.

use std::sync::Arc;

use serde_json::json;
use tablegraph::config::EngineLimits;
use tablegraph::engine::memory::MemoryEngine;
use tablegraph::errors::Error;
use tablegraph::metastore::MetadataStore;
use tablegraph::metastore::memory::MemoryMetadataStore;
use tablegraph::model::{ColumnDef, Repository};
use tablegraph::objectstore::memory::MemoryObjectStore;
use tablegraph::repo::Catalog;

type TestCatalog = Catalog<MemoryEngine, MemoryMetadataStore, MemoryObjectStore>;

fn fruits_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new(0, "fruit_id", "int", true),
        ColumnDef::new(1, "name", "text", false),
    ]
}

async fn new_catalog() -> (TestCatalog, Arc<MemoryEngine>) {
    let engine = Arc::new(MemoryEngine::new());
    let meta = Arc::new(MemoryMetadataStore::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let catalog = Catalog::new(engine.clone(), meta, objects, EngineLimits::default());
    (catalog, engine)
}

/// S1: commit, then insert two rows and delete one before a second commit — `diff`
/// between the two images reports exactly the net row-level changes.
#[tokio::test]
async fn commit_then_diff_reports_row_level_counts() {
    let (catalog, engine) = new_catalog().await;
    let repo = Repository::parse("fruit_db");
    catalog.init(&repo).await.unwrap();
    catalog.create_table(&repo, "fruits", fruits_columns()).await.unwrap();
    let first = catalog.commit(&repo, Some("seed".into()), false).await.unwrap();

    engine.insert_row("fruit_db", "fruits", vec![("fruit_id".into(), json!(1)), ("name".into(), json!("apple"))]);
    engine.insert_row("fruit_db", "fruits", vec![("fruit_id".into(), json!(2)), ("name".into(), json!("pear"))]);
    let second = catalog.commit(&repo, Some("add two".into()), false).await.unwrap();
    assert_ne!(first, second);

    let diffs = catalog.diff(&repo, &first.to_string(), &second.to_string(), true).await.unwrap();
    let fruits_diff = &diffs["fruits"];
    assert_eq!(fruits_diff.added, 2);
    assert_eq!(fruits_diff.removed, 0);
    assert_eq!(fruits_diff.changed, 0);
}

/// S2: tagging the same name twice without `force` is rejected; `force` repoints it.
#[tokio::test]
async fn tag_reuse_is_rejected_without_force() {
    let (catalog, _engine) = new_catalog().await;
    let repo = Repository::parse("fruit_db");
    catalog.init(&repo).await.unwrap();
    catalog.create_table(&repo, "fruits", fruits_columns()).await.unwrap();
    let v1 = catalog.commit(&repo, Some("v1".into()), false).await.unwrap();
    catalog.tag(&repo, "release", &v1.to_string(), false).await.unwrap();

    let v2 = catalog.commit(&repo, Some("v2".into()), false).await.unwrap();
    let err = catalog.tag(&repo, "release", &v2.to_string(), false).await.unwrap_err();
    assert!(matches!(err, Error::TagExists(_)));

    catalog.tag(&repo, "release", &v2.to_string(), true).await.unwrap();
    assert_eq!(catalog.resolve_image(&repo, "release").await.unwrap(), v2);
}

/// S5: repo with two tagged images, v1 (parent) and v2 (child, also HEAD). Uncheckout so
/// v2 isn't HEAD, delete v2's tag, then prune removes v2 (image row and objects) while
/// leaving v1 — still tagged — intact.
#[tokio::test]
async fn prune_removes_untagged_child_image_but_keeps_tagged_parent() {
    let (catalog, engine) = new_catalog().await;
    let repo = Repository::parse("fruit_db");
    catalog.init(&repo).await.unwrap();
    catalog.create_table(&repo, "fruits", fruits_columns()).await.unwrap();
    let v1 = catalog.commit(&repo, Some("v1".into()), false).await.unwrap();
    catalog.tag(&repo, "v1", &v1.to_string(), false).await.unwrap();

    engine.insert_row("fruit_db", "fruits", vec![("fruit_id".into(), json!(1)), ("name".into(), json!("apple"))]);
    let v2 = catalog.commit(&repo, Some("v2".into()), false).await.unwrap();
    catalog.tag(&repo, "v2", &v2.to_string(), false).await.unwrap();

    catalog.uncheckout(&repo).await.unwrap();
    catalog.tag_remove(&repo, "v2").await.unwrap();
    catalog.prune().await.unwrap();

    assert!(catalog.meta().get_image(&repo, v1).await.unwrap().is_some());
    assert!(catalog.meta().get_image(&repo, v2).await.unwrap().is_none());
    assert_eq!(catalog.resolve_image(&repo, "v1").await.unwrap(), v1);
}

/// S6: an image that is currently checked out cannot be removed.
#[tokio::test]
async fn rm_refuses_the_checked_out_image() {
    let (catalog, _engine) = new_catalog().await;
    let repo = Repository::parse("fruit_db");
    catalog.init(&repo).await.unwrap();
    catalog.create_table(&repo, "fruits", fruits_columns()).await.unwrap();
    let head = catalog.commit(&repo, Some("head".into()), false).await.unwrap();

    let err = catalog.rm(&repo, &head.to_string()).await.unwrap_err();
    assert!(matches!(err, Error::CheckedOutImage(_)));
}

/// Read-after-write: `resolve_image("HEAD")` immediately reflects the image a commit just
/// produced, with no separate refresh step.
#[tokio::test]
async fn resolve_head_reflects_the_most_recent_commit() {
    let (catalog, _engine) = new_catalog().await;
    let repo = Repository::parse("fruit_db");
    catalog.init(&repo).await.unwrap();
    catalog.create_table(&repo, "fruits", fruits_columns()).await.unwrap();
    let head = catalog.commit(&repo, Some("seed".into()), false).await.unwrap();
    assert_eq!(catalog.resolve_image(&repo, "HEAD").await.unwrap(), head);
}

/// Committing with no pending changes anywhere produces a table_entries set identical to
/// the parent's — no spurious new objects.
#[tokio::test]
async fn no_pending_changes_commit_is_a_pure_carry_over() {
    let (catalog, _engine) = new_catalog().await;
    let repo = Repository::parse("fruit_db");
    catalog.init(&repo).await.unwrap();
    catalog.create_table(&repo, "fruits", fruits_columns()).await.unwrap();
    let v1 = catalog.commit(&repo, Some("v1".into()), false).await.unwrap();
    let v2 = catalog.commit(&repo, Some("no-op".into()), false).await.unwrap();

    let image_v1 = catalog.meta().get_image(&repo, v1).await.unwrap().unwrap();
    let image_v2 = catalog.meta().get_image(&repo, v2).await.unwrap().unwrap();
    assert_eq!(image_v1.tables, image_v2.tables);
}

/// Spec §4.4: commit fails outright when no image is checked out, rather than silently
/// committing against the implicit empty root.
#[tokio::test]
async fn commit_without_a_checked_out_image_fails() {
    let (catalog, _engine) = new_catalog().await;
    let repo = Repository::parse("fruit_db");
    catalog.init(&repo).await.unwrap();
    catalog.create_table(&repo, "fruits", fruits_columns()).await.unwrap();
    catalog.uncheckout(&repo).await.unwrap();

    let err = catalog.commit(&repo, Some("orphan".into()), false).await.unwrap_err();
    assert!(matches!(err, Error::NoCheckedOutImage(_)));
}

/// `commit(.., snap=true)` forces a SNAP for every changed table even though the chain
/// is nowhere near `diff_chain_limit` (spec §6 `-s/--snap`).
#[tokio::test]
async fn forced_snap_commit_bypasses_the_diff_chain_limit() {
    let (catalog, engine) = new_catalog().await;
    let repo = Repository::parse("fruit_db");
    catalog.init(&repo).await.unwrap();
    catalog.create_table(&repo, "fruits", fruits_columns()).await.unwrap();

    engine.insert_row("fruit_db", "fruits", vec![("fruit_id".into(), json!(1)), ("name".into(), json!("apple"))]);
    let head = catalog.commit(&repo, Some("forced snap".into()), true).await.unwrap();

    let image = catalog.meta().get_image(&repo, head).await.unwrap().unwrap();
    assert_eq!(image.tables["fruits"].object_ids.len(), 1, "forced snap must not append a DIFF onto the existing chain");
}
