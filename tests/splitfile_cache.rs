//! S3: running the same Splitfile twice hits the cached layer instead of recomputing it
//! (spec §8). Drives `Executor` end to end through the parser, over the in-memory stack.

use std::sync::Arc;

use tablegraph::config::EngineLimits;
use tablegraph::engine::memory::MemoryEngine;
use tablegraph::metastore::memory::MemoryMetadataStore;
use tablegraph::model::{ColumnDef, Repository};
use tablegraph::objectstore::memory::MemoryObjectStore;
use tablegraph::repo::Catalog;
use tablegraph::splitfile::{Executor, parser};

type TestCatalog = Catalog<MemoryEngine, MemoryMetadataStore, MemoryObjectStore>;

async fn new_catalog() -> TestCatalog {
    Catalog::new(
        Arc::new(MemoryEngine::new()),
        Arc::new(MemoryMetadataStore::new()),
        Arc::new(MemoryObjectStore::new()),
        EngineLimits::default(),
    )
}

#[tokio::test]
async fn import_layer_is_cached_and_provenance_round_trips() {
    let catalog = new_catalog().await;
    let source = Repository::unqualified("fruits");
    catalog.init(&source).await.unwrap();
    catalog
        .create_table(&source, "apples", vec![ColumnDef::new(0, "id", "int", true)])
        .await
        .unwrap();

    let script = "# derive an apples view\nOUTPUT derived\nFROM fruits IMPORT apples AS cultivars";
    let file = parser::parse(script).unwrap();
    let executor = Executor::new(&catalog);

    let first_run = executor.execute(&file).await.unwrap();
    let second_run = executor.execute(&file).await.unwrap();
    assert_eq!(first_run, second_run, "re-running an unchanged Splitfile must hit the cached layer");

    let derived = Repository::unqualified("derived");
    let rendered = executor.provenance(&derived, first_run).await.unwrap();
    assert!(rendered.contains("IMPORT"));
    assert!(rendered.contains("cultivars"));
}

#[tokio::test]
async fn changing_the_import_alias_produces_a_different_target_hash() {
    let catalog = new_catalog().await;
    let source = Repository::unqualified("fruits");
    catalog.init(&source).await.unwrap();
    catalog
        .create_table(&source, "apples", vec![ColumnDef::new(0, "id", "int", true)])
        .await
        .unwrap();

    let executor = Executor::new(&catalog);
    let as_cultivars = parser::parse("OUTPUT derived\nFROM fruits IMPORT apples AS cultivars").unwrap();
    let as_harvest = parser::parse("OUTPUT derived\nFROM fruits IMPORT apples AS harvest").unwrap();

    let first = executor.execute(&as_cultivars).await.unwrap();
    let second = executor.execute(&as_harvest).await.unwrap();
    assert_ne!(first, second, "a different alias must produce a different cache key");
}
