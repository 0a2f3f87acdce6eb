//! S4: cloning with `download_all=false` leaves image metadata but no object bodies
//! locally; the first `checkout` that needs those objects fetches them from the
//! configured remote (spec §8).

use std::sync::Arc;

use serde_json::json;
use tablegraph::config::EngineLimits;
use tablegraph::engine::memory::MemoryEngine;
use tablegraph::metastore::MetadataStore;
use tablegraph::metastore::memory::MemoryMetadataStore;
use tablegraph::objectstore::ObjectStore;
use tablegraph::model::{ColumnDef, Repository};
use tablegraph::objectstore::memory::MemoryObjectStore;
use tablegraph::repo::Catalog;
use tablegraph::sync::lazy::RemoteBackedObjectStore;
use tablegraph::sync::{LocalPeer, clone_repository};

type RemoteCatalog = Catalog<MemoryEngine, MemoryMetadataStore, MemoryObjectStore>;
type LocalObjectStore = RemoteBackedObjectStore<MemoryObjectStore, LocalPeer<MemoryEngine, MemoryMetadataStore, MemoryObjectStore>>;
type LocalCatalog = Catalog<MemoryEngine, MemoryMetadataStore, LocalObjectStore>;

#[tokio::test]
async fn clone_without_download_all_defers_object_fetch_to_first_checkout() {
    let remote_engine = Arc::new(MemoryEngine::new());
    let remote: Arc<RemoteCatalog> = Arc::new(Catalog::new(
        remote_engine.clone(),
        Arc::new(MemoryMetadataStore::new()),
        Arc::new(MemoryObjectStore::new()),
        EngineLimits::default(),
    ));
    let repo = Repository::unqualified("fruits");
    remote.init(&repo).await.unwrap();
    remote
        .create_table(&repo, "apples", vec![ColumnDef::new(0, "id", "int", true)])
        .await
        .unwrap();
    remote_engine.insert_row("fruits", "apples", vec![("id".into(), json!(1))]);
    let head = remote.commit(&repo, Some("seed".into()), false).await.unwrap();
    remote.tag(&repo, "release", &head.to_string(), false).await.unwrap();

    let local_engine = Arc::new(MemoryEngine::new());
    let local_store = RemoteBackedObjectStore::new(MemoryObjectStore::new(), LocalPeer::new(remote.clone()));
    let local: Arc<LocalCatalog> = Arc::new(Catalog::new(
        local_engine,
        Arc::new(MemoryMetadataStore::new()),
        Arc::new(local_store),
        EngineLimits::default(),
    ));
    local.init(&repo).await.unwrap();

    let remote_peer = LocalPeer::new(remote.clone());
    let local_peer = Arc::new(LocalPeer::new(local.clone()));
    let transferred = clone_repository(&remote_peer, local_peer, &repo, false, &EngineLimits::default(), tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(transferred, 0, "download_all=false must not transfer any object bodies up front");
    assert!(local.objects().all_object_ids().await.unwrap().is_empty());

    let checked_out = local.checkout(&repo, "release").await.unwrap();
    assert_eq!(checked_out, head);

    let image = local.meta().get_image(&repo, head).await.unwrap().unwrap();
    let object_ids = &image.tables["apples"].object_ids;
    assert!(!object_ids.is_empty());
    for id in object_ids {
        assert!(local.objects().has_object(*id).await.unwrap(), "checkout must have fetched and cached the object locally");
    }
}
