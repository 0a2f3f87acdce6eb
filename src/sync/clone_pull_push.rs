//! The five sync phases (spec §4.6): metadata diff, object enumeration, object diff,
//! object transfer, metadata apply. `clone`, `pull`, and `push` are thin wrappers around
//! the same phase sequence run in opposite directions.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::EngineLimits;
use crate::errors::Error;
use crate::hash::ObjectHash;
use crate::model::{Image, Repository};
use crate::sync::SyncProtocol;

/// Upper bound on concurrent object transfers during a single clone/pull/push (spec §5:
/// "several engine adapter calls concurrently").
const MAX_CONCURRENT_TRANSFERS: usize = 8;

async fn with_retries<F, Fut, T>(limits: &EngineLimits, cancel: &CancellationToken, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match tokio::time::timeout(limits.network_timeout, f()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if attempt < limits.network_retries => {
                attempt += 1;
                let backoff = std::time::Duration::from_millis(100 * 2u64.pow(attempt));
                tracing::warn!(error = %e, attempt, "sync operation failed, retrying");
                tokio::time::sleep(backoff).await;
            }
            Ok(Err(e)) => return Err(e),
            Err(_) if attempt < limits.network_retries => {
                attempt += 1;
                tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt))).await;
            }
            Err(_) => return Err(Error::Timeout(limits.network_timeout)),
        }
    }
}

/// Phase 1+2: image hashes present on `source` but not `dest`, paired with the object ids
/// each of those images references.
async fn missing_images_and_objects<S: SyncProtocol + ?Sized, D: SyncProtocol + ?Sized>(
    source: &S,
    dest: &D,
    repository: &Repository,
) -> Result<(Vec<Image>, BTreeSet<ObjectHash>)> {
    let source_hashes: BTreeSet<ObjectHash> = source.list_image_hashes(repository).await?.into_iter().collect();
    let dest_hashes: BTreeSet<ObjectHash> = dest.list_image_hashes(repository).await?.into_iter().collect();

    let mut missing_images = Vec::new();
    let mut object_ids = BTreeSet::new();
    for hash in source_hashes.difference(&dest_hashes) {
        let image = source.get_image(repository, *hash).await?;
        for entry in image.tables.values() {
            object_ids.extend(entry.object_ids.iter().copied());
        }
        missing_images.push(image);
    }
    // Parent-before-child order so object transfer guarantees (spec §4.6 phase 4) hold
    // when metadata apply later walks the list in order.
    missing_images.sort_by_key(|i| i.created_at);
    Ok((missing_images, object_ids))
}

/// Phase 3+4: fetches every object in `object_ids` not already present on `dest`, bounded
/// to `MAX_CONCURRENT_TRANSFERS` concurrent transfers.
async fn transfer_objects<S: SyncProtocol + ?Sized, D: SyncProtocol>(
    source: &S,
    dest: Arc<D>,
    object_ids: &BTreeSet<ObjectHash>,
    limits: &EngineLimits,
    cancel: &CancellationToken,
) -> Result<usize> {
    let mut to_fetch = Vec::new();
    for id in object_ids {
        if !dest.has_object(*id).await? {
            to_fetch.push(*id);
        }
    }
    if to_fetch.is_empty() {
        return Ok(0);
    }

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_TRANSFERS));
    let transferred = to_fetch.len();
    let tasks = to_fetch.into_iter().map(|id| {
        let semaphore = semaphore.clone();
        let dest = dest.clone();
        let cancel = cancel.clone();
        let limits = limits.clone();
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let object = with_retries(&limits, &cancel, || source.get_object(id)).await?;
            dest.put_object(id, object).await
        }
    });
    try_join_all(tasks).await?;
    Ok(transferred)
}

/// Phase 5: inserts images (parent-before-child) and copies tags.
async fn apply_metadata<D: SyncProtocol + ?Sized, S: SyncProtocol + ?Sized>(source: &S, dest: &D, repository: &Repository, images: Vec<Image>) -> Result<()> {
    for image in images {
        dest.put_image(&image).await?;
    }
    for tag in source.list_tags(repository).await? {
        if crate::model::Tag::is_reserved(&tag.tag_name) {
            continue;
        }
        dest.set_tag(&tag).await?;
    }
    Ok(())
}

/// `clone(repo, download_all)` (spec §4.6): metadata diff + object enumeration, then
/// metadata apply; with `download_all` the object phase also runs eagerly, otherwise
/// object bodies are left to be fetched lazily on first materialization (see
/// `sync::lazy::RemoteBackedObjectStore`).
pub async fn clone_repository<R: SyncProtocol + ?Sized, L: SyncProtocol>(
    remote: &R,
    local: Arc<L>,
    repository: &Repository,
    download_all: bool,
    limits: &EngineLimits,
    cancel: CancellationToken,
) -> Result<usize> {
    let (missing_images, object_ids) = missing_images_and_objects(remote, local.as_ref(), repository).await?;
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let transferred = if download_all {
        transfer_objects(remote, local.clone(), &object_ids, limits, &cancel).await?
    } else {
        0
    };
    apply_metadata(remote, local.as_ref(), repository, missing_images).await?;
    Ok(transferred)
}

/// `pull(repo)` (spec §4.6): same phases as clone, run against an already-initialized
/// local repository, always transferring objects eagerly (there is no "lazy pull").
pub async fn pull_repository<R: SyncProtocol + ?Sized, L: SyncProtocol>(
    remote: &R,
    local: Arc<L>,
    repository: &Repository,
    limits: &EngineLimits,
    cancel: CancellationToken,
) -> Result<usize> {
    let (missing_images, object_ids) = missing_images_and_objects(remote, local.as_ref(), repository).await?;
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let transferred = transfer_objects(remote, local.clone(), &object_ids, limits, &cancel).await?;
    apply_metadata(remote, local.as_ref(), repository, missing_images).await?;
    Ok(transferred)
}

/// How `push_repository` should react to a tag already pointing at a different image on
/// the remote (spec §4.6 "the user must explicitly overwrite").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    FailOnTagConflict,
    ForceOverwriteTags,
}

/// `push(repo)` (spec §4.6): the same phases in reverse, plus the `NonFastForward`
/// conflict check against a remote image sharing a hash with different content (treated
/// as corruption, since content-addressing makes that impossible under correct hashing)
/// and against a remote tag already pointing elsewhere.
pub async fn push_repository<L: SyncProtocol + ?Sized, R: SyncProtocol>(
    local: &L,
    remote: Arc<R>,
    repository: &Repository,
    mode: PushMode,
    limits: &EngineLimits,
    cancel: CancellationToken,
) -> Result<usize> {
    let (missing_images, object_ids) = missing_images_and_objects(local, remote.as_ref(), repository).await?;

    for image in &missing_images {
        if let Ok(existing) = remote.get_image(repository, image.image_hash).await {
            if existing.parent_id != image.parent_id || existing.tables != image.tables {
                return Err(Error::ObjectCorruption(format!(
                    "non-fast-forward: remote already has image {} with different content",
                    image.image_hash
                )));
            }
        }
    }

    if mode == PushMode::FailOnTagConflict {
        let local_tags = local.list_tags(repository).await?;
        for tag in &local_tags {
            if crate::model::Tag::is_reserved(&tag.tag_name) {
                continue;
            }
            if let Some(remote_tag) = remote.list_tags(repository).await?.into_iter().find(|t| t.tag_name == tag.tag_name) {
                if remote_tag.image_hash.is_some() && remote_tag.image_hash != tag.image_hash {
                    return Err(Error::TagExists(format!(
                        "{} already points to {} on the remote",
                        tag.tag_name,
                        remote_tag.image_hash.unwrap_or(ObjectHash::ROOT)
                    )));
                }
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let transferred = transfer_objects(local, remote.clone(), &object_ids, limits, &cancel).await?;
    apply_metadata(local, remote.as_ref(), repository, missing_images).await?;
    Ok(transferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    use crate::engine::memory::MemoryEngine;
    use crate::metastore::MetadataStore;
    use crate::metastore::memory::MemoryMetadataStore;
    use crate::model::ColumnDef;
    use crate::objectstore::memory::MemoryObjectStore;
    use crate::repo::Catalog;
    use crate::sync::LocalPeer;

    type TestCatalog = Catalog<MemoryEngine, MemoryMetadataStore, MemoryObjectStore>;

    fn catalog() -> TestCatalog {
        Catalog::new(
            StdArc::new(MemoryEngine::default()),
            StdArc::new(MemoryMetadataStore::new()),
            StdArc::new(MemoryObjectStore::default()),
            EngineLimits::default(),
        )
    }

    #[tokio::test]
    async fn clone_with_download_all_copies_images_and_objects() {
        let source_catalog = StdArc::new(catalog());
        let repo = Repository::unqualified("fruits");
        source_catalog.init(&repo).await.unwrap();
        source_catalog
            .create_table(&repo, "apples", vec![ColumnDef::new(0, "id", "int", true)])
            .await
            .unwrap();

        let dest_catalog = StdArc::new(catalog());
        dest_catalog.init(&repo).await.unwrap();

        let source_peer = LocalPeer::new(source_catalog.clone());
        let dest_peer = StdArc::new(LocalPeer::new(dest_catalog.clone()));
        let limits = EngineLimits::default();

        clone_repository(&source_peer, dest_peer.clone(), &repo, true, &limits, CancellationToken::new())
            .await
            .unwrap();

        let dest_images = dest_catalog.meta().list_images(&repo).await.unwrap();
        assert!(dest_images.iter().any(|i| i.tables.contains_key("apples")));
    }

    #[tokio::test]
    async fn push_rejects_conflicting_tag() {
        let local_catalog = StdArc::new(catalog());
        let remote_catalog = StdArc::new(catalog());
        let repo = Repository::unqualified("fruits");
        local_catalog.init(&repo).await.unwrap();
        remote_catalog.init(&repo).await.unwrap();

        let hash = local_catalog
            .create_table(&repo, "apples", vec![ColumnDef::new(0, "id", "int", true)])
            .await
            .unwrap();
        local_catalog.tag(&repo, "stable", &hash.to_hex(), false).await.unwrap();

        let other_hash = remote_catalog
            .create_table(&repo, "pears", vec![ColumnDef::new(0, "id", "int", true)])
            .await
            .unwrap();
        remote_catalog.tag(&repo, "stable", &other_hash.to_hex(), false).await.unwrap();

        let local_peer = LocalPeer::new(local_catalog.clone());
        let remote_peer = StdArc::new(LocalPeer::new(remote_catalog.clone()));
        let limits = EngineLimits::default();

        let err = push_repository(
            &local_peer,
            remote_peer,
            &repo,
            PushMode::FailOnTagConflict,
            &limits,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::TagExists(_)));
    }
}
