//! Sync protocol: clone/pull/push between two engines (spec §4.6). Modeled on the
//! teacher's `protocol::core::RepositoryAccess` — storage-level peer operations exposed
//! as an async trait so the clone/pull/push phase logic is transport- and
//! storage-agnostic, generalized from single-ref push/pull to per-image metadata plus
//! object-id sets.

pub mod clone_pull_push;
pub mod lazy;
pub mod transport;

use async_trait::async_trait;

use crate::Result;
use crate::hash::ObjectHash;
use crate::model::{Image, Repository, Tag};
use crate::objectstore::StoredObject;

pub use clone_pull_push::{PushMode, clone_repository, pull_repository, push_repository};

/// Peer-side storage operations needed to drive clone/pull/push, independent of whether
/// the peer is a local `repo::Catalog` or a remote speaking the HTTP transport.
#[async_trait]
pub trait SyncProtocol: Send + Sync {
    async fn list_image_hashes(&self, repository: &Repository) -> Result<Vec<ObjectHash>>;
    async fn get_image(&self, repository: &Repository, image_hash: ObjectHash) -> Result<Image>;
    async fn put_image(&self, image: &Image) -> Result<()>;

    async fn has_object(&self, object_id: ObjectHash) -> Result<bool>;
    async fn get_object(&self, object_id: ObjectHash) -> Result<StoredObject>;
    async fn put_object(&self, object_id: ObjectHash, object: StoredObject) -> Result<()>;

    async fn list_tags(&self, repository: &Repository) -> Result<Vec<Tag>>;
    async fn set_tag(&self, tag: &Tag) -> Result<()>;
}

/// A `repo::Catalog` viewed as a sync peer — the local side of every clone/pull/push.
/// Owns an `Arc` rather than borrowing so it can be held in an HTTP server's `'static`
/// state (`transport::build_router`).
pub struct LocalPeer<E: crate::engine::EngineAdapter, M: crate::metastore::MetadataStore, O: crate::objectstore::ObjectStore> {
    catalog: std::sync::Arc<crate::repo::Catalog<E, M, O>>,
}

impl<E: crate::engine::EngineAdapter, M: crate::metastore::MetadataStore, O: crate::objectstore::ObjectStore> LocalPeer<E, M, O> {
    pub fn new(catalog: std::sync::Arc<crate::repo::Catalog<E, M, O>>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl<E, M, O> SyncProtocol for LocalPeer<E, M, O>
where
    E: crate::engine::EngineAdapter,
    M: crate::metastore::MetadataStore,
    O: crate::objectstore::ObjectStore,
{
    async fn list_image_hashes(&self, repository: &Repository) -> Result<Vec<ObjectHash>> {
        Ok(self
            .catalog
            .meta()
            .list_images(repository)
            .await?
            .into_iter()
            .map(|i| i.image_hash)
            .collect())
    }

    async fn get_image(&self, repository: &Repository, image_hash: ObjectHash) -> Result<Image> {
        self.catalog
            .meta()
            .get_image(repository, image_hash)
            .await?
            .ok_or_else(|| crate::errors::Error::ImageNotFound(image_hash.to_string()))
    }

    async fn put_image(&self, image: &Image) -> Result<()> {
        self.catalog.meta().put_image(image).await
    }

    async fn has_object(&self, object_id: ObjectHash) -> Result<bool> {
        self.catalog.objects().has_object(object_id).await
    }

    async fn get_object(&self, object_id: ObjectHash) -> Result<StoredObject> {
        self.catalog.objects().get_object(object_id).await
    }

    async fn put_object(&self, object_id: ObjectHash, object: StoredObject) -> Result<()> {
        match object {
            StoredObject::Snap { schema_bytes, rows } => self.catalog.objects().put_snap(object_id, schema_bytes, rows).await,
            StoredObject::Diff { parent_id, changes } => self.catalog.objects().put_diff(object_id, parent_id, changes).await,
        }
    }

    async fn list_tags(&self, repository: &Repository) -> Result<Vec<Tag>> {
        self.catalog.meta().list_tags(repository).await
    }

    async fn set_tag(&self, tag: &Tag) -> Result<()> {
        self.catalog.meta().set_tag(tag).await
    }
}
