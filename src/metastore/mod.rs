//! Metadata store: the persisted catalog of repositories, images, tags, upstreams,
//! provenance, and object metadata (spec §3, §6).

pub mod entities;
pub mod memory;
pub mod sea_store;

use async_trait::async_trait;

use crate::Result;
use crate::hash::ObjectHash;
use crate::model::{Image, ObjectMeta, ProvenanceRecord, Repository, Tag, Upstream};

/// Abstracts the persisted side of the catalog, independent of the live SQL engine
/// holding actual table data (spec §4.4). `sea_store::SeaMetadataStore` is the production
/// implementation (SQLite via `sea-orm`, per spec.md §6's "small embedded catalog" sizing);
/// `memory::MemoryMetadataStore` is an in-process fake for tests.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_repository(&self, repository: &Repository) -> Result<()>;
    async fn repository_exists(&self, repository: &Repository) -> Result<bool>;
    async fn drop_repository(&self, repository: &Repository) -> Result<()>;
    async fn list_repositories(&self) -> Result<Vec<Repository>>;

    /// Current `HEAD` target, or `None` if nothing is checked out.
    async fn checked_out_image(&self, repository: &Repository) -> Result<Option<ObjectHash>>;
    async fn set_checked_out_image(&self, repository: &Repository, image_hash: Option<ObjectHash>) -> Result<()>;

    async fn put_image(&self, image: &Image) -> Result<()>;
    async fn get_image(&self, repository: &Repository, image_hash: ObjectHash) -> Result<Option<Image>>;
    async fn list_images(&self, repository: &Repository) -> Result<Vec<Image>>;

    /// Drops an image's catalog row. Callers are responsible for checking it is neither
    /// tagged nor checked out first (`repo::Catalog::prune` does this before calling).
    async fn delete_image(&self, repository: &Repository, image_hash: ObjectHash) -> Result<()>;

    /// The most recently created image, used to resolve the `latest` tag (spec §3).
    async fn latest_image(&self, repository: &Repository) -> Result<Option<Image>> {
        let mut images = self.list_images(repository).await?;
        images.sort_by_key(|i| i.created_at);
        Ok(images.into_iter().next_back())
    }

    async fn set_tag(&self, tag: &Tag) -> Result<()>;
    async fn get_tag(&self, repository: &Repository, tag_name: &str) -> Result<Option<Tag>>;
    async fn remove_tag(&self, repository: &Repository, tag_name: &str) -> Result<()>;
    async fn list_tags(&self, repository: &Repository) -> Result<Vec<Tag>>;

    async fn set_upstream(&self, upstream: &Upstream) -> Result<()>;
    async fn get_upstream(&self, repository: &Repository) -> Result<Option<Upstream>>;
    async fn remove_upstream(&self, repository: &Repository) -> Result<()>;

    async fn put_provenance(&self, record: &ProvenanceRecord) -> Result<()>;
    async fn get_provenance(&self, repository: &Repository, image_hash: ObjectHash) -> Result<Option<ProvenanceRecord>>;

    async fn put_object_meta(&self, meta: &ObjectMeta) -> Result<()>;
    async fn list_object_meta(&self) -> Result<Vec<ObjectMeta>>;
}
