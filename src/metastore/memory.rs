//! In-process fake `MetadataStore`, used by `repo::Catalog` and Splitfile executor tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::Result;
use crate::errors::Error;
use crate::hash::ObjectHash;
use crate::metastore::MetadataStore;
use crate::model::{Image, ObjectMeta, ProvenanceRecord, Repository, Tag, Upstream};

struct RepoState {
    repository: Repository,
    checked_out: Option<ObjectHash>,
    images: BTreeMap<ObjectHash, Image>,
    tags: BTreeMap<String, ObjectHash>,
    upstream: Option<Upstream>,
    provenance: BTreeMap<ObjectHash, ProvenanceRecord>,
}

impl RepoState {
    fn new(repository: Repository) -> Self {
        Self {
            repository,
            checked_out: None,
            images: BTreeMap::new(),
            tags: BTreeMap::new(),
            upstream: None,
            provenance: BTreeMap::new(),
        }
    }
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    repos: Mutex<BTreeMap<String, RepoState>>,
    object_meta: Mutex<BTreeMap<ObjectHash, ObjectMeta>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create_repository(&self, repository: &Repository) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        if repos.contains_key(&repository.schema()) {
            return Err(Error::RepositoryExists(repository.schema()));
        }
        repos.insert(repository.schema(), RepoState::new(repository.clone()));
        Ok(())
    }

    async fn repository_exists(&self, repository: &Repository) -> Result<bool> {
        Ok(self.repos.lock().unwrap().contains_key(&repository.schema()))
    }

    async fn drop_repository(&self, repository: &Repository) -> Result<()> {
        self.repos.lock().unwrap().remove(&repository.schema());
        Ok(())
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        Ok(self
            .repos
            .lock()
            .unwrap()
            .values()
            .map(|s| s.repository.clone())
            .collect())
    }

    async fn checked_out_image(&self, repository: &Repository) -> Result<Option<ObjectHash>> {
        let repos = self.repos.lock().unwrap();
        let state = repos
            .get(&repository.schema())
            .ok_or_else(|| Error::RepositoryNotFound(repository.schema()))?;
        Ok(state.checked_out)
    }

    async fn set_checked_out_image(&self, repository: &Repository, image_hash: Option<ObjectHash>) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        let state = repos
            .get_mut(&repository.schema())
            .ok_or_else(|| Error::RepositoryNotFound(repository.schema()))?;
        state.checked_out = image_hash;
        Ok(())
    }

    async fn put_image(&self, image: &Image) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        let state = repos
            .get_mut(&image.repository.schema())
            .ok_or_else(|| Error::RepositoryNotFound(image.repository.schema()))?;
        state.images.entry(image.image_hash).or_insert_with(|| image.clone());
        Ok(())
    }

    async fn get_image(&self, repository: &Repository, image_hash: ObjectHash) -> Result<Option<Image>> {
        let repos = self.repos.lock().unwrap();
        Ok(repos
            .get(&repository.schema())
            .and_then(|s| s.images.get(&image_hash).cloned()))
    }

    async fn list_images(&self, repository: &Repository) -> Result<Vec<Image>> {
        let repos = self.repos.lock().unwrap();
        Ok(repos
            .get(&repository.schema())
            .map(|s| s.images.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_image(&self, repository: &Repository, image_hash: ObjectHash) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        if let Some(state) = repos.get_mut(&repository.schema()) {
            state.images.remove(&image_hash);
        }
        Ok(())
    }

    async fn set_tag(&self, tag: &Tag) -> Result<()> {
        let Some(image_hash) = tag.image_hash else {
            return Err(Error::ObjectCorruption("cannot persist a tag with no image_hash".into()));
        };
        let mut repos = self.repos.lock().unwrap();
        let state = repos
            .get_mut(&tag.repository.schema())
            .ok_or_else(|| Error::RepositoryNotFound(tag.repository.schema()))?;
        state.tags.insert(tag.tag_name.clone(), image_hash);
        Ok(())
    }

    async fn get_tag(&self, repository: &Repository, tag_name: &str) -> Result<Option<Tag>> {
        let repos = self.repos.lock().unwrap();
        Ok(repos.get(&repository.schema()).and_then(|s| {
            s.tags.get(tag_name).map(|hash| Tag {
                repository: repository.clone(),
                tag_name: tag_name.to_string(),
                image_hash: Some(*hash),
            })
        }))
    }

    async fn remove_tag(&self, repository: &Repository, tag_name: &str) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        if let Some(state) = repos.get_mut(&repository.schema()) {
            state.tags.remove(tag_name);
        }
        Ok(())
    }

    async fn list_tags(&self, repository: &Repository) -> Result<Vec<Tag>> {
        let repos = self.repos.lock().unwrap();
        Ok(repos
            .get(&repository.schema())
            .map(|s| {
                s.tags
                    .iter()
                    .map(|(name, hash)| Tag {
                        repository: repository.clone(),
                        tag_name: name.clone(),
                        image_hash: Some(*hash),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_upstream(&self, upstream: &Upstream) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        let state = repos
            .get_mut(&upstream.repository.schema())
            .ok_or_else(|| Error::RepositoryNotFound(upstream.repository.schema()))?;
        state.upstream = Some(upstream.clone());
        Ok(())
    }

    async fn get_upstream(&self, repository: &Repository) -> Result<Option<Upstream>> {
        let repos = self.repos.lock().unwrap();
        Ok(repos.get(&repository.schema()).and_then(|s| s.upstream.clone()))
    }

    async fn remove_upstream(&self, repository: &Repository) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        if let Some(state) = repos.get_mut(&repository.schema()) {
            state.upstream = None;
        }
        Ok(())
    }

    async fn put_provenance(&self, record: &ProvenanceRecord) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        let state = repos
            .get_mut(&record.repository.schema())
            .ok_or_else(|| Error::RepositoryNotFound(record.repository.schema()))?;
        state.provenance.insert(record.image_hash, record.clone());
        Ok(())
    }

    async fn get_provenance(&self, repository: &Repository, image_hash: ObjectHash) -> Result<Option<ProvenanceRecord>> {
        let repos = self.repos.lock().unwrap();
        Ok(repos
            .get(&repository.schema())
            .and_then(|s| s.provenance.get(&image_hash).cloned()))
    }

    async fn put_object_meta(&self, meta: &ObjectMeta) -> Result<()> {
        self.object_meta.lock().unwrap().entry(meta.object_id).or_insert_with(|| meta.clone());
        Ok(())
    }

    async fn list_object_meta(&self) -> Result<Vec<ObjectMeta>> {
        Ok(self.object_meta.lock().unwrap().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn latest_image_is_the_most_recently_created() {
        let store = MemoryMetadataStore::new();
        let repo = Repository::unqualified("fruits");
        store.create_repository(&repo).await.unwrap();

        let mut older = Image::root(repo.clone(), Utc::now());
        older.image_hash = crate::hash::ObjectHash::compute(b"older");
        let mut newer = Image::root(repo.clone(), Utc::now() + chrono::Duration::seconds(10));
        newer.image_hash = crate::hash::ObjectHash::compute(b"newer");

        store.put_image(&older).await.unwrap();
        store.put_image(&newer).await.unwrap();

        let latest = store.latest_image(&repo).await.unwrap().unwrap();
        assert_eq!(latest.image_hash, newer.image_hash);
    }

    #[tokio::test]
    async fn duplicate_repository_creation_is_rejected() {
        let store = MemoryMetadataStore::new();
        let repo = Repository::unqualified("fruits");
        store.create_repository(&repo).await.unwrap();
        assert!(store.create_repository(&repo).await.is_err());
    }
}
