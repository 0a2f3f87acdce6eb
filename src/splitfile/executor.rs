//! Drives `repo::Catalog` from a parsed Splitfile (spec §4.5). Each non-comment command
//! produces exactly one image; `target_hash` is derived deterministically so re-running
//! the same Splitfile hits the same cached layers (`checkout` as the cache probe), the
//! same pattern `_checkout_or_calculate_layer` uses in the system this was distilled
//! from.

use async_trait::async_trait;

use crate::Result;
use crate::config::EngineConfig;
use crate::engine::EngineAdapter;
use crate::errors::Error;
use crate::hash::ObjectHash;
use crate::metastore::MetadataStore;
use crate::model::{ProvenanceRecord, Repository, SourceRef};
use crate::objectstore::ObjectStore;
use crate::repo::Catalog;
use crate::splitfile::ast::{Command, Splitfile};
use crate::splitfile::parser::canonicalize_sql;
use crate::splitfile::provenance::render_command;

/// Resolves `FROM <conn_string> <repo>[:tag] IMPORT ...` against a remote engine. No
/// concrete implementation ships here — wiring this to `sync::SyncProtocol` is left to
/// the caller, mirroring `mount::MountHandler`'s interface-only status (spec §4.7).
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Ensures `repository` exists locally with at least the objects needed to resolve
    /// `tag_or_hash`, returning the resolved local image hash.
    async fn shallow_clone(&self, conn: &EngineConfig, repository: &Repository, tag_or_hash: Option<&str>) -> Result<ObjectHash>;
}

/// What executing one command actually did, surfaced for `--verbose` CLI output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Noop,
    CacheHit { image_hash: ObjectHash },
    Built { image_hash: ObjectHash },
}

pub struct Executor<'a, E: EngineAdapter, M: MetadataStore, O: ObjectStore> {
    catalog: &'a Catalog<E, M, O>,
    remote: Option<&'a dyn RemoteSource>,
}

impl<'a, E: EngineAdapter, M: MetadataStore, O: ObjectStore> Executor<'a, E, M, O> {
    pub fn new(catalog: &'a Catalog<E, M, O>) -> Self {
        Self { catalog, remote: None }
    }

    pub fn with_remote(catalog: &'a Catalog<E, M, O>, remote: &'a dyn RemoteSource) -> Self {
        Self { catalog, remote: Some(remote) }
    }

    /// Executes every command in order, returning the final output image hash.
    pub async fn execute(&self, splitfile: &Splitfile) -> Result<ObjectHash> {
        let mut output_repo: Option<Repository> = None;
        let mut last_hash = ObjectHash::ROOT;

        for command in &splitfile.commands {
            match command {
                Command::Comment(_) => {}
                Command::Output { repository, image_hash } => {
                    if !self.catalog.meta().repository_exists(repository).await? {
                        self.catalog.init(repository).await?;
                    }
                    if let Some(hash) = image_hash {
                        last_hash = self.catalog.checkout(repository, hash).await?;
                    } else {
                        last_hash = self
                            .catalog
                            .resolve_image(repository, crate::model::TAG_HEAD)
                            .await
                            .unwrap_or(ObjectHash::ROOT);
                    }
                    output_repo = Some(repository.clone());
                }
                Command::Import { .. } => {
                    let repository = output_repo.clone().ok_or(Error::NoOutputSet)?;
                    let (hash, outcome) = self.run_import(&repository, command).await?;
                    tracing::debug!(?outcome, image = %hash, "splitfile import step");
                    last_hash = hash;
                }
                Command::Sql(_) => {
                    let repository = output_repo.clone().ok_or(Error::NoOutputSet)?;
                    let (hash, outcome) = self.run_sql(&repository, command).await?;
                    tracing::debug!(?outcome, image = %hash, "splitfile sql step");
                    last_hash = hash;
                }
            }
        }
        Ok(last_hash)
    }

    async fn run_import(&self, output_repo: &Repository, command: &Command) -> Result<(ObjectHash, StepOutcome)> {
        let Command::Import { conn, source_repository, source_tag, tables } = command else {
            unreachable!("run_import called with a non-Import command")
        };

        let source_hash = match conn {
            Some(conn) => {
                let remote = self
                    .remote
                    .ok_or_else(|| Error::NetworkError("FROM with a connection string requires a configured remote source".into()))?;
                remote.shallow_clone(conn, source_repository, source_tag.as_deref()).await?
            }
            None => {
                self.catalog
                    .resolve_image(source_repository, source_tag.as_deref().unwrap_or(crate::model::TAG_HEAD))
                    .await?
            }
        };

        let parent = self.catalog.current_image(output_repo).await?;
        let current_head = parent.image_hash;

        let mut hash_parts = vec![current_head.to_hex(), source_hash.to_hex()];
        for table in tables {
            hash_parts.push(ObjectHash::compute(table.name.as_bytes()).to_hex());
            hash_parts.push(ObjectHash::compute(table.target_name().as_bytes()).to_hex());
        }
        let hash_part_refs: Vec<&str> = hash_parts.iter().map(String::as_str).collect();
        let target_hash = ObjectHash::combine(&hash_part_refs);

        match self.catalog.checkout(output_repo, &target_hash.to_hex()).await {
            Ok(hash) => Ok((hash, StepOutcome::CacheHit { image_hash: hash })),
            Err(e) if e.is_cache_miss() => {
                let source_image = self
                    .catalog
                    .meta()
                    .get_image(source_repository, source_hash)
                    .await?
                    .ok_or_else(|| Error::ImageNotFound(source_hash.to_string()))?;
                let table_pairs: Vec<(&str, &str)> = tables.iter().map(|t| (t.name.as_str(), t.target_name())).collect();
                let image = self
                    .catalog
                    .build_import_image(
                        output_repo,
                        source_repository,
                        &parent,
                        &source_image,
                        target_hash,
                        &table_pairs,
                        Some(render_command(command)),
                    )
                    .await?;
                self.catalog
                    .meta()
                    .put_provenance(&ProvenanceRecord {
                        repository: output_repo.clone(),
                        image_hash: target_hash,
                        sources: vec![SourceRef {
                            repository: source_repository.clone(),
                            image_hash: source_hash,
                        }],
                        script: render_command(command),
                    })
                    .await?;
                Ok((image.image_hash, StepOutcome::Built { image_hash: target_hash }))
            }
            Err(e) => Err(e),
        }
    }

    async fn run_sql(&self, output_repo: &Repository, command: &Command) -> Result<(ObjectHash, StepOutcome)> {
        let Command::Sql(stmt) = command else {
            unreachable!("run_sql called with a non-Sql command")
        };
        let canonical = canonicalize_sql(stmt);

        let parent = self.catalog.current_image(output_repo).await?;
        let current_head = parent.image_hash;
        let target_hash = ObjectHash::combine(&[&current_head.to_hex(), &ObjectHash::compute(canonical.as_bytes()).to_hex()]);

        match self.catalog.checkout(output_repo, &target_hash.to_hex()).await {
            Ok(hash) => Ok((hash, StepOutcome::CacheHit { image_hash: hash })),
            Err(e) if e.is_cache_miss() => {
                let schema = output_repo.schema();
                self.catalog
                    .engine()
                    .run_sql_batch(&[
                        (format!("SET search_path TO \"{schema}\""), vec![]),
                        (stmt.clone(), vec![]),
                    ])
                    .await?;
                let comment = format!("SQL {canonical}");
                let image = self
                    .catalog
                    .commit_tables_with_hash(output_repo, &parent, target_hash, Some(comment.clone()))
                    .await?;
                self.catalog
                    .meta()
                    .put_provenance(&ProvenanceRecord {
                        repository: output_repo.clone(),
                        image_hash: target_hash,
                        sources: vec![],
                        script: comment,
                    })
                    .await?;
                Ok((image.image_hash, StepOutcome::Built { image_hash: target_hash }))
            }
            Err(e) => Err(e),
        }
    }

    /// Emits the dependency set and regenerated Splitfile text for `image` (spec §4.5
    /// `provenance(image)`).
    pub async fn provenance(&self, repository: &Repository, image_hash: ObjectHash) -> Result<String> {
        let mut records = Vec::new();
        let mut cursor = Some(image_hash);
        while let Some(hash) = cursor {
            if hash.is_root() {
                break;
            }
            let record = self
                .catalog
                .meta()
                .get_provenance(repository, hash)
                .await?
                .ok_or_else(|| Error::ImageNotFound(hash.to_string()))?;
            let image = self
                .catalog
                .meta()
                .get_image(repository, hash)
                .await?
                .ok_or_else(|| Error::ImageNotFound(hash.to_string()))?;
            cursor = image.parent_id.filter(|p| !p.is_root());
            records.push(record);
        }
        records.reverse();
        Ok(crate::splitfile::provenance::reconstruct_script(repository, &records))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::EngineLimits;
    use crate::engine::memory::MemoryEngine;
    use crate::metastore::memory::MemoryMetadataStore;
    use crate::model::ColumnDef;
    use crate::objectstore::memory::MemoryObjectStore;
    use crate::splitfile::parser;

    type TestCatalog = Catalog<MemoryEngine, MemoryMetadataStore, MemoryObjectStore>;

    fn catalog() -> TestCatalog {
        Catalog::new(
            Arc::new(MemoryEngine::default()),
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryObjectStore::default()),
            EngineLimits::default(),
        )
    }

    #[tokio::test]
    async fn import_step_is_cached_on_second_run() {
        let catalog = catalog();
        let source_repo = Repository::unqualified("fruits");
        catalog.init(&source_repo).await.unwrap();
        catalog
            .create_table(&source_repo, "apples", vec![ColumnDef::new(0, "id", "int", true)])
            .await
            .unwrap();

        let source = "OUTPUT derived\nFROM fruits IMPORT apples";
        let file = parser::parse(source).unwrap();
        let executor = Executor::new(&catalog);

        let first = executor.execute(&file).await.unwrap();
        let second = executor.execute(&file).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn sql_step_without_output_fails() {
        let catalog = catalog();
        let file = parser::parse("SQL select 1").unwrap();
        let executor = Executor::new(&catalog);
        let err = executor.execute(&file).await.unwrap_err();
        assert!(matches!(err, Error::NoOutputSet));
    }
}
