//! The repository/image API (spec §4.4): `init`, `commit`, `checkout`, `uncheckout`,
//! `import`, `diff`, `rm`, `prune`, `tag`, `resolve_image`.
//!
//! `Catalog<E, M, O>` is generic over the three storage seams so the CLI, the Splitfile
//! executor, and tests all share one implementation regardless of whether they run against
//! a live Postgres + SQLite + filesystem stack or the in-memory fakes.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::Result;
use crate::config::EngineLimits;
use crate::engine::{EngineAdapter, audit};
use crate::errors::Error;
use crate::hash::{MIN_PREFIX_LEN, ObjectHash};
use crate::metastore::MetadataStore;
use crate::model::{ColumnDef, Image, Repository, TAG_HEAD, TAG_LATEST, Tag, TableEntry};
use crate::objectstore::ObjectStore;

/// Per-table summary of what a commit actually wrote (spec §4.4, used by the CLI's
/// `commit -v` and by `diff`'s "table was touched" check).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableCommitOutcome {
    Unchanged,
    NewSnap { object_id: ObjectHash },
    NewDiff { object_id: ObjectHash, parent: ObjectHash },
}

pub struct Catalog<E: EngineAdapter, M: MetadataStore, O: ObjectStore> {
    engine: Arc<E>,
    meta: Arc<M>,
    objects: Arc<O>,
    limits: EngineLimits,
}

impl<E: EngineAdapter, M: MetadataStore, O: ObjectStore> Catalog<E, M, O> {
    pub fn new(engine: Arc<E>, meta: Arc<M>, objects: Arc<O>, limits: EngineLimits) -> Self {
        Self {
            engine,
            meta,
            objects,
            limits,
        }
    }

    /// Creates a repository: a live schema plus an empty catalog entry rooted at the
    /// implicit all-zero image (spec §3, §4.4).
    pub async fn init(&self, repository: &Repository) -> Result<()> {
        if self.meta.repository_exists(repository).await? {
            return Err(Error::RepositoryExists(repository.schema()));
        }
        self.engine.create_schema(&repository.schema()).await?;
        self.meta.create_repository(repository).await?;
        let root = Image::root(repository.clone(), Utc::now());
        self.meta.put_image(&root).await?;
        tracing::info!(repository = %repository, "initialized repository");
        Ok(())
    }

    /// Begins tracking a new table: creates it live, installs the audit trigger, and
    /// records the addition as a new commit on top of whatever is currently checked out
    /// (spec §4.2, §4.4).
    pub async fn create_table(&self, repository: &Repository, table_name: &str, columns: Vec<ColumnDef>) -> Result<ObjectHash> {
        let _lock = self.engine.advisory_lock(&repository.schema()).await?;
        self.engine.create_table(&repository.schema(), table_name, &columns).await?;
        self.engine.install_audit_trigger(&repository.schema(), table_name).await?;

        let parent = self.current_image(repository).await?;
        let schema_bytes = TableEntry::new(columns.clone(), vec![]).canonical_schema_bytes();
        let snap_id = ObjectHash::compute_parts(&[schema_bytes.as_slice(), &[]]);
        self.objects.put_snap(snap_id, schema_bytes, vec![]).await?;
        self.meta
            .put_object_meta(&crate::model::ObjectMeta {
                object_id: snap_id,
                kind: crate::model::ObjectKind::Snap,
                parent_id: None,
                size: 0,
            })
            .await?;

        let mut tables = parent.tables.clone();
        tables.insert(table_name.to_string(), TableEntry::new(columns, vec![snap_id]));
        let image = self
            .write_image(repository, Some(parent.image_hash), tables, Some(format!("create table {table_name}")))
            .await?;
        self.meta.set_checked_out_image(repository, Some(image.image_hash)).await?;
        Ok(image.image_hash)
    }

    /// Commits every tracked table's pending changes into a new image (spec §4.4). Tables
    /// with no pending changes carry their object chain over unchanged. Fails if no image
    /// is currently checked out. `snap` forces every changed table to write a SNAP rather
    /// than a DIFF, regardless of `diff_chain_limit` (spec §6 `-s/--snap`).
    pub async fn commit(&self, repository: &Repository, comment: Option<String>, snap: bool) -> Result<ObjectHash> {
        let _lock = self.engine.advisory_lock(&repository.schema()).await?;
        let parent_hash = self
            .meta
            .checked_out_image(repository)
            .await?
            .ok_or_else(|| Error::NoCheckedOutImage(repository.schema()))?;
        let parent = self
            .meta
            .get_image(repository, parent_hash)
            .await?
            .ok_or_else(|| Error::ImageNotFound(parent_hash.to_string()))?;

        let mut tables = BTreeMap::new();
        for (table_name, parent_entry) in &parent.tables {
            let outcome = self.commit_table(repository, table_name, parent_entry, snap).await?;
            let entry = match outcome {
                TableCommitOutcome::Unchanged => parent_entry.clone(),
                TableCommitOutcome::NewSnap { object_id } => {
                    TableEntry::new(parent_entry.schema.clone(), vec![object_id])
                }
                TableCommitOutcome::NewDiff { object_id, .. } => {
                    let mut object_ids = parent_entry.object_ids.clone();
                    object_ids.push(object_id);
                    TableEntry::new(parent_entry.schema.clone(), object_ids)
                }
            };
            tables.insert(table_name.clone(), entry);
        }

        let image = self.write_image(repository, Some(parent.image_hash), tables, comment).await?;
        self.meta.set_checked_out_image(repository, Some(image.image_hash)).await?;
        tracing::info!(repository = %repository, image = %image.image_hash, "committed");
        Ok(image.image_hash)
    }

    pub(crate) async fn commit_table(&self, repository: &Repository, table_name: &str, parent_entry: &TableEntry, force_snap: bool) -> Result<TableCommitOutcome> {
        let schema = repository.schema();
        let raw_changes = self.engine.read_pending_changes(&schema, table_name).await?;
        if raw_changes.is_empty() {
            return Ok(TableCommitOutcome::Unchanged);
        }
        let changes = audit::collapse(raw_changes);
        self.engine.clear_pending_changes(&schema, table_name).await?;
        if changes.is_empty() {
            // Every change cancelled out (e.g. insert immediately followed by delete).
            return Ok(TableCommitOutcome::Unchanged);
        }

        let parent_id = *parent_entry
            .object_ids
            .last()
            .ok_or_else(|| Error::ObjectCorruption(format!("{table_name} has an empty object chain")))?;

        if force_snap || parent_entry.object_ids.len() >= self.limits.diff_chain_limit {
            let rows = self.engine.materialize_rows(&schema, table_name).await?;
            let schema_bytes = TableEntry::new(parent_entry.schema.clone(), vec![]).canonical_schema_bytes();
            let mut row_bytes = Vec::new();
            for row in &rows {
                row_bytes.extend(serde_json::to_vec(row).unwrap_or_default());
            }
            let object_id = ObjectHash::compute_parts(&[schema_bytes.as_slice(), &row_bytes]);
            self.objects.put_snap(object_id, schema_bytes, rows).await?;
            self.meta
                .put_object_meta(&crate::model::ObjectMeta {
                    object_id,
                    kind: crate::model::ObjectKind::Snap,
                    parent_id: None,
                    size: 0,
                })
                .await?;
            return Ok(TableCommitOutcome::NewSnap { object_id });
        }

        let mut change_bytes = Vec::new();
        for change in &changes {
            change_bytes.extend(change.canonical_bytes());
        }
        let object_id = ObjectHash::compute_parts(&[parent_id.as_bytes(), &change_bytes]);
        self.objects.put_diff(object_id, parent_id, changes).await?;
        self.meta
            .put_object_meta(&crate::model::ObjectMeta {
                object_id,
                kind: crate::model::ObjectKind::Diff,
                parent_id: Some(parent_id),
                size: 0,
            })
            .await?;
        Ok(TableCommitOutcome::NewDiff { object_id, parent: parent_id })
    }

    /// Materializes `image_ref`'s tables into the live schema and moves `HEAD` (spec
    /// §4.4).
    pub async fn checkout(&self, repository: &Repository, image_ref: &str) -> Result<ObjectHash> {
        let _lock = self.engine.advisory_lock(&repository.schema()).await?;
        let image_hash = self.resolve_image(repository, image_ref).await?;
        let image = self
            .meta
            .get_image(repository, image_hash)
            .await?
            .ok_or_else(|| Error::ImageNotFound(image_ref.to_string()))?;

        let schema = repository.schema();
        for (table_name, entry) in &image.tables {
            self.engine.create_table(&schema, table_name, &entry.schema).await?;
            self.engine.install_audit_trigger(&schema, table_name).await?;
            let rows = self.objects.materialize(&entry.object_ids).await?;
            let mut statements = vec![(format!("DELETE FROM \"{schema}\".\"{table_name}\""), vec![])];
            for row in rows {
                let columns: Vec<&str> = row.iter().map(|(name, _)| name.as_str()).collect();
                let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
                let sql = format!(
                    "INSERT INTO \"{schema}\".\"{table_name}\" ({}) VALUES ({})",
                    columns.iter().map(|c| format!("\"{c}\"")).collect::<Vec<_>>().join(", "),
                    placeholders.join(", ")
                );
                let values: Vec<Value> = row.into_iter().map(|(_, v)| v).collect();
                statements.push((sql, values));
            }
            self.engine.run_sql_batch(&statements).await?;
        }
        self.meta.set_checked_out_image(repository, Some(image_hash)).await?;
        Ok(image_hash)
    }

    /// Clears the live schema's tracked tables back to empty and drops `HEAD` (spec
    /// §4.4).
    pub async fn uncheckout(&self, repository: &Repository) -> Result<()> {
        let _lock = self.engine.advisory_lock(&repository.schema()).await?;
        let schema = repository.schema();
        if let Some(image_hash) = self.meta.checked_out_image(repository).await? {
            if let Some(image) = self.meta.get_image(repository, image_hash).await? {
                for table_name in image.tables.keys() {
                    self.engine
                        .run_sql_batch(&[(format!("DELETE FROM \"{schema}\".\"{table_name}\""), vec![])])
                        .await?;
                }
            }
        }
        self.meta.set_checked_out_image(repository, None).await?;
        Ok(())
    }

    /// Binds `table_name` in `target_repository`'s working state to another image's
    /// already-stored object chain, without copying any object bodies (spec §4.4, §4.5 —
    /// the same mechanism the Splitfile `IMPORT` command uses).
    pub async fn import(
        &self,
        target_repository: &Repository,
        table_name: &str,
        source_repository: &Repository,
        source_image_ref: &str,
        source_table: &str,
    ) -> Result<ObjectHash> {
        let source_hash = self.resolve_image(source_repository, source_image_ref).await?;
        let source_image = self
            .meta
            .get_image(source_repository, source_hash)
            .await?
            .ok_or_else(|| Error::ImageNotFound(source_image_ref.to_string()))?;
        let source_entry = source_image
            .tables
            .get(source_table)
            .ok_or_else(|| Error::ObjectCorruption(format!("{source_repository}/{source_table} has no committed data")))?
            .clone();

        let _lock = self.engine.advisory_lock(&target_repository.schema()).await?;
        self.engine
            .create_table(&target_repository.schema(), table_name, &source_entry.schema)
            .await?;

        let parent = self.current_image(target_repository).await?;
        let mut tables = parent.tables.clone();
        tables.insert(table_name.to_string(), source_entry);
        let image = self
            .write_image(
                target_repository,
                Some(parent.image_hash),
                tables,
                Some(format!("import {source_repository}/{source_table} as {table_name}")),
            )
            .await?;
        self.meta.set_checked_out_image(target_repository, Some(image.image_hash)).await?;
        Ok(image.image_hash)
    }

    /// Deletes an image and any tags pointing to it. Refuses while it is checked out
    /// (spec §4.4 invariant).
    pub async fn rm(&self, repository: &Repository, image_ref: &str) -> Result<()> {
        let image_hash = self.resolve_image(repository, image_ref).await?;
        if self.meta.checked_out_image(repository).await? == Some(image_hash) {
            return Err(Error::CheckedOutImage(image_hash.to_string()));
        }
        for tag in self.meta.list_tags(repository).await? {
            if tag.image_hash == Some(image_hash) {
                self.meta.remove_tag(repository, &tag.tag_name).await?;
            }
        }
        // `rm` only drops tags; the image row itself (and its objects) is reclaimed by
        // the next `prune`, once nothing — tag, HEAD, or a tagged descendant — still
        // reaches it.
        tracing::info!(repository = %repository, image = %image_hash, "removed tags for image; reclaimed on next prune if unreachable");
        Ok(())
    }

    /// Deletes every image not reachable from a tag or `HEAD` (by walking `parent_id`
    /// chains back to the root), then deletes every stored object not reachable from
    /// what remains (spec §4.4, §8 S5 — deleting a tag and pruning removes the image it
    /// pointed to, while an ancestor still reachable through another tag survives).
    pub async fn prune(&self) -> Result<usize> {
        let mut keep_objects = HashSet::new();
        for repository in self.meta.list_repositories().await? {
            let images = self.meta.list_images(&repository).await?;
            let by_hash: std::collections::HashMap<ObjectHash, &Image> = images.iter().map(|i| (i.image_hash, i)).collect();

            let mut roots: Vec<ObjectHash> = self
                .meta
                .list_tags(&repository)
                .await?
                .into_iter()
                .filter_map(|t| t.image_hash)
                .collect();
            if let Some(head) = self.meta.checked_out_image(&repository).await? {
                roots.push(head);
            }

            let mut reachable = HashSet::new();
            let mut stack = roots;
            while let Some(hash) = stack.pop() {
                if !reachable.insert(hash) {
                    continue;
                }
                if let Some(image) = by_hash.get(&hash) {
                    if let Some(parent) = image.parent_id {
                        stack.push(parent);
                    }
                }
            }

            for image in &images {
                if reachable.contains(&image.image_hash) {
                    for entry in image.tables.values() {
                        keep_objects.extend(entry.object_ids.iter().copied());
                    }
                } else {
                    self.meta.delete_image(&repository, image.image_hash).await?;
                    tracing::info!(repository = %repository, image = %image.image_hash, "pruned unreachable image");
                }
            }
        }
        self.objects.cleanup(&keep_objects).await
    }

    /// Creates or repoints a tag. `HEAD` and `latest` are reserved and cannot be set
    /// directly (spec §3 invariant).
    pub async fn tag(&self, repository: &Repository, tag_name: &str, image_ref: &str, force: bool) -> Result<()> {
        if Tag::is_reserved(tag_name) {
            return Err(Error::TagExists(tag_name.to_string()));
        }
        let image_hash = self.resolve_image(repository, image_ref).await?;
        if !force {
            if let Some(existing) = self.meta.get_tag(repository, tag_name).await? {
                return Err(Error::TagExists(format!("{tag_name} -> {}", existing.image_hash.unwrap_or(ObjectHash::ROOT))));
            }
        }
        self.meta
            .set_tag(&Tag {
                repository: repository.clone(),
                tag_name: tag_name.to_string(),
                image_hash: Some(image_hash),
            })
            .await
    }

    pub async fn tag_remove(&self, repository: &Repository, tag_name: &str) -> Result<()> {
        if Tag::is_reserved(tag_name) {
            return Err(Error::TagNotFound(tag_name.to_string()));
        }
        if self.meta.get_tag(repository, tag_name).await?.is_none() {
            return Err(Error::TagNotFound(tag_name.to_string()));
        }
        self.meta.remove_tag(repository, tag_name).await
    }

    /// Resolves `HEAD`, `latest`, a tag name, or a hash prefix (>= 4 hex chars) to a
    /// full image hash (spec §4.4).
    pub async fn resolve_image(&self, repository: &Repository, reference: &str) -> Result<ObjectHash> {
        if reference == TAG_HEAD {
            return self
                .meta
                .checked_out_image(repository)
                .await?
                .ok_or_else(|| Error::ImageNotFound(TAG_HEAD.to_string()));
        }
        if reference == TAG_LATEST {
            return self
                .meta
                .latest_image(repository)
                .await?
                .map(|i| i.image_hash)
                .ok_or_else(|| Error::ImageNotFound(TAG_LATEST.to_string()));
        }
        if let Some(tag) = self.meta.get_tag(repository, reference).await? {
            if let Some(hash) = tag.image_hash {
                return Ok(hash);
            }
        }
        if let Ok(full) = reference.parse::<ObjectHash>() {
            return Ok(full);
        }
        if reference.len() >= MIN_PREFIX_LEN && reference.bytes().all(|b| b.is_ascii_hexdigit()) {
            let images = self.meta.list_images(repository).await?;
            let candidates: Vec<ObjectHash> = images
                .iter()
                .map(|i| i.image_hash)
                .filter(|h| h.starts_with_hex(reference))
                .collect();
            return match candidates.as_slice() {
                [] => Err(Error::ImageNotFound(reference.to_string())),
                [single] => Ok(*single),
                many => Err(Error::AmbiguousReference {
                    reference: reference.to_string(),
                    candidates: many.iter().map(|h| h.to_string()).collect(),
                }),
            };
        }
        Err(Error::ImageNotFound(reference.to_string()))
    }

    pub(crate) async fn current_image(&self, repository: &Repository) -> Result<Image> {
        match self.meta.checked_out_image(repository).await? {
            Some(hash) => self
                .meta
                .get_image(repository, hash)
                .await?
                .ok_or_else(|| Error::ImageNotFound(hash.to_string())),
            None => Ok(Image::root(repository.clone(), Utc::now())),
        }
    }

    async fn write_image(
        &self,
        repository: &Repository,
        parent_id: Option<ObjectHash>,
        tables: BTreeMap<String, TableEntry>,
        comment: Option<String>,
    ) -> Result<Image> {
        let created_at = Utc::now();
        let tables_bytes = serde_json::to_vec(&tables).expect("tables serialize");
        let parent_hex = parent_id.unwrap_or(ObjectHash::ROOT).to_hex();
        let image_hash = ObjectHash::compute_parts(&[
            parent_hex.as_bytes(),
            &tables_bytes,
            created_at.to_rfc3339().as_bytes(),
        ]);
        let image = Image {
            repository: repository.clone(),
            image_hash,
            parent_id,
            created_at,
            comment,
            tables,
        };
        self.meta.put_image(&image).await?;
        Ok(image)
    }

    /// Commits every tracked table's pending changes into an image identified by a
    /// caller-supplied hash rather than the generic content+timestamp formula. Used by
    /// the Splitfile executor, whose `SQL` layers are identified by `target_hash =
    /// H(current_output_head || H(canonical_stmt))` so repeated runs of the same
    /// Splitfile hit the same cache entries (spec §4.5).
    pub(crate) async fn commit_tables_with_hash(
        &self,
        repository: &Repository,
        parent: &Image,
        image_hash: ObjectHash,
        comment: Option<String>,
    ) -> Result<Image> {
        let _lock = self.engine.advisory_lock(&repository.schema()).await?;
        let mut tables = BTreeMap::new();
        for (table_name, parent_entry) in &parent.tables {
            let outcome = self.commit_table(repository, table_name, parent_entry, false).await?;
            let entry = match outcome {
                TableCommitOutcome::Unchanged => parent_entry.clone(),
                TableCommitOutcome::NewSnap { object_id } => {
                    TableEntry::new(parent_entry.schema.clone(), vec![object_id])
                }
                TableCommitOutcome::NewDiff { object_id, .. } => {
                    let mut object_ids = parent_entry.object_ids.clone();
                    object_ids.push(object_id);
                    TableEntry::new(parent_entry.schema.clone(), object_ids)
                }
            };
            tables.insert(table_name.clone(), entry);
        }
        let image = Image {
            repository: repository.clone(),
            image_hash,
            parent_id: Some(parent.image_hash),
            created_at: Utc::now(),
            comment,
            tables,
        };
        self.meta.put_image(&image).await?;
        self.meta.set_checked_out_image(repository, Some(image_hash)).await?;
        Ok(image)
    }

    /// Binds one or more tables from `source_image` into `output_repo` under a
    /// caller-supplied deterministic hash, used by the Splitfile `IMPORT` command (spec
    /// §4.5). `tables` is `(source_table_name, target_table_name)` pairs.
    pub(crate) async fn build_import_image(
        &self,
        output_repo: &Repository,
        source_repository: &Repository,
        parent: &Image,
        source_image: &Image,
        image_hash: ObjectHash,
        tables: &[(&str, &str)],
        comment: Option<String>,
    ) -> Result<Image> {
        let _lock = self.engine.advisory_lock(&output_repo.schema()).await?;
        let mut new_tables = parent.tables.clone();
        for (source_name, target_name) in tables {
            let entry = source_image
                .tables
                .get(*source_name)
                .ok_or_else(|| Error::ObjectCorruption(format!("{source_repository}/{source_name} has no committed data")))?
                .clone();
            self.engine.create_table(&output_repo.schema(), target_name, &entry.schema).await?;
            new_tables.insert(target_name.to_string(), entry);
        }
        let image = Image {
            repository: output_repo.clone(),
            image_hash,
            parent_id: Some(parent.image_hash),
            created_at: Utc::now(),
            comment,
            tables: new_tables,
        };
        self.meta.put_image(&image).await?;
        self.meta.set_checked_out_image(output_repo, Some(image_hash)).await?;
        Ok(image)
    }

    /// Diffs two images' tables, row by row, keyed by primary key (spec §4.4).
    pub async fn diff(
        &self,
        repository: &Repository,
        from_ref: &str,
        to_ref: &str,
        row_level: bool,
    ) -> Result<BTreeMap<String, crate::diffing::TableDiff>> {
        let from_image = self.resolve_image(repository, from_ref).await?;
        let to_image = self.resolve_image(repository, to_ref).await?;
        crate::diffing::diff_images(self.objects.as_ref(), self.meta.as_ref(), repository, from_image, to_image, row_level).await
    }

    /// Counts uncommitted changes pending against `table_name` (spec §4.4 `diff` with no
    /// second image argument).
    pub async fn diff_pending(&self, repository: &Repository, table_name: &str) -> Result<usize> {
        crate::diffing::diff_pending(self.engine.as_ref(), &repository.schema(), table_name).await
    }

    pub fn objects(&self) -> &Arc<O> {
        &self.objects
    }

    pub fn meta(&self) -> &Arc<M> {
        &self.meta
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }
}
