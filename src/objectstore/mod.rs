//! Content-addressed object store: SNAP and DIFF bodies keyed by `ObjectHash` (spec §4.3).
//!
//! `ObjectStore` is storage-agnostic; the apply rules that turn a SNAP plus a chain of
//! DIFFs into materialized rows live in `chain` as pure functions so they are testable
//! without any backend at all.

pub mod chain;
pub mod fs;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::engine::Row;
use crate::hash::ObjectHash;
use crate::model::{ChangeRow, ObjectMeta};

/// The body of a stored object: either a full table snapshot or a changeset layered on
/// top of a parent object (spec §3, §4.3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum StoredObject {
    Snap {
        schema_bytes: Vec<u8>,
        rows: Vec<Row>,
    },
    Diff {
        parent_id: ObjectHash,
        changes: Vec<ChangeRow>,
    },
}

impl StoredObject {
    pub fn parent_id(&self) -> Option<ObjectHash> {
        match self {
            StoredObject::Snap { .. } => None,
            StoredObject::Diff { parent_id, .. } => Some(*parent_id),
        }
    }

    pub fn meta(&self, object_id: ObjectHash, size: u64) -> ObjectMeta {
        ObjectMeta {
            object_id,
            kind: match self {
                StoredObject::Snap { .. } => crate::model::ObjectKind::Snap,
                StoredObject::Diff { .. } => crate::model::ObjectKind::Diff,
            },
            parent_id: self.parent_id(),
            size,
        }
    }
}

/// Storage backend for SNAP/DIFF object bodies (spec §4.3). Implementations need not be
/// aware of repositories or images — identity is purely by `ObjectHash`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes a SNAP object. Errors if an object with this id is already present with a
    /// different body (content-addressing invariant: same id implies same content, so a
    /// matching body is a silent no-op).
    async fn put_snap(&self, object_id: ObjectHash, schema_bytes: Vec<u8>, rows: Vec<Row>) -> Result<()>;

    /// Writes a DIFF object layered on `parent_id`.
    async fn put_diff(&self, object_id: ObjectHash, parent_id: ObjectHash, changes: Vec<ChangeRow>) -> Result<()>;

    async fn get_object(&self, object_id: ObjectHash) -> Result<StoredObject>;
    async fn has_object(&self, object_id: ObjectHash) -> Result<bool>;

    /// Reconstructs table rows by applying a SNAP followed by zero or more DIFFs, in
    /// order (spec §3 invariant: `object_ids` starts at a SNAP).
    async fn materialize(&self, object_ids: &[ObjectHash]) -> Result<Vec<Row>> {
        let mut rows: Option<Vec<Row>> = None;
        let mut schema: Vec<crate::model::ColumnDef> = Vec::new();
        for (i, id) in object_ids.iter().enumerate() {
            let object = self.get_object(*id).await?;
            match object {
                StoredObject::Snap { rows: snap_rows, schema_bytes } => {
                    if i != 0 {
                        return Err(crate::errors::Error::ObjectCorruption(format!(
                            "SNAP {id} found at chain position {i}, expected position 0"
                        )));
                    }
                    schema = serde_json::from_slice(&schema_bytes).map_err(|e| {
                        crate::errors::Error::ObjectCorruption(format!("SNAP {id} has unreadable schema: {e}"))
                    })?;
                    rows = Some(snap_rows);
                }
                StoredObject::Diff { changes, .. } => {
                    let base = rows.take().ok_or_else(|| {
                        crate::errors::Error::ObjectCorruption(format!(
                            "DIFF {id} has no preceding SNAP in its chain"
                        ))
                    })?;
                    rows = Some(chain::apply_diff_with_schema(base, &changes, &schema)?);
                }
            }
        }
        rows.ok_or_else(|| crate::errors::Error::ObjectCorruption("empty object chain".into()))
    }

    /// Deletes every stored object whose id is not in `keep` (spec §4.4 `prune`).
    /// Returns the number of objects removed.
    async fn cleanup(&self, keep: &std::collections::HashSet<ObjectHash>) -> Result<usize>;

    async fn all_object_ids(&self) -> Result<Vec<ObjectHash>>;
}
