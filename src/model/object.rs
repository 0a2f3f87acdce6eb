//! Content-addressed table objects: SNAP (full snapshot) and DIFF (changeset), and the
//! row-level change representation captured by the audit trigger (spec §3, §4.2, §4.3).

use serde::{Deserialize, Serialize};

use crate::hash::ObjectHash;

/// The two object kinds a table's chain is made of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Snap,
    Diff,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Snap => write!(f, "SNAP"),
            ObjectKind::Diff => write!(f, "DIFF"),
        }
    }
}

/// The kind of a single row-level change captured by the audit trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change: a primary key, its kind, and (for insert/update) the row
/// payload. `row_seq` orders changes as captured within a session (spec §4.2); it is
/// not part of the change's identity, only its ordering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRow {
    pub pk: Vec<serde_json::Value>,
    pub kind: ChangeKind,
    pub payload: Option<serde_json::Value>,
    pub row_seq: i64,
}

impl ChangeRow {
    pub fn insert(pk: Vec<serde_json::Value>, payload: serde_json::Value, row_seq: i64) -> Self {
        Self {
            pk,
            kind: ChangeKind::Insert,
            payload: Some(payload),
            row_seq,
        }
    }

    pub fn update(pk: Vec<serde_json::Value>, payload: serde_json::Value, row_seq: i64) -> Self {
        Self {
            pk,
            kind: ChangeKind::Update,
            payload: Some(payload),
            row_seq,
        }
    }

    pub fn delete(pk: Vec<serde_json::Value>, row_seq: i64) -> Self {
        Self {
            pk,
            kind: ChangeKind::Delete,
            payload: None,
            row_seq,
        }
    }

    /// Canonical bytes for hashing: pk + kind + payload, with `row_seq` deliberately
    /// excluded since it is session-local ordering metadata, not content (spec invariant
    /// 2: identical inputs must share an object id regardless of which session wrote
    /// them).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        #[derive(Serialize)]
        struct Canonical<'a> {
            pk: &'a [serde_json::Value],
            kind: ChangeKind,
            payload: &'a Option<serde_json::Value>,
        }
        serde_json::to_vec(&Canonical {
            pk: &self.pk,
            kind: self.kind,
            payload: &self.payload,
        })
        .expect("change row serializes")
    }
}

/// Metadata about a stored object, independent of its body (used by the metadata store
/// and by `cleanup`/`show -v`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub object_id: ObjectHash,
    pub kind: ObjectKind,
    pub parent_id: Option<ObjectHash>,
    pub size: u64,
}
