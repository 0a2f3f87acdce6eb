//! Images (commits): immutable, hash-identified snapshots of every table's object chain
//! (spec §3).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::ObjectHash;
use crate::model::repository::Repository;
use crate::model::table::TableEntry;

/// A commit. Images form a DAG (in practice a forest of parent chains) rooted at the
/// implicit all-zero image.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Image {
    pub repository: Repository,
    pub image_hash: ObjectHash,
    pub parent_id: Option<ObjectHash>,
    pub created_at: DateTime<Utc>,
    pub comment: Option<String>,
    /// `table_name -> table_entry` bindings for this image.
    pub tables: BTreeMap<String, TableEntry>,
}

impl Image {
    /// The special root image that is the implicit parent of a freshly initialized
    /// repository (spec §3).
    pub fn root(repository: Repository, created_at: DateTime<Utc>) -> Self {
        Image {
            repository,
            image_hash: ObjectHash::ROOT,
            parent_id: None,
            created_at,
            comment: None,
            tables: BTreeMap::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.image_hash.is_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_image_has_zero_hash_and_no_parent() {
        let repo = Repository::unqualified("fruits");
        let img = Image::root(repo, Utc::now());
        assert!(img.is_root());
        assert!(img.parent_id.is_none());
        assert!(img.tables.is_empty());
    }
}
