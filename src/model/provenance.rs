//! Provenance records: for images created by the Splitfile executor, the set of source
//! images used as inputs plus the original Splitfile text (spec §3, §4.5).

use serde::{Deserialize, Serialize};

use crate::hash::ObjectHash;
use crate::model::repository::Repository;

/// One `(source_repository, source_image_hash)` pair an image was built from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub repository: Repository,
    pub image_hash: ObjectHash,
}

/// Recorded inputs and reconstructable script for a Splitfile-built image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub repository: Repository,
    pub image_hash: ObjectHash,
    pub sources: Vec<SourceRef>,
    pub script: String,
}
