//! Tags: human-readable aliases for image hashes within a repository (spec §3).

use serde::{Deserialize, Serialize};

use crate::hash::ObjectHash;
use crate::model::repository::Repository;

/// Reserved tag denoting the currently checked-out image. Nullable: `None` means "no
/// working copy."
pub const TAG_HEAD: &str = "HEAD";

/// Reserved tag that always resolves dynamically to the most recently created image.
pub const TAG_LATEST: &str = "latest";

/// `(repository, tag_name) -> image_hash`. Non-reserved tags are unique per repository
/// and must refer to an existing image (spec §3 invariant).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub repository: Repository,
    pub tag_name: String,
    pub image_hash: Option<ObjectHash>,
}

impl Tag {
    pub fn is_reserved(name: &str) -> bool {
        name == TAG_HEAD || name == TAG_LATEST
    }
}
