//! Upstream pointers: the default remote target for pull/push (spec §3).

use serde::{Deserialize, Serialize};

use crate::model::repository::Repository;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upstream {
    pub repository: Repository,
    pub remote_engine: String,
    pub remote_repository: Repository,
}
