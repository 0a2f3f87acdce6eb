//! Foreign mount handlers (spec §4.7): external collaborators expose a remote dataset as
//! a local schema of live tables. The core only consumes the interface; no concrete
//! handler (document database, external SQL system, ...) is implemented here — that is
//! out of scope, same as the teacher's external collaborator seams.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::Result;
use crate::model::ColumnDef;

/// Connection parameters handed to a mount handler. Shape is handler-specific, so it is
/// carried as a free-form JSON object rather than a typed struct.
pub type MountOptions = BTreeMap<String, Value>;

/// A schema exposed by a successful `mount` call: table name to its column layout.
pub type MountedSchema = BTreeMap<String, Vec<ColumnDef>>;

/// Exposes a remote dataset as a local schema of live tables. Mounted schemas behave
/// like ordinary repositories for `import` (data is snapshotted at import time) but
/// cannot be committed into directly — there is no audit trigger on foreign tables.
#[async_trait]
pub trait MountHandler: Send + Sync {
    /// Connects to the remote system and registers its tables under `mountpoint`,
    /// returning the schema the core should treat the mountpoint as exposing.
    async fn mount(&self, mountpoint: &str, conn: &str, options: &MountOptions) -> Result<MountedSchema>;

    /// Tears down a previously mounted schema. Idempotent: unmounting an unknown
    /// mountpoint is not an error.
    async fn unmount(&self, mountpoint: &str) -> Result<()>;
}
