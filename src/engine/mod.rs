//! Engine adapter: abstracts a live SQL backend (spec §4.1).
//!
//! Per spec §9's design note on dynamic SQL shapes, the source system dispatches
//! scalar/row/column/table results through a single polymorphic call. Here the public
//! surface is instead four distinct, statically-typed methods (`query_scalar`,
//! `query_row`, `query_column`, `query_all`).

pub mod audit;
pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;
use crate::model::{ChangeRow, ColumnDef};

/// One row: ordered `(column_name, value)` pairs.
pub type Row = Vec<(String, Value)>;

/// RAII guard for the repository-level advisory lock (spec §5). Mutating operations
/// (`commit`, `checkout`, `rm`) hold one for their duration; releasing happens on drop.
pub struct RepoLock {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl RepoLock {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A lock that does nothing on release — used by fakes/tests where serialization
    /// isn't under test.
    pub fn noop() -> Self {
        Self::new(|| {})
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Abstracts a live SQL backend holding tracked tables (spec §4.1).
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    async fn query_scalar(&self, sql: &str, args: &[Value]) -> Result<Option<Value>>;
    async fn query_row(&self, sql: &str, args: &[Value]) -> Result<Option<Row>>;
    async fn query_column(&self, sql: &str, args: &[Value]) -> Result<Vec<Value>>;
    async fn query_all(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>>;

    /// Runs every statement in a single transaction; callers rely on this to make
    /// `commit` atomic (spec §4.1).
    async fn run_sql_batch(&self, statements: &[(String, Vec<Value>)]) -> Result<()>;

    async fn create_schema(&self, schema: &str) -> Result<()>;
    async fn drop_schema(&self, schema: &str) -> Result<()>;
    async fn schema_exists(&self, schema: &str) -> Result<bool>;

    async fn create_table(&self, schema: &str, table: &str, columns: &[ColumnDef]) -> Result<()>;
    async fn get_primary_keys(&self, schema: &str, table: &str) -> Result<Vec<String>>;

    /// Installs the audit trigger capturing row-level changes for `(schema, table)`
    /// (spec §4.2). A replication-slot-equivalent capture-ready state must exist
    /// before this succeeds.
    async fn install_audit_trigger(&self, schema: &str, table: &str) -> Result<()>;
    async fn uninstall_audit_trigger(&self, schema: &str, table: &str) -> Result<()>;

    /// Reads pending changes ordered by `row_seq`, pre-collapse (spec §4.2). Callers
    /// pass the result through `audit::collapse`.
    async fn read_pending_changes(&self, schema: &str, table: &str) -> Result<Vec<ChangeRow>>;
    async fn clear_pending_changes(&self, schema: &str, table: &str) -> Result<()>;

    /// Full current row set for `(schema, table)`, ordered by primary key — used to
    /// write a SNAP.
    async fn materialize_rows(&self, schema: &str, table: &str) -> Result<Vec<Row>>;

    /// True once a replication-slot-equivalent capture-ready state exists for
    /// `schema` (spec §4.2's precondition, asserted by the Splitfile SQL step).
    async fn capture_ready(&self, schema: &str) -> Result<bool>;

    /// Acquires the per-repository advisory lock serializing `commit`/`checkout`/`rm`
    /// (spec §5).
    async fn advisory_lock(&self, schema: &str) -> Result<RepoLock>;

    /// Per-request timeout for network-facing operations (spec §5); engines that are
    /// purely local may return a generous default.
    fn request_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}
