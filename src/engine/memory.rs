//! In-process fake `EngineAdapter`, used by the Splitfile executor's tests and by
//! `repo::Catalog` integration tests. Mirrors the teacher's `TestRepoAccess` fake in
//! `protocol::smart` — a hand-rolled implementation of the trait good enough to drive
//! the higher-level logic without a live database.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;
use crate::engine::{EngineAdapter, Row, RepoLock};
use crate::errors::Error;
use crate::model::{ChangeKind, ChangeRow, ColumnDef};

#[derive(Default)]
struct SchemaState {
    tables: BTreeMap<String, TableState>,
}

struct TableState {
    columns: Vec<ColumnDef>,
    rows: BTreeMap<String, Row>,
    pending: Vec<ChangeRow>,
    next_seq: i64,
    audit_installed: bool,
}

impl TableState {
    fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            rows: BTreeMap::new(),
            pending: Vec::new(),
            next_seq: 0,
            audit_installed: false,
        }
    }

    fn pk_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_pk)
            .map(|c| c.name.as_str())
            .collect()
    }

    fn pk_key(&self, row: &Row) -> String {
        let pk_cols = self.pk_columns();
        let values: Vec<String> = pk_cols
            .iter()
            .map(|col| {
                row.iter()
                    .find(|(name, _)| name == col)
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_default()
            })
            .collect();
        values.join("|")
    }

    fn row_to_pk_values(&self, row: &Row) -> Vec<Value> {
        self.pk_columns()
            .iter()
            .map(|col| {
                row.iter()
                    .find(|(name, _)| name == *col)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Null)
            })
            .collect()
    }
}

/// An in-memory stand-in for a live SQL engine: no real SQL is parsed, but insert/
/// update/delete and table lifecycle can be driven directly via the helper methods
/// below, which is all `repo::Catalog` and the Splitfile executor need from an
/// `EngineAdapter` in tests.
#[derive(Default)]
pub struct MemoryEngine {
    schemas: Mutex<BTreeMap<String, SchemaState>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table_with_columns(&self, schema: &str, table: &str, columns: Vec<ColumnDef>) {
        let mut schemas = self.schemas.lock().unwrap();
        let schema_state = schemas.entry(schema.to_string()).or_default();
        schema_state
            .tables
            .insert(table.to_string(), TableState::new(columns));
    }

    /// Directly inserts a row, recording a pending change if the audit trigger is
    /// installed (mirrors what a live `INSERT` + trigger would do).
    pub fn insert_row(&self, schema: &str, table: &str, row: Row) {
        let mut schemas = self.schemas.lock().unwrap();
        let schema_state = schemas.get_mut(schema).expect("schema exists");
        let table_state = schema_state.tables.get_mut(table).expect("table exists");
        let key = table_state.pk_key(&row);
        let pk = table_state.row_to_pk_values(&row);
        let payload = row_to_json(&row);
        table_state.rows.insert(key, row);
        if table_state.audit_installed {
            let seq = table_state.next_seq;
            table_state.next_seq += 1;
            table_state.pending.push(ChangeRow::insert(pk, payload, seq));
        }
    }

    pub fn update_row(&self, schema: &str, table: &str, row: Row) {
        let mut schemas = self.schemas.lock().unwrap();
        let schema_state = schemas.get_mut(schema).expect("schema exists");
        let table_state = schema_state.tables.get_mut(table).expect("table exists");
        let key = table_state.pk_key(&row);
        let pk = table_state.row_to_pk_values(&row);
        let payload = row_to_json(&row);
        table_state.rows.insert(key, row);
        if table_state.audit_installed {
            let seq = table_state.next_seq;
            table_state.next_seq += 1;
            table_state.pending.push(ChangeRow::update(pk, payload, seq));
        }
    }

    pub fn delete_row(&self, schema: &str, table: &str, pk: Vec<Value>, pk_cols: &[&str]) {
        let mut schemas = self.schemas.lock().unwrap();
        let schema_state = schemas.get_mut(schema).expect("schema exists");
        let table_state = schema_state.tables.get_mut(table).expect("table exists");
        let key = pk.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("|");
        table_state.rows.remove(&key);
        let _ = pk_cols;
        if table_state.audit_installed {
            let seq = table_state.next_seq;
            table_state.next_seq += 1;
            table_state.pending.push(ChangeRow::delete(pk, seq));
        }
    }
}

fn row_to_json(row: &Row) -> Value {
    Value::Object(row.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

#[async_trait]
impl EngineAdapter for MemoryEngine {
    async fn query_scalar(&self, sql: &str, _args: &[Value]) -> Result<Option<Value>> {
        Err(Error::engine("MemoryEngine does not parse SQL", sql))
    }

    async fn query_row(&self, sql: &str, _args: &[Value]) -> Result<Option<Row>> {
        Err(Error::engine("MemoryEngine does not parse SQL", sql))
    }

    async fn query_column(&self, sql: &str, _args: &[Value]) -> Result<Vec<Value>> {
        Err(Error::engine("MemoryEngine does not parse SQL", sql))
    }

    async fn query_all(&self, sql: &str, _args: &[Value]) -> Result<Vec<Row>> {
        Err(Error::engine("MemoryEngine does not parse SQL", sql))
    }

    async fn run_sql_batch(&self, _statements: &[(String, Vec<Value>)]) -> Result<()> {
        Ok(())
    }

    async fn create_schema(&self, schema: &str) -> Result<()> {
        self.schemas
            .lock()
            .unwrap()
            .entry(schema.to_string())
            .or_default();
        Ok(())
    }

    async fn drop_schema(&self, schema: &str) -> Result<()> {
        self.schemas.lock().unwrap().remove(schema);
        Ok(())
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        Ok(self.schemas.lock().unwrap().contains_key(schema))
    }

    async fn create_table(&self, schema: &str, table: &str, columns: &[ColumnDef]) -> Result<()> {
        self.create_table_with_columns(schema, table, columns.to_vec());
        Ok(())
    }

    async fn get_primary_keys(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let schemas = self.schemas.lock().unwrap();
        let table_state = schemas
            .get(schema)
            .and_then(|s| s.tables.get(table))
            .ok_or_else(|| Error::engine("no such table", format!("{schema}.{table}")))?;
        Ok(table_state
            .pk_columns()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    async fn install_audit_trigger(&self, schema: &str, table: &str) -> Result<()> {
        let mut schemas = self.schemas.lock().unwrap();
        let table_state = schemas
            .get_mut(schema)
            .and_then(|s| s.tables.get_mut(table))
            .ok_or_else(|| Error::engine("no such table", format!("{schema}.{table}")))?;
        table_state.audit_installed = true;
        Ok(())
    }

    async fn uninstall_audit_trigger(&self, schema: &str, table: &str) -> Result<()> {
        let mut schemas = self.schemas.lock().unwrap();
        if let Some(table_state) = schemas.get_mut(schema).and_then(|s| s.tables.get_mut(table)) {
            table_state.audit_installed = false;
        }
        Ok(())
    }

    async fn read_pending_changes(&self, schema: &str, table: &str) -> Result<Vec<ChangeRow>> {
        let schemas = self.schemas.lock().unwrap();
        Ok(schemas
            .get(schema)
            .and_then(|s| s.tables.get(table))
            .map(|t| t.pending.clone())
            .unwrap_or_default())
    }

    async fn clear_pending_changes(&self, schema: &str, table: &str) -> Result<()> {
        let mut schemas = self.schemas.lock().unwrap();
        if let Some(table_state) = schemas.get_mut(schema).and_then(|s| s.tables.get_mut(table)) {
            table_state.pending.clear();
        }
        Ok(())
    }

    async fn materialize_rows(&self, schema: &str, table: &str) -> Result<Vec<Row>> {
        let schemas = self.schemas.lock().unwrap();
        let table_state = schemas
            .get(schema)
            .and_then(|s| s.tables.get(table))
            .ok_or_else(|| Error::engine("no such table", format!("{schema}.{table}")))?;
        Ok(table_state.rows.values().cloned().collect())
    }

    async fn capture_ready(&self, schema: &str) -> Result<bool> {
        Ok(self.schemas.lock().unwrap().contains_key(schema))
    }

    async fn advisory_lock(&self, _schema: &str) -> Result<RepoLock> {
        Ok(RepoLock::noop())
    }
}

impl ChangeKind {
    #[cfg(test)]
    fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fruits_columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new(0, "fruit_id", "int", true),
            ColumnDef::new(1, "name", "text", false),
        ]
    }

    #[tokio::test]
    async fn insert_is_captured_only_after_trigger_install() {
        let engine = MemoryEngine::new();
        engine.create_schema("fruits").await.unwrap();
        engine
            .create_table("fruits", "fruits", &fruits_columns())
            .await
            .unwrap();

        engine.insert_row(
            "fruits",
            "fruits",
            vec![("fruit_id".into(), json!(1)), ("name".into(), json!("apple"))],
        );
        assert!(
            engine
                .read_pending_changes("fruits", "fruits")
                .await
                .unwrap()
                .is_empty()
        );

        engine.install_audit_trigger("fruits", "fruits").await.unwrap();
        engine.insert_row(
            "fruits",
            "fruits",
            vec![("fruit_id".into(), json!(2)), ("name".into(), json!("orange"))],
        );
        let pending = engine.read_pending_changes("fruits", "fruits").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind.as_str(), "insert");
    }

    #[tokio::test]
    async fn clear_pending_changes_empties_the_side_table() {
        let engine = MemoryEngine::new();
        engine.create_schema("fruits").await.unwrap();
        engine
            .create_table("fruits", "fruits", &fruits_columns())
            .await
            .unwrap();
        engine.install_audit_trigger("fruits", "fruits").await.unwrap();
        engine.insert_row(
            "fruits",
            "fruits",
            vec![("fruit_id".into(), json!(1)), ("name".into(), json!("apple"))],
        );
        engine.clear_pending_changes("fruits", "fruits").await.unwrap();
        assert!(
            engine
                .read_pending_changes("fruits", "fruits")
                .await
                .unwrap()
                .is_empty()
        );
    }
}
