//! Pure SNAP+DIFF apply rules (spec §4.3), independent of any storage backend.
//!
//! A DIFF's changes are positional: `ChangeRow::pk` is ordered to match the primary key
//! columns sorted by ordinal, the same ordering `TableEntry::primary_key_columns` returns.
//! Applying a DIFF enforces: insert fails if the pk is already present, update/delete fail
//! if the pk is absent — violations raise `Error::ObjectCorruption` rather than silently
//! diverging from the recorded history.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::Result;
use crate::engine::Row;
use crate::errors::Error;
use crate::model::{ChangeKind, ChangeRow, ColumnDef};

fn pk_key(pk: &[Value]) -> Vec<String> {
    pk.iter().map(|v| v.to_string()).collect()
}

fn row_pk_key(row: &Row, pk_columns: &[&str]) -> Vec<String> {
    pk_columns
        .iter()
        .map(|col| {
            row.iter()
                .find(|(name, _)| name == col)
                .map(|(_, v)| v.to_string())
                .unwrap_or_default()
        })
        .collect()
}

fn payload_to_row(payload: &Value) -> Row {
    payload
        .as_object()
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// Applies a collapsed (or raw) list of changes to a base row set, per the primary-key
/// columns ordering in `schema`.
pub fn apply_diff_with_schema(base: Vec<Row>, changes: &[ChangeRow], schema: &[ColumnDef]) -> Result<Vec<Row>> {
    let mut pk_cols: Vec<&ColumnDef> = schema.iter().filter(|c| c.is_pk).collect();
    pk_cols.sort_by_key(|c| c.ordinal);
    let pk_names: Vec<&str> = pk_cols.iter().map(|c| c.name.as_str()).collect();

    let mut by_pk: BTreeMap<Vec<String>, Row> = base
        .into_iter()
        .map(|row| (row_pk_key(&row, &pk_names), row))
        .collect();

    for change in changes {
        let key = pk_key(&change.pk);
        match change.kind {
            ChangeKind::Insert => {
                if by_pk.contains_key(&key) {
                    return Err(Error::ObjectCorruption(format!(
                        "insert for already-present primary key {:?}",
                        change.pk
                    )));
                }
                let payload = change
                    .payload
                    .as_ref()
                    .ok_or_else(|| Error::ObjectCorruption("insert change missing payload".into()))?;
                by_pk.insert(key, payload_to_row(payload));
            }
            ChangeKind::Update => {
                if !by_pk.contains_key(&key) {
                    return Err(Error::ObjectCorruption(format!(
                        "update for absent primary key {:?}",
                        change.pk
                    )));
                }
                let payload = change
                    .payload
                    .as_ref()
                    .ok_or_else(|| Error::ObjectCorruption("update change missing payload".into()))?;
                by_pk.insert(key, payload_to_row(payload));
            }
            ChangeKind::Delete => {
                if by_pk.remove(&key).is_none() {
                    return Err(Error::ObjectCorruption(format!(
                        "delete for absent primary key {:?}",
                        change.pk
                    )));
                }
            }
        }
    }

    Ok(by_pk.into_values().collect())
}

/// Convenience entry point for backends that don't carry schema alongside the base rows
/// (used by `ObjectStore::materialize`'s default impl when schema has already been
/// resolved by the caller). Falls back to treating the first column of each row as the
/// sole primary key column when `schema` is empty — acceptable only for tests.
pub fn apply_diff(base: Vec<Row>, changes: &[ChangeRow]) -> Result<Vec<Row>> {
    let schema: Vec<ColumnDef> = base
        .first()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, (name, _))| ColumnDef::new(i as i32, name.clone(), "text", i == 0))
                .collect()
        })
        .unwrap_or_default();
    apply_diff_with_schema(base, changes, &schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new(0, "fruit_id", "int", true),
            ColumnDef::new(1, "name", "text", false),
        ]
    }

    fn row(id: i64, name: &str) -> Row {
        vec![("fruit_id".into(), json!(id)), ("name".into(), json!(name))]
    }

    #[test]
    fn insert_adds_a_new_row() {
        let base = vec![row(1, "apple")];
        let changes = vec![ChangeRow::insert(vec![json!(2)], json!({"fruit_id": 2, "name": "pear"}), 0)];
        let result = apply_diff_with_schema(base, &changes, &columns()).unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn insert_over_existing_pk_is_corruption() {
        let base = vec![row(1, "apple")];
        let changes = vec![ChangeRow::insert(vec![json!(1)], json!({"fruit_id": 1, "name": "pear"}), 0)];
        assert!(apply_diff_with_schema(base, &changes, &columns()).is_err());
    }

    #[test]
    fn update_missing_pk_is_corruption() {
        let base: Vec<Row> = vec![];
        let changes = vec![ChangeRow::update(vec![json!(1)], json!({"fruit_id": 1, "name": "pear"}), 0)];
        assert!(apply_diff_with_schema(base, &changes, &columns()).is_err());
    }

    #[test]
    fn delete_removes_the_row() {
        let base = vec![row(1, "apple"), row(2, "pear")];
        let changes = vec![ChangeRow::delete(vec![json!(1)], 0)];
        let result = apply_diff_with_schema(base, &changes, &columns()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0][0].1, json!(2));
    }

    #[test]
    fn delete_missing_pk_is_corruption() {
        let base = vec![row(1, "apple")];
        let changes = vec![ChangeRow::delete(vec![json!(99)], 0)];
        assert!(apply_diff_with_schema(base, &changes, &columns()).is_err());
    }
}
