//! Change-capture collapse rules (spec §4.2).
//!
//! The audit trigger appends one row per statement-level change to a pending-changes
//! side table. Multiple changes to the same primary key within one pending window
//! collapse at read time, independent of the backend — this module is pure logic over
//! `Vec<ChangeRow>` so it is unit-testable without a live database.

use std::collections::BTreeMap;

use crate::model::{ChangeKind, ChangeRow};

/// Collapses a `row_seq`-ordered list of changes into one change per primary key,
/// applying the rules in spec §4.2:
///
/// - `insert -> delete` cancels out entirely.
/// - `insert -> update` collapses to a single insert with the final payload.
/// - `update -> delete` yields a delete.
/// - `update -> update` keeps the last payload.
///
/// Input does not need to be pre-sorted by `row_seq`; this function sorts it.
pub fn collapse(mut changes: Vec<ChangeRow>) -> Vec<ChangeRow> {
    changes.sort_by_key(|c| c.row_seq);

    let mut by_pk: BTreeMap<Vec<String>, ChangeRow> = BTreeMap::new();
    let mut order: Vec<Vec<String>> = Vec::new();

    for change in changes {
        let key = pk_key(&change.pk);
        match by_pk.get(&key) {
            None => {
                order.push(key.clone());
                by_pk.insert(key, change);
            }
            Some(existing) => {
                let collapsed = collapse_pair(existing, &change);
                match collapsed {
                    Some(c) => {
                        by_pk.insert(key, c);
                    }
                    None => {
                        by_pk.remove(&key);
                    }
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| by_pk.remove(&key))
        .collect()
}

/// Collapses two consecutive changes to the same primary key. `None` means the pair
/// cancels out (insert followed by delete).
fn collapse_pair(previous: &ChangeRow, next: &ChangeRow) -> Option<ChangeRow> {
    use ChangeKind::*;
    match (previous.kind, next.kind) {
        (Insert, Delete) => None,
        (Insert, Update) => Some(ChangeRow::insert(
            next.pk.clone(),
            next.payload.clone().expect("update carries a payload"),
            next.row_seq,
        )),
        (Update, Delete) => Some(ChangeRow::delete(next.pk.clone(), next.row_seq)),
        (Update, Update) => Some(next.clone()),
        // Any other ordering (e.g. delete -> insert, re-inserting a deleted pk) is
        // treated as a fresh change sequence starting at `next`.
        _ => Some(next.clone()),
    }
}

fn pk_key(pk: &[serde_json::Value]) -> Vec<String> {
    pk.iter().map(|v| v.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pk(id: i64) -> Vec<serde_json::Value> {
        vec![json!(id)]
    }

    #[test]
    fn insert_then_delete_cancels() {
        let changes = vec![
            ChangeRow::insert(pk(1), json!({"name": "apple"}), 1),
            ChangeRow::delete(pk(1), 2),
        ];
        assert!(collapse(changes).is_empty());
    }

    #[test]
    fn insert_then_update_collapses_to_insert_with_final_payload() {
        let changes = vec![
            ChangeRow::insert(pk(1), json!({"name": "apple"}), 1),
            ChangeRow::update(pk(1), json!({"name": "pear"}), 2),
        ];
        let result = collapse(changes);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].kind, ChangeKind::Insert);
        assert_eq!(result[0].payload, Some(json!({"name": "pear"})));
    }

    #[test]
    fn update_then_delete_yields_delete() {
        let changes = vec![
            ChangeRow::update(pk(1), json!({"name": "pear"}), 1),
            ChangeRow::delete(pk(1), 2),
        ];
        let result = collapse(changes);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].kind, ChangeKind::Delete);
    }

    #[test]
    fn update_then_update_keeps_last_payload() {
        let changes = vec![
            ChangeRow::update(pk(1), json!({"name": "pear"}), 1),
            ChangeRow::update(pk(1), json!({"name": "plum"}), 2),
        ];
        let result = collapse(changes);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].payload, Some(json!({"name": "plum"})));
    }

    #[test]
    fn unrelated_pks_are_independent_and_order_preserved() {
        let changes = vec![
            ChangeRow::insert(pk(2), json!({"name": "orange"}), 1),
            ChangeRow::insert(pk(1), json!({"name": "apple"}), 2),
        ];
        let result = collapse(changes);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].pk, pk(2));
        assert_eq!(result[1].pk, pk(1));
    }

    #[test]
    fn out_of_order_row_seq_is_sorted_before_collapsing() {
        let changes = vec![
            ChangeRow::update(pk(1), json!({"name": "pear"}), 5),
            ChangeRow::insert(pk(1), json!({"name": "apple"}), 1),
        ];
        let result = collapse(changes);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].kind, ChangeKind::Insert);
        assert_eq!(result[0].payload, Some(json!({"name": "pear"})));
    }
}
