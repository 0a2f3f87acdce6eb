//! Text rendering for CLI output — the "tree-drawing/pretty-print of logs" the core
//! deliberately stays out of (spec §1 Non-goals). Lives entirely in the CLI shell.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::diffing::{RowDiff, TableDiff};
use crate::engine::Row;
use crate::model::Image;

fn render_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

fn render_row(row: &Row) -> String {
    row.iter()
        .map(|(name, value)| format!("{name}={}", render_value(value)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `diff -v` per-row output; without `-v` only the summary counts print (handled by the
/// caller).
pub fn render_table_diff(table_name: &str, diff: &TableDiff, verbose: bool) -> String {
    let mut out = format!("{table_name}: +{} -{} ~{}", diff.added, diff.removed, diff.changed);
    if verbose {
        for row in &diff.rows {
            let line = match row {
                RowDiff::Added(r) => format!("  + {}", render_row(r)),
                RowDiff::Removed(r) => format!("  - {}", render_row(r)),
                RowDiff::Changed { before, after } => format!("  ~ {} -> {}", render_row(before), render_row(after)),
            };
            out.push('\n');
            out.push_str(&line);
        }
    }
    out
}

pub fn render_diffs(diffs: &BTreeMap<String, TableDiff>, verbose: bool) -> String {
    if diffs.values().all(TableDiff::is_empty) {
        return "no differences".to_string();
    }
    diffs
        .iter()
        .filter(|(_, d)| !d.is_empty())
        .map(|(name, d)| render_table_diff(name, d, verbose))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `show` metadata summary; `-v` appends the per-table object chain.
pub fn render_image(image: &Image, verbose: bool) -> String {
    let mut out = format!(
        "image {}\nparent: {}\ncreated: {}\ncomment: {}",
        image.image_hash,
        image.parent_id.map(|h| h.to_string()).unwrap_or_else(|| "(none)".to_string()),
        image.created_at.to_rfc3339(),
        image.comment.as_deref().unwrap_or("(none)"),
    );
    if verbose {
        for (table_name, entry) in &image.tables {
            let chain = entry.object_ids.iter().map(|h| h.to_string()).collect::<Vec<_>>().join(" -> ");
            out.push_str(&format!("\n  {table_name}: {chain}"));
        }
    }
    out
}

/// `log` linear rendering: newest first, one line per image.
pub fn render_log_linear(images: &[Image]) -> String {
    images
        .iter()
        .map(|i| format!("{}  {}  {}", i.image_hash, i.created_at.to_rfc3339(), i.comment.as_deref().unwrap_or("")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `log -t` tree rendering: indents each image by its depth below the root, following
/// `parent_id` back through the set already loaded by the caller.
pub fn render_log_tree(images: &[Image]) -> String {
    let mut by_parent: BTreeMap<Option<crate::hash::ObjectHash>, Vec<&Image>> = BTreeMap::new();
    for image in images {
        by_parent.entry(image.parent_id).or_default().push(image);
    }
    let mut out = Vec::new();
    let mut stack: Vec<(Option<crate::hash::ObjectHash>, usize)> = vec![(None, 0)];
    let mut visited = std::collections::HashSet::new();
    while let Some((parent, depth)) = stack.pop() {
        if let Some(children) = by_parent.get(&parent) {
            for child in children {
                if !visited.insert(child.image_hash) {
                    continue;
                }
                out.push(format!("{}{} {}", "  ".repeat(depth), child.image_hash, child.comment.as_deref().unwrap_or("")));
                stack.push((Some(child.image_hash), depth + 1));
            }
        }
    }
    out.join("\n")
}
