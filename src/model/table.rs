//! Table schema and the object chain that reconstructs a table's rows (spec §3).

use serde::{Deserialize, Serialize};

use crate::hash::ObjectHash;

/// One column of a table schema: ordinal position, name, backend type name, and
/// whether it participates in the primary key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub ordinal: i32,
    pub name: String,
    pub col_type: String,
    pub is_pk: bool,
}

impl ColumnDef {
    pub fn new(ordinal: i32, name: impl Into<String>, col_type: impl Into<String>, is_pk: bool) -> Self {
        Self {
            ordinal,
            name: name.into(),
            col_type: col_type.into(),
            is_pk,
        }
    }
}

/// For a given `(image, table_name)`: the schema and the ordered object chain whose
/// composition reconstructs the table (spec §3). Invariant: `object_ids` starts at a
/// SNAP and is followed by zero or more DIFFs, each applying on top of the previous.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub schema: Vec<ColumnDef>,
    pub object_ids: Vec<ObjectHash>,
}

impl TableEntry {
    pub fn new(schema: Vec<ColumnDef>, object_ids: Vec<ObjectHash>) -> Self {
        Self { schema, object_ids }
    }

    pub fn primary_key_columns(&self) -> Vec<&ColumnDef> {
        self.schema.iter().filter(|c| c.is_pk).collect()
    }

    /// Canonical, deterministically ordered schema bytes used as part of a SNAP's
    /// object id (spec §4.3: `hash(schema_sorted || rows_sorted_by_pk)`).
    pub fn canonical_schema_bytes(&self) -> Vec<u8> {
        let mut cols = self.schema.clone();
        cols.sort_by(|a, b| a.ordinal.cmp(&b.ordinal));
        serde_json::to_vec(&cols).expect("schema serializes")
    }
}
