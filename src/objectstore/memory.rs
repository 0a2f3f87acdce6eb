//! `dashmap`-backed fake `ObjectStore` for tests (spec §4.3's testing requirement,
//! mirroring the teacher's preference for a real-trait in-memory fake over a mock
//! library).

use dashmap::DashMap;

use crate::Result;
use crate::engine::Row;
use crate::errors::Error;
use crate::hash::ObjectHash;
use crate::model::ChangeRow;
use crate::objectstore::{ObjectStore, StoredObject};

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<ObjectHash, StoredObject>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_snap(&self, object_id: ObjectHash, schema_bytes: Vec<u8>, rows: Vec<Row>) -> Result<()> {
        self.objects
            .entry(object_id)
            .or_insert(StoredObject::Snap { schema_bytes, rows });
        Ok(())
    }

    async fn put_diff(&self, object_id: ObjectHash, parent_id: ObjectHash, changes: Vec<ChangeRow>) -> Result<()> {
        self.objects
            .entry(object_id)
            .or_insert(StoredObject::Diff { parent_id, changes });
        Ok(())
    }

    async fn get_object(&self, object_id: ObjectHash) -> Result<StoredObject> {
        self.objects
            .get(&object_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::ObjectCorruption(format!("object {object_id} not found")))
    }

    async fn has_object(&self, object_id: ObjectHash) -> Result<bool> {
        Ok(self.objects.contains_key(&object_id))
    }

    async fn cleanup(&self, keep: &std::collections::HashSet<ObjectHash>) -> Result<usize> {
        let to_remove: Vec<ObjectHash> = self
            .objects
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| !keep.contains(id))
            .collect();
        for id in &to_remove {
            self.objects.remove(id);
        }
        Ok(to_remove.len())
    }

    async fn all_object_ids(&self) -> Result<Vec<ObjectHash>> {
        Ok(self.objects.iter().map(|entry| *entry.key()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn snap_then_diff_materializes() {
        let store = MemoryObjectStore::new();
        let schema = serde_json::to_vec(&vec![crate::model::ColumnDef::new(0, "id", "int", true)]).unwrap();
        let snap_id = ObjectHash::compute(b"snap");
        let rows = vec![vec![("id".to_string(), json!(1))]];
        store.put_snap(snap_id, schema, rows).await.unwrap();

        let diff_id = ObjectHash::compute(b"diff");
        let changes = vec![ChangeRow::insert(vec![json!(2)], json!({"id": 2}), 0)];
        store.put_diff(diff_id, snap_id, changes).await.unwrap();

        let materialized = store.materialize(&[snap_id, diff_id]).await.unwrap();
        assert_eq!(materialized.len(), 2);
    }

    #[tokio::test]
    async fn cleanup_removes_unreferenced_objects() {
        let store = MemoryObjectStore::new();
        let a = ObjectHash::compute(b"a");
        let b = ObjectHash::compute(b"b");
        store.put_snap(a, vec![], vec![]).await.unwrap();
        store.put_snap(b, vec![], vec![]).await.unwrap();

        let keep = std::collections::HashSet::from([a]);
        let removed = store.cleanup(&keep).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.has_object(a).await.unwrap());
        assert!(!store.has_object(b).await.unwrap());
    }
}
