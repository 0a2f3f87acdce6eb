//! On-disk content-addressed object store: one gzip-compressed, bincode-encoded file per
//! object, named by its hex id — the loose-object idiom the teacher's pack format uses,
//! adapted here from per-pack blobs to per-object files since this store has no delta
//! compression to batch (spec §4.3).

use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::task;

use crate::Result;
use crate::engine::Row;
use crate::errors::Error;
use crate::hash::ObjectHash;
use crate::model::ChangeRow;
use crate::objectstore::{ObjectStore, StoredObject};

pub struct FsObjectStore {
    root: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct OnDisk {
    object: StoredObject,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, object_id: ObjectHash) -> PathBuf {
        let hex = object_id.to_hex();
        // fan out into a two-character prefix directory, matching the teacher's loose
        // object layout, so a large store doesn't dump thousands of files in one dir.
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    async fn write_object(&self, object_id: ObjectHash, object: StoredObject) -> Result<()> {
        let path = self.path_for(object_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::engine(e.to_string(), "fs::create_dir_all"))?;
        }
        let encoded = task::spawn_blocking(move || encode_object(&object))
            .await
            .map_err(|e| Error::engine(e.to_string(), "spawn_blocking encode"))??;
        fs::write(&path, encoded)
            .await
            .map_err(|e| Error::engine(e.to_string(), "fs::write"))?;
        Ok(())
    }

    async fn read_object(&self, path: &Path) -> Result<StoredObject> {
        let bytes = fs::read(path)
            .await
            .map_err(|e| Error::ObjectCorruption(format!("cannot read {}: {e}", path.display())))?;
        task::spawn_blocking(move || decode_object(&bytes))
            .await
            .map_err(|e| Error::engine(e.to_string(), "spawn_blocking decode"))?
    }
}

fn encode_object(object: &StoredObject) -> Result<Vec<u8>> {
    let payload = bincode::serialize(&OnDisk { object: object.clone() })
        .map_err(|e| Error::ObjectCorruption(format!("encode failed: {e}")))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&payload)
        .map_err(|e| Error::ObjectCorruption(format!("compress failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::ObjectCorruption(format!("compress failed: {e}")))
}

fn decode_object(bytes: &[u8]) -> Result<StoredObject> {
    let mut decoder = GzDecoder::new(bytes);
    let mut payload = Vec::new();
    decoder
        .read_to_end(&mut payload)
        .map_err(|e| Error::ObjectCorruption(format!("decompress failed: {e}")))?;
    let on_disk: OnDisk =
        bincode::deserialize(&payload).map_err(|e| Error::ObjectCorruption(format!("decode failed: {e}")))?;
    Ok(on_disk.object)
}

#[async_trait::async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_snap(&self, object_id: ObjectHash, schema_bytes: Vec<u8>, rows: Vec<Row>) -> Result<()> {
        if self.has_object(object_id).await? {
            return Ok(());
        }
        self.write_object(object_id, StoredObject::Snap { schema_bytes, rows }).await
    }

    async fn put_diff(&self, object_id: ObjectHash, parent_id: ObjectHash, changes: Vec<ChangeRow>) -> Result<()> {
        if self.has_object(object_id).await? {
            return Ok(());
        }
        self.write_object(object_id, StoredObject::Diff { parent_id, changes }).await
    }

    async fn get_object(&self, object_id: ObjectHash) -> Result<StoredObject> {
        let path = self.path_for(object_id);
        self.read_object(&path).await
    }

    async fn has_object(&self, object_id: ObjectHash) -> Result<bool> {
        Ok(fs::metadata(self.path_for(object_id)).await.is_ok())
    }

    async fn cleanup(&self, keep: &HashSet<ObjectHash>) -> Result<usize> {
        let mut removed = 0;
        let mut dirs = fs::read_dir(&self.root)
            .await
            .map_err(|e| Error::engine(e.to_string(), "fs::read_dir"))?;
        while let Some(prefix_dir) = dirs
            .next_entry()
            .await
            .map_err(|e| Error::engine(e.to_string(), "fs::read_dir"))?
        {
            if !prefix_dir.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let mut files = fs::read_dir(prefix_dir.path())
                .await
                .map_err(|e| Error::engine(e.to_string(), "fs::read_dir"))?;
            while let Some(file) = files
                .next_entry()
                .await
                .map_err(|e| Error::engine(e.to_string(), "fs::read_dir"))?
            {
                let prefix = prefix_dir.file_name().to_string_lossy().to_string();
                let suffix = file.file_name().to_string_lossy().to_string();
                let Ok(id) = format!("{prefix}{suffix}").parse::<ObjectHash>() else {
                    continue;
                };
                if !keep.contains(&id) {
                    fs::remove_file(file.path())
                        .await
                        .map_err(|e| Error::engine(e.to_string(), "fs::remove_file"))?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn all_object_ids(&self) -> Result<Vec<ObjectHash>> {
        let mut ids = Vec::new();
        let mut dirs = fs::read_dir(&self.root)
            .await
            .map_err(|e| Error::engine(e.to_string(), "fs::read_dir"))?;
        while let Some(prefix_dir) = dirs
            .next_entry()
            .await
            .map_err(|e| Error::engine(e.to_string(), "fs::read_dir"))?
        {
            if !prefix_dir.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let mut files = fs::read_dir(prefix_dir.path())
                .await
                .map_err(|e| Error::engine(e.to_string(), "fs::read_dir"))?;
            while let Some(file) = files
                .next_entry()
                .await
                .map_err(|e| Error::engine(e.to_string(), "fs::read_dir"))?
            {
                let prefix = prefix_dir.file_name().to_string_lossy().to_string();
                let suffix = file.file_name().to_string_lossy().to_string();
                if let Ok(id) = format!("{prefix}{suffix}").parse::<ObjectHash>() {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn round_trips_a_snap_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let id = ObjectHash::compute(b"fruits-snap");
        let rows = vec![vec![("id".to_string(), json!(1))]];
        store.put_snap(id, vec![], rows.clone()).await.unwrap();

        assert!(store.has_object(id).await.unwrap());
        let StoredObject::Snap { rows: read_rows, .. } = store.get_object(id).await.unwrap() else {
            panic!("expected snap");
        };
        assert_eq!(read_rows, rows);
    }

    #[tokio::test]
    async fn cleanup_deletes_files_not_in_keep_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let a = ObjectHash::compute(b"a");
        let b = ObjectHash::compute(b"b");
        store.put_snap(a, vec![], vec![]).await.unwrap();
        store.put_snap(b, vec![], vec![]).await.unwrap();

        let removed = store.cleanup(&HashSet::from([a])).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.has_object(a).await.unwrap());
        assert!(!store.has_object(b).await.unwrap());
    }
}
