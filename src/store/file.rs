use super::{CommitReceipt, MemoryStore, NetworkStore, StoreMeta, Tables, WriteBatch};
use crate::error::StoreError;
use crate::network::{Joint, JointId, Node, NodeId};
use geo_types::Rect;
use log::debug;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write as _};
use std::path::{Path, PathBuf};

/// A [`MemoryStore`] persisted as one JSON document.
/// Each commit writes a sibling temp file and renames it over the original.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Open an existing state file, or start empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let inner = if path.exists() {
            let file = File::open(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            let tables: Tables = serde_json::from_reader(BufReader::new(file))?;
            MemoryStore::from_tables(tables)?
        } else {
            MemoryStore::new()
        };
        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &StoreMeta {
        self.inner.meta()
    }

    pub fn set_meta(&mut self, meta: StoreMeta) -> Result<(), StoreError> {
        let mut next = self.inner.clone();
        next.set_meta(meta);
        self.persist(&next)?;
        self.inner = next;
        Ok(())
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    fn persist(&self, store: &MemoryStore) -> Result<(), StoreError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { path, source }
        };
        let tmp = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp).map_err(io_err(&tmp))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &store.snapshot())?;
            writer.flush().map_err(io_err(&tmp))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(io_err(&tmp))?;
        }
        fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;
        debug!("persisted network state to {}", self.path.display());
        Ok(())
    }
}

impl NetworkStore for JsonFileStore {
    fn read_all(&self) -> Result<Tables, StoreError> {
        self.inner.read_all()
    }

    fn read_region(&self, region: Rect<f64>) -> Result<Tables, StoreError> {
        self.inner.read_region(region)
    }

    fn nodes_by_id(&self, ids: &BTreeSet<NodeId>) -> Result<Vec<Node>, StoreError> {
        self.inner.nodes_by_id(ids)
    }

    fn joints_by_id(&self, ids: &BTreeSet<JointId>) -> Result<Vec<Joint>, StoreError> {
        self.inner.joints_by_id(ids)
    }

    fn prepare(&mut self, tables: Tables) -> Result<(), StoreError> {
        let mut next = self.inner.clone();
        next.prepare(tables)?;
        self.persist(&next)?;
        self.inner = next;
        Ok(())
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<CommitReceipt, StoreError> {
        let mut next = self.inner.clone();
        let receipt = next.commit(batch)?;
        self.persist(&next)?;
        self.inner = next;
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::fixtures::NetworkFixture;
    use crate::network::{LineId, RecordKey};
    use crate::store::Write;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gridkit-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn commits_survive_reopening() {
        let path = scratch_path("reopen");
        let _ = fs::remove_file(&path);

        let mut fx = NetworkFixture::new();
        fx.line(&[(0.0, 0.0), (10.0, 0.0)]);
        fx.line(&[(20.0, 0.0), (30.0, 0.0)]);
        let mut store = JsonFileStore::open(&path).unwrap();
        store.prepare(fx.tables()).unwrap();
        store
            .commit(WriteBatch {
                writes: vec![Write::Delete(RecordKey::Line(LineId(2)))],
            })
            .unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        let tables = reopened.read_all().unwrap();
        assert_eq!(tables.lines.len(), 1);
        assert_eq!(tables.nodes.len(), 4);
        assert!(reopened.meta().last_commit.is_some());
        assert!(!path.with_extension("json.tmp").exists());
        let _ = fs::remove_file(&path);
    }
}
