//! Full-snapshot backend: each version is one self-contained image.

use super::{
    BackendKind, FileKind, KvIter, KvPair, PartitionSnapshot, StateStoreBackend, StoreFile,
    snapshot_pair, state_file_path,
};
use crate::error::Result;
use crate::io::compression::CompressionCodec;
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Reads `<version>.snapshot` directly.
pub struct SnapshotBackend;

impl StateStoreBackend for SnapshotBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Snapshot
    }

    fn locate(
        &self,
        store_dir: &Path,
        partition_id: u32,
        version: u64,
        codec: Option<Arc<dyn CompressionCodec>>,
    ) -> Result<PartitionSnapshot> {
        let mut files = Vec::new();
        if version > 0 {
            let path = state_file_path(store_dir, version, FileKind::Snapshot);
            if !path.is_file() {
                return Err(io::Error::new(
                    ErrorKind::NotFound,
                    format!("missing snapshot {}", path.display()),
                )
                .into());
            }
            files.push(StoreFile {
                version,
                kind: FileKind::Snapshot,
                path,
            });
        }
        debug!(partition_id, version, store_dir = %store_dir.display(), "located snapshot");
        Ok(PartitionSnapshot {
            partition_id,
            version,
            backend: BackendKind::Snapshot,
            store_dir: store_dir.to_path_buf(),
            files,
            codec,
        })
    }

    fn scan(&self, snapshot: &PartitionSnapshot) -> Result<KvIter> {
        let Some(file) = snapshot.files.first() else {
            return Ok(Box::new(std::iter::empty::<Result<KvPair>>()));
        };
        let records = snapshot.records(file)?;
        Ok(Box::new(records.map(snapshot_pair)))
    }
}
