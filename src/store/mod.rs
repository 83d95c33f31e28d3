//! Partition store readers.
//!
//! A store is one operator's key-value state for one partition (and, for
//! joins, one named sub-store). Two backends can produce the same logical
//! content for a version:
//!
//! - [`snapshot::SnapshotBackend`]: every version is a complete
//!   `<version>.snapshot` image.
//! - [`changelog::ChangelogBackend`]: occasional `<version>.snapshot` base
//!   images plus one `<version>.changelog` per version, replayed in order.
//!
//! The backend is chosen once per query from the `state.provider` tag in the
//! offset log. Both expose the same contract: [`StateStoreBackend::locate`]
//! resolves which files make up a version (no data read), and
//! [`StateStoreBackend::scan`] returns a lazy, finite iterator of key/value
//! byte pairs. `scan` may be called any number of times on the same
//! [`PartitionSnapshot`]; each call reopens the files and yields the same
//! pairs in the same order. File handles live inside the iterator and are
//! released when it is exhausted or dropped.

pub mod changelog;
pub mod record;
pub mod snapshot;

use crate::error::{Result, StateError};
use crate::io::compression::{CompressionCodec, codec_by_name, wrap_reader};
use record::{Record, RecordReader};
use regex::Regex;
use std::fmt;
use std::fs::{File, read_dir};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::warn;

/// A raw key/value pair as stored.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Lazy iterator of raw pairs for one store version.
pub type KvIter = Box<dyn Iterator<Item = Result<KvPair>> + Send>;

static STATE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(snapshot|changelog)$").expect("valid state file pattern")
});

/// Storage strategy of a checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Snapshot,
    Changelog,
}

impl BackendKind {
    /// Parse the `state.provider` tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "snapshot" => Some(Self::Snapshot),
            "changelog" => Some(Self::Changelog),
            _ => None,
        }
    }

    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Changelog => "changelog",
        }
    }
}

/// Kind of a file inside a store directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileKind {
    Snapshot,
    Changelog,
}

impl FileKind {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Changelog => "changelog",
        }
    }
}

/// One state file and the version it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreFile {
    pub version: u64,
    pub kind: FileKind,
    pub path: PathBuf,
}

/// Path of a state file for `version` in `store_dir`.
#[must_use]
pub fn state_file_path(store_dir: &Path, version: u64, kind: FileKind) -> PathBuf {
    store_dir.join(format!("{version}.{}", kind.extension()))
}

/// List the snapshot and changelog files of a store directory, sorted by
/// version then kind. A missing directory lists as empty.
///
/// # Errors
/// Propagates directory read failures other than "not found".
pub fn list_state_files(store_dir: &Path) -> io::Result<Vec<StoreFile>> {
    let entries = match read_dir(store_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let Some(caps) = STATE_FILE.captures(&name) else {
            continue;
        };
        let Ok(version) = caps[1].parse::<u64>() else {
            continue;
        };
        let kind = if &caps[2] == "snapshot" {
            FileKind::Snapshot
        } else {
            FileKind::Changelog
        };
        files.push(StoreFile {
            version,
            kind,
            path: entry.path(),
        });
    }
    files.sort_by(|a, b| a.version.cmp(&b.version).then(a.kind.cmp(&b.kind)));
    Ok(files)
}

/// The files making up one version of one partition's store.
#[derive(Clone)]
pub struct PartitionSnapshot {
    pub partition_id: u32,
    pub version: u64,
    pub backend: BackendKind,
    pub store_dir: PathBuf,
    /// Base image first, then changelogs in replay order.
    pub files: Vec<StoreFile>,
    pub codec: Option<Arc<dyn CompressionCodec>>,
}

impl fmt::Debug for PartitionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionSnapshot")
            .field("partition_id", &self.partition_id)
            .field("version", &self.version)
            .field("backend", &self.backend)
            .field("store_dir", &self.store_dir)
            .field("files", &self.files)
            .field("codec", &self.codec.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

impl PartitionSnapshot {
    /// Open one file of this snapshot as a record stream.
    pub(crate) fn records(&self, file: &StoreFile) -> Result<RecordReader<Box<dyn io::Read + Send>>> {
        let handle = File::open(&file.path)?;
        Ok(RecordReader::new(wrap_reader(handle, self.codec.as_ref())?))
    }
}

/// A storage strategy able to reconstruct one version of a store.
pub trait StateStoreBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Resolve the files that make up `version`. Version 0 is the empty store.
    ///
    /// # Errors
    /// I/O errors (including `NotFound` for a missing file) surface as-is.
    fn locate(
        &self,
        store_dir: &Path,
        partition_id: u32,
        version: u64,
        codec: Option<Arc<dyn CompressionCodec>>,
    ) -> Result<PartitionSnapshot>;

    /// Iterate the key/value pairs of a located snapshot.
    ///
    /// # Errors
    /// I/O errors surface as-is, either here or from the iterator.
    fn scan(&self, snapshot: &PartitionSnapshot) -> Result<KvIter>;
}

/// Build the backend for a provider kind.
#[must_use]
pub fn backend_for(kind: BackendKind) -> Arc<dyn StateStoreBackend> {
    match kind {
        BackendKind::Snapshot => Arc::new(snapshot::SnapshotBackend),
        BackendKind::Changelog => Arc::new(changelog::ChangelogBackend),
    }
}

/// Opens partition stores with a backend and codec fixed for the whole query.
#[derive(Clone)]
pub struct PartitionStoreReader {
    backend: Arc<dyn StateStoreBackend>,
    codec: Option<Arc<dyn CompressionCodec>>,
}

impl PartitionStoreReader {
    pub fn new(backend: Arc<dyn StateStoreBackend>, codec: Option<Arc<dyn CompressionCodec>>) -> Self {
        Self { backend, codec }
    }

    /// Build a reader from the provider and codec tags of the offset log.
    ///
    /// # Errors
    /// [`StateError::InvalidCheckpoint`] for an unknown provider or codec.
    pub fn from_tags(root: &Path, provider: &str, codec: &str) -> Result<Self> {
        let kind = BackendKind::from_tag(provider).ok_or_else(|| {
            StateError::invalid_checkpoint(root, format!("unknown state provider `{provider}`"))
        })?;
        let codec = codec_by_name(codec).map_err(|name| {
            StateError::invalid_checkpoint(root, format!("unknown compression codec `{name}`"))
        })?;
        Ok(Self::new(backend_for(kind), codec))
    }

    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Locate the files of one partition store at `version`.
    ///
    /// # Errors
    /// I/O errors surface as-is.
    pub fn open(&self, store_dir: &Path, partition_id: u32, version: u64) -> Result<PartitionSnapshot> {
        if version > 0 && list_state_files(store_dir)?.is_empty() {
            warn!(
                partition_id,
                version,
                store_dir = %store_dir.display(),
                "partition store has a schema but no state files"
            );
        }
        self.backend
            .locate(store_dir, partition_id, version, self.codec.clone())
    }

    /// Iterate a located snapshot.
    ///
    /// # Errors
    /// I/O errors surface as-is.
    pub fn scan(&self, snapshot: &PartitionSnapshot) -> Result<KvIter> {
        self.backend.scan(snapshot)
    }
}

/// Map a snapshot-file record to a pair; deletes are not allowed in images.
fn snapshot_pair(record: io::Result<Record>) -> Result<KvPair> {
    match record? {
        Record::Put { key, value } => Ok((key, value)),
        Record::Delete { .. } => Err(io::Error::new(
            ErrorKind::InvalidData,
            "delete record in snapshot file",
        )
        .into()),
    }
}
