//! Checkpoint discovery and query resolution.
//!
//! A checkpoint root holds two per-batch logs and the operator state:
//!
//! ```text
//! <root>/offsets/<batchId>      batch planned (offset log)
//! <root>/commits/<batchId>      batch finished (commit log)
//! <root>/state/<operatorId>/<partitionId>/...
//! ```
//!
//! A batch is **committed** only when both logs contain it. Log entries are
//! text files whose first line is the log version (`v1`); the second line of
//! an offset entry is a JSON [`OffsetMetadata`] holding the configuration the
//! batch ran with (state provider, compression codec, partition count).
//!
//! [`CheckpointResolver::resolve`] validates options first (no I/O), then
//! reads the logs once and returns a [`ResolvedQuery`] that every later
//! stage consumes.

use crate::error::{Result, StateError};
use crate::options::{DEFAULT_STORE_NAME, JoinSide, StateReadOptions, StoreSelector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, read_dir};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Version marker on the first line of every log entry.
pub const LOG_VERSION: &str = "v1";
/// Offset-log conf key naming the state store provider.
pub const PROVIDER_CONF: &str = "state.provider";
/// Offset-log conf key naming the state file compression codec.
pub const CODEC_CONF: &str = "state.compression.codec";
/// Offset-log conf key holding the number of state partitions.
pub const NUM_PARTITIONS_CONF: &str = "state.num_partitions";

/// Per-batch metadata stored in the offset log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetMetadata {
    #[serde(default)]
    pub batch_watermark_ms: i64,
    #[serde(default)]
    pub batch_timestamp_ms: i64,
    #[serde(default)]
    pub conf: BTreeMap<String, String>,
}

impl OffsetMetadata {
    /// State provider tag; `snapshot` when unset.
    #[must_use]
    pub fn provider(&self) -> &str {
        self.conf.get(PROVIDER_CONF).map_or("snapshot", String::as_str)
    }

    /// Compression codec name; `none` when unset.
    #[must_use]
    pub fn codec(&self) -> &str {
        self.conf.get(CODEC_CONF).map_or("none", String::as_str)
    }
}

/// Committed-batch view of a checkpoint directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointMetadata {
    root: PathBuf,
    committed: Vec<u64>,
}

impl CheckpointMetadata {
    /// Read both logs under `root`.
    ///
    /// # Errors
    /// Returns [`StateError::InvalidCheckpoint`] if `root` is not a directory
    /// or either log directory is missing.
    pub fn load(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(StateError::invalid_checkpoint(root, "not a directory"));
        }
        let offsets = log_entries(root, "offsets")?;
        let commits = log_entries(root, "commits")?;
        let committed: Vec<u64> = offsets.intersection(&commits).copied().collect();
        debug!(
            root = %root.display(),
            offsets = offsets.len(),
            commits = commits.len(),
            committed = committed.len(),
            "scanned checkpoint logs"
        );
        Ok(Self {
            root: root.to_path_buf(),
            committed,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Committed batch ids in ascending order.
    #[must_use]
    pub fn committed_batches(&self) -> &[u64] {
        &self.committed
    }

    #[must_use]
    pub fn latest_committed(&self) -> Option<u64> {
        self.committed.last().copied()
    }

    #[must_use]
    pub fn is_committed(&self, batch_id: u64) -> bool {
        self.committed.binary_search(&batch_id).is_ok()
    }

    /// Parse the offset-log entry of `batch_id`.
    ///
    /// # Errors
    /// Returns [`StateError::InvalidCheckpoint`] if the entry is unreadable,
    /// has an unknown log version, or carries malformed metadata.
    pub fn offset_metadata(&self, batch_id: u64) -> Result<OffsetMetadata> {
        let path = self.root.join("offsets").join(batch_id.to_string());
        let text = fs::read_to_string(&path)
            .map_err(|e| StateError::invalid_checkpoint(&path, e.to_string()))?;
        let mut lines = text.lines();
        match lines.next() {
            Some(LOG_VERSION) => {}
            other => {
                return Err(StateError::invalid_checkpoint(
                    &path,
                    format!("unsupported offset log version {other:?}"),
                ));
            }
        }
        match lines.next().map(str::trim) {
            None | Some("") => Ok(OffsetMetadata::default()),
            Some(json) => serde_json::from_str(json).map_err(|e| {
                StateError::invalid_checkpoint(&path, format!("malformed offset metadata: {e}"))
            }),
        }
    }
}

/// Batch ids present in one log directory. Non-numeric names (temp and
/// checksum files) are ignored.
fn log_entries(root: &Path, log: &str) -> Result<BTreeSet<u64>> {
    let dir = root.join(log);
    if !dir.is_dir() {
        return Err(StateError::invalid_checkpoint(
            root,
            format!("missing `{log}` log"),
        ));
    }
    let entries = read_dir(&dir)
        .map_err(|e| StateError::invalid_checkpoint(&dir, e.to_string()))?
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse::<u64>().ok()))
        .collect();
    Ok(entries)
}

/// Everything later stages need, gathered once per query.
#[derive(Clone, Debug)]
pub struct ResolvedQuery {
    pub checkpoint: CheckpointMetadata,
    pub batch_id: u64,
    pub operator_id: u64,
    pub store_selector: StoreSelector,
    pub num_partitions: u32,
    pub offset_metadata: OffsetMetadata,
    pub include_internal_fields: bool,
}

impl ResolvedQuery {
    /// Store version holding the state as of the end of `batch_id`.
    #[must_use]
    pub const fn state_version(&self) -> u64 {
        self.batch_id + 1
    }

    #[must_use]
    pub fn operator_dir(&self) -> PathBuf {
        self.checkpoint
            .root()
            .join("state")
            .join(self.operator_id.to_string())
    }

    /// Directory of one physical store of one partition.
    #[must_use]
    pub fn store_dir(&self, partition_id: u32, store: Option<&str>) -> PathBuf {
        let mut dir = self.operator_dir().join(partition_id.to_string());
        if let Some(store) = store {
            dir.push(store);
        }
        dir
    }
}

/// Options that passed validation, before the checkpoint is touched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedOptions {
    pub path: PathBuf,
    pub batch_id: Option<u64>,
    pub operator_id: u64,
    pub store_selector: StoreSelector,
    pub include_internal_fields: bool,
}

/// Validates options and resolves them against a checkpoint.
pub struct CheckpointResolver;

impl CheckpointResolver {
    /// Validate options without any filesystem access.
    ///
    /// # Errors
    /// [`StateError::ConflictingOption`] when both `store_name` and
    /// `join_side` are set (checked first, regardless of their values), and
    /// [`StateError::InvalidOption`] for an empty path, negative ids, an empty
    /// store name or an unknown join side.
    pub fn validate(options: &StateReadOptions) -> Result<ValidatedOptions> {
        if options.store_name.is_some() && options.join_side.is_some() {
            return Err(StateError::ConflictingOption {
                first: "store_name",
                second: "join_side",
            });
        }
        if options.path.as_os_str().is_empty() {
            return Err(StateError::invalid_option("path", "path is required"));
        }
        let batch_id = options
            .batch_id
            .map(|id| {
                u64::try_from(id).map_err(|_| {
                    StateError::invalid_option("batch_id", format!("must be >= 0, got {id}"))
                })
            })
            .transpose()?;
        let operator_id = match options.operator_id {
            None => 0,
            Some(id) => u64::try_from(id).map_err(|_| {
                StateError::invalid_option("operator_id", format!("must be >= 0, got {id}"))
            })?,
        };
        let store_selector = match (&options.store_name, &options.join_side) {
            (Some(name), _) if name.trim().is_empty() => {
                return Err(StateError::invalid_option("store_name", "must not be empty"));
            }
            (Some(name), _) if name == DEFAULT_STORE_NAME => StoreSelector::Default,
            (Some(name), _) => StoreSelector::Store(name.clone()),
            (None, Some(side)) => StoreSelector::JoinSide(JoinSide::parse(side).ok_or_else(
                || {
                    StateError::invalid_option(
                        "join_side",
                        format!("expected `left` or `right`, got `{side}`"),
                    )
                },
            )?),
            (None, None) => StoreSelector::Default,
        };
        Ok(ValidatedOptions {
            path: options.path.clone(),
            batch_id,
            operator_id,
            store_selector,
            include_internal_fields: options.include_internal_fields,
        })
    }

    /// Validate options and resolve batch, operator and partition count.
    ///
    /// # Errors
    /// Any error of [`Self::validate`]; [`StateError::InvalidCheckpoint`] for a
    /// missing log, a checkpoint without committed batches, or a missing
    /// operator; [`StateError::InvalidOption`] for an uncommitted `batch_id`.
    pub fn resolve(options: &StateReadOptions) -> Result<ResolvedQuery> {
        let validated = Self::validate(options)?;
        let checkpoint = CheckpointMetadata::load(&validated.path)?;
        let Some(latest) = checkpoint.latest_committed() else {
            return Err(StateError::invalid_checkpoint(
                checkpoint.root(),
                "no committed batch",
            ));
        };
        let batch_id = match validated.batch_id {
            None => latest,
            Some(id) if checkpoint.is_committed(id) => id,
            Some(id) => {
                return Err(StateError::invalid_option(
                    "batch_id",
                    format!("batch {id} is not committed (latest committed is {latest})"),
                ));
            }
        };
        let offset_metadata = checkpoint.offset_metadata(batch_id)?;

        let operator_dir = checkpoint
            .root()
            .join("state")
            .join(validated.operator_id.to_string());
        if !operator_dir.is_dir() {
            return Err(StateError::invalid_checkpoint(
                checkpoint.root(),
                format!("no state for operator {}", validated.operator_id),
            ));
        }
        let num_partitions = num_partitions(&operator_dir, &offset_metadata)?;

        debug!(
            batch_id,
            operator_id = validated.operator_id,
            num_partitions,
            selector = ?validated.store_selector,
            "resolved state query"
        );
        Ok(ResolvedQuery {
            checkpoint,
            batch_id,
            operator_id: validated.operator_id,
            store_selector: validated.store_selector,
            num_partitions,
            offset_metadata,
            include_internal_fields: validated.include_internal_fields,
        })
    }
}

/// Partition count from the batch conf, else one past the highest numbered
/// partition directory, so a missing directory still counts as a partition.
fn num_partitions(operator_dir: &Path, meta: &OffsetMetadata) -> Result<u32> {
    if let Some(raw) = meta.conf.get(NUM_PARTITIONS_CONF) {
        return match raw.parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(StateError::invalid_checkpoint(
                operator_dir,
                format!("invalid {NUM_PARTITIONS_CONF} `{raw}`"),
            )),
        };
    }
    let max_partition = read_dir(operator_dir)?
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()))
        .max();
    let Some(max_partition) = max_partition else {
        return Err(StateError::invalid_checkpoint(
            operator_dir,
            "operator has no partition directories",
        ));
    };
    max_partition.checked_add(1).ok_or_else(|| {
        StateError::invalid_checkpoint(
            operator_dir,
            format!("partition directory {max_partition} is out of range"),
        )
    })
}
