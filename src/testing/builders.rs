//! Builders that write checkpoints in the layout the reader consumes.
//!
//! [`CheckpointBuilder`] owns a checkpoint root (a temp dir by default) and
//! writes log entries, schema descriptors and state files. For state content
//! the usual entry point is [`CheckpointBuilder::operator`], which returns an
//! [`OperatorWriter`]: hand it the complete state of an operator at each
//! version and it routes entries to partitions with the engine's hash
//! partitioner and emits the files the configured provider would have
//! written (full snapshots, or changelogs plus periodic base snapshots).

use crate::checkpoint::{
    CODEC_CONF, LOG_VERSION, NUM_PARTITIONS_CONF, OffsetMetadata, PROVIDER_CONF,
};
use crate::datum::Datum;
use crate::io::compression::{codec_by_name, wrap_writer};
use crate::router::route;
use crate::schema::{SchemaDescriptor, SchemaRegistry};
use crate::store::record::{Record, RecordWriter};
use crate::store::{BackendKind, FileKind, state_file_path};
use anyhow::{Context, Result, anyhow};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Partition count of checkpoints built for tests.
pub const DEFAULT_TEST_PARTITIONS: u32 = 5;

/// Writes a checkpoint directory.
///
/// # Example
///
/// ```
/// use ironstate::testing::CheckpointBuilder;
/// use ironstate::store::BackendKind;
///
/// # fn main() -> anyhow::Result<()> {
/// let ckpt = CheckpointBuilder::new()?
///     .provider(BackendKind::Changelog)
///     .codec("gzip")
///     .num_partitions(3);
/// ckpt.commit_batch(0, 0)?;
/// assert!(ckpt.path().join("commits").join("0").is_file());
/// # Ok(())
/// # }
/// ```
pub struct CheckpointBuilder {
    root: PathBuf,
    conf: BTreeMap<String, String>,
    num_partitions: u32,
    snapshot_interval: u64,
    _dir: Option<TempDir>,
}

impl CheckpointBuilder {
    /// A checkpoint in a fresh temp dir, removed when the builder drops.
    ///
    /// # Errors
    /// Fails if the temp dir cannot be created.
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create checkpoint temp dir")?;
        let mut builder = Self::at(dir.path())?;
        builder._dir = Some(dir);
        Ok(builder)
    }

    /// A checkpoint rooted at `root`, which is created if needed.
    ///
    /// # Errors
    /// Fails if `root` cannot be created.
    pub fn at(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;
        let mut conf = BTreeMap::new();
        conf.insert(PROVIDER_CONF.to_string(), BackendKind::Snapshot.tag().to_string());
        conf.insert(
            NUM_PARTITIONS_CONF.to_string(),
            DEFAULT_TEST_PARTITIONS.to_string(),
        );
        Ok(Self {
            root,
            conf,
            num_partitions: DEFAULT_TEST_PARTITIONS,
            snapshot_interval: 2,
            _dir: None,
        })
    }

    #[must_use]
    pub fn provider(mut self, kind: BackendKind) -> Self {
        self.conf
            .insert(PROVIDER_CONF.to_string(), kind.tag().to_string());
        self
    }

    /// Compress state files with the named codec.
    #[must_use]
    pub fn codec(mut self, name: &str) -> Self {
        self.conf.insert(CODEC_CONF.to_string(), name.to_string());
        self
    }

    #[must_use]
    pub fn num_partitions(mut self, n: u32) -> Self {
        self.num_partitions = n;
        self.conf
            .insert(NUM_PARTITIONS_CONF.to_string(), n.to_string());
        self
    }

    /// Changelog provider only: also write a base snapshot every `n` versions.
    #[must_use]
    pub fn snapshot_interval(mut self, n: u64) -> Self {
        self.snapshot_interval = n.max(1);
        self
    }

    /// Set (or, with `None`, remove) a raw offset-log conf entry.
    #[must_use]
    pub fn conf(mut self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.conf.insert(key.to_string(), v.to_string()),
            None => self.conf.remove(key),
        };
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn partitions(&self) -> u32 {
        self.num_partitions
    }

    /// Provider the offset log will name; unknown tags count as snapshot.
    #[must_use]
    pub fn provider_kind(&self) -> BackendKind {
        self.conf
            .get(PROVIDER_CONF)
            .and_then(|t| BackendKind::from_tag(t))
            .unwrap_or(BackendKind::Snapshot)
    }

    /// Write the offset-log entry of a batch.
    ///
    /// # Errors
    /// I/O failures.
    pub fn write_offset(&self, batch_id: u64, watermark_ms: i64) -> Result<()> {
        let meta = OffsetMetadata {
            batch_watermark_ms: watermark_ms,
            batch_timestamp_ms: 1_700_000_000_000 + i64::try_from(batch_id)? * 1_000,
            conf: self.conf.clone(),
        };
        let body = format!("{LOG_VERSION}\n{}\n", serde_json::to_string(&meta)?);
        self.write_log("offsets", batch_id, &body)
    }

    /// Write the commit-log entry of a batch.
    ///
    /// # Errors
    /// I/O failures.
    pub fn write_commit(&self, batch_id: u64) -> Result<()> {
        self.write_log("commits", batch_id, &format!("{LOG_VERSION}\n{{}}\n"))
    }

    /// Write both log entries, making the batch committed.
    ///
    /// # Errors
    /// I/O failures.
    pub fn commit_batch(&self, batch_id: u64, watermark_ms: i64) -> Result<()> {
        self.write_offset(batch_id, watermark_ms)?;
        self.write_commit(batch_id)
    }

    fn write_log(&self, log: &str, batch_id: u64, body: &str) -> Result<()> {
        let dir = self.root.join(log);
        fs::create_dir_all(&dir)?;
        let path = dir.join(batch_id.to_string());
        fs::write(&path, body).with_context(|| format!("write {}", path.display()))
    }

    #[must_use]
    pub fn store_dir(&self, operator_id: u64, partition_id: u32, store: Option<&str>) -> PathBuf {
        let mut dir = self
            .root
            .join("state")
            .join(operator_id.to_string())
            .join(partition_id.to_string());
        if let Some(store) = store {
            dir.push(store);
        }
        dir
    }

    /// Write one partition's schema descriptor.
    ///
    /// # Errors
    /// I/O or serialization failures.
    pub fn write_schema(
        &self,
        operator_id: u64,
        partition_id: u32,
        store: Option<&str>,
        descriptor: &SchemaDescriptor,
    ) -> Result<()> {
        self.write_raw_schema(
            operator_id,
            partition_id,
            store,
            &serde_json::to_vec_pretty(descriptor)?,
        )
    }

    /// Write arbitrary bytes where a schema descriptor belongs.
    ///
    /// # Errors
    /// I/O failures.
    pub fn write_raw_schema(
        &self,
        operator_id: u64,
        partition_id: u32,
        store: Option<&str>,
        bytes: &[u8],
    ) -> Result<()> {
        let path = SchemaRegistry::descriptor_path(&self.root, operator_id, partition_id, store);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))
    }

    /// Write one snapshot or changelog file, compressed with the configured
    /// codec.
    ///
    /// # Errors
    /// I/O failures or an unknown codec.
    pub fn write_state_file(
        &self,
        operator_id: u64,
        partition_id: u32,
        store: Option<&str>,
        version: u64,
        kind: FileKind,
        records: &[Record],
    ) -> Result<PathBuf> {
        let dir = self.store_dir(operator_id, partition_id, store);
        fs::create_dir_all(&dir)?;
        let path = state_file_path(&dir, version, kind);
        let codec_name = self.conf.get(CODEC_CONF).map_or("none", String::as_str);
        let codec = codec_by_name(codec_name).map_err(|n| anyhow!("unknown codec `{n}`"))?;
        let file = File::create(&path).with_context(|| format!("create {}", path.display()))?;
        let mut writer = RecordWriter::new(wrap_writer(file, codec.as_ref())?);
        for record in records {
            match record {
                Record::Put { key, value } => writer.put(key, value)?,
                Record::Delete { key } => writer.delete(key)?,
            }
        }
        // Dropping the codec writer writes its trailer.
        drop(writer.finish()?);
        Ok(path)
    }

    /// Start writing an operator's state: writes `descriptor` for every
    /// partition and returns a writer for the state versions.
    ///
    /// # Errors
    /// I/O failures.
    pub fn operator(
        &self,
        operator_id: u64,
        store: Option<&str>,
        descriptor: SchemaDescriptor,
    ) -> Result<OperatorWriter<'_>> {
        for partition_id in 0..self.num_partitions {
            self.write_schema(operator_id, partition_id, store, &descriptor)?;
        }
        let routing = (0..descriptor.key_schema.len()).collect();
        Ok(OperatorWriter {
            builder: self,
            operator_id,
            store: store.map(str::to_owned),
            descriptor,
            routing,
            current: vec![BTreeMap::new(); self.num_partitions as usize],
        })
    }
}

/// Writes successive full-state versions of one operator store.
pub struct OperatorWriter<'a> {
    builder: &'a CheckpointBuilder,
    operator_id: u64,
    store: Option<String>,
    descriptor: SchemaDescriptor,
    routing: Vec<usize>,
    current: Vec<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl OperatorWriter<'_> {
    /// Key positions hashed for partitioning; all key columns by default.
    #[must_use]
    pub fn routing(mut self, key_positions: Vec<usize>) -> Self {
        self.routing = key_positions;
        self
    }

    /// Partition a raw key lands in.
    ///
    /// # Errors
    /// Fails if a routing position is outside the key.
    pub fn partition_of(&self, key: &[Datum]) -> Result<u32> {
        let cols = self
            .routing
            .iter()
            .map(|&i| key.get(i))
            .collect::<Option<Vec<&Datum>>>()
            .context("routing position outside key")?;
        Ok(route(&cols, self.builder.num_partitions).unsigned_abs())
    }

    /// Write the complete state at `version`.
    ///
    /// Snapshot providers get one `<version>.snapshot` per partition. Changelog
    /// providers get a `<version>.changelog` holding the difference from the
    /// previous version, plus a base snapshot on every snapshot interval.
    ///
    /// # Errors
    /// Encoding or I/O failures.
    pub fn write_version(&mut self, version: u64, state: &[(Vec<Datum>, Vec<Datum>)]) -> Result<()> {
        let serializer = self.descriptor.serializer;
        let mut next = vec![BTreeMap::new(); self.current.len()];
        for (key, value) in state {
            let partition = self.partition_of(key)? as usize;
            next[partition].insert(serializer.encode(key)?, serializer.encode(value)?);
        }

        let kind = self.builder.provider_kind();
        for (partition, (prev, next)) in self.current.iter().zip(&next).enumerate() {
            let partition_id = u32::try_from(partition)?;
            if kind == BackendKind::Changelog {
                let changes = diff(prev, next);
                self.write(partition_id, version, FileKind::Changelog, &changes)?;
            }
            if kind == BackendKind::Snapshot || version % self.builder.snapshot_interval == 0 {
                let image: Vec<Record> = next
                    .iter()
                    .map(|(k, v)| Record::Put {
                        key: k.clone(),
                        value: v.clone(),
                    })
                    .collect();
                self.write(partition_id, version, FileKind::Snapshot, &image)?;
            }
        }
        self.current = next;
        Ok(())
    }

    fn write(&self, partition_id: u32, version: u64, kind: FileKind, records: &[Record]) -> Result<()> {
        self.builder.write_state_file(
            self.operator_id,
            partition_id,
            self.store.as_deref(),
            version,
            kind,
            records,
        )?;
        Ok(())
    }
}

/// Changelog records turning `prev` into `next`.
fn diff(prev: &BTreeMap<Vec<u8>, Vec<u8>>, next: &BTreeMap<Vec<u8>, Vec<u8>>) -> Vec<Record> {
    let deletes = prev
        .keys()
        .filter(|k| !next.contains_key(*k))
        .map(|k| Record::Delete { key: k.clone() });
    let puts = next
        .iter()
        .filter(|(k, v)| prev.get(*k) != Some(*v))
        .map(|(k, v)| Record::Put {
            key: k.clone(),
            value: v.clone(),
        });
    deletes.chain(puts).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_emits_deletes_then_changed_puts() {
        let prev = BTreeMap::from([
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
        ]);
        let next = BTreeMap::from([
            (b"b".to_vec(), b"3".to_vec()),
            (b"c".to_vec(), b"4".to_vec()),
        ]);
        let records = diff(&prev, &next);
        assert_eq!(
            records,
            vec![
                Record::Delete { key: b"a".to_vec() },
                Record::Put {
                    key: b"b".to_vec(),
                    value: b"3".to_vec()
                },
                Record::Put {
                    key: b"c".to_vec(),
                    value: b"4".to_vec()
                },
            ]
        );
    }

    #[test]
    fn unchanged_state_has_empty_diff() {
        let state = BTreeMap::from([(b"k".to_vec(), b"v".to_vec())]);
        assert!(diff(&state, &state).is_empty());
    }
}
