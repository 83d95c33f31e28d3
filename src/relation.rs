//! Assembles per-partition rows into one batch relation.
//!
//! [`StateRelation::open`] does all validation up front: options, logs,
//! committed batch, every partition's schema descriptor, and the mapper
//! shape. Only then can partitions be read. Each partition is read
//! independently at the same immutable version, so collecting in parallel
//! yields exactly the rows of a sequential collect, in the same order
//! (partition 0 first).

use crate::checkpoint::{CheckpointResolver, ResolvedQuery};
use crate::datum::{Datum, StructValue};
use crate::error::{Result, StateError};
use crate::mapper::{MappedRow, RowSource};
use crate::options::{ExecMode, ReadMode, ReaderConfig, StateReadOptions};
use crate::router::PartitionRouter;
use crate::schema::{Field, SchemaRegistry};
use crate::store::{BackendKind, PartitionStoreReader};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the optional partition metadata column.
pub const PARTITION_ID_COLUMN: &str = "_partition_id";

/// One output row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Row {
    pub key: StructValue,
    pub value: StructValue,
    /// Set only when the partition column is projected.
    pub partition_id: Option<i32>,
}

/// Output columns of a relation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationSchema {
    pub key: Vec<Field>,
    pub value: Vec<Field>,
    pub partition_id: bool,
}

impl RelationSchema {
    /// Top-level column names: `key`, `value` and, if projected, `_partition_id`.
    #[must_use]
    pub fn column_names(&self) -> Vec<&'static str> {
        let mut cols = vec!["key", "value"];
        if self.partition_id {
            cols.push(PARTITION_ID_COLUMN);
        }
        cols
    }
}

/// A finite relation over one operator's state at one committed batch.
#[derive(Clone)]
pub struct StateRelation {
    query: Arc<ResolvedQuery>,
    source: RowSource,
    reader: PartitionStoreReader,
    config: ReaderConfig,
    project_partition_id: bool,
}

impl StateRelation {
    /// Resolve and validate a query with the default reader configuration.
    ///
    /// # Errors
    /// Any option, checkpoint or schema error; no partition data is read.
    pub fn open(options: &StateReadOptions) -> Result<Self> {
        Self::open_with_config(options, ReaderConfig::default())
    }

    /// Resolve and validate a query.
    ///
    /// # Errors
    /// Any option, checkpoint or schema error; no partition data is read.
    pub fn open_with_config(options: &StateReadOptions, config: ReaderConfig) -> Result<Self> {
        let query = CheckpointResolver::resolve(options)?;
        let schemas = SchemaRegistry::load_all(&query)?;
        let source = RowSource::for_query(&query, &schemas)?;
        let reader = PartitionStoreReader::from_tags(
            query.checkpoint.root(),
            query.offset_metadata.provider(),
            query.offset_metadata.codec(),
        )?;
        info!(
            root = %query.checkpoint.root().display(),
            batch_id = query.batch_id,
            operator_id = query.operator_id,
            partitions = query.num_partitions,
            backend = reader.backend_kind().tag(),
            "opened state relation"
        );
        Ok(Self {
            query: Arc::new(query),
            source,
            reader,
            config,
            project_partition_id: false,
        })
    }

    /// Project the `_partition_id` metadata column.
    #[must_use]
    pub fn with_partition_id(mut self) -> Self {
        self.project_partition_id = true;
        self
    }

    #[must_use]
    pub fn schema(&self) -> RelationSchema {
        RelationSchema {
            key: self.source.key_fields().to_vec(),
            value: self.source.value_fields().to_vec(),
            partition_id: self.project_partition_id,
        }
    }

    #[must_use]
    pub fn query(&self) -> &ResolvedQuery {
        &self.query
    }

    #[must_use]
    pub fn batch_id(&self) -> u64 {
        self.query.batch_id
    }

    #[must_use]
    pub fn num_partitions(&self) -> u32 {
        self.query.num_partitions
    }

    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.reader.backend_kind()
    }

    /// Key columns the partition column hashes.
    #[must_use]
    pub fn routing_columns(&self) -> &[String] {
        self.source.routing_columns()
    }

    /// Consume the relation in the given mode.
    ///
    /// # Errors
    /// [`StateError::UnsupportedMode`] for [`ReadMode::Streaming`]; otherwise
    /// as [`Self::collect`].
    pub fn read(&self, mode: ReadMode) -> Result<Vec<Row>> {
        match mode {
            ReadMode::Batch => self.collect(),
            ReadMode::Streaming => Err(StateError::UnsupportedMode {
                message: "state relations are batch-only and cannot back a streaming source"
                    .into(),
            }),
        }
    }

    /// Read every partition.
    ///
    /// # Errors
    /// The first I/O or decode error of any partition.
    pub fn collect(&self) -> Result<Vec<Row>> {
        let n = self.query.num_partitions;
        let parts = match self.config.mode {
            ExecMode::Sequential => (0..n)
                .map(|p| self.collect_partition(p))
                .collect::<Result<Vec<_>>>()?,
            ExecMode::Parallel { threads } => self.collect_parallel(threads)?,
        };
        Ok(parts.into_iter().flatten().collect())
    }

    #[cfg(feature = "parallel")]
    fn collect_parallel(&self, threads: Option<usize>) -> Result<Vec<Vec<Row>>> {
        use rayon::prelude::*;
        let n = self.query.num_partitions;
        let threads = threads
            .unwrap_or_else(num_cpus::get)
            .clamp(1, usize::try_from(n).unwrap_or(usize::MAX).max(1));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(std::io::Error::other)?;
        debug!(threads, partitions = n, "collecting partitions in parallel");
        pool.install(|| {
            (0..n)
                .into_par_iter()
                .map(|p| self.collect_partition(p))
                .collect()
        })
    }

    #[cfg(not(feature = "parallel"))]
    fn collect_parallel(&self, _threads: Option<usize>) -> Result<Vec<Vec<Row>>> {
        (0..self.query.num_partitions)
            .map(|p| self.collect_partition(p))
            .collect()
    }

    /// Read one partition.
    ///
    /// # Errors
    /// [`StateError::InvalidOption`] for an out-of-range partition; I/O and
    /// decode errors otherwise.
    pub fn collect_partition(&self, partition_id: u32) -> Result<Vec<Row>> {
        if partition_id >= self.query.num_partitions {
            return Err(StateError::invalid_option(
                "partition_id",
                format!(
                    "partition {partition_id} out of range (operator has {})",
                    self.query.num_partitions
                ),
            ));
        }
        let mapped = self
            .source
            .read_partition(&self.query, &self.reader, partition_id)?;
        debug!(partition_id, rows = mapped.len(), "read partition");
        let router = self
            .project_partition_id
            .then(|| PartitionRouter::new(self.query.num_partitions));
        mapped
            .into_iter()
            .map(|row| self.to_row(row, router.as_ref()))
            .collect()
    }

    fn to_row(&self, row: MappedRow, router: Option<&PartitionRouter>) -> Result<Row> {
        let partition_id = match router {
            None => None,
            Some(router) => {
                let columns = self
                    .source
                    .routing_columns()
                    .iter()
                    .map(|c| {
                        row.key.get(c).ok_or_else(|| {
                            StateError::decode(format!("routing column `{c}` missing from key"))
                        })
                    })
                    .collect::<Result<Vec<&Datum>>>()?;
                Some(router.route(&columns))
            }
        };
        Ok(Row {
            key: row.key,
            value: row.value,
            partition_id,
        })
    }

    /// SHA-256 over the sorted row set; equal for equal relations.
    ///
    /// # Errors
    /// As [`Self::collect`].
    pub fn fingerprint(&self) -> Result<String> {
        let mut rows = self.collect()?;
        rows.sort();
        let mut hasher = Sha256::new();
        for row in &rows {
            let bytes = postcard::to_allocvec(row)
                .map_err(|e| StateError::decode(format!("encode row: {e}")))?;
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(&bytes);
        }
        Ok(hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect())
    }
}
