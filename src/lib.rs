//! # Ironstate
//!
//! Read the operator state of a streaming query's checkpoint as an ordinary,
//! finite **batch relation**, for debugging, auditing and correctness tests.
//!
//! ## Key Features
//!
//! - **Point-in-time reads** - any committed batch, latest by default
//! - **Every stateful operator** - aggregation, session windows, dedup (plain
//!   and watermark-bounded), arbitrary per-key state, stream-stream joins
//! - **Both state providers** - full snapshots, or changelogs replayed over
//!   periodic base snapshots; results are identical
//! - **Pluggable compression** - gzip, zstd, bzip2 and xz behind feature flags
//! - **Partition metadata** - an optional `_partition_id` column computed
//!   with the engine's own hash partitioner
//! - **Sequential and parallel execution** - partitions are independent
//!
//! ## Quick Start
//!
//! ```no_run
//! use ironstate::{StateReadOptions, StateRelation};
//!
//! # fn main() -> ironstate::Result<()> {
//! let options = StateReadOptions::new("/checkpoints/orders")
//!     .operator_id(0)
//!     .batch_id(41);
//! let relation = StateRelation::open(&options)?.with_partition_id();
//! for row in relation.collect()? {
//!     println!("{:?} -> {:?} @ {:?}", row.key, row.value, row.partition_id);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Checkpoints
//!
//! A checkpoint directory holds an offset log and a commit log (one entry per
//! micro-batch) and a `state/` tree. Only batches present in both logs are
//! readable. Batch `b` observes state version `b + 1`.
//!
//! ### Stores and providers
//!
//! Each operator keeps one store per partition (join operators keep four).
//! The [`store`] module reconstructs a store at a version from either
//! provider's files and yields raw key/value pairs.
//!
//! ### Mapping
//!
//! The [`mapper`] module turns raw pairs into `key`/`value` structs shaped for
//! the operator kind named in the store's schema descriptor. Join sides are
//! assembled from two physical stores.
//!
//! ### Relations
//!
//! [`StateRelation`] validates everything up front in
//! [`StateRelation::open`], then reads partitions on demand. Reads are
//! restartable and deterministic; a relation can also be hashed with
//! [`StateRelation::fingerprint`] to compare two reads.
//!
//! ## Errors
//!
//! All fallible operations return [`StateError`]. Option and checkpoint
//! problems surface from `open` before any partition data is read.

pub mod checkpoint;
pub mod datum;
pub mod error;
pub mod io;
pub mod mapper;
pub mod options;
pub mod relation;
pub mod router;
pub mod schema;
pub mod store;
pub mod testing;

// General re-exports
pub use checkpoint::{CheckpointMetadata, CheckpointResolver, OffsetMetadata, ResolvedQuery};
pub use datum::{Datum, Serializer, StructValue};
pub use error::{Result, StateError};
pub use options::{
    DEFAULT_STORE_NAME, ExecMode, JoinSide, ReadMode, ReaderConfig, StateReadOptions,
    StoreSelector,
};
pub use relation::{PARTITION_ID_COLUMN, RelationSchema, Row, StateRelation};
pub use router::PartitionRouter;
pub use schema::{DataType, Field, FormatVersion, OperatorKind, SchemaDescriptor, StateSchema};
pub use store::BackendKind;
