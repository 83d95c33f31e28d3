//! Testing utilities for state readers.
//!
//! This module writes real checkpoints on disk so tests exercise the same
//! code paths as production reads:
//!
//! - **Builders**: [`CheckpointBuilder`] writes log entries, schema
//!   descriptors and snapshot/changelog files; [`OperatorWriter`] turns
//!   successive full-state versions into the files a provider would write.
//! - **Fixtures**: ready-made scenarios (aggregation, dedup, session windows,
//!   arbitrary state, stream-stream join) with their expected contents.
//!
//! # Quick Start
//!
//! ```no_run
//! use ironstate::testing::*;
//! use ironstate::{StateReadOptions, StateRelation};
//! use ironstate::store::BackendKind;
//!
//! # fn main() -> anyhow::Result<()> {
//! let ckpt = aggregation_checkpoint(BackendKind::Snapshot, 2)?;
//! let rows = StateRelation::open(&StateReadOptions::new(ckpt.path()))?.collect()?;
//! assert_eq!(rows.len(), 10);
//! # Ok(())
//! # }
//! ```

use crate::datum::Datum;
use crate::relation::Row;

pub mod builders;
pub mod fixtures;

pub use builders::*;
pub use fixtures::*;

/// The row whose key columns equal `key`, in order.
#[must_use]
pub fn row_for_key<'a>(rows: &'a [Row], key: &[Datum]) -> Option<&'a Row> {
    rows.iter().find(|row| row.key.values().eq(key.iter()))
}

/// Values of one top-level column of each row, in row order.
///
/// `column` is looked up in the key first, then in the value.
#[must_use]
pub fn column(rows: &[Row], column: &str) -> Vec<Datum> {
    rows.iter()
        .filter_map(|row| row.key.get(column).or_else(|| row.value.get(column)))
        .cloned()
        .collect()
}
