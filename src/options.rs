//! Query options and reader configuration.
//!
//! [`StateReadOptions`] carries the raw, user-supplied options exactly as
//! given; nothing is validated until the resolver runs. Keeping `join_side`
//! as a string lets the resolver reject unknown values with a precise
//! [`StateError::InvalidOption`](crate::StateError::InvalidOption).

use std::fmt;
use std::path::PathBuf;

/// Store name that addresses an operator's default (unnamed) store.
pub const DEFAULT_STORE_NAME: &str = "default";

/// Options for one state read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateReadOptions {
    /// Checkpoint root directory.
    pub path: PathBuf,
    /// Batch to read; latest committed batch when `None`.
    pub batch_id: Option<i64>,
    /// Stateful operator to read; operator 0 when `None`.
    pub operator_id: Option<i64>,
    /// Physical store to read, mutually exclusive with `join_side`.
    pub store_name: Option<String>,
    /// Logical join side (`left` or `right`), mutually exclusive with `store_name`.
    pub join_side: Option<String>,
    /// Surface fields that the operator only uses internally (e.g. dedup expiry).
    pub include_internal_fields: bool,
}

impl StateReadOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn batch_id(mut self, batch_id: i64) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    #[must_use]
    pub fn operator_id(mut self, operator_id: i64) -> Self {
        self.operator_id = Some(operator_id);
        self
    }

    #[must_use]
    pub fn store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn join_side(mut self, side: impl Into<String>) -> Self {
        self.join_side = Some(side.into());
        self
    }

    #[must_use]
    pub fn include_internal_fields(mut self, include: bool) -> Self {
        self.include_internal_fields = include;
        self
    }
}

/// One side of a stream-stream join.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinSide {
    Left,
    Right,
}

impl JoinSide {
    /// Parse the exact option spelling (`left` / `right`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for JoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which store(s) of an operator a query reads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StoreSelector {
    /// The operator's default store.
    Default,
    /// A physical store by name, read with its raw schema.
    Store(String),
    /// A logical join side composed from two physical stores.
    JoinSide(JoinSide),
}

/// How partitions are read when a relation is collected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    /// One partition after another on the calling thread.
    Sequential,
    /// Partitions fanned out over a rayon pool.
    /// `threads: None` sizes the pool by CPU count, capped at the partition count.
    Parallel { threads: Option<usize> },
}

/// How a relation is consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadMode {
    /// One-shot read of a fixed version.
    Batch,
    /// Continuous consumption; always rejected.
    Streaming,
}

/// Reader configuration that is not part of the query itself.
#[derive(Clone, Copy, Debug)]
pub struct ReaderConfig {
    pub mode: ExecMode,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            mode: ExecMode::Parallel { threads: None },
        }
    }
}
