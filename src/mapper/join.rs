//! Logical join-side view over the two physical stores of one side.
//!
//! A stream-stream join keeps, per side:
//!
//! - `<side>-keyToNumValues`: join key -> `{count}`, the number of buffered
//!   input rows for the key;
//! - `<side>-keyWithIndexToValue`: (join key, `index`) -> buffered input row,
//!   followed in format v2 by a `matched` flag the join uses for outer-join
//!   housekeeping.
//!
//! The logical side walks the counts store and looks each `(key, 0..count)`
//! slot up in the values store, emitting `key = join key` and `value = input
//! row` with `matched` dropped. Slots the values store no longer holds are
//! skipped. The physical stores stay readable by name through
//! [`RawStoreMapper`](super::RawStoreMapper), `matched` included.

use super::{MappedRow, RawShape, names};
use crate::datum::{Datum, StructValue};
use crate::error::{Result, StateError};
use crate::schema::{DataType, Field, FormatVersion, StateSchema};
use crate::store::KvIter;
use std::collections::{BTreeMap, HashMap};

/// Trailing key field of `keyWithIndexToValue` stores.
pub const INDEX_FIELD: &str = "index";
/// Value field of `keyToNumValues` stores.
pub const COUNT_FIELD: &str = "count";
/// Internal match flag of format v2 `keyWithIndexToValue` values.
pub const MATCHED_FIELD: &str = "matched";

/// Composes one join side from its counts and values stores.
pub struct JoinSideMapper {
    counts: RawShape,
    values: RawShape,
    value_fields: Vec<Field>,
    matched: Option<usize>,
    routing: Vec<String>,
}

impl JoinSideMapper {
    /// Validate both store schemas against each other.
    ///
    /// # Errors
    /// A description of the first shape mismatch.
    pub fn new(
        key_to_num_values: &StateSchema,
        key_with_index_to_value: &StateSchema,
    ) -> std::result::Result<Self, String> {
        let counts = RawShape::of(key_to_num_values);
        let values = RawShape::of(key_with_index_to_value);

        match counts.value.as_slice() {
            [f] if f.name == COUNT_FIELD && matches!(f.data_type, DataType::Int | DataType::Long) => {}
            _ => return Err(format!("keyToNumValues values must be a single `{COUNT_FIELD}`")),
        }
        let Some((index, join_key)) = values.key.split_last() else {
            return Err("keyWithIndexToValue key schema is empty".into());
        };
        if index.name != INDEX_FIELD || index.data_type != DataType::Long {
            return Err(format!("keyWithIndexToValue keys must end with a long `{INDEX_FIELD}`"));
        }
        if join_key != counts.key.as_slice() {
            return Err("join key columns differ between keyToNumValues and keyWithIndexToValue".into());
        }

        let matched = match key_with_index_to_value.format_version() {
            FormatVersion::V1 => None,
            FormatVersion::V2 => match values.value.last() {
                Some(f) if f.name == MATCHED_FIELD && f.data_type == DataType::Bool => {
                    Some(values.value.len() - 1)
                }
                _ => {
                    return Err(format!(
                        "format v2 keyWithIndexToValue values must end with a bool `{MATCHED_FIELD}`"
                    ));
                }
            },
        };
        let value_fields = match matched {
            Some(idx) => values.value[..idx].to_vec(),
            None => values.value.clone(),
        };
        Ok(Self {
            routing: names(&counts.key),
            counts,
            values,
            value_fields,
            matched,
        })
    }

    #[must_use]
    pub fn key_fields(&self) -> &[Field] {
        &self.counts.key
    }

    #[must_use]
    pub fn value_fields(&self) -> &[Field] {
        &self.value_fields
    }

    #[must_use]
    pub fn routing_columns(&self) -> &[String] {
        &self.routing
    }

    /// Merge the two stores of one partition into logical rows.
    ///
    /// Rows follow the counts store order, then slot index.
    ///
    /// # Errors
    /// I/O errors from either iterator; [`StateError::Decode`] for entries
    /// that do not fit their schema.
    pub fn compose(&self, counts: KvIter, values: KvIter) -> Result<Vec<MappedRow>> {
        let mut slots: HashMap<Vec<Datum>, BTreeMap<i64, Vec<Datum>>> = HashMap::new();
        for pair in values {
            let (key, value) = pair?;
            let mut key_values = self.values.decode_key(&key)?;
            let index = key_values
                .pop()
                .and_then(|d| d.as_i64())
                .ok_or_else(|| StateError::decode("keyWithIndexToValue entry without index"))?;
            let mut row = self.values.decode_value(&value)?;
            if let Some(idx) = self.matched {
                row.truncate(idx);
            }
            slots.entry(key_values).or_default().insert(index, row);
        }

        let mut out = Vec::new();
        for pair in counts {
            let (key, value) = pair?;
            let key_values = self.counts.decode_key(&key)?;
            let count = self
                .counts
                .decode_value(&value)?
                .first()
                .and_then(Datum::as_i64)
                .ok_or_else(|| StateError::decode("keyToNumValues entry without count"))?;
            let Some(rows) = slots.get(&key_values) else {
                continue;
            };
            if count <= 0 {
                continue;
            }
            // Walk stored slots only; the count may be far above what is buffered.
            for row in rows.range(0..count).map(|(_, row)| row) {
                out.push(MappedRow {
                    key: StructValue::from_parts(&self.counts.key, key_values.clone()),
                    value: StructValue::from_parts(&self.value_fields, row.clone()),
                });
            }
        }
        Ok(out)
    }
}
