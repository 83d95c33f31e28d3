//! Checkpoints for common stateful-operator scenarios.
//!
//! Each `write_*` function simulates a small query over fixed input batches
//! against a prepared [`CheckpointBuilder`] and commits every batch; the
//! matching `*_checkpoint` function does the same on a fresh temp-dir
//! builder. All scenarios use operator 0.

use super::builders::CheckpointBuilder;
use crate::datum::Datum;
use crate::schema::{DataType, Field, OperatorKind, SchemaDescriptor};
use crate::store::BackendKind;
use anyhow::Result;
use std::collections::BTreeMap;

/// Operator id every fixture writes.
pub const FIXTURE_OPERATOR: u64 = 0;

/// Input batches of the aggregation scenarios.
#[must_use]
pub fn aggregation_batches() -> Vec<Vec<i32>> {
    vec![(0..20).collect(), (20..40).collect(), vec![0]]
}

/// Per-group `(count, sum, max, min)` after `batch_id`, grouped by
/// `value % 10`.
#[must_use]
pub fn expected_aggregation(batch_id: usize) -> BTreeMap<i32, (i64, i64, i32, i32)> {
    let mut groups: BTreeMap<i32, (i64, i64, i32, i32)> = BTreeMap::new();
    for value in aggregation_batches().into_iter().take(batch_id + 1).flatten() {
        let entry = groups
            .entry(value % 10)
            .or_insert((0, 0, i32::MIN, i32::MAX));
        entry.0 += 1;
        entry.1 += i64::from(value);
        entry.2 = entry.2.max(value);
        entry.3 = entry.3.min(value);
    }
    groups
}

/// Grouped count/sum/max/min aggregation. Format v1 repeats the grouping
/// column at the head of each value.
///
/// # Errors
/// I/O failures.
pub fn write_aggregation(builder: &CheckpointBuilder, format_version: u8) -> Result<()> {
    let key = vec![Field::new("group", DataType::Int).required()];
    let mut value = vec![
        Field::new("count", DataType::Long),
        Field::new("sum", DataType::Long),
        Field::new("max", DataType::Int),
        Field::new("min", DataType::Int),
    ];
    if format_version == 1 {
        value.insert(0, Field::new("group", DataType::Int).required());
    }
    let descriptor = SchemaDescriptor::new(OperatorKind::Aggregation, key, value)
        .with_format_version(format_version);
    let mut writer = builder.operator(FIXTURE_OPERATOR, None, descriptor)?;

    for batch_id in 0..aggregation_batches().len() {
        let state: Vec<(Vec<Datum>, Vec<Datum>)> = expected_aggregation(batch_id)
            .into_iter()
            .map(|(group, (count, sum, max, min))| {
                let mut value: Vec<Datum> = vec![count.into(), sum.into(), max.into(), min.into()];
                if format_version == 1 {
                    value.insert(0, group.into());
                }
                (vec![group.into()], value)
            })
            .collect();
        let batch_id = u64::try_from(batch_id)?;
        writer.write_version(batch_id + 1, &state)?;
        builder.commit_batch(batch_id, 0)?;
    }
    Ok(())
}

/// # Errors
/// I/O failures.
pub fn aggregation_checkpoint(provider: BackendKind, format_version: u8) -> Result<CheckpointBuilder> {
    let builder = CheckpointBuilder::new()?.provider(provider);
    write_aggregation(&builder, format_version)?;
    Ok(builder)
}

/// Aggregation keyed by `(value % 3, "even" | "odd")`, holding a count.
///
/// # Errors
/// I/O failures.
pub fn composite_aggregation_checkpoint() -> Result<CheckpointBuilder> {
    let builder = CheckpointBuilder::new()?;
    let descriptor = SchemaDescriptor::new(
        OperatorKind::Aggregation,
        vec![
            Field::new("remainder", DataType::Int).required(),
            Field::new("parity", DataType::String).required(),
        ],
        vec![Field::new("count", DataType::Long)],
    );
    let mut writer = builder.operator(FIXTURE_OPERATOR, None, descriptor)?;
    let mut counts: BTreeMap<(i32, &str), i64> = BTreeMap::new();
    for (batch_id, batch) in aggregation_batches().into_iter().enumerate() {
        for value in batch {
            let parity = if value % 2 == 0 { "even" } else { "odd" };
            *counts.entry((value % 3, parity)).or_default() += 1;
        }
        let state: Vec<(Vec<Datum>, Vec<Datum>)> = counts
            .iter()
            .map(|(&(rem, parity), &count)| (vec![rem.into(), parity.into()], vec![count.into()]))
            .collect();
        let batch_id = u64::try_from(batch_id)?;
        writer.write_version(batch_id + 1, &state)?;
        builder.commit_batch(batch_id, 0)?;
    }
    Ok(builder)
}

/// Plain dedup on `(user, event_id)` with an empty value.
///
/// Batch 0 keeps `alice/1` and `bob/1`; batch 1 adds `alice/2` and
/// `carol/7`.
///
/// # Errors
/// I/O failures.
pub fn dedup_checkpoint() -> Result<CheckpointBuilder> {
    let builder = CheckpointBuilder::new()?;
    let descriptor = SchemaDescriptor::new(
        OperatorKind::Dedup,
        vec![
            Field::new("user", DataType::String),
            Field::new("event_id", DataType::Int),
        ],
        Vec::new(),
    );
    let mut writer = builder.operator(FIXTURE_OPERATOR, None, descriptor)?;
    let batches: [&[(&str, i32)]; 2] = [
        &[("alice", 1), ("bob", 1), ("alice", 1)],
        &[("alice", 2), ("bob", 1), ("carol", 7)],
    ];
    let mut seen = std::collections::BTreeSet::new();
    for (batch_id, batch) in batches.iter().enumerate() {
        seen.extend(batch.iter().copied());
        let state: Vec<(Vec<Datum>, Vec<Datum>)> = seen
            .iter()
            .map(|&(user, id)| (vec![user.into(), id.into()], Vec::new()))
            .collect();
        let batch_id = u64::try_from(batch_id)?;
        writer.write_version(batch_id + 1, &state)?;
        builder.commit_batch(batch_id, 0)?;
    }
    Ok(builder)
}

/// Event-time delay of the watermark dedup scenario.
pub const DEDUP_DELAY_MS: i64 = 5_000;

/// Input `(id, event_time_ms)` and batch watermark of the watermark dedup
/// scenario, per batch.
#[must_use]
pub fn dedup_within_watermark_batches() -> Vec<(Vec<(&'static str, i64)>, i64)> {
    vec![
        (vec![("a", 1_000), ("b", 2_000), ("c", 3_000)], 0),
        (vec![("d", 20_000)], 10_000),
        (vec![("e", 30_000), ("d", 31_000)], 20_000),
    ]
}

/// Dedup within watermark. Each id expires `DEDUP_DELAY_MS` after its event
/// time and is evicted once the batch watermark reaches that point, so the
/// final batch holds `d` and `e` only.
///
/// # Errors
/// I/O failures.
pub fn dedup_within_watermark_checkpoint() -> Result<CheckpointBuilder> {
    let builder = CheckpointBuilder::new()?;
    let descriptor = SchemaDescriptor::new(
        OperatorKind::DedupWithinWatermark,
        vec![Field::new("id", DataType::String).required()],
        vec![Field::new("expires_at_ms", DataType::Long).required()],
    );
    let mut writer = builder.operator(FIXTURE_OPERATOR, None, descriptor)?;
    let mut expiry: BTreeMap<&str, i64> = BTreeMap::new();
    for (batch_id, (events, watermark)) in dedup_within_watermark_batches().into_iter().enumerate() {
        expiry.retain(|_, expires| *expires > watermark);
        for (id, ts) in events {
            expiry.entry(id).or_insert(ts + DEDUP_DELAY_MS);
        }
        let state: Vec<(Vec<Datum>, Vec<Datum>)> = expiry
            .iter()
            .map(|(&id, &expires)| (vec![id.into()], vec![expires.into()]))
            .collect();
        let batch_id = u64::try_from(batch_id)?;
        writer.write_version(batch_id + 1, &state)?;
        builder.commit_batch(batch_id, watermark)?;
    }
    Ok(builder)
}

/// Session windows per user with a 10 second gap, counting events.
///
/// After batch 0: alice `[1000, 15000)` x2 and bob `[2000, 12000)` x1.
/// Batch 1 adds alice `[40000, 50000)` x1.
///
/// # Errors
/// I/O failures.
pub fn session_window_checkpoint() -> Result<CheckpointBuilder> {
    let builder = CheckpointBuilder::new()?;
    let descriptor = SchemaDescriptor::new(
        OperatorKind::SessionWindow,
        vec![
            Field::new("user", DataType::String).required(),
            Field::new("session_start", DataType::Long).required(),
            Field::new("session_end", DataType::Long).required(),
        ],
        vec![Field::new("count", DataType::Long)],
    );
    let mut writer = builder
        .operator(FIXTURE_OPERATOR, None, descriptor)?
        .routing(vec![0]);
    let session = |user: &str, start: i64, end: i64, count: i64| -> (Vec<Datum>, Vec<Datum>) {
        (
            vec![user.into(), start.into(), end.into()],
            vec![count.into()],
        )
    };
    let mut state = vec![
        session("alice", 1_000, 15_000, 2),
        session("bob", 2_000, 12_000, 1),
    ];
    writer.write_version(1, &state)?;
    builder.commit_batch(0, 0)?;
    state.push(session("alice", 40_000, 50_000, 1));
    writer.write_version(2, &state)?;
    builder.commit_batch(1, 0)?;
    Ok(builder)
}

/// Per-user visit tracking with timeouts.
///
/// After batch 0: alice `{visits 2, last_page "/home"}` timing out at 60000,
/// bob `{1, "/cart"}` at 61000. In batch 1 bob times out and alice moves to
/// `{3, "/checkout"}` at 120000. Format v1 stores the user fields flat next
/// to the timeout; v2 nests them under `group_state`.
///
/// # Errors
/// I/O failures.
pub fn arbitrary_state_checkpoint(format_version: u8) -> Result<CheckpointBuilder> {
    let builder = CheckpointBuilder::new()?;
    let user_fields = vec![
        Field::new("visits", DataType::Long),
        Field::new("last_page", DataType::String),
    ];
    let timeout = Field::new("timeout_timestamp", DataType::Long);
    let value_schema = if format_version == 1 {
        let mut fields = user_fields;
        fields.push(timeout);
        fields
    } else {
        vec![
            Field::new("group_state", DataType::Struct(user_fields)),
            timeout,
        ]
    };
    let descriptor = SchemaDescriptor::new(
        OperatorKind::ArbitraryState,
        vec![Field::new("user", DataType::String).required()],
        value_schema,
    )
    .with_format_version(format_version);
    let mut writer = builder.operator(FIXTURE_OPERATOR, None, descriptor)?;

    let entry = |user: &str, visits: i64, page: &str, timeout_ms: i64| -> (Vec<Datum>, Vec<Datum>) {
        let value = if format_version == 1 {
            vec![visits.into(), page.into(), timeout_ms.into()]
        } else {
            vec![
                Datum::Struct(vec![visits.into(), page.into()]),
                timeout_ms.into(),
            ]
        };
        (vec![user.into()], value)
    };
    writer.write_version(
        1,
        &[
            entry("alice", 2, "/home", 60_000),
            entry("bob", 1, "/cart", 61_000),
        ],
    )?;
    builder.commit_batch(0, 0)?;
    writer.write_version(2, &[entry("alice", 3, "/checkout", 120_000)])?;
    builder.commit_batch(1, 62_000)?;
    Ok(builder)
}

/// One buffered join input row: `(id, payload, matched)`.
pub type JoinInput = (i32, &'static str, bool);

/// Buffered rows of each join side after each batch.
#[must_use]
pub fn stream_join_batches() -> Vec<(Vec<JoinInput>, Vec<JoinInput>)> {
    vec![
        (
            vec![(1, "l1a", true), (1, "l1b", true), (2, "l2", false)],
            vec![(1, "r1", true), (3, "r3", false)],
        ),
        (
            vec![
                (1, "l1a", true),
                (1, "l1b", true),
                (2, "l2", false),
                (3, "l3", true),
            ],
            vec![(1, "r1", true), (3, "r3", true)],
        ),
    ]
}

/// Inner stream-stream join on `id`, format v2, with all four stores.
///
/// # Errors
/// I/O failures.
pub fn stream_join_checkpoint() -> Result<CheckpointBuilder> {
    let builder = CheckpointBuilder::new()?;
    let join_key = vec![Field::new("id", DataType::Int).required()];
    let mut writers = Vec::new();
    for (side, payload) in [("left", "left_value"), ("right", "right_value")] {
        let counts = SchemaDescriptor::new(
            OperatorKind::StreamJoin,
            join_key.clone(),
            vec![Field::new("count", DataType::Long).required()],
        );
        let mut indexed_key = join_key.clone();
        indexed_key.push(Field::new("index", DataType::Long).required());
        let values = SchemaDescriptor::new(
            OperatorKind::StreamJoin,
            indexed_key,
            vec![
                Field::new("id", DataType::Int),
                Field::new(payload, DataType::String),
                Field::new("matched", DataType::Bool).required(),
            ],
        );
        let counts_store = format!("{side}-keyToNumValues");
        let values_store = format!("{side}-keyWithIndexToValue");
        writers.push((
            builder.operator(FIXTURE_OPERATOR, Some(&counts_store), counts)?,
            builder
                .operator(FIXTURE_OPERATOR, Some(&values_store), values)?
                .routing(vec![0]),
        ));
    }

    for (batch_id, (left, right)) in stream_join_batches().into_iter().enumerate() {
        let version = u64::try_from(batch_id)? + 1;
        for ((counts_writer, values_writer), rows) in writers.iter_mut().zip([left, right]) {
            let mut counts: BTreeMap<i32, i64> = BTreeMap::new();
            let mut values: Vec<(Vec<Datum>, Vec<Datum>)> = Vec::new();
            for (id, payload, matched) in rows {
                let index = counts.entry(id).or_default();
                values.push((
                    vec![id.into(), (*index).into()],
                    vec![id.into(), payload.into(), matched.into()],
                ));
                *index += 1;
            }
            let counts: Vec<(Vec<Datum>, Vec<Datum>)> = counts
                .into_iter()
                .map(|(id, n)| (vec![id.into()], vec![n.into()]))
                .collect();
            counts_writer.write_version(version, &counts)?;
            values_writer.write_version(version, &values)?;
        }
        builder.commit_batch(version - 1, 0)?;
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_groups_match_hand_computed_totals() {
        let groups = expected_aggregation(2);
        assert_eq!(groups.len(), 10);
        assert_eq!(groups[&0], (5, 60, 30, 0));
        assert_eq!(groups[&3], (4, 72, 33, 3));
        assert_eq!(expected_aggregation(0)[&0], (2, 10, 10, 0));
    }

    #[test]
    fn join_batches_keep_side_order() {
        let batches = stream_join_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].0.len(), 4);
        assert!(batches[1].1.iter().all(|(_, _, matched)| *matched));
    }
}
