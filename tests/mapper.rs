//! Row shapes at the edges: missing join slots, format v1 joins, bad bytes.

use anyhow::Result;
use ironstate::store::FileKind;
use ironstate::store::record::Record;
use ironstate::testing::{CheckpointBuilder, FIXTURE_OPERATOR};
use ironstate::{
    DataType, Datum, Field, OperatorKind, SchemaDescriptor, Serializer, StateError,
    StateReadOptions, StateRelation,
};
use std::time::{Duration, Instant};

fn join_descriptors(format_version: u8) -> (SchemaDescriptor, SchemaDescriptor) {
    let key = vec![Field::new("k", DataType::String).required()];
    let counts = SchemaDescriptor::new(
        OperatorKind::StreamJoin,
        key.clone(),
        vec![Field::new("count", DataType::Long)],
    )
    .with_format_version(format_version);
    let mut indexed = key;
    indexed.push(Field::new("index", DataType::Long));
    let mut row = vec![Field::new("k", DataType::String), Field::new("v", DataType::Double)];
    if format_version == 2 {
        row.push(Field::new("matched", DataType::Bool));
    }
    let values = SchemaDescriptor::new(OperatorKind::StreamJoin, indexed, row)
        .with_format_version(format_version);
    (counts, values)
}

#[test]
fn test_join_side_skips_missing_slots() -> Result<()> {
    let ckpt = CheckpointBuilder::new()?.num_partitions(2);
    let (counts, values) = join_descriptors(2);
    let mut counts = ckpt.operator(FIXTURE_OPERATOR, Some("right-keyToNumValues"), counts)?;
    let mut values = ckpt
        .operator(FIXTURE_OPERATOR, Some("right-keyWithIndexToValue"), values)?
        .routing(vec![0]);

    // "x" claims three slots but slot 1 was evicted; "y" has a count but no rows.
    counts.write_version(
        1,
        &[
            (vec!["x".into()], vec![3i64.into()]),
            (vec!["y".into()], vec![1i64.into()]),
        ],
    )?;
    let row = |index: i64, v: f64| {
        (
            vec![Datum::from("x"), Datum::Long(index)],
            vec![Datum::from("x"), Datum::double(v), Datum::Bool(false)],
        )
    };
    values.write_version(1, &[row(0, 0.5), row(2, 2.5), row(7, 9.9)])?;
    ckpt.commit_batch(0, 0)?;

    let rows = StateRelation::open(&StateReadOptions::new(ckpt.path()).join_side("right"))?
        .collect()?;
    let vs: Vec<_> = rows.iter().filter_map(|r| r.value.get("v").cloned()).collect();
    // Slot 7 lies beyond the count and is not part of the side.
    assert_eq!(vs, vec![Datum::double(0.5), Datum::double(2.5)]);
    Ok(())
}

#[test]
fn test_join_side_cost_follows_stored_slots_not_count() -> Result<()> {
    let ckpt = CheckpointBuilder::new()?.num_partitions(1);
    let (counts, values) = join_descriptors(2);
    let mut counts = ckpt.operator(FIXTURE_OPERATOR, Some("left-keyToNumValues"), counts)?;
    let mut values = ckpt.operator(FIXTURE_OPERATOR, Some("left-keyWithIndexToValue"), values)?;
    counts.write_version(
        1,
        &[
            (vec!["a".into()], vec![2_000_000_000i64.into()]),
            (vec!["b".into()], vec![(-4i64).into()]),
        ],
    )?;
    values.write_version(
        1,
        &[
            (
                vec![Datum::from("a"), Datum::Long(1_999_999_999)],
                vec![Datum::from("a"), Datum::double(1.0), Datum::Bool(true)],
            ),
            (
                vec![Datum::from("b"), Datum::Long(0)],
                vec![Datum::from("b"), Datum::double(2.0), Datum::Bool(false)],
            ),
        ],
    )?;
    ckpt.commit_batch(0, 0)?;

    let started = Instant::now();
    let rows = StateRelation::open(&StateReadOptions::new(ckpt.path()).join_side("left"))?
        .collect()?;
    assert!(started.elapsed() < Duration::from_secs(5));
    // A non-positive count exposes nothing.
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key.get("k"), Some(&Datum::from("a")));
    Ok(())
}

#[test]
fn test_format_v1_join_has_no_matched_flag() -> Result<()> {
    let ckpt = CheckpointBuilder::new()?.num_partitions(1);
    let (counts, values) = join_descriptors(1);
    let mut counts = ckpt.operator(FIXTURE_OPERATOR, Some("left-keyToNumValues"), counts)?;
    let mut values = ckpt.operator(FIXTURE_OPERATOR, Some("left-keyWithIndexToValue"), values)?;
    counts.write_version(1, &[(vec!["a".into()], vec![1i64.into()])])?;
    values.write_version(
        1,
        &[(
            vec![Datum::from("a"), Datum::Long(0)],
            vec![Datum::from("a"), Datum::double(1.0)],
        )],
    )?;
    ckpt.commit_batch(0, 0)?;

    let relation = StateRelation::open(&StateReadOptions::new(ckpt.path()).join_side("left"))?;
    assert_eq!(relation.schema().value.len(), 2);
    assert_eq!(relation.collect()?.len(), 1);
    Ok(())
}

#[test]
fn test_v2_join_without_matched_flag_is_corrupt() -> Result<()> {
    let ckpt = CheckpointBuilder::new()?.num_partitions(1);
    let (counts, _) = join_descriptors(2);
    let (_, values_v1_shape) = join_descriptors(1);
    ckpt.operator(FIXTURE_OPERATOR, Some("left-keyToNumValues"), counts)?;
    ckpt.operator(
        FIXTURE_OPERATOR,
        Some("left-keyWithIndexToValue"),
        values_v1_shape.with_format_version(2),
    )?;
    ckpt.commit_batch(0, 0)?;
    let err = StateRelation::open(&StateReadOptions::new(ckpt.path()).join_side("left")).err();
    assert!(matches!(err, Some(StateError::CorruptSchema { .. })));
    Ok(())
}

#[test]
fn test_value_not_matching_schema_is_decode_error() -> Result<()> {
    let ckpt = CheckpointBuilder::new()?.num_partitions(1);
    let desc = SchemaDescriptor::new(
        OperatorKind::Aggregation,
        vec![Field::new("k", DataType::Int)],
        vec![Field::new("count", DataType::Long)],
    );
    ckpt.write_schema(FIXTURE_OPERATOR, 0, None, &desc)?;
    let key = Serializer::Postcard.encode(&[Datum::Int(1)])?;
    let bad_value = Serializer::Postcard.encode(&[Datum::from("not a count")])?;
    ckpt.write_state_file(
        FIXTURE_OPERATOR,
        0,
        None,
        1,
        FileKind::Snapshot,
        &[Record::Put {
            key,
            value: bad_value,
        }],
    )?;
    ckpt.commit_batch(0, 0)?;

    // Opening succeeds; the bad entry only shows up when data is read.
    let relation = StateRelation::open(&StateReadOptions::new(ckpt.path()))?;
    let err = relation.collect().unwrap_err();
    assert!(matches!(err, StateError::Decode { .. }), "{err}");
    Ok(())
}

#[test]
fn test_json_serialized_store() -> Result<()> {
    let ckpt = CheckpointBuilder::new()?.num_partitions(3);
    let desc = SchemaDescriptor::new(
        OperatorKind::Aggregation,
        vec![Field::new("word", DataType::String)],
        vec![
            Field::new("count", DataType::Long),
            Field::new("ratio", DataType::Double),
            Field::new("last", DataType::String),
        ],
    )
    .with_serializer(Serializer::Json);
    let mut writer = ckpt.operator(FIXTURE_OPERATOR, None, desc)?;
    writer.write_version(
        1,
        &[
            (
                vec!["hello".into()],
                vec![2i64.into(), Datum::double(0.25), Datum::Null],
            ),
            (
                vec!["world".into()],
                vec![1i64.into(), Datum::double(0.75), "x".into()],
            ),
        ],
    )?;
    ckpt.commit_batch(0, 0)?;

    let rows = StateRelation::open(&StateReadOptions::new(ckpt.path()))?.collect()?;
    assert_eq!(rows.len(), 2);
    let hello = rows
        .iter()
        .find(|r| r.key.get("word") == Some(&Datum::from("hello")))
        .expect("hello");
    assert!(hello.value.get("last").is_some_and(Datum::is_null));
    assert_eq!(hello.value.get("ratio"), Some(&Datum::double(0.25)));
    Ok(())
}
