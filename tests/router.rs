//! The partition router must agree bit for bit with the engine's shuffle.

use anyhow::Result;
use ironstate::router::{HASH_SEED, hash_bytes, hash_datum, hash_int, hash_long, route};
use ironstate::store::BackendKind;
use ironstate::testing::{aggregation_checkpoint, stream_join_checkpoint};
use ironstate::{Datum, PartitionRouter, StateReadOptions, StateRelation};

#[test]
fn test_known_murmur3_values() {
    assert_eq!(hash_int(1, HASH_SEED) as i32, -559_580_957);
    assert_eq!(hash_long(1, HASH_SEED) as i32, -1_712_319_331);
    assert_eq!(hash_bytes(b"Spark", HASH_SEED) as i32, 228_093_765);
    assert_eq!(hash_bytes(b"a", HASH_SEED) as i32, 1_485_273_170);
    assert_eq!(hash_bytes(b"abc", HASH_SEED) as i32, 1_322_437_556);
}

#[test]
fn test_int_and_long_keys_route_differently() {
    let ints: Vec<i32> = (0..10).map(|k| route(&[&Datum::Int(k)], 5)).collect();
    assert_eq!(ints, vec![1, 3, 4, 1, 2, 1, 4, 2, 3, 4]);
    let longs: Vec<i32> = (0..10).map(|k| route(&[&Datum::Long(k)], 5)).collect();
    assert_eq!(longs, vec![0, 4, 3, 2, 0, 3, 0, 1, 1, 4]);
}

#[test]
fn test_datum_hashing_rules() {
    assert_eq!(hash_datum(&Datum::Null, 7), 7);
    assert_eq!(hash_datum(&Datum::Bool(true), HASH_SEED), hash_int(1, HASH_SEED));
    assert_eq!(
        hash_datum(&Datum::double(-0.0), HASH_SEED),
        hash_datum(&Datum::double(0.0), HASH_SEED)
    );
    let signalling_nan = f64::from_bits(0x7ff0_0000_0000_0001);
    let negative_nan = f64::from_bits(0xfff8_0000_0000_0000);
    for nan in [f64::NAN, signalling_nan, negative_nan] {
        assert_eq!(
            hash_datum(&Datum::double(nan), HASH_SEED),
            hash_long(0x7ff8_0000_0000_0000, HASH_SEED)
        );
    }
    assert_eq!(
        hash_datum(&Datum::double(1.5), HASH_SEED),
        hash_long(1.5f64.to_bits() as i64, HASH_SEED)
    );
    // Columns fold left to right, each hash seeding the next.
    let folded = hash_datum(&Datum::Int(2), hash_datum(&Datum::from("x"), HASH_SEED));
    assert_eq!(
        hash_datum(&Datum::Struct(vec![Datum::from("x"), Datum::Int(2)]), HASH_SEED),
        folded
    );
    let router = PartitionRouter::new(7);
    assert_eq!(
        router.route(&[&Datum::from("x"), &Datum::Int(2)]),
        (folded as i32).rem_euclid(7)
    );
}

#[test]
fn test_route_is_never_negative() {
    for k in -500..500 {
        let p = route(&[&Datum::Long(k * 7919)], 13);
        assert!((0..13).contains(&p));
    }
}

#[test]
fn test_partition_column_matches_physical_partition() -> Result<()> {
    let ckpt = aggregation_checkpoint(BackendKind::Snapshot, 2)?;
    let relation = StateRelation::open(&StateReadOptions::new(ckpt.path()))?.with_partition_id();
    assert_eq!(relation.routing_columns(), &["group".to_string()]);
    for p in 0..relation.num_partitions() {
        for row in relation.collect_partition(p)? {
            assert_eq!(row.partition_id, Some(p as i32));
        }
    }
    // Keys 0..9 hash to partitions 1,3,4,1,2,1,4,2,3,4: partition 0 is empty.
    assert!(relation.collect_partition(0)?.is_empty());
    assert_eq!(relation.collect_partition(1)?.len(), 3);
    Ok(())
}

#[test]
fn test_join_routes_on_join_key_only() -> Result<()> {
    let ckpt = stream_join_checkpoint()?;
    for options in [
        StateReadOptions::new(ckpt.path()).join_side("left"),
        StateReadOptions::new(ckpt.path()).store_name("left-keyWithIndexToValue"),
    ] {
        let relation = StateRelation::open(&options)?.with_partition_id();
        assert_eq!(relation.routing_columns(), &["id".to_string()]);
        for p in 0..relation.num_partitions() {
            for row in relation.collect_partition(p)? {
                assert_eq!(row.partition_id, Some(p as i32));
            }
        }
    }
    Ok(())
}
