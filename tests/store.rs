//! Snapshot and changelog backends, framing and compression.

use anyhow::Result;
use ironstate::store::record::Record;
use ironstate::store::{
    BackendKind, FileKind, KvPair, PartitionStoreReader, backend_for, list_state_files,
};
use ironstate::testing::{CheckpointBuilder, FIXTURE_OPERATOR, write_aggregation};
use ironstate::{StateError, StateReadOptions, StateRelation};
use std::collections::BTreeMap;
use std::fs;

fn put(key: &[u8], value: &[u8]) -> Record {
    Record::Put {
        key: key.to_vec(),
        value: value.to_vec(),
    }
}

fn delete(key: &[u8]) -> Record {
    Record::Delete { key: key.to_vec() }
}

fn scan_all(reader: &PartitionStoreReader, dir: &std::path::Path, version: u64) -> Result<Vec<KvPair>> {
    let snapshot = reader.open(dir, 0, version)?;
    Ok(reader.scan(&snapshot)?.collect::<ironstate::Result<Vec<_>>>()?)
}

#[test]
fn test_changelog_replay_applies_last_write_and_deletes() -> Result<()> {
    let ckpt = CheckpointBuilder::new()?
        .provider(BackendKind::Changelog)
        .num_partitions(1);
    let store = None;
    ckpt.write_state_file(0, 0, store, 2, FileKind::Snapshot, &[put(b"a", b"1"), put(b"b", b"1")])?;
    ckpt.write_state_file(0, 0, store, 1, FileKind::Changelog, &[put(b"z", b"0")])?;
    ckpt.write_state_file(0, 0, store, 3, FileKind::Changelog, &[
        put(b"a", b"2"),
        delete(b"b"),
        put(b"c", b"1"),
        put(b"a", b"3"),
    ])?;
    ckpt.write_state_file(0, 0, store, 4, FileKind::Changelog, &[delete(b"c"), put(b"b", b"4")])?;

    let reader = PartitionStoreReader::new(backend_for(BackendKind::Changelog), None);
    let dir = ckpt.store_dir(0, 0, None);

    assert_eq!(
        scan_all(&reader, &dir, 3)?,
        vec![(b"a".to_vec(), b"3".to_vec()), (b"c".to_vec(), b"1".to_vec())]
    );
    assert_eq!(
        scan_all(&reader, &dir, 4)?,
        vec![(b"a".to_vec(), b"3".to_vec()), (b"b".to_vec(), b"4".to_vec())]
    );
    // Version 1 has no base image at or below it and replays from empty.
    assert_eq!(scan_all(&reader, &dir, 1)?, vec![(b"z".to_vec(), b"0".to_vec())]);
    assert!(scan_all(&reader, &dir, 0)?.is_empty());
    Ok(())
}

#[test]
fn test_changelog_gap_is_not_found() -> Result<()> {
    let ckpt = CheckpointBuilder::new()?.num_partitions(1);
    ckpt.write_state_file(0, 0, None, 1, FileKind::Changelog, &[put(b"a", b"1")])?;
    ckpt.write_state_file(0, 0, None, 3, FileKind::Changelog, &[put(b"b", b"1")])?;
    let reader = PartitionStoreReader::new(backend_for(BackendKind::Changelog), None);
    let err = reader.open(&ckpt.store_dir(0, 0, None), 0, 3).unwrap_err();
    assert!(
        matches!(&err, StateError::Io(e) if e.kind() == std::io::ErrorKind::NotFound),
        "{err}"
    );
    Ok(())
}

#[test]
fn test_snapshot_scan_is_restartable() -> Result<()> {
    let ckpt = CheckpointBuilder::new()?.num_partitions(1);
    ckpt.write_state_file(0, 0, None, 5, FileKind::Snapshot, &[put(b"k2", b"v"), put(b"k1", b"v")])?;
    let reader = PartitionStoreReader::new(backend_for(BackendKind::Snapshot), None);
    let snapshot = reader.open(&ckpt.store_dir(0, 0, None), 0, 5)?;
    let first = reader.scan(&snapshot)?.collect::<ironstate::Result<Vec<_>>>()?;
    let second = reader.scan(&snapshot)?.collect::<ironstate::Result<Vec<_>>>()?;
    assert_eq!(first, second);
    // Snapshot order is file order.
    assert_eq!(first[0].0, b"k2".to_vec());
    Ok(())
}

#[test]
fn test_delete_inside_snapshot_is_invalid_data() -> Result<()> {
    let ckpt = CheckpointBuilder::new()?.num_partitions(1);
    ckpt.write_state_file(0, 0, None, 1, FileKind::Snapshot, &[put(b"a", b"1"), delete(b"a")])?;
    let reader = PartitionStoreReader::new(backend_for(BackendKind::Snapshot), None);
    let snapshot = reader.open(&ckpt.store_dir(0, 0, None), 0, 1)?;
    let results: Vec<_> = reader.scan(&snapshot)?.collect();
    assert!(results[0].is_ok());
    assert!(matches!(
        &results[1],
        Err(StateError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData
    ));
    Ok(())
}

#[test]
fn test_truncated_state_file_surfaces_io_error() -> Result<()> {
    let ckpt = CheckpointBuilder::new()?.num_partitions(1);
    let path = ckpt.write_state_file(0, 0, None, 1, FileKind::Snapshot, &[put(b"key", b"value")])?;
    let bytes = fs::read(&path)?;
    fs::write(&path, &bytes[..bytes.len() - 6])?;

    let reader = PartitionStoreReader::new(backend_for(BackendKind::Snapshot), None);
    let snapshot = reader.open(&ckpt.store_dir(0, 0, None), 0, 1)?;
    let err = reader
        .scan(&snapshot)?
        .collect::<ironstate::Result<Vec<_>>>()
        .unwrap_err();
    assert!(matches!(&err, StateError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    Ok(())
}

#[test]
fn test_list_state_files_sorted_and_filtered() -> Result<()> {
    let ckpt = CheckpointBuilder::new()?.num_partitions(1);
    for (version, kind) in [
        (10, FileKind::Changelog),
        (2, FileKind::Snapshot),
        (2, FileKind::Changelog),
        (9, FileKind::Snapshot),
    ] {
        ckpt.write_state_file(0, 0, None, version, kind, &[])?;
    }
    let dir = ckpt.store_dir(0, 0, None);
    fs::write(dir.join("3.snapshot.tmp"), b"")?;
    fs::write(dir.join("notes.txt"), b"")?;

    let files: Vec<_> = list_state_files(&dir)?
        .into_iter()
        .map(|f| (f.version, f.kind))
        .collect();
    assert_eq!(
        files,
        vec![
            (2, FileKind::Snapshot),
            (2, FileKind::Changelog),
            (9, FileKind::Snapshot),
            (10, FileKind::Changelog),
        ]
    );
    assert!(list_state_files(&dir.join("missing"))?.is_empty());
    Ok(())
}

#[test]
fn test_unknown_provider_or_codec_is_invalid_checkpoint() {
    let root = std::path::Path::new("/tmp/ckpt");
    let err = PartitionStoreReader::from_tags(root, "rocksdb", "none").err();
    assert!(matches!(err, Some(StateError::InvalidCheckpoint { .. })));
    let err = PartitionStoreReader::from_tags(root, "snapshot", "lz77").err();
    assert!(matches!(err, Some(StateError::InvalidCheckpoint { .. })));
}

fn relation_contents(ckpt: &CheckpointBuilder, batch_id: i64) -> Result<BTreeMap<String, String>> {
    let relation = StateRelation::open(&StateReadOptions::new(ckpt.path()).batch_id(batch_id))?;
    Ok(relation
        .collect()?
        .into_iter()
        .map(|row| (format!("{:?}", row.key), format!("{:?}", row.value)))
        .collect())
}

#[test]
fn test_changelog_provider_matches_snapshot_provider() -> Result<()> {
    let snapshot = CheckpointBuilder::new()?.provider(BackendKind::Snapshot);
    write_aggregation(&snapshot, 2)?;
    for interval in [1, 2, 5] {
        let changelog = CheckpointBuilder::new()?
            .provider(BackendKind::Changelog)
            .snapshot_interval(interval);
        write_aggregation(&changelog, 2)?;
        for batch_id in 0..3 {
            assert_eq!(
                relation_contents(&changelog, batch_id)?,
                relation_contents(&snapshot, batch_id)?,
                "interval {interval}, batch {batch_id}"
            );
        }
    }
    Ok(())
}

#[test]
fn test_backend_is_chosen_from_offset_log() -> Result<()> {
    let ckpt = CheckpointBuilder::new()?.provider(BackendKind::Changelog);
    write_aggregation(&ckpt, 2)?;
    let relation = StateRelation::open(&StateReadOptions::new(ckpt.path()))?;
    assert_eq!(relation.backend_kind(), BackendKind::Changelog);
    let dir = ckpt.store_dir(FIXTURE_OPERATOR, 1, None);
    assert!(dir.join("3.changelog").is_file());
    assert!(!dir.join("3.snapshot").exists());
    Ok(())
}

#[test]
fn test_missing_snapshot_surfaces_during_collect() -> Result<()> {
    let ckpt = CheckpointBuilder::new()?;
    write_aggregation(&ckpt, 2)?;
    fs::remove_file(ckpt.store_dir(FIXTURE_OPERATOR, 2, None).join("3.snapshot"))?;
    let relation = StateRelation::open(&StateReadOptions::new(ckpt.path()))?;
    assert!(relation.collect_partition(1).is_ok());
    let err = relation.collect().unwrap_err();
    assert!(matches!(&err, StateError::Io(e) if e.kind() == std::io::ErrorKind::NotFound));
    Ok(())
}

#[cfg(any(
    feature = "compression-gzip",
    feature = "compression-zstd",
    feature = "compression-bzip2",
    feature = "compression-xz"
))]
mod compression_tests {
    use super::relation_contents;
    use anyhow::Result;
    use ironstate::io::compression::{NO_CODEC, codec_by_name};
    use ironstate::store::BackendKind;
    use ironstate::testing::{CheckpointBuilder, write_aggregation};

    fn enabled_codecs() -> Vec<&'static str> {
        let mut codecs = Vec::new();
        #[cfg(feature = "compression-gzip")]
        codecs.push("gzip");
        #[cfg(feature = "compression-zstd")]
        codecs.push("zstd");
        #[cfg(feature = "compression-bzip2")]
        codecs.push("bzip2");
        #[cfg(feature = "compression-xz")]
        codecs.push("xz");
        codecs
    }

    #[test]
    fn test_compressed_stores_read_like_plain_ones() -> Result<()> {
        let plain = CheckpointBuilder::new()?;
        write_aggregation(&plain, 2)?;
        let expected = relation_contents(&plain, 2)?;
        for codec in enabled_codecs() {
            for provider in [BackendKind::Snapshot, BackendKind::Changelog] {
                let ckpt = CheckpointBuilder::new()?.provider(provider).codec(codec);
                write_aggregation(&ckpt, 2)?;
                assert_eq!(relation_contents(&ckpt, 2)?, expected, "{codec} / {provider:?}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_codec_lookup_by_name_and_alias() {
        assert!(codec_by_name(NO_CODEC).unwrap().is_none());
        assert!(codec_by_name("").unwrap().is_none());
        for codec in enabled_codecs() {
            let found = codec_by_name(&codec.to_uppercase()).unwrap().unwrap();
            assert_eq!(found.name(), codec);
        }
        #[cfg(feature = "compression-gzip")]
        assert_eq!(codec_by_name("gz").unwrap().unwrap().name(), "gzip");
        assert_eq!(codec_by_name("snappy").err(), Some("snappy".to_string()));
    }
}
