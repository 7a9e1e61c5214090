use std::sync::Arc;

use tabula::core::config::EngineConfig;
use tabula::io::{build_spill_manager, build_storage_from_config, MemoryStorage};
use tabula::mem::{Codec, SpillManager, Storage};
use tabula::prelude::*;

#[test]
fn test_file_storage_builder_write_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = EngineConfig {
        spill_dir: dir.path().to_string_lossy().into_owned(),
        ..EngineConfig::default()
    };

    let storage_cfg = cfg.storage_config();
    let storage = build_storage_from_config(&storage_cfg).expect("fs storage");

    let path = format!("{}/segment.seg", cfg.spill_dir);
    let bytes = b"hello world";
    storage.write(&path, bytes).expect("write");
    let roundtrip = storage.read_range(&path, 0, bytes.len()).expect("read");
    assert_eq!(roundtrip, bytes);
}

#[test]
fn test_invalid_scheme_errors() {
    let cfg = EngineConfig {
        spill_uri: Some("ftp://example.com/spill".into()),
        ..EngineConfig::default()
    };
    let err = build_storage_from_config(&cfg.storage_config())
        .err()
        .expect("should fail");
    assert!(err.to_string().contains("unsupported spill scheme"));
}

#[test]
fn test_memory_uri_selects_memory_backend() {
    let cfg = EngineConfig {
        spill_uri: Some("memory://".into()),
        ..EngineConfig::default()
    };
    let storage = build_storage_from_config(&cfg.storage_config()).expect("memory storage");
    storage.write("memory:/a/b.seg", b"xyz").expect("write");
    assert_eq!(storage.size("memory:/a/b.seg").expect("size"), 3);
    assert_eq!(storage.list("memory:/a").expect("list").len(), 1);
}

#[test]
fn test_spill_manager_round_trips_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = EngineConfig {
        spill_dir: dir.path().to_string_lossy().into_owned(),
        frame_rows: 2,
        ..EngineConfig::default()
    };
    let mgr = build_spill_manager(&cfg).expect("spill manager");
    let rows = vec![row![1, "a"], row![2, 2.5], row![3, None::<i64>], row![4, true, "x"]];

    let chunk = Arc::new(mgr.write_run(&rows).expect("write run"));
    assert_eq!(chunk.rows(), 4);
    let back: Vec<Row> = chunk
        .reader()
        .collect::<std::result::Result<_, _>>()
        .expect("replay");
    assert_eq!(back, rows);

    assert_eq!(mgr.list_chunks().expect("list").len(), 1);
    drop(chunk);
    assert!(mgr.list_chunks().expect("list").is_empty());
}

#[test]
fn test_zero_buffer_is_rejected() {
    let cfg = EngineConfig {
        buffer_size: Some(0),
        ..EngineConfig::default()
    };
    assert!(build_spill_manager(&cfg).is_err());
}

#[test]
fn test_rewritten_chunk_is_rejected_on_replay() {
    let storage = Arc::new(MemoryStorage::new());
    let mgr = SpillManager::new(storage.clone(), Codec::None, "memory:/rewrite");
    let chunk = Arc::new(mgr.write_run(&[row![1, "a"], row![2, "b"]]).expect("write run"));
    assert_eq!(chunk.reader().count(), 2);

    let path = chunk.meta().path.clone();
    let len = storage.size(&path).expect("size") as usize;
    let mut bytes = storage.read_range(&path, 0, len).expect("read");
    bytes[len - 1] ^= 0x20;
    storage.write(&path, &bytes).expect("rewrite");

    let err = chunk.reader().next().expect("one item").expect_err("stale chunk");
    assert!(err.to_string().contains("changed"), "{err}");
}
