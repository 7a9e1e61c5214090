//! External sort tests: spilled runs against in-memory sorting.

mod test_data_gen;

use std::sync::Arc;

use tabula::core::config::EngineConfig;
use tabula::io::{FsStorage, MemoryStorage};
use tabula::mem::{Codec, SpillManager, Storage};
use tabula::prelude::*;
use test_data_gen::{keyed_rows, keyed_table};

fn fs_spill(dir: &tempfile::TempDir) -> Arc<SpillManager> {
    let root = dir.path().join("sort-spills").to_string_lossy().into_owned();
    Arc::new(SpillManager::new(Arc::new(FsStorage::new()), Codec::None, root).with_frame_rows(3))
}

fn in_memory(source: TableRef, key: &str, reverse: bool) -> Vec<Row> {
    let view = SortView::new(source, key).reverse(reverse);
    materialize(&view).expect("in-memory sort").1
}

#[test]
fn spill_threshold_of_two_matches_unbounded_sort() {
    let dir = tempfile::tempdir().unwrap();
    let source: TableRef = Arc::new(MemTable::new(
        ["k", "v"],
        vec![row![5, "e"], row![3, "c"], row![4, "d"], row![1, "a"], row![2, "b"]],
    ));

    let spilled = SortView::new(source.clone(), "k")
        .buffer_size(Some(2))
        .spill(fs_spill(&dir));
    let (hdr, rows) = materialize(&spilled).unwrap();

    assert_eq!(hdr, Header::new(["k", "v"]));
    assert_eq!(rows, in_memory(source, "k", false));
    assert_eq!(spilled.cached_chunks(), 3);
}

#[test]
fn large_spilled_sort_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let source = keyed_table(500, 17, 7);
    let view = SortView::new(source.clone(), "key")
        .buffer_size(Some(64))
        .spill(fs_spill(&dir));
    let (_, rows) = materialize(&view).unwrap();

    assert_eq!(rows.len(), 500);
    for pair in rows.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a[0] <= b[0], "keys out of order: {a:?} then {b:?}");
        if a[0] == b[0] {
            assert!(a[1] < b[1], "equal keys lost input order: {a:?} then {b:?}");
        }
    }
    assert_eq!(rows, in_memory(source, "key", false));
}

#[test]
fn descending_spilled_sort_matches_in_memory() {
    let storage = Arc::new(MemoryStorage::new());
    let spill = Arc::new(SpillManager::new(storage, Codec::None, "memory:/desc"));
    let source = keyed_table(120, 9, 11);
    let view = SortView::new(source.clone(), "key")
        .reverse(true)
        .buffer_size(Some(10))
        .spill(spill);
    assert_eq!(materialize(&view).unwrap().1, in_memory(source, "key", true));
}

#[test]
fn sorting_twice_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let opts = SortOptions::default().spill_to(fs_spill(&dir), 16);
    let once = sorted(keyed_table(100, 5, 3), KeySpec::from("key"), false, &opts);
    let twice = sorted(once.clone(), KeySpec::from("key"), false, &opts);
    assert_eq!(materialize(once.as_ref()).unwrap(), materialize(twice.as_ref()).unwrap());
}

#[test]
fn spill_files_are_removed_when_the_view_drops() {
    let dir = tempfile::tempdir().unwrap();
    let spill = fs_spill(&dir);
    let view = SortView::new(keyed_table(40, 4, 1), "key")
        .buffer_size(Some(8))
        .spill(spill.clone());

    let mut scan = view.scan().unwrap();
    assert!(scan.rows.next().is_some());
    assert!(!spill.list_chunks().unwrap().is_empty());

    drop(scan);
    drop(view);
    assert!(spill.list_chunks().unwrap().is_empty());
}

#[test]
fn config_driven_spill_to_temp_dir() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = EngineConfig {
        buffer_size: Some(4),
        spill_dir: dir.path().to_string_lossy().into_owned(),
        frame_rows: 2,
        ..EngineConfig::default()
    };
    let view = SortView::new(keyed_table(30, 6, 5), "key")
        .configure(&cfg)
        .unwrap();
    let rows = materialize(&view).unwrap().1;

    let mut expected = keyed_rows(30, 6, 5);
    expected.sort_by(|a, b| a[0].cmp(&b[0]));
    assert_eq!(rows, expected);

    drop(view);
    let leftover = FsStorage::new().list(&cfg.spill_dir).unwrap();
    assert!(leftover.is_empty(), "spill files left behind: {leftover:?}");
}

#[test]
fn memory_storage_spill_via_uri() {
    let cfg = EngineConfig {
        buffer_size: Some(5),
        spill_uri: Some("memory://".into()),
        ..EngineConfig::default()
    };
    let source = keyed_table(50, 10, 21);
    let view = SortView::new(source.clone(), "key").configure(&cfg).unwrap();
    assert_eq!(materialize(&view).unwrap().1, in_memory(source, "key", false));
}
