//! Integration tests covering the testable properties of a fresh or reopened store file.
//!
//! Each test gets its own scratch file via `tempfile`, mirroring how this lineage's `tests/*.rs`
//! files use `tempfile` for disposable on-disk fixtures.

use std::collections::HashSet;

use rand::Rng;
use tempfile::TempDir;

use extentkv::directory::KEY_TABLE_CAP;
use extentkv::error::Error;
use extentkv::Store;

fn scratch_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("store.bin")
}

#[test]
fn round_trip_through_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir);
    let mut store = Store::open(&path).unwrap();
    store.set(b"Testing", b"blah").unwrap();
    assert_eq!(store.get(b"Testing").unwrap(), b"blah");
    store.close().unwrap();

    let store = Store::open(&path).unwrap();
    assert_eq!(store.get(b"Testing").unwrap(), b"blah");
}

#[test]
fn overwrite_changes_value() {
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir);
    let mut store = Store::open(&path).unwrap();
    store.set(b"a", b"v1").unwrap();
    store.set(b"a", b"v2-longer").unwrap();
    assert_eq!(store.get(b"a").unwrap(), b"v2-longer");
}

#[test]
fn shrinking_resize_leaves_reusable_free_extent() {
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir);
    let mut store = Store::open(&path).unwrap();
    store.set(b"a", b"xxxxxxxxxx").unwrap(); // 10 bytes
    store.set(b"a", b"yy").unwrap(); // 2 bytes, leaves an 8-byte free extent
    assert_eq!(store.get(b"a").unwrap(), b"yy");

    let len_after_shrink = std::fs::metadata(&path).unwrap().len();
    // Growing the same key's value back up to 8 bytes should be served from the extent
    // freed above (first-fit exact match) rather than growing the file. The key extent is
    // untouched since "a" is still one byte.
    store.set(b"a", b"zzzzzzzz").unwrap();
    let len_after_reuse = std::fs::metadata(&path).unwrap().len();
    assert_eq!(len_after_reuse, len_after_shrink);
    assert_eq!(store.get(b"a").unwrap(), b"zzzzzzzz");
}

#[test]
fn delete_frees_extents_and_key_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir);
    let mut store = Store::open(&path).unwrap();
    store.set(b"a", b"1").unwrap();
    store.set(b"b", b"2").unwrap();
    store.del(b"a").unwrap();

    match store.get(b"a") {
        Err(Error::NotFound) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert_eq!(store.get(b"b").unwrap(), b"2");

    store.close().unwrap();
    let store = Store::open(&path).unwrap();
    assert_eq!(store.get(b"b").unwrap(), b"2");
    match store.get(b"a") {
        Err(Error::NotFound) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn idempotent_delete() {
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir);
    let mut store = Store::open(&path).unwrap();
    store.set(b"a", b"1").unwrap();
    store.del(b"a").unwrap();
    store.del(b"a").unwrap();
    match store.get(b"a") {
        Err(Error::NotFound) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn key_table_chain_grows_past_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir);
    let mut store = Store::open(&path).unwrap();
    let mut rng = rand::thread_rng();
    let mut keys: HashSet<Vec<u8>> = HashSet::new();
    while keys.len() < (KEY_TABLE_CAP as usize) + 20 {
        let mut key = vec![0u8; 36];
        rng.fill(key.as_mut_slice());
        keys.insert(key);
    }
    for key in &keys {
        store.set(key, key).unwrap();
    }
    for key in &keys {
        assert_eq!(store.get(key).unwrap().as_slice(), key.as_slice());
    }
    assert_eq!(store.stat().key_table_count, 2);
}

#[test]
fn extent_table_chain_grows_past_capacity() {
    use extentkv::extent::EXTENT_TABLE_CAP;

    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir);
    let mut store = Store::open(&path).unwrap();
    // Each `set` of a new key allocates two extents (key bytes, value bytes), so this
    // comfortably crosses `EXTENT_TABLE_CAP` descriptor slots and forces at least one
    // extent-table chain growth; the allocator's own unit tests pin the exact count for a
    // single-extent-per-call growth sequence.
    for i in 0..(EXTENT_TABLE_CAP as usize) + 1 {
        let key = format!("k{i}");
        store.set(key.as_bytes(), b"x").unwrap();
    }
    assert!(store.stat().extent_table_count >= 2);
}

#[test]
fn persistence_through_reopen_for_many_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = scratch_path(&dir);
    let pairs: Vec<(String, String)> = (0..50)
        .map(|i| (format!("key-{i}"), format!("value-{i}-{}", "x".repeat(i % 7))))
        .collect();

    {
        let mut store = Store::open(&path).unwrap();
        for (k, v) in &pairs {
            store.set(k.as_bytes(), v.as_bytes()).unwrap();
        }
    }

    let store = Store::open(&path).unwrap();
    for (k, v) in &pairs {
        assert_eq!(store.get(k.as_bytes()).unwrap(), v.as_bytes());
    }
    assert_eq!(store.stat().key_count, pairs.len());
}
