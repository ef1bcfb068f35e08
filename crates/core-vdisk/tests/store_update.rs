//! Folding downloaded loose files into an existing packed store

use depot_core_manifest::ContentRecord;
use depot_core_vdisk::PackedStore;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn loose(dir: &Path, name: &str, data: &[u8], hash: &str) -> ContentRecord {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, data).unwrap();
    ContentRecord::new(name, data.len() as u64, hash)
}

#[test]
fn update_folds_new_record_and_keeps_preserved_payloads() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("res");

    let f1 = loose(dir.path(), "f1.pack", &[1u8; 40], "H1");
    let f2 = loose(dir.path(), "f2.pack", &[2u8; 25], "H2");
    let mut store = PackedStore::create(&store_path, vec![f1, f2], dir.path()).unwrap();
    fs::remove_file(dir.path().join("f1.pack")).unwrap();
    fs::remove_file(dir.path().join("f2.pack")).unwrap();

    let f3 = loose(dir.path(), "f3.pack", b"0123456789", "H3");
    store
        .update(
            dir.path(),
            std::slice::from_ref(&f3),
            &["f1.pack".to_string(), "f2.pack".to_string()],
        )
        .unwrap();

    let reloaded = PackedStore::load(&store_path).unwrap();
    let names: Vec<&str> = reloaded.records().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["f1.pack", "f2.pack", "f3.pack"]);

    let header = reloaded.header_len();
    let extent = reloaded.extent("f3.pack").unwrap();
    assert_eq!(extent.offset, header + 40 + 25);
    assert_eq!(extent.length, 10);

    assert_eq!(reloaded.read_payload("f1.pack").unwrap(), vec![1u8; 40]);
    assert_eq!(reloaded.read_payload("f2.pack").unwrap(), vec![2u8; 25]);
    assert_eq!(reloaded.read_payload("f3.pack").unwrap(), b"0123456789");

    assert!(!dir.path().join("f1.pack").exists());
    assert!(!dir.path().join("f3.pack").exists());
}

#[test]
fn update_drops_records_not_preserved() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("res");

    let old = loose(dir.path(), "old.pack", b"stale", "H0");
    let keep = loose(dir.path(), "keep.pack", b"fresh", "H1");
    let mut store = PackedStore::create(&store_path, vec![old, keep], dir.path()).unwrap();

    store
        .update(dir.path(), &[], &["keep.pack".to_string()])
        .unwrap();

    assert!(store.get_file("old.pack").is_none());
    assert_eq!(store.read_payload("keep.pack").unwrap(), b"fresh");
}

#[test]
fn replaced_record_uses_downloaded_payload() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("res");

    let v1 = loose(dir.path(), "ui.pack", b"version-one", "A1");
    let mut store = PackedStore::create(&store_path, vec![v1], dir.path()).unwrap();

    let v2 = loose(dir.path(), "ui.pack", b"v2", "A2");
    store
        .update(dir.path(), std::slice::from_ref(&v2), &["ui.pack".to_string()])
        .unwrap();

    assert_eq!(store.len(), 1);
    assert_eq!(store.get_file("ui.pack").unwrap().hash, "A2");
    assert_eq!(store.read_payload("ui.pack").unwrap(), b"v2");
}
