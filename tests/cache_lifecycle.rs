//! Resource/container cache lifecycle: dependency loading, refcounts,
//! dedup, reclamation and failure settling.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::Poll;

use depot::cache::{
    ContainerOpener, LoadState, OpenedContainer, Payload, Pending, Ready, ResourceCache,
};
use depot::config::CacheConfig;
use depot::error::{DepotError, Result};
use depot::sync::MemoryTransport;
use depot::{ContentRecord, Manifest, PackedStore};
use tempfile::TempDir;

/// Opener whose containers only open once the test marks them ready
#[derive(Clone, Default)]
struct GatedOpener {
    ready: Arc<Mutex<HashSet<String>>>,
    missing: Arc<Mutex<HashSet<String>>>,
    payloads: Arc<HashMap<String, Vec<(String, Vec<u8>)>>>,
}

impl GatedOpener {
    fn new(payloads: HashMap<String, Vec<(String, Vec<u8>)>>) -> Self {
        Self {
            payloads: Arc::new(payloads),
            ..Default::default()
        }
    }

    fn open_now(&self, name: &str) {
        self.ready.lock().unwrap().insert(name.to_string());
    }

    fn fail(&self, name: &str) {
        self.missing.lock().unwrap().insert(name.to_string());
    }
}

struct GatedOpen {
    name: String,
    opener: GatedOpener,
}

impl Pending<Box<dyn OpenedContainer>> for GatedOpen {
    fn poll(&mut self) -> Poll<Result<Box<dyn OpenedContainer>>> {
        if self.opener.missing.lock().unwrap().contains(&self.name) {
            return Poll::Ready(Err(DepotError::open(&self.name, "missing")));
        }
        if !self.opener.ready.lock().unwrap().contains(&self.name) {
            return Poll::Pending;
        }
        let payloads = self
            .opener
            .payloads
            .get(&self.name)
            .cloned()
            .unwrap_or_default();
        Poll::Ready(Ok(Box::new(MemoryContainer {
            name: self.name.clone(),
            payloads,
        })))
    }
}

struct MemoryContainer {
    name: String,
    payloads: Vec<(String, Vec<u8>)>,
}

impl OpenedContainer for MemoryContainer {
    fn has_payload(&self, name: &str, _kind: &str) -> bool {
        self.payloads.iter().any(|(n, _)| n == name)
    }

    fn load_payload(&self, name: &str, kind: &str) -> Box<dyn Pending<Payload>> {
        let result = self
            .payloads
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| Payload::new(kind, bytes.clone()))
            .ok_or_else(|| DepotError::Payload {
                container: self.name.clone(),
                payload: name.to_string(),
            });
        Box::new(Ready::new(result))
    }

    fn payload_names(&self) -> Vec<String> {
        self.payloads.iter().map(|(n, _)| n.clone()).collect()
    }
}

impl ContainerOpener for GatedOpener {
    fn open(&self, storage_name: &str) -> Box<dyn Pending<Box<dyn OpenedContainer>>> {
        Box::new(GatedOpen {
            name: storage_name.to_string(),
            opener: self.clone(),
        })
    }
}

/// `Assets/r1` lives in `c1`, which depends on `c2`
fn scenario_manifest() -> Manifest {
    let mut manifest = Manifest::new();
    let dir = manifest.add_directory("Assets");
    let c2 = manifest.add_container("c2", &[], 50, "H2");
    let c1 = manifest.add_container("c1", &[c2], 100, "H1");
    manifest.add_resource("r1", dir, c1);
    manifest.add_resource("r2", dir, c1);
    manifest
}

fn scenario_cache() -> (GatedOpener, ResourceCache) {
    let mut payloads = HashMap::new();
    payloads.insert(
        "c1".to_string(),
        vec![("Assets/r1".to_string(), b"resource one".to_vec())],
    );
    payloads.insert("c2".to_string(), Vec::new());
    let opener = GatedOpener::new(payloads);

    let mut cache = ResourceCache::new(
        CacheConfig::default(),
        Box::new(opener.clone()),
        Arc::new(MemoryTransport::new()),
    );
    cache.set_manifest(&scenario_manifest()).unwrap();
    (opener, cache)
}

#[test]
fn resource_settles_only_after_container_and_dependency_load() {
    let (opener, mut cache) = scenario_cache();

    let r1 = cache.load("Assets/r1", "text");
    assert_eq!(cache.state(r1), LoadState::Init);
    assert_eq!(cache.container_state("c1"), Some(LoadState::LoadingContainer));
    assert_eq!(cache.container_state("c2"), Some(LoadState::LoadingContainer));
    assert_eq!(cache.progress(r1), 0.0);

    opener.open_now("c1");
    cache.tick();
    assert_eq!(cache.container_state("c1"), Some(LoadState::Loaded));
    assert_eq!(cache.state(r1), LoadState::LoadingContainer);
    assert!((cache.progress(r1) - 0.15).abs() < 1e-6);

    opener.open_now("c2");
    cache.tick();
    assert_eq!(cache.container_state("c2"), Some(LoadState::Loaded));
    assert_eq!(cache.state(r1), LoadState::LoadingPayload);

    cache.tick();
    assert_eq!(cache.state(r1), LoadState::Loaded);
    assert!(cache.error(r1).is_none());
    assert_eq!(&cache.payload(r1).unwrap().bytes[..], b"resource one");
    assert_eq!(cache.progress(r1), 1.0);

    cache.release(r1);
    let report = cache.tick();
    assert_eq!(report.resources_unloaded, 1);
    assert_eq!(report.containers_unloaded, 2);
    assert_eq!(cache.resource_count(), 0);
    assert_eq!(cache.container_count(), 0);
    assert_eq!(cache.state(r1), LoadState::Unloaded);
}

#[test]
fn duplicate_loads_share_one_handle() {
    let (opener, mut cache) = scenario_cache();

    let a = cache.load("Assets/r1", "text");
    let b = cache.load("Assets/r1", "text");
    assert_eq!(a, b);
    assert_eq!(cache.refs(a), 2);
    assert_eq!(cache.resource_count(), 1);
    assert_eq!(cache.container_refs("c1"), 1);

    opener.open_now("c1");
    opener.open_now("c2");
    for _ in 0..3 {
        cache.tick();
    }
    assert_eq!(cache.state(a), LoadState::Loaded);

    cache.release(a);
    cache.tick();
    assert_eq!(cache.resource_count(), 1, "one holder left");

    cache.release(b);
    cache.tick();
    assert_eq!(cache.resource_count(), 0);
}

#[test]
fn shared_container_outlives_first_resource() {
    let (opener, mut cache) = scenario_cache();
    opener.open_now("c1");
    opener.open_now("c2");

    let r1 = cache.load("Assets/r1", "text");
    let r2 = cache.load("Assets/r2", "text");
    assert_eq!(cache.container_refs("c1"), 2);
    for _ in 0..3 {
        cache.tick();
    }

    cache.release(r1);
    cache.tick();
    assert_eq!(cache.container_state("c1"), Some(LoadState::Loaded));
    assert_eq!(cache.container_refs("c1"), 1);

    cache.release(r2);
    cache.tick();
    assert_eq!(cache.container_count(), 0);
}

#[test]
fn release_before_settle_defers_teardown() {
    let (opener, mut cache) = scenario_cache();

    let r1 = cache.load("Assets/r1", "text");
    cache.release(r1);
    cache.tick();
    assert_eq!(cache.resource_count(), 1, "in-flight handles are never reclaimed");
    assert_eq!(cache.state(r1), LoadState::LoadingContainer);

    opener.open_now("c1");
    opener.open_now("c2");
    for _ in 0..3 {
        cache.tick();
    }
    assert_eq!(cache.resource_count(), 0);
    assert_eq!(cache.container_count(), 0);
}

#[test]
fn reload_after_reclaim_creates_fresh_handle() {
    let (opener, mut cache) = scenario_cache();
    opener.open_now("c1");
    opener.open_now("c2");

    let first = cache.load("Assets/r1", "text");
    for _ in 0..3 {
        cache.tick();
    }
    cache.release(first);
    cache.tick();

    let second = cache.load("Assets/r1", "text");
    assert_ne!(first, second);
    assert_eq!(cache.refs(second), 1);
    assert_eq!(cache.refs(first), 0);
}

#[test]
fn unknown_name_settles_with_resolution_error() {
    let (_opener, mut cache) = scenario_cache();

    let id = cache.load("Assets/nope", "text");
    assert_eq!(cache.state(id), LoadState::Loaded);
    assert!(matches!(cache.error(id), Some(DepotError::Resolution(_))));
    assert_eq!(
        cache.error(id).unwrap().to_string(),
        "Resource not found: Assets/nope"
    );

    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    cache.on_complete(
        id,
        Box::new(move |outcome| {
            *s.borrow_mut() = Some(outcome.result.is_err());
        }),
    );
    assert_eq!(*seen.borrow(), Some(true), "late listener runs immediately");

    cache.release(id);
    cache.tick();
    assert_eq!(cache.resource_count(), 0);
}

#[test]
fn missing_container_and_missing_payload_settle_with_errors() {
    let (opener, mut cache) = scenario_cache();
    opener.fail("c2");
    opener.open_now("c1");

    let r1 = cache.load("Assets/r1", "text");
    cache.tick();
    assert_eq!(cache.state(r1), LoadState::Loaded);
    assert!(matches!(cache.error(r1), Some(DepotError::Open { .. })));

    let (opener, mut cache) = scenario_cache();
    opener.open_now("c1");
    opener.open_now("c2");
    let r2 = cache.load("Assets/r2", "text");
    cache.tick();
    assert_eq!(cache.state(r2), LoadState::Loaded);
    assert!(matches!(cache.error(r2), Some(DepotError::Payload { .. })));
}

#[test]
fn completion_listeners_fire_exactly_once() {
    let (opener, mut cache) = scenario_cache();
    let hits = Rc::new(Cell::new(0));

    let r1 = cache.load("Assets/r1", "text");
    for _ in 0..2 {
        let h = hits.clone();
        cache.on_complete(
            r1,
            Box::new(move |outcome| {
                assert_eq!(outcome.path, "Assets/r1");
                assert!(outcome.result.is_ok());
                h.set(h.get() + 1);
            }),
        );
    }

    opener.open_now("c1");
    opener.open_now("c2");
    for _ in 0..5 {
        cache.tick();
    }
    assert_eq!(hits.get(), 2);
}

#[test]
fn search_paths_and_resource_listing() {
    let (opener, mut cache) = scenario_cache();
    opener.open_now("c1");
    opener.open_now("c2");
    cache.add_search_path("Assets/");

    assert_eq!(cache.all_resource_paths(), vec!["Assets/r1", "Assets/r2"]);

    let id = cache.load("r1", "text");
    assert_eq!(cache.path(id), Some("Assets/r1"));
    assert_eq!(cache.find("r1"), Some(id));

    cache.clear();
    assert!(cache.all_resource_paths().is_empty());
    for _ in 0..3 {
        cache.tick();
    }
    assert_eq!(cache.state(id), LoadState::Loaded, "live handles survive clear");
}

#[test]
fn remote_names_load_through_transport() {
    let transport = MemoryTransport::new();
    transport.insert("http://cdn.test/banner.bin", b"remote bytes".to_vec());

    let mut cache = ResourceCache::new(
        CacheConfig::default(),
        Box::new(GatedOpener::default()),
        Arc::new(transport.clone()),
    );
    let id = cache.load("http://cdn.test/banner.bin", "bytes");
    assert_eq!(cache.state(id), LoadState::LoadingPayload);
    cache.tick();
    assert_eq!(cache.state(id), LoadState::Loaded);
    assert_eq!(&cache.payload(id).unwrap().bytes[..], b"remote bytes");

    let missing = cache.load("https://cdn.test/none", "bytes");
    cache.tick();
    assert!(matches!(cache.error(missing), Some(DepotError::Transfer { .. })));
}

fn write_container(dir: &Path, name: &str, payloads: &[(&str, &[u8])]) {
    let staging = TempDir::new().unwrap();
    let records = payloads
        .iter()
        .map(|(n, data)| {
            let path = staging.path().join(n);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, data).unwrap();
            ContentRecord::new(*n, data.len() as u64, "00")
        })
        .collect();
    PackedStore::create(dir.join(name), records, staging.path()).unwrap();
}

#[test]
fn store_opener_loads_variant_and_direct_files() {
    let base = TempDir::new().unwrap();
    let update = TempDir::new().unwrap();
    write_container(base.path(), "ui.sd", &[("Assets/UI/title.txt", b"small")]);
    write_container(base.path(), "ui.hd", &[("Assets/UI/title.txt", b"large")]);
    fs::write(update.path().join("notes.txt"), b"loose file").unwrap();

    let mut manifest = Manifest::new();
    let dir = manifest.add_directory("Assets/UI");
    let ui = manifest.add_container("ui.pack", &[], 0, "");
    manifest.add_resource("title.txt", dir, ui);
    manifest.variants = vec!["ui.sd".to_string(), "ui.hd".to_string()];

    let config = CacheConfig {
        base_dir: base.path().to_path_buf(),
        update_dir: update.path().to_path_buf(),
        active_variants: vec!["hd".to_string()],
        ..Default::default()
    };
    let mut cache = ResourceCache::with_store_opener(config, Arc::new(MemoryTransport::new()));
    cache.set_manifest(&manifest).unwrap();

    let title = cache.load("Assets/UI/title.txt", "text");
    let notes = cache.load("notes.txt", "text");
    for _ in 0..3 {
        cache.tick();
    }

    assert_eq!(cache.container_state("ui.hd"), Some(LoadState::Loaded));
    assert_eq!(cache.container_state("ui.pack"), None);
    assert_eq!(&cache.payload(title).unwrap().bytes[..], b"large");
    assert_eq!(cache.kind(title), Some("text"));
    assert_eq!(&cache.payload(notes).unwrap().bytes[..], b"loose file");
}

#[test]
fn invalid_manifest_is_rejected_and_index_kept() {
    let (_opener, mut cache) = scenario_cache();

    let mut broken = Manifest::new();
    let dir = broken.add_directory("Other");
    let c = broken.add_container("c9", &[7], 1, "H9");
    broken.add_resource("x", dir, c);
    assert!(matches!(cache.set_manifest(&broken), Err(DepotError::Manifest(_))));

    let mut escaping = Manifest::new();
    escaping.add_container("../c1", &[], 1, "H1");
    assert!(cache.set_manifest(&escaping).is_err());

    assert_eq!(cache.all_resource_paths(), vec!["Assets/r1", "Assets/r2"]);
}

fn budgeted_cache(opener: &GatedOpener, manifest: &Manifest, budget: usize) -> ResourceCache {
    let config = CacheConfig {
        max_opening_containers: budget,
        ..Default::default()
    };
    let mut cache = ResourceCache::new(
        config,
        Box::new(opener.clone()),
        Arc::new(MemoryTransport::new()),
    );
    cache.set_manifest(manifest).unwrap();
    cache
}

#[test]
fn container_opens_beyond_budget_wait_in_init() {
    let mut payloads = HashMap::new();
    payloads.insert(
        "c1".to_string(),
        vec![("Assets/r1".to_string(), b"resource one".to_vec())],
    );
    let opener = GatedOpener::new(payloads);
    opener.open_now("c1");
    opener.open_now("c2");
    let mut cache = budgeted_cache(&opener, &scenario_manifest(), 1);

    let r1 = cache.load("Assets/r1", "text");
    assert_eq!(cache.state(r1), LoadState::Init);
    assert_eq!(cache.container_state("c1"), Some(LoadState::LoadingContainer));
    assert_eq!(cache.container_state("c2"), Some(LoadState::Init));

    cache.tick();
    assert_eq!(cache.container_state("c1"), Some(LoadState::Loaded));
    assert_eq!(cache.container_state("c2"), Some(LoadState::Init));
    assert_eq!(cache.state(r1), LoadState::LoadingContainer);

    cache.tick();
    assert_eq!(cache.container_state("c2"), Some(LoadState::Loaded));
    assert_eq!(cache.state(r1), LoadState::LoadingPayload);

    cache.tick();
    assert_eq!(cache.state(r1), LoadState::Loaded);
    assert_eq!(&cache.payload(r1).unwrap().bytes[..], b"resource one");
}

#[test]
fn queued_container_opens_start_in_request_order() {
    let mut manifest = Manifest::new();
    let dir = manifest.add_directory("Assets");
    for name in ["a", "b", "c", "d"] {
        let container = manifest.add_container(name, &[], 10, "");
        manifest.add_resource(name, dir, container);
    }
    let opener = GatedOpener::new(HashMap::new());
    let mut cache = budgeted_cache(&opener, &manifest, 2);

    for name in ["a", "b", "c", "d"] {
        cache.load(&format!("Assets/{}", name), "text");
    }
    let opening = |cache: &ResourceCache| {
        ["a", "b", "c", "d"]
            .into_iter()
            .filter(|name| cache.container_state(name) == Some(LoadState::LoadingContainer))
            .collect::<Vec<_>>()
    };
    assert_eq!(opening(&cache), vec!["a", "b"]);

    opener.open_now("b");
    cache.tick();
    assert_eq!(opening(&cache), vec!["a"]);
    assert_eq!(cache.container_state("c"), Some(LoadState::Init));

    cache.tick();
    assert_eq!(opening(&cache), vec!["a", "c"]);
    assert_eq!(cache.container_state("d"), Some(LoadState::Init));

    for name in ["a", "c", "d"] {
        opener.open_now(name);
    }
    for _ in 0..4 {
        cache.tick();
        assert!(opening(&cache).len() <= 2);
    }
    for name in ["a", "b", "c", "d"] {
        assert_eq!(cache.container_state(name), Some(LoadState::Loaded));
    }
}

#[test]
fn blank_names_settle_with_invalid_name() {
    let (_opener, mut cache) = scenario_cache();

    let blank = cache.load("  ", "text");
    assert_eq!(cache.state(blank), LoadState::Loaded);
    assert!(matches!(cache.error(blank), Some(DepotError::InvalidName(_))));
    assert_eq!(cache.progress(blank), 1.0);
    assert_eq!(cache.container_count(), 0);
}

#[test]
fn opened_container_lists_its_payloads() {
    let (opener, mut cache) = scenario_cache();

    let r1 = cache.load("Assets/r1", "text");
    assert_eq!(cache.container_payloads("c1"), None);
    opener.open_now("c1");
    opener.open_now("c2");
    cache.tick();

    assert_eq!(cache.container_payloads("c1"), Some(vec!["Assets/r1".to_string()]));
    assert_eq!(cache.container_payloads("c2"), Some(Vec::new()));
    assert_eq!(cache.container_payloads("c9"), None);
    cache.release(r1);
}
