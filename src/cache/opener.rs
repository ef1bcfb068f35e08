//! Container-open capability and the built-in packed container format
//!
//! The cache never interprets container internals. It asks a
//! [`ContainerOpener`] for a container by storage name and polls the returned
//! [`Pending`] value on later ticks. The built-in [`StoreOpener`] treats every
//! container as a packed store: a header of records followed by payloads,
//! with payload names equal to record names.

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use std::fs;
use std::path::{Path, PathBuf};
use std::task::Poll;

use depot_core_vdisk::PackedStore;

use super::handle::Payload;
use crate::config::{CacheConfig, OpenMode};
use crate::error::{DepotError, Result};

/// A value that becomes available across ticks
pub trait Pending<T>: Send {
    /// Non-blocking; returns `Poll::Ready` exactly once
    fn poll(&mut self) -> Poll<Result<T>>;
}

/// Already-computed result
pub struct Ready<T>(Option<Result<T>>);

impl<T> Ready<T> {
    pub fn new(result: Result<T>) -> Self {
        Self(Some(result))
    }
}

impl<T: Send> Pending<T> for Ready<T> {
    fn poll(&mut self) -> Poll<Result<T>> {
        match self.0.take() {
            Some(result) => Poll::Ready(result),
            None => Poll::Ready(Err(DepotError::Config(
                "pending value polled after completion".to_string(),
            ))),
        }
    }
}

/// Result produced on a worker thread
pub struct Background<T> {
    rx: Receiver<Result<T>>,
}

impl<T: Send> Pending<T> for Background<T> {
    fn poll(&mut self) -> Poll<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Poll::Ready(result),
            Err(TryRecvError::Empty) => Poll::Pending,
            Err(TryRecvError::Disconnected) => Poll::Ready(Err(DepotError::Io(
                std::io::Error::other("background worker exited without a result"),
            ))),
        }
    }
}

/// Run `job` on its own thread and poll for the result
pub fn spawn_background<T, F>(job: F) -> Box<dyn Pending<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = bounded(1);
    std::thread::spawn(move || {
        let _ = tx.send(job());
    });
    Box::new(Background { rx })
}

/// Run `job` now or on a worker, depending on `mode`
pub fn run_with_mode<T, F>(mode: OpenMode, job: F) -> Box<dyn Pending<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match mode {
        OpenMode::Sync => Box::new(Ready::new(job())),
        OpenMode::Background => spawn_background(job),
    }
}

/// An opened container
pub trait OpenedContainer: Send {
    fn has_payload(&self, name: &str, kind: &str) -> bool;

    fn load_payload(&self, name: &str, kind: &str) -> Box<dyn Pending<Payload>>;

    fn payload_names(&self) -> Vec<String>;
}

/// Host-provided capability: open a container by storage name
pub trait ContainerOpener {
    fn open(&self, storage_name: &str) -> Box<dyn Pending<Box<dyn OpenedContainer>>>;
}

/// Where a container's bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub path: PathBuf,
    pub offset: u64,
}

/// Find a container: `update_dir`, then `base_dir`, then either directory's packed store
pub fn locate(config: &CacheConfig, storage_name: &str) -> Result<Located> {
    for dir in [&config.update_dir, &config.base_dir] {
        let candidate = dir.join(storage_name);
        if candidate.is_file() {
            return Ok(Located {
                path: candidate,
                offset: 0,
            });
        }
    }

    for dir in [&config.update_dir, &config.base_dir] {
        let store_path = dir.join(&config.store_name);
        if !store_path.is_file() {
            continue;
        }
        let store = PackedStore::load(&store_path)?;
        if let Some(extent) = store.extent(storage_name) {
            return Ok(Located {
                path: store_path,
                offset: extent.offset,
            });
        }
    }

    Err(DepotError::open(storage_name, "not found in update, base or packed store"))
}

/// Reads the plain file that backs a direct-file resource
pub fn read_file(mode: OpenMode, path: &Path, kind: &str) -> Box<dyn Pending<Payload>> {
    let path = path.to_path_buf();
    let kind = kind.to_string();
    run_with_mode(mode, move || {
        let bytes = fs::read(&path)?;
        Ok(Payload::new(kind, bytes))
    })
}

/// Built-in opener for containers laid out as packed stores
#[derive(Debug, Clone)]
pub struct StoreOpener {
    config: CacheConfig,
}

impl StoreOpener {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }
}

impl ContainerOpener for StoreOpener {
    fn open(&self, storage_name: &str) -> Box<dyn Pending<Box<dyn OpenedContainer>>> {
        let config = self.config.clone();
        let name = storage_name.to_string();
        let mode = self.config.open_mode;
        run_with_mode(mode, move || {
            let located = locate(&config, &name)?;
            let store = PackedStore::load_at(&located.path, located.offset)
                .map_err(|e| DepotError::open(&name, e.to_string()))?;
            tracing::debug!(
                container = %name,
                path = %located.path.display(),
                offset = located.offset,
                "opened container"
            );
            let opened: Box<dyn OpenedContainer> = Box::new(StoreContainer { store, mode });
            Ok(opened)
        })
    }
}

struct StoreContainer {
    store: PackedStore,
    mode: OpenMode,
}

impl OpenedContainer for StoreContainer {
    fn has_payload(&self, name: &str, _kind: &str) -> bool {
        self.store.get_file(name).is_some()
    }

    fn load_payload(&self, name: &str, kind: &str) -> Box<dyn Pending<Payload>> {
        let store = self.store.clone();
        let name = name.to_string();
        let kind = kind.to_string();
        run_with_mode(self.mode, move || {
            let bytes = store.read_payload(&name)?;
            Ok(Payload::new(kind, bytes))
        })
    }

    fn payload_names(&self) -> Vec<String> {
        self.store.records().iter().map(|r| r.name.clone()).collect()
    }
}
