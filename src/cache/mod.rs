//! Resource/container cache
//!
//! Turns logical resource names into loaded payloads. Every resource resolves
//! through the manifest index to a container plus that container's flattened
//! dependency list; containers are opened through a [`ContainerOpener`] and
//! shared between every resource that needs them.
//!
//! Ownership runs one way only: a resource handle retains its container and
//! each dependency container for its lifetime, and container handles retain
//! nothing. Reclamation is therefore acyclic: sweeping a resource releases its
//! containers, which become eligible in the same tick's container sweep.
//!
//! All state lives in the [`ResourceCache`] value owned by the caller and is
//! only touched from [`ResourceCache::load`], [`ResourceCache::release`] and
//! [`ResourceCache::tick`]. Container opens and payload reads may run on
//! worker threads; their results are only observed inside `tick`.

mod container;
mod handle;
mod opener;
mod registry;
mod resource;
mod variant;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use depot_core_manifest::{validate_manifest, Manifest, ManifestIndex};

use crate::config::CacheConfig;
use crate::error::{DepotError, Result};
use crate::sync::transport::{is_remote_url, Transport};
use container::ContainerHandle;
use registry::Registry;
use resource::ResourceHandle;

pub use handle::{CompletionListener, LoadOutcome, LoadState, Payload};
pub use opener::{
    locate, run_with_mode, spawn_background, ContainerOpener, Located, OpenedContainer, Pending,
    Ready, StoreOpener,
};
pub use registry::HandleId;
pub use variant::remap_variant;

/// Tag type for resource handle ids
#[derive(Debug)]
pub enum ResourceKey {}

/// Tag type for container handle ids
#[derive(Debug)]
pub enum ContainerKey {}

pub type ResourceId = HandleId<ResourceKey>;
pub type ContainerId = HandleId<ContainerKey>;

/// What a tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub resources_unloaded: usize,
    pub containers_unloaded: usize,
}

pub struct ResourceCache {
    config: CacheConfig,
    opener: Box<dyn ContainerOpener>,
    transport: Arc<dyn Transport>,
    index: ManifestIndex,
    search_paths: Vec<String>,
    resources: Registry<ResourceKey, ResourceHandle>,
    containers: Registry<ContainerKey, ContainerHandle>,
    /// Containers waiting in `Init` for an open slot
    open_queue: VecDeque<ContainerId>,
}

impl ResourceCache {
    pub fn new(
        config: CacheConfig,
        opener: Box<dyn ContainerOpener>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            opener,
            transport,
            index: ManifestIndex::default(),
            search_paths: Vec::new(),
            resources: Registry::new(),
            containers: Registry::new(),
            open_queue: VecDeque::new(),
        }
    }

    /// Cache using the built-in packed container format
    pub fn with_store_opener(config: CacheConfig, transport: Arc<dyn Transport>) -> Self {
        let opener = Box::new(StoreOpener::new(config.clone()));
        Self::new(config, opener, transport)
    }

    /// Replace the manifest index wholesale. Live handles are unaffected.
    ///
    /// A manifest that fails validation is rejected and the current index kept.
    pub fn set_manifest(&mut self, manifest: &Manifest) -> Result<()> {
        validate_manifest(manifest)?;
        self.index = manifest.index();
        tracing::info!(
            resources = self.index.resource_count(),
            variants = self.index.variants().len(),
            "manifest loaded"
        );
        Ok(())
    }

    pub fn add_search_path<S: Into<String>>(&mut self, prefix: S) {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        if !self.search_paths.contains(&prefix) {
            self.search_paths.push(prefix);
        }
    }

    /// Drop the manifest index and search paths. Live handles keep running.
    pub fn clear(&mut self) {
        self.index = ManifestIndex::default();
        self.search_paths.clear();
    }

    pub fn all_resource_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.index.resource_paths().map(str::to_string).collect();
        paths.sort();
        paths
    }

    /// Known resource path for `name`, trying each search path prefix
    fn resolve_path(&self, name: &str) -> Option<String> {
        if self.index.contains_resource(name) {
            return Some(name.to_string());
        }
        self.search_paths
            .iter()
            .map(|prefix| format!("{}/{}", prefix, name))
            .find(|candidate| self.index.contains_resource(candidate))
    }

    /// Get (or start) the load of `name` as `kind`. Every call takes one
    /// reference that must be returned with [`ResourceCache::release`].
    pub fn load(&mut self, name: &str, kind: &str) -> ResourceId {
        let path = self.resolve_path(name).unwrap_or_else(|| name.to_string());

        if let Some(id) = self.resources.find(&path) {
            self.resources.retain(id);
            tracing::debug!(resource = %path, refs = self.resources.refs(id), "reusing resource");
            return id;
        }

        let handle = self.create_resource(path.clone(), kind);
        let id = self.resources.insert(path, handle);
        self.resources.retain(id);
        if let Some(handle) = self.resources.get_mut(id) {
            handle.notify();
        }
        id
    }

    fn create_resource(&mut self, path: String, kind: &str) -> ResourceHandle {
        let kind = kind.to_string();

        if path.trim().is_empty() {
            tracing::warn!(resource = ?path, "blank resource name");
            let error = DepotError::InvalidName(path.clone());
            return ResourceHandle::unresolved(path, kind, error);
        }

        if let Some(container) = self.index.container_for(&path).map(str::to_string) {
            let dependencies: Vec<String> = self.index.dependencies_of(&container).to_vec();
            let primary = self.load_container(&container);
            let dependencies = dependencies
                .iter()
                .map(|dep| self.load_container(dep))
                .collect();
            tracing::info!(resource = %path, container = %container, "loading resource");
            return ResourceHandle::from_container(path, kind, primary, dependencies);
        }

        if is_remote_url(&path) {
            tracing::info!(resource = %path, "loading remote resource");
            return ResourceHandle::from_remote(path, kind, self.transport.as_ref());
        }

        if let Some(file) = self.find_file(&path) {
            tracing::info!(resource = %path, file = %file.display(), "loading resource from file");
            return ResourceHandle::from_file(path, kind, file, self.config.open_mode);
        }

        tracing::warn!(resource = %path, "resource not found");
        let error = DepotError::Resolution(path.clone());
        ResourceHandle::unresolved(path, kind, error)
    }

    /// Plain file for a direct-file resource: update dir, base dir, then as given
    fn find_file(&self, path: &str) -> Option<PathBuf> {
        [&self.config.update_dir, &self.config.base_dir]
            .into_iter()
            .map(|dir| dir.join(path))
            .chain(std::iter::once(PathBuf::from(path)))
            .find(|candidate| candidate.is_file())
    }

    /// Lookup-or-create a container handle and take one reference to it
    fn load_container(&mut self, name: &str) -> ContainerId {
        let storage_name = remap_variant(name, self.index.variants(), &self.config.active_variants);

        let id = match self.containers.find(storage_name) {
            Some(id) => id,
            None => {
                let mut handle = ContainerHandle::new(storage_name.to_string());
                if self.open_queue.is_empty() && self.has_open_slot() {
                    handle.begin(self.opener.as_ref());
                    self.containers.insert(storage_name.to_string(), handle)
                } else {
                    let id = self.containers.insert(storage_name.to_string(), handle);
                    tracing::debug!(container = %storage_name, "container open queued");
                    self.open_queue.push_back(id);
                    id
                }
            }
        };
        self.containers.retain(id);
        id
    }

    fn has_open_slot(&self) -> bool {
        let limit = self.config.max_opening_containers;
        limit == 0 || self.opening_containers() < limit
    }

    fn opening_containers(&self) -> usize {
        self.containers
            .ids()
            .into_iter()
            .filter(|&id| {
                self.containers
                    .get(id)
                    .is_some_and(|h| h.state() == LoadState::LoadingContainer)
            })
            .count()
    }

    /// Begin queued container opens while slots are free, oldest first
    fn start_queued_opens(&mut self) {
        while !self.open_queue.is_empty() && self.has_open_slot() {
            let Some(id) = self.open_queue.pop_front() else {
                break;
            };
            if let Some(handle) = self.containers.get_mut(id) {
                handle.begin(self.opener.as_ref());
            }
        }
    }

    /// Drop one reference. Teardown waits for the next tick's sweep.
    pub fn release(&mut self, id: ResourceId) {
        match self.resources.release(id) {
            Some(refs) => {
                tracing::debug!(resource = ?self.resources.name(id), refs, "released resource");
            }
            None => tracing::warn!(handle = ?id, "release of unknown resource handle"),
        }
    }

    /// Advance every in-flight handle one step, then reclaim unused handles
    pub fn tick(&mut self) -> TickReport {
        self.start_queued_opens();
        for id in self.containers.ids() {
            if let Some(handle) = self.containers.get_mut(id) {
                handle.advance();
            }
        }

        let containers = &self.containers;
        for id in self.resources.ids() {
            if let Some(handle) = self.resources.get_mut(id) {
                handle.advance(containers);
                handle.notify();
            }
        }

        self.resources.mark_unused();
        let unloaded_resources = self.resources.sweep();
        let mut report = TickReport {
            resources_unloaded: unloaded_resources.len(),
            ..Default::default()
        };
        for (_, mut handle) in unloaded_resources {
            for container in handle.containers() {
                self.containers.release(container);
            }
            handle.unload();
        }

        self.containers.mark_unused();
        for (_, mut handle) in self.containers.sweep() {
            handle.unload();
            report.containers_unloaded += 1;
        }
        report
    }

    /// Run `listener` once the resource settles (immediately if it already has)
    pub fn on_complete(&mut self, id: ResourceId, listener: CompletionListener) {
        match self.resources.get_mut(id) {
            Some(handle) => handle.on_complete(listener),
            None => tracing::warn!(handle = ?id, "listener registered on unknown resource handle"),
        }
    }

    pub fn state(&self, id: ResourceId) -> LoadState {
        self.resources
            .get(id)
            .map(|h| h.state())
            .unwrap_or(LoadState::Unloaded)
    }

    pub fn is_done(&self, id: ResourceId) -> bool {
        self.state(id).is_done()
    }

    pub fn error(&self, id: ResourceId) -> Option<&DepotError> {
        self.resources.get(id).and_then(|h| h.error())
    }

    pub fn payload(&self, id: ResourceId) -> Option<&Payload> {
        self.resources.get(id).and_then(|h| h.payload())
    }

    pub fn path(&self, id: ResourceId) -> Option<&str> {
        self.resources.get(id).map(|h| h.path())
    }

    pub fn kind(&self, id: ResourceId) -> Option<&str> {
        self.resources.get(id).map(|h| h.kind())
    }

    /// Load progress in `[0, 1]`
    pub fn progress(&self, id: ResourceId) -> f32 {
        match self.resources.get(id) {
            Some(handle) => handle.progress(&self.containers),
            None => 1.0,
        }
    }

    pub fn refs(&self, id: ResourceId) -> u32 {
        self.resources.refs(id)
    }

    /// Resource handle currently tracked under `name`
    pub fn find(&self, name: &str) -> Option<ResourceId> {
        let path = self.resolve_path(name).unwrap_or_else(|| name.to_string());
        self.resources.find(&path)
    }

    /// Load state of the container handle tracked under its storage name
    pub fn container_state(&self, storage_name: &str) -> Option<LoadState> {
        self.containers
            .find(storage_name)
            .and_then(|id| self.containers.get(id))
            .map(|h| h.state())
    }

    /// Payload names of an opened container, sorted
    pub fn container_payloads(&self, storage_name: &str) -> Option<Vec<String>> {
        let id = self.containers.find(storage_name)?;
        let opened = self.containers.get(id)?.opened()?;
        let mut names = opened.payload_names();
        names.sort();
        Some(names)
    }

    pub fn container_refs(&self, storage_name: &str) -> u32 {
        self.containers
            .find(storage_name)
            .map(|id| self.containers.refs(id))
            .unwrap_or(0)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }
}
