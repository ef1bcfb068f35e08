//! Resource handles: one logical resource load, backed by a container,
//! a plain file, or a remote transfer

use std::path::PathBuf;
use std::task::Poll;

use super::container::ContainerHandle;
use super::handle::{Completion, CompletionListener, LoadOutcome, LoadState, Payload};
use super::opener::{read_file, Pending};
use super::registry::{Registry, Settle};
use super::{ContainerId, ContainerKey};
use crate::config::OpenMode;
use crate::error::DepotError;
use crate::sync::transport::{SharedBuffer, Transfer, TransferStatus, Transport};

/// Share of progress attributed to opening containers
const CONTAINER_PROGRESS_SHARE: f32 = 0.3;

pub(crate) enum ResourceSource {
    /// Payload extracted from an opened container once it and its
    /// dependencies are loaded
    Container {
        container: ContainerId,
        dependencies: Vec<ContainerId>,
        pending: Option<Box<dyn Pending<Payload>>>,
    },
    /// Bytes fetched through the transport into memory
    Remote {
        url: String,
        transfer: Box<dyn Transfer>,
        buffer: SharedBuffer,
    },
    /// A plain file on disk
    DirectFile {
        path: PathBuf,
        pending: Box<dyn Pending<Payload>>,
    },
    /// Nothing to load; the handle settled with an error at creation
    Unresolved,
}

pub(crate) struct ResourceHandle {
    path: String,
    kind: String,
    state: LoadState,
    payload: Option<Payload>,
    error: Option<DepotError>,
    completion: Completion,
    source: ResourceSource,
}

impl ResourceHandle {
    fn with_source(path: String, kind: String, state: LoadState, source: ResourceSource) -> Self {
        Self {
            path,
            kind,
            state,
            payload: None,
            error: None,
            completion: Completion::default(),
            source,
        }
    }

    pub fn from_container(
        path: String,
        kind: String,
        container: ContainerId,
        dependencies: Vec<ContainerId>,
    ) -> Self {
        let source = ResourceSource::Container {
            container,
            dependencies,
            pending: None,
        };
        Self::with_source(path, kind, LoadState::Init, source)
    }

    pub fn from_remote(path: String, kind: String, transport: &dyn Transport) -> Self {
        let buffer = SharedBuffer::new();
        let transfer = transport.open(&path, 0, Box::new(buffer.clone()));
        let source = ResourceSource::Remote {
            url: path.clone(),
            transfer,
            buffer,
        };
        Self::with_source(path, kind, LoadState::LoadingPayload, source)
    }

    pub fn from_file(path: String, kind: String, file: PathBuf, mode: OpenMode) -> Self {
        let pending = read_file(mode, &file, &kind);
        let source = ResourceSource::DirectFile {
            path: file,
            pending,
        };
        Self::with_source(path, kind, LoadState::LoadingPayload, source)
    }

    pub fn unresolved(path: String, kind: String, error: DepotError) -> Self {
        let mut handle = Self::with_source(path, kind, LoadState::Loaded, ResourceSource::Unresolved);
        handle.error = Some(error);
        handle
    }

    /// Every container this resource holds a reference to
    pub fn containers(&self) -> Vec<ContainerId> {
        match &self.source {
            ResourceSource::Container {
                container,
                dependencies,
                ..
            } => std::iter::once(*container)
                .chain(dependencies.iter().copied())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// One step of the state machine
    pub fn advance(&mut self, containers: &Registry<ContainerKey, ContainerHandle>) {
        match self.state {
            LoadState::Init => {
                self.state = LoadState::LoadingContainer;
                self.advance_containers(containers);
            }
            LoadState::LoadingContainer => self.advance_containers(containers),
            LoadState::LoadingPayload => self.advance_payload(),
            _ => {}
        }
    }

    fn advance_containers(&mut self, containers: &Registry<ContainerKey, ContainerHandle>) {
        let ResourceSource::Container {
            container,
            dependencies,
            pending,
        } = &mut self.source
        else {
            return;
        };

        for id in std::iter::once(&*container).chain(dependencies.iter()) {
            let Some(handle) = containers.get(*id) else {
                self.error = Some(DepotError::open(
                    containers.name(*id).unwrap_or("<reclaimed>"),
                    "container handle no longer tracked",
                ));
                self.state = LoadState::Loaded;
                return;
            };
            if let Some(err) = handle.error() {
                self.error = Some(DepotError::open(handle.storage_name(), err.to_string()));
                self.state = LoadState::Loaded;
                return;
            }
            if !handle.is_loaded_ok() {
                return;
            }
        }

        let Some(primary) = containers.get(*container) else {
            return;
        };
        let Some(opened) = primary.opened() else {
            return;
        };
        if !opened.has_payload(&self.path, &self.kind) {
            self.error = Some(DepotError::Payload {
                container: primary.storage_name().to_string(),
                payload: self.path.clone(),
            });
            self.state = LoadState::Loaded;
            return;
        }

        tracing::debug!(resource = %self.path, container = %primary.storage_name(), "loading payload");
        *pending = Some(opened.load_payload(&self.path, &self.kind));
        self.state = LoadState::LoadingPayload;
    }

    fn advance_payload(&mut self) {
        let result = match &mut self.source {
            ResourceSource::Container {
                pending: Some(pending),
                ..
            } => match pending.poll() {
                Poll::Pending => return,
                Poll::Ready(result) => result,
            },
            ResourceSource::DirectFile { pending, path } => match pending.poll() {
                Poll::Pending => return,
                Poll::Ready(result) => result.map_err(|err| {
                    DepotError::open(path.display().to_string(), err.to_string())
                }),
            },
            ResourceSource::Remote {
                url,
                transfer,
                buffer,
            } => match transfer.poll_status() {
                TransferStatus::Pending => return,
                TransferStatus::Done => Ok(Payload::new(self.kind.clone(), buffer.take())),
                TransferStatus::Failed(reason) => Err(DepotError::transfer(url.clone(), reason)),
            },
            _ => return,
        };

        match result {
            Ok(payload) => {
                tracing::info!(resource = %self.path, bytes = payload.len(), "resource loaded");
                self.payload = Some(payload);
            }
            Err(err) => {
                tracing::warn!(resource = %self.path, error = %err, "resource failed to load");
                self.error = Some(err);
            }
        }
        self.state = LoadState::Loaded;
    }

    /// Run completion listeners if the handle just reached `Loaded`
    pub fn notify(&mut self) {
        if self.state != LoadState::Loaded || self.completion.is_fired() {
            return;
        }
        let listeners = self.completion.fire();
        if let Some(outcome) = self.outcome() {
            for listener in listeners {
                listener(&outcome);
            }
        }
    }

    /// Queue `listener`, or run it now when the handle already completed
    pub fn on_complete(&mut self, listener: CompletionListener) {
        if let Some(listener) = self.completion.register(listener) {
            if let Some(outcome) = self.outcome() {
                listener(&outcome);
            }
        }
    }

    fn outcome(&self) -> Option<LoadOutcome<'_>> {
        let result = match (&self.payload, &self.error) {
            (_, Some(err)) => Err(err),
            (Some(payload), None) => Ok(payload),
            (None, None) => return None,
        };
        Some(LoadOutcome {
            path: &self.path,
            result,
        })
    }

    pub fn unload(&mut self) {
        if let ResourceSource::Remote { transfer, .. } = &mut self.source {
            transfer.abort();
        }
        self.payload = None;
        self.state = LoadState::Unloaded;
        tracing::info!(resource = %self.path, "resource unloaded");
    }

    pub fn progress(&self, containers: &Registry<ContainerKey, ContainerHandle>) -> f32 {
        match self.state {
            LoadState::Init => 0.0,
            LoadState::LoadingContainer => {
                let ids = self.containers();
                if ids.is_empty() {
                    return 0.0;
                }
                let loaded = ids
                    .iter()
                    .filter(|id| containers.get(**id).is_some_and(|c| c.state().is_done()))
                    .count();
                loaded as f32 / ids.len() as f32 * CONTAINER_PROGRESS_SHARE
            }
            LoadState::LoadingPayload => CONTAINER_PROGRESS_SHARE,
            LoadState::Loaded | LoadState::Unloaded => 1.0,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn error(&self) -> Option<&DepotError> {
        self.error.as_ref()
    }
}

impl Settle for ResourceHandle {
    fn is_settled(&self) -> bool {
        self.state.is_done()
    }
}
