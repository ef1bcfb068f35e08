//! Handle state shared by resources and containers

use std::fmt;
use std::sync::Arc;

use crate::error::DepotError;

/// Per-handle load state. Never moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Init,
    LoadingContainer,
    LoadingPayload,
    /// Terminal for "in use"; may carry an error
    Loaded,
    /// Terminal for "reclaimed"
    Unloaded,
}

impl LoadState {
    /// Loaded (with or without error) or unloaded
    pub fn is_done(self) -> bool {
        matches!(self, LoadState::Loaded | LoadState::Unloaded)
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadState::Init => "init",
            LoadState::LoadingContainer => "loading-container",
            LoadState::LoadingPayload => "loading-payload",
            LoadState::Loaded => "loaded",
            LoadState::Unloaded => "unloaded",
        };
        f.write_str(s)
    }
}

/// Bytes extracted for a resource, tagged with the type they were requested as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub kind: String,
    pub bytes: Arc<[u8]>,
}

impl Payload {
    pub fn new<K: Into<String>>(kind: K, bytes: Vec<u8>) -> Self {
        Self {
            kind: kind.into(),
            bytes: Arc::from(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// What a completion listener sees once a resource settles
pub struct LoadOutcome<'a> {
    pub path: &'a str,
    pub result: std::result::Result<&'a Payload, &'a DepotError>,
}

pub type CompletionListener = Box<dyn for<'a> FnOnce(&LoadOutcome<'a>)>;

/// Listeners that run at most once, then are cleared
#[derive(Default)]
pub(crate) struct Completion {
    listeners: Vec<CompletionListener>,
    fired: bool,
}

impl Completion {
    /// Queue a listener; hands it back if the completion already fired
    pub fn register(&mut self, listener: CompletionListener) -> Option<CompletionListener> {
        if self.fired {
            Some(listener)
        } else {
            self.listeners.push(listener);
            None
        }
    }

    /// Mark fired and take every queued listener. Later calls return nothing.
    pub fn fire(&mut self) -> Vec<CompletionListener> {
        self.fired = true;
        std::mem::take(&mut self.listeners)
    }

    pub fn is_fired(&self) -> bool {
        self.fired
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("listeners", &self.listeners.len())
            .field("fired", &self.fired)
            .finish()
    }
}
