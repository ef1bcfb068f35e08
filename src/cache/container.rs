//! Container handles: one opened container per storage name

use std::task::Poll;

use super::handle::LoadState;
use super::opener::{ContainerOpener, OpenedContainer, Pending};
use super::registry::Settle;
use crate::error::DepotError;

pub(crate) struct ContainerHandle {
    storage_name: String,
    state: LoadState,
    pending: Option<Box<dyn Pending<Box<dyn OpenedContainer>>>>,
    opened: Option<Box<dyn OpenedContainer>>,
    error: Option<DepotError>,
}

impl ContainerHandle {
    pub fn new(storage_name: String) -> Self {
        Self {
            storage_name,
            state: LoadState::Init,
            pending: None,
            opened: None,
            error: None,
        }
    }

    /// Ask the opener for the container. No-op unless still in `Init`.
    pub fn begin(&mut self, opener: &dyn ContainerOpener) {
        if self.state != LoadState::Init {
            return;
        }
        tracing::debug!(container = %self.storage_name, "opening container");
        self.pending = Some(opener.open(&self.storage_name));
        self.state = LoadState::LoadingContainer;
    }

    /// One step: poll the pending open
    pub fn advance(&mut self) {
        if self.state != LoadState::LoadingContainer {
            return;
        }
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        match pending.poll() {
            Poll::Pending => {}
            Poll::Ready(Ok(opened)) => {
                tracing::info!(container = %self.storage_name, "container loaded");
                self.opened = Some(opened);
                self.finish();
            }
            Poll::Ready(Err(err)) => {
                tracing::warn!(container = %self.storage_name, error = %err, "container failed to load");
                self.error = Some(err);
                self.finish();
            }
        }
    }

    fn finish(&mut self) {
        self.pending = None;
        self.state = LoadState::Loaded;
    }

    pub fn unload(&mut self) {
        self.opened = None;
        self.pending = None;
        self.state = LoadState::Unloaded;
        tracing::info!(container = %self.storage_name, "container unloaded");
    }

    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn error(&self) -> Option<&DepotError> {
        self.error.as_ref()
    }

    pub fn opened(&self) -> Option<&dyn OpenedContainer> {
        self.opened.as_deref()
    }

    pub fn is_loaded_ok(&self) -> bool {
        self.state == LoadState::Loaded && self.error.is_none()
    }
}

impl Settle for ContainerHandle {
    fn is_settled(&self) -> bool {
        self.state.is_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::handle::Payload;
    use crate::cache::opener::Ready;
    use crate::error::Result;

    struct Empty;

    impl OpenedContainer for Empty {
        fn has_payload(&self, _name: &str, _kind: &str) -> bool {
            false
        }

        fn load_payload(&self, name: &str, _kind: &str) -> Box<dyn Pending<Payload>> {
            Box::new(Ready::new(Err(DepotError::Payload {
                container: "empty".into(),
                payload: name.into(),
            })))
        }

        fn payload_names(&self) -> Vec<String> {
            Vec::new()
        }
    }

    struct FixedOpener {
        fail: bool,
    }

    impl ContainerOpener for FixedOpener {
        fn open(&self, storage_name: &str) -> Box<dyn Pending<Box<dyn OpenedContainer>>> {
            let result: Result<Box<dyn OpenedContainer>> = if self.fail {
                Err(DepotError::open(storage_name, "missing"))
            } else {
                Ok(Box::new(Empty))
            };
            Box::new(Ready::new(result))
        }
    }

    #[test]
    fn test_open_then_unload() {
        let mut handle = ContainerHandle::new("c1.pack".into());
        assert!(!handle.is_settled());
        handle.begin(&FixedOpener { fail: false });
        assert_eq!(handle.state(), LoadState::LoadingContainer);
        handle.advance();
        assert!(handle.is_loaded_ok());
        assert!(handle.opened().is_some());

        handle.unload();
        assert_eq!(handle.state(), LoadState::Unloaded);
        assert!(handle.opened().is_none());
    }

    #[test]
    fn test_failed_open_settles_with_error() {
        let mut handle = ContainerHandle::new("c1.pack".into());
        handle.begin(&FixedOpener { fail: true });
        handle.advance();
        assert_eq!(handle.state(), LoadState::Loaded);
        assert!(handle.is_settled());
        assert!(matches!(handle.error(), Some(DepotError::Open { .. })));
    }
}
