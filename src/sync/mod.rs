//! Content synchronisation engine
//!
//! Keeps a local content directory in step with a remote source: diff the
//! version manifests, fetch what changed with resumable verified downloads,
//! then fold the results into the packed store.

pub mod build;
pub mod diff;
pub mod download;
pub mod orchestrator;
pub mod scheduler;
pub mod transport;

pub use build::{build_versions, collect_containers};
pub use diff::{diff, is_newer, store_needs_fetch};
pub use download::{DownloadTask, TaskState};
pub use orchestrator::{SyncFailure, SyncOrchestrator, SyncStep};
pub use scheduler::Downloader;
pub use transport::{
    is_remote_url, join_url, FileTransport, MemoryTransport, SharedBuffer, Transfer,
    TransferStatus, Transport,
};
