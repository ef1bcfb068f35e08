/*!
 * Depot - versioned content delivery
 *
 * Two engines sharing one content layout:
 * - A reference-counted resource/container cache that resolves logical
 *   resource names through a manifest and loads them out of containers
 * - A content synchronisation engine that diffs version manifests, fetches
 *   changed items with resumable verified downloads, and maintains a packed
 *   single-file store
 */

pub mod cache;
pub mod checksum;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod sync;

// Re-export commonly used types
pub use cache::{LoadState, Payload, ResourceCache, ResourceId};
pub use config::{CacheConfig, DepotConfig, OpenMode, SyncConfig, VerifyMode};
pub use depot_core_manifest::{ContentRecord, Manifest, VersionManifest};
pub use depot_core_vdisk::PackedStore;
pub use error::{DepotError, Result};
pub use sync::{Downloader, SyncOrchestrator, SyncStep};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
