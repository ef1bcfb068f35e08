//! Core manifest data structures for Depot
//!
//! Passive data shared by the resource cache and the content sync engine.
//!
//! # Key Concepts
//!
//! - **Manifest**: directory table, resource → container index, container → dependency index
//! - **Content Record**: name + length + hash describing one stored item
//! - **Version Manifest**: versioned, ordered list of content records; record 0 is the packed store
//!
//! # Example
//!
//! ```
//! use depot_core_manifest::{ContentRecord, Manifest, VersionManifest};
//!
//! let mut manifest = Manifest::new();
//! let dir = manifest.add_directory("Assets/UI");
//! let shared = manifest.add_container("shared.pack", &[], 50, "h2");
//! let ui = manifest.add_container("ui.pack", &[shared], 100, "h1");
//! manifest.add_resource("title.png", dir, ui);
//!
//! let index = manifest.index();
//! assert_eq!(index.container_for("Assets/UI/title.png"), Some("ui.pack"));
//!
//! let mut versions = VersionManifest::new(2);
//! versions.push(ContentRecord::new("res", 150, "h0"));
//! assert_eq!(versions.store_record().unwrap().name, "res");
//! ```

pub mod codec;
pub mod error;
pub mod manifest;
pub mod record;
pub mod validate;
pub mod version;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use manifest::{ContainerRef, Manifest, ManifestIndex, ResourceRef};
pub use record::{file_name_of, ContentRecord};
pub use validate::{validate_manifest, validate_relative_name, validate_version_manifest};
pub use version::VersionManifest;

/// File name of the packed store ("virtual disk")
pub const STORE_FILE_NAME: &str = "res";

/// File name of the version manifest
pub const VERSION_FILE_NAME: &str = "ver";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        assert_eq!(STORE_FILE_NAME, "res");
        assert_eq!(VERSION_FILE_NAME, "ver");
    }
}
