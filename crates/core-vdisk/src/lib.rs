//! Packed Store ("virtual disk") for Depot
//!
//! Many small container files are consolidated into one randomly seekable file.
//! The header is the same record encoding used by version manifests, so a store
//! can be listed, diffed and opened without touching its payloads.
//!
//! # Example
//!
//! ```no_run
//! use depot_core_vdisk::PackedStore;
//! use depot_core_manifest::ContentRecord;
//! use std::path::Path;
//!
//! let staging = Path::new("/data/staging");
//! let records = vec![ContentRecord::new("ui.pack", 1024, "9f2c...")];
//! let store = PackedStore::create("/data/res", records, staging).unwrap();
//!
//! let bytes = store.read_payload("ui.pack").unwrap();
//! assert_eq!(bytes.len(), 1024);
//! ```

pub mod error;
pub mod store;

pub use error::{Error, Result};
pub use store::{Extent, PackedStore};
