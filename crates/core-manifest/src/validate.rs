//! Structural validation for manifests

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::version::VersionManifest;
use std::collections::HashSet;

/// Reject names that would escape the directory they are joined onto:
/// absolute paths, drive prefixes and `..` components
pub fn validate_relative_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("name cannot be empty"));
    }
    if name.starts_with('/') || name.starts_with('\\') {
        return Err(Error::validation(format!("absolute name: {}", name)));
    }
    let bytes = name.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(Error::validation(format!("drive-qualified name: {}", name)));
    }
    if name.split(['/', '\\']).any(|part| part == "..") {
        return Err(Error::validation(format!("name escapes its directory: {}", name)));
    }
    Ok(())
}

/// Check every index in the manifest and the uniqueness of directories and resource paths
pub fn validate_manifest(manifest: &Manifest) -> Result<()> {
    let mut seen_dirs = HashSet::with_capacity(manifest.directories.len());
    for dir in &manifest.directories {
        if !seen_dirs.insert(dir.as_str()) {
            return Err(Error::validation(format!("duplicate directory: {}", dir)));
        }
    }

    let container_count = manifest.containers.len();
    for container in &manifest.containers {
        if container.name.is_empty() {
            return Err(Error::validation("container name cannot be empty"));
        }
        validate_relative_name(&container.name)?;
        if let Some(&bad) = container
            .dependency_indices
            .iter()
            .find(|&&i| i >= container_count)
        {
            return Err(Error::IndexOutOfRange {
                table: "containers",
                index: bad,
                len: container_count,
            });
        }
    }

    let mut seen_paths = HashSet::with_capacity(manifest.resources.len());
    for resource in &manifest.resources {
        if resource.directory_index >= manifest.directories.len() {
            return Err(Error::IndexOutOfRange {
                table: "directories",
                index: resource.directory_index,
                len: manifest.directories.len(),
            });
        }
        if resource.container_index >= container_count {
            return Err(Error::IndexOutOfRange {
                table: "containers",
                index: resource.container_index,
                len: container_count,
            });
        }
        if let Some(path) = manifest.resource_path(resource) {
            if !seen_paths.insert(path.clone()) {
                return Err(Error::validation(format!("duplicate resource path: {}", path)));
            }
        }
    }

    Ok(())
}

/// Check that record names are present, unique and stay inside the save directory
pub fn validate_version_manifest(manifest: &VersionManifest) -> Result<()> {
    let mut seen = HashSet::with_capacity(manifest.records.len());
    for record in &manifest.records {
        if record.name.is_empty() {
            return Err(Error::validation("record name cannot be empty"));
        }
        validate_relative_name(&record.name)?;
        if !seen.insert(record.name.as_str()) {
            return Err(Error::validation(format!("duplicate record: {}", record.name)));
        }
    }
    Ok(())
}
