/*!
 * Build-side version generation
 *
 * Produces the packed store and the version manifest for a directory of
 * container files. Record 0 of the manifest always describes the store.
 */

use std::path::Path;

use depot_core_manifest::{ContentRecord, VersionManifest, STORE_FILE_NAME, VERSION_FILE_NAME};
use depot_core_vdisk::PackedStore;
use walkdir::WalkDir;

use crate::checksum::{calculate_checksum, HashAlgorithm};
use crate::error::{DepotError, Result};

/// Every regular file under `dir` except the store and version files,
/// as sorted `/`-separated relative names
pub fn collect_containers(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| DepotError::Io(std::io::Error::other(e.to_string())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if name == STORE_FILE_NAME || name == VERSION_FILE_NAME {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Record for one file under `dir`
pub fn record_for(dir: &Path, name: &str, algorithm: HashAlgorithm) -> Result<ContentRecord> {
    let path = dir.join(name);
    let length = std::fs::metadata(&path)?.len();
    let hash = calculate_checksum(&path, algorithm)?;
    Ok(ContentRecord::new(name, length, hash))
}

/// Write `res` and `ver` into `output_dir` for the named containers.
///
/// Names without a file in `output_dir` are skipped.
pub fn build_versions(
    output_dir: &Path,
    container_names: &[String],
    version: i32,
    algorithm: HashAlgorithm,
) -> Result<VersionManifest> {
    let mut records = Vec::with_capacity(container_names.len());
    for name in container_names {
        if !output_dir.join(name).is_file() {
            tracing::warn!(container = %name, "container file missing, skipped");
            continue;
        }
        records.push(record_for(output_dir, name, algorithm)?);
    }

    let store_path = output_dir.join(STORE_FILE_NAME);
    PackedStore::create(&store_path, records.clone(), output_dir)?;
    let store_record = record_for(output_dir, STORE_FILE_NAME, algorithm)?;

    let mut manifest = VersionManifest::new(version);
    manifest.push(store_record);
    manifest.records.extend(records);
    manifest.save(&output_dir.join(VERSION_FILE_NAME))?;

    tracing::info!(
        dir = %output_dir.display(),
        version,
        containers = manifest.len() - 1,
        "built version"
    );
    Ok(manifest)
}
