/*!
 * Version diff: which remote records need fetching
 */

use depot_core_manifest::{ContentRecord, VersionManifest};
use depot_core_vdisk::PackedStore;

/// Records of `remote` (index 0 excluded) missing from both `base` and `store`
pub fn diff(
    base: &VersionManifest,
    remote: &VersionManifest,
    store: Option<&PackedStore>,
) -> Vec<ContentRecord> {
    remote
        .records
        .iter()
        .skip(1)
        .filter(|record| {
            let in_base = base
                .get(&record.name)
                .is_some_and(|local| local.same_content(record));
            let in_store = store.is_some_and(|s| s.contains(record));
            !(in_base || in_store)
        })
        .cloned()
        .collect()
}

/// The remote store record differs from the local one (or none exists locally)
pub fn store_needs_fetch(base: &VersionManifest, remote: &VersionManifest) -> bool {
    match (base.store_record(), remote.store_record()) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(local), Some(remote)) => !local.same_content(remote),
    }
}

/// A remote manifest is newer when its version is strictly greater
pub fn is_newer(base: &VersionManifest, remote: &VersionManifest) -> bool {
    remote.version > base.version
}
