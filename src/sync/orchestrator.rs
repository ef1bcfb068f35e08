/*!
 * Sync orchestrator
 *
 * Drives one update of the local content directory:
 *
 * 1. `FetchVersions`: the remote version manifest lands in `save_dir/ver.tmp`
 * 2. `Prepare`: diff against the local manifest, the packed store and loose files
 * 3. `Download`: the batch scheduler fetches every changed item
 * 4. `Finalize`: loose files are folded into the packed store and
 *    `ver.tmp` is promoted to `ver`
 *
 * Each step advances only from [`SyncOrchestrator::tick`].
 */

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use depot_core_manifest::{
    validate_version_manifest, ContentRecord, VersionManifest, STORE_FILE_NAME, VERSION_FILE_NAME,
};
use depot_core_vdisk::PackedStore;

use crate::checksum::{calculate_checksum, hashes_equal};
use crate::config::{SyncConfig, VerifyMode};
use crate::error::{DepotError, Result};
use crate::sync::diff::diff;
use crate::sync::scheduler::{Downloader, ProgressListener};
use crate::sync::transport::{join_url, Transfer, TransferStatus, Transport};

const PENDING_VERSION_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    Idle,
    FetchVersions,
    Prepare,
    Download,
    Finalize,
    Completed,
    Failed,
}

impl SyncStep {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncStep::Completed | SyncStep::Failed)
    }
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStep::Idle => "idle",
            SyncStep::FetchVersions => "fetch-versions",
            SyncStep::Prepare => "prepare",
            SyncStep::Download => "download",
            SyncStep::Finalize => "finalize",
            SyncStep::Completed => "completed",
            SyncStep::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One item that could not be synchronised
#[derive(Debug)]
pub struct SyncFailure {
    pub name: String,
    pub error: DepotError,
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.error)
    }
}

pub struct SyncOrchestrator {
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    base_dir: Option<PathBuf>,
    step: SyncStep,
    version_transfer: Option<Box<dyn Transfer>>,
    local: VersionManifest,
    remote: Option<VersionManifest>,
    downloader: Downloader,
    failures: Vec<SyncFailure>,
}

impl SyncOrchestrator {
    pub fn new(config: SyncConfig, transport: Arc<dyn Transport>) -> Self {
        let downloader = Downloader::new(Arc::clone(&transport), &config);
        Self {
            config,
            transport,
            base_dir: None,
            step: SyncStep::Idle,
            version_transfer: None,
            local: VersionManifest::default(),
            remote: None,
            downloader,
            failures: Vec::new(),
        }
    }

    /// Shipped read-only content, consulted when `save_dir` has no `ver`
    pub fn with_base_dir<P: Into<PathBuf>>(mut self, base_dir: P) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    pub fn on_progress(&mut self, listener: ProgressListener) {
        self.downloader.on_progress(listener);
    }

    fn save_path(&self, name: &str) -> PathBuf {
        self.config.save_dir.join(name)
    }

    fn pending_version_path(&self) -> PathBuf {
        self.save_path(&format!("{}{}", VERSION_FILE_NAME, PENDING_VERSION_SUFFIX))
    }

    /// Copy shipped `ver` and `res` (or the listed items when no store is
    /// shipped) into `save_dir` when the shipped version is newer.
    pub fn seed_from_base(&self, base_dir: &Path) -> Result<bool> {
        let shipped_ver = base_dir.join(VERSION_FILE_NAME);
        let Some(shipped) = VersionManifest::read_version(&shipped_ver) else {
            return Ok(false);
        };
        let local = VersionManifest::read_version(&self.save_path(VERSION_FILE_NAME));
        if local.is_some_and(|v| shipped <= v) {
            tracing::debug!(shipped, local = ?local, "local content is current, not seeding");
            return Ok(false);
        }

        let manifest = VersionManifest::load(&shipped_ver)?;
        fs::create_dir_all(&self.config.save_dir)?;

        let is_store = manifest
            .store_record()
            .is_some_and(|r| r.name == STORE_FILE_NAME);
        let names: Vec<&str> = if is_store {
            vec![STORE_FILE_NAME]
        } else {
            manifest.records.iter().map(|r| r.name.as_str()).collect()
        };
        for name in names {
            let source = base_dir.join(name);
            if !source.is_file() {
                continue;
            }
            let dest = self.save_path(name);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&source, &dest)?;
        }
        fs::copy(&shipped_ver, self.save_path(VERSION_FILE_NAME))?;

        tracing::info!(shipped, local = ?local, "seeded content from base directory");
        Ok(true)
    }

    /// Begin a new run
    pub fn start(&mut self) -> Result<()> {
        if self.config.source_url.is_empty() {
            return Err(DepotError::Config("source_url is not set".to_string()));
        }
        fs::create_dir_all(&self.config.save_dir)?;

        self.downloader.clear();
        self.failures.clear();
        self.remote = None;
        self.local = self.load_local();

        let url = join_url(&self.config.source_url, VERSION_FILE_NAME);
        let sink = File::create(self.pending_version_path())?;
        tracing::info!(url = %url, local_version = self.local.version, "fetching version manifest");
        self.version_transfer = Some(self.transport.open(&url, 0, Box::new(sink)));
        self.step = SyncStep::FetchVersions;
        Ok(())
    }

    fn load_local(&self) -> VersionManifest {
        let mut candidates = vec![self.save_path(VERSION_FILE_NAME)];
        if let Some(base) = &self.base_dir {
            candidates.push(base.join(VERSION_FILE_NAME));
        }
        for path in candidates {
            if !path.is_file() {
                continue;
            }
            match VersionManifest::load(&path) {
                Ok(manifest) => return manifest,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable version manifest"),
            }
        }
        VersionManifest::default()
    }

    /// Advance the current step; returns the step after advancing
    pub fn tick(&mut self) -> SyncStep {
        let result = match self.step {
            SyncStep::FetchVersions => self.poll_versions(),
            SyncStep::Prepare => self.prepare(),
            SyncStep::Download => {
                self.poll_downloads();
                Ok(())
            }
            SyncStep::Finalize => self.finalize(),
            _ => Ok(()),
        };
        if let Err(error) = result {
            let name = match self.step {
                SyncStep::FetchVersions | SyncStep::Prepare => VERSION_FILE_NAME,
                _ => STORE_FILE_NAME,
            };
            self.fail(name, error);
        }
        self.step
    }

    fn fail(&mut self, name: &str, error: DepotError) {
        tracing::error!(step = %self.step, name, error = %error, "sync failed");
        self.failures.push(SyncFailure {
            name: name.to_string(),
            error,
        });
        self.step = SyncStep::Failed;
    }

    fn poll_versions(&mut self) -> Result<()> {
        let Some(transfer) = self.version_transfer.as_mut() else {
            return Err(DepotError::Config("version transfer missing".to_string()));
        };
        match transfer.poll_status() {
            TransferStatus::Pending => Ok(()),
            TransferStatus::Failed(reason) => {
                self.version_transfer = None;
                Err(DepotError::transfer(VERSION_FILE_NAME, reason))
            }
            TransferStatus::Done => {
                self.version_transfer = None;
                let remote = VersionManifest::load(&self.pending_version_path())?;
                validate_version_manifest(&remote)?;
                tracing::info!(
                    local = self.local.version,
                    remote = remote.version,
                    records = remote.len(),
                    "version manifest fetched"
                );
                self.remote = Some(remote);
                self.step = SyncStep::Prepare;
                Ok(())
            }
        }
    }

    fn prepare(&mut self) -> Result<()> {
        let Some(remote) = self.remote.take() else {
            return Err(DepotError::Config("remote manifest missing".to_string()));
        };
        let result = self.queue_downloads(&remote);
        self.remote = Some(remote);
        result?;

        self.downloader.start();
        self.step = SyncStep::Download;
        Ok(())
    }

    fn queue_downloads(&mut self, remote: &VersionManifest) -> Result<()> {
        let mut store = None;
        if self.config.use_packed_store {
            let store_path = self.save_path(STORE_FILE_NAME);
            if !store_path.is_file() {
                if let Some(record) = remote.store_record() {
                    tracing::info!("no local packed store, fetching it whole");
                    self.add_download(record);
                }
                return Ok(());
            }
            store = Some(PackedStore::load(&store_path)?);
        }

        for record in diff(&self.local, remote, store.as_ref()) {
            if self.loose_file_current(&record)? {
                tracing::debug!(name = %record.name, "loose file already current");
                continue;
            }
            self.add_download(&record);
        }
        tracing::info!(
            downloads = self.downloader.len(),
            bytes = self.downloader.size(),
            "prepared downloads"
        );
        Ok(())
    }

    fn loose_file_current(&self, record: &ContentRecord) -> Result<bool> {
        let path = self.save_path(&record.name);
        let Ok(meta) = fs::metadata(&path) else {
            return Ok(false);
        };
        if !meta.is_file() || meta.len() != record.length {
            return Ok(false);
        }
        if self.config.verify == VerifyMode::Length {
            return Ok(true);
        }
        let actual = calculate_checksum(&path, self.config.hash_algorithm)?;
        Ok(hashes_equal(&actual, &record.hash))
    }

    fn add_download(&mut self, record: &ContentRecord) {
        let url = join_url(&self.config.source_url, &record.name);
        let local = self.save_path(&record.name);
        self.downloader
            .add(&url, &record.name, local, &record.hash, record.length);
    }

    fn poll_downloads(&mut self) {
        self.downloader.tick();
        if self.downloader.is_finished() {
            self.step = SyncStep::Finalize;
            return;
        }
        if self.downloader.is_settled() && self.downloader.failed_count() > 0 {
            let failed: Vec<usize> = self.downloader.failed().map(|t| t.id()).collect();
            for id in failed {
                let task = &mut self.downloader.tasks_mut()[id];
                let name = task.name().to_string();
                let error = task
                    .take_error()
                    .unwrap_or_else(|| DepotError::transfer(&name, "unknown failure"));
                self.failures.push(SyncFailure { name, error });
            }
            tracing::error!(failed = self.failures.len(), "downloads failed");
            self.step = SyncStep::Failed;
        }
    }

    fn finalize(&mut self) -> Result<()> {
        let downloaded: Vec<ContentRecord> = self
            .downloader
            .tasks()
            .iter()
            .map(|t| ContentRecord::new(t.name(), t.expected_length(), t.expected_hash()))
            .collect();

        let store_path = self.save_path(STORE_FILE_NAME);
        if self.config.use_packed_store && store_path.is_file() {
            let fetched_store = downloaded.first().is_some_and(|r| r.name == STORE_FILE_NAME);
            if !downloaded.is_empty() && !fetched_store {
                let mut store = PackedStore::load(&store_path)?;
                let preserve: Vec<String> = match &self.remote {
                    Some(remote) => store
                        .records()
                        .iter()
                        .filter(|r| remote.contains(&r.name))
                        .map(|r| r.name.clone())
                        .collect(),
                    None => Vec::new(),
                };
                store.update(&self.config.save_dir, &downloaded, &preserve)?;
            }
            let store = PackedStore::load(&store_path)?;
            tracing::info!(records = store.len(), bytes = store.total_len(), "packed store ready");
        }

        fs::rename(self.pending_version_path(), self.save_path(VERSION_FILE_NAME))?;
        self.local = VersionManifest::load(&self.save_path(VERSION_FILE_NAME))?;
        tracing::info!(version = self.local.version, downloaded = downloaded.len(), "sync complete");
        self.step = SyncStep::Completed;
        Ok(())
    }

    /// Re-queue failed downloads and continue
    pub fn retry(&mut self) -> bool {
        if self.step != SyncStep::Failed {
            return false;
        }
        if self.remote.is_none() {
            return self.start().is_ok();
        }
        self.failures.clear();
        self.downloader.retry_failed();
        self.step = SyncStep::Download;
        true
    }

    /// Abort in-flight downloads, keeping partial files
    pub fn pause(&mut self) {
        if self.step == SyncStep::Download {
            self.downloader.stop();
        }
    }

    pub fn resume(&mut self) {
        if self.step == SyncStep::Download {
            self.downloader.restart();
        }
    }

    pub fn step(&self) -> SyncStep {
        self.step
    }

    pub fn failures(&self) -> &[SyncFailure] {
        &self.failures
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    pub fn local_version(&self) -> i32 {
        self.local.version
    }

    pub fn remote_manifest(&self) -> Option<&VersionManifest> {
        self.remote.as_ref()
    }

    /// Names queued for download in this run
    pub fn planned(&self) -> Vec<&str> {
        self.downloader.tasks().iter().map(|t| t.name()).collect()
    }

    /// Exit code for the finished run
    pub fn exit_code(&self) -> i32 {
        use crate::error::{EXIT_FATAL, EXIT_INTEGRITY, EXIT_PARTIAL, EXIT_SUCCESS};
        match self.step {
            SyncStep::Completed => EXIT_SUCCESS,
            SyncStep::Failed => {
                if self
                    .failures
                    .iter()
                    .any(|f| matches!(f.error, DepotError::Verification { .. }))
                {
                    EXIT_INTEGRITY
                } else if self.remote.is_none() {
                    EXIT_FATAL
                } else {
                    EXIT_PARTIAL
                }
            }
            _ => EXIT_PARTIAL,
        }
    }
}
