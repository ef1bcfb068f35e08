/*!
 * Resumable, verified transfer of one named item
 *
 * Bytes land in a temp file next to the destination. A restarted task
 * appends to whatever the temp file already holds and asks the transport
 * for the remaining range. Only a temp file that passes verification is
 * renamed into place.
 */

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use depot_core_manifest::file_name_of;

use crate::checksum::{calculate_checksum, hashes_equal, HashAlgorithm};
use crate::config::VerifyMode;
use crate::error::{DepotError, Result};
use crate::sync::transport::{Transfer, TransferStatus, Transport};

const TEMP_SUFFIX: &str = "download";

pub type TaskCallback = Box<dyn FnOnce(&DownloadTask)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not started, or stopped with its temp file kept
    Idle,
    Running,
    /// Verified and promoted to the local path
    Completed,
    /// `error` says why
    Failed,
}

/// Temp path for a download: `<dir>/<file name>.<hash>.download`
pub fn temp_path_for(local_path: &Path, hash: &str) -> PathBuf {
    let file_name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_name = format!("{}.{}.{}", file_name, hash, TEMP_SUFFIX);
    match local_path.parent() {
        Some(dir) => dir.join(temp_name),
        None => PathBuf::from(temp_name),
    }
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

pub struct DownloadTask {
    id: usize,
    name: String,
    url: String,
    expected_length: u64,
    expected_hash: String,
    local_path: PathBuf,
    temp_path: PathBuf,
    verify: VerifyMode,
    algorithm: HashAlgorithm,
    state: TaskState,
    start_offset: u64,
    position: u64,
    transfer: Option<Box<dyn Transfer>>,
    error: Option<DepotError>,
    on_complete: Option<TaskCallback>,
}

impl DownloadTask {
    pub fn new<N, U, H>(
        id: usize,
        name: N,
        url: U,
        expected_length: u64,
        expected_hash: H,
        local_path: PathBuf,
    ) -> Self
    where
        N: Into<String>,
        U: Into<String>,
        H: Into<String>,
    {
        let expected_hash = expected_hash.into();
        let temp_path = temp_path_for(&local_path, &expected_hash);
        let position = file_len(&temp_path);
        Self {
            id,
            name: name.into(),
            url: url.into(),
            expected_length,
            expected_hash,
            local_path,
            temp_path,
            verify: VerifyMode::default(),
            algorithm: HashAlgorithm::default(),
            state: TaskState::Idle,
            start_offset: position,
            position,
            transfer: None,
            error: None,
            on_complete: None,
        }
    }

    pub fn with_verify(mut self, verify: VerifyMode, algorithm: HashAlgorithm) -> Self {
        self.verify = verify;
        self.algorithm = algorithm;
        self
    }

    /// Invoked once, after the file is verified and in place
    pub fn on_complete(&mut self, callback: TaskCallback) {
        self.on_complete = Some(callback);
    }

    /// Open the temp file for append and request the missing byte range
    pub fn start(&mut self, transport: &dyn Transport) {
        if self.state == TaskState::Running || self.state == TaskState::Completed {
            return;
        }
        self.error = None;

        let file = match self.open_temp() {
            Ok(file) => file,
            Err(err) => {
                self.fail(err);
                return;
            }
        };
        self.start_offset = file_len(&self.temp_path);
        self.position = self.start_offset;
        self.state = TaskState::Running;

        if self.start_offset < self.expected_length {
            tracing::info!(
                name = %self.name,
                url = %self.url,
                offset = self.start_offset,
                length = self.expected_length,
                "starting download"
            );
            self.transfer = Some(transport.open(&self.url, self.start_offset, Box::new(file)));
        } else {
            drop(file);
            self.complete();
        }
    }

    fn open_temp(&self) -> Result<fs::File> {
        if let Some(dir) = self.temp_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.temp_path)?;
        Ok(file)
    }

    /// Poll the transport; returns true once the task has finished
    pub fn update(&mut self) -> bool {
        if self.state != TaskState::Running {
            return self.is_finished();
        }
        let Some(transfer) = self.transfer.as_mut() else {
            return self.is_finished();
        };

        self.position = self.start_offset + transfer.bytes_received();
        match transfer.poll_status() {
            TransferStatus::Pending => false,
            TransferStatus::Done => {
                self.position = self.start_offset + transfer.bytes_received();
                self.transfer = None;
                self.complete();
                true
            }
            TransferStatus::Failed(reason) => {
                self.transfer = None;
                self.fail(DepotError::transfer(&self.name, reason));
                true
            }
        }
    }

    /// Verify the closed temp file, then promote it
    fn complete(&mut self) {
        match self.verify_temp().and_then(|()| self.promote()) {
            Ok(()) => {
                self.state = TaskState::Completed;
                self.position = self.expected_length;
                tracing::info!(name = %self.name, path = %self.local_path.display(), "download complete");
                if let Some(callback) = self.on_complete.take() {
                    callback(self);
                }
            }
            Err(err) => {
                if matches!(err, DepotError::Verification { .. }) {
                    let _ = fs::remove_file(&self.temp_path);
                    self.position = 0;
                    tracing::warn!(name = %self.name, error = %err, "download failed verification");
                }
                self.fail(err);
            }
        }
    }

    fn verify_temp(&self) -> Result<()> {
        if !self.temp_path.is_file() {
            return Err(DepotError::verification(&self.name, "temp file missing"));
        }
        let length = file_len(&self.temp_path);
        if length != self.expected_length {
            return Err(DepotError::verification(
                &self.name,
                format!("length {} != expected {}", length, self.expected_length),
            ));
        }
        if self.verify == VerifyMode::Hash {
            let actual = calculate_checksum(&self.temp_path, self.algorithm)?;
            if !hashes_equal(&actual, &self.expected_hash) {
                return Err(DepotError::verification(
                    &self.name,
                    format!("hash {} != expected {}", actual, self.expected_hash),
                ));
            }
        }
        Ok(())
    }

    fn promote(&self) -> Result<()> {
        if let Some(dir) = self.local_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        if fs::rename(&self.temp_path, &self.local_path).is_err() {
            fs::copy(&self.temp_path, &self.local_path)?;
            fs::remove_file(&self.temp_path)?;
        }
        Ok(())
    }

    fn fail(&mut self, err: DepotError) {
        if !matches!(err, DepotError::Verification { .. }) {
            tracing::warn!(name = %self.name, error = %err, "download failed");
        }
        self.error = Some(err);
        self.state = TaskState::Failed;
    }

    /// Abort the transfer, keeping the temp file for a later resume
    pub fn stop(&mut self) {
        if let Some(mut transfer) = self.transfer.take() {
            transfer.abort();
            self.position = file_len(&self.temp_path);
            tracing::debug!(name = %self.name, position = self.position, "download stopped");
        }
        if self.state == TaskState::Running {
            self.state = TaskState::Idle;
        }
    }

    /// Drop the error and go back to `Idle` so the task can start again
    pub fn reset(&mut self) {
        self.stop();
        if self.state == TaskState::Failed {
            self.state = TaskState::Idle;
        }
        self.error = None;
    }

    /// Start again from scratch; resume happens only through the temp file
    pub fn retry(&mut self, transport: &dyn Transport) {
        self.reset();
        self.start(transport);
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, TaskState::Completed | TaskState::Failed)
    }

    /// Bytes present for this item: temp file contents plus bytes in flight
    pub fn bytes_transferred(&self) -> u64 {
        self.position
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn expected_length(&self) -> u64 {
        self.expected_length
    }

    pub fn expected_hash(&self) -> &str {
        &self.expected_hash
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn error(&self) -> Option<&DepotError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<DepotError> {
        self.error.take()
    }

    /// File name the item is stored under
    pub fn file_name(&self) -> &str {
        file_name_of(&self.name)
    }
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("state", &self.state)
            .field("position", &self.position)
            .field("expected_length", &self.expected_length)
            .finish()
    }
}
