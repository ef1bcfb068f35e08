/*!
 * Download batch scheduler
 *
 * Bounds concurrent download tasks, promotes queued tasks as slots free up
 * and aggregates progress. Failed tasks leave the in-flight set but never
 * count toward batch completion; callers inspect them through `failed()`
 * and may `retry_failed()`.
 */

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::checksum::HashAlgorithm;
use crate::config::{SyncConfig, VerifyMode};
use crate::sync::download::{DownloadTask, TaskState};
use crate::sync::transport::Transport;

/// `(position, size, speed in bytes/s)`
pub type ProgressListener = Box<dyn FnMut(u64, u64, f64)>;
pub type FinishedListener = Box<dyn FnOnce()>;

pub struct Downloader {
    transport: Arc<dyn Transport>,
    max_downloads: usize,
    sample_interval: Duration,
    verify: VerifyMode,
    algorithm: HashAlgorithm,

    tasks: Vec<DownloadTask>,
    queue: VecDeque<usize>,
    in_flight: Vec<usize>,
    failed: Vec<usize>,
    completed: usize,

    size: u64,
    credit: u64,
    position: u64,
    speed: f64,
    last_sample: Option<(Instant, u64)>,

    started: bool,
    finished_fired: bool,
    on_progress: Option<ProgressListener>,
    on_finished: Option<FinishedListener>,
}

impl Downloader {
    pub fn new(transport: Arc<dyn Transport>, config: &SyncConfig) -> Self {
        Self {
            transport,
            max_downloads: config.max_downloads.max(1),
            sample_interval: config.sample_interval(),
            verify: config.verify,
            algorithm: config.hash_algorithm,
            tasks: Vec::new(),
            queue: VecDeque::new(),
            in_flight: Vec::new(),
            failed: Vec::new(),
            completed: 0,
            size: 0,
            credit: 0,
            position: 0,
            speed: 0.0,
            last_sample: None,
            started: false,
            finished_fired: false,
            on_progress: None,
            on_finished: None,
        }
    }

    pub fn on_progress(&mut self, listener: ProgressListener) {
        self.on_progress = Some(listener);
    }

    pub fn on_finished(&mut self, listener: FinishedListener) {
        self.on_finished = Some(listener);
    }

    /// Register a download. Bytes already in its temp file are credited
    /// against the batch size.
    pub fn add(
        &mut self,
        url: &str,
        name: &str,
        local_path: PathBuf,
        hash: &str,
        length: u64,
    ) -> usize {
        let id = self.tasks.len();
        let task = DownloadTask::new(id, name, url, length, hash, local_path)
            .with_verify(self.verify, self.algorithm);

        let present = task.bytes_transferred().min(length);
        self.size += length - present;
        self.credit += present;
        tracing::debug!(name, url, length, present, "queued download");

        self.tasks.push(task);
        id
    }

    /// Queue every task that has not completed or failed, then run
    pub fn start(&mut self) {
        self.queue.clear();
        self.last_sample = None;
        self.restart();
    }

    /// Resume after `stop`: unfinished tasks go back on the queue
    pub fn restart(&mut self) {
        self.started = true;
        for task in &self.tasks {
            let id = task.id();
            if task.state() == TaskState::Idle
                && !self.queue.contains(&id)
                && !self.in_flight.contains(&id)
            {
                self.queue.push_back(id);
            }
        }
        tracing::info!(
            tasks = self.tasks.len(),
            queued = self.queue.len(),
            size = self.size,
            "downloads started"
        );
    }

    /// Abort every in-flight task; temp files stay for a later restart
    pub fn stop(&mut self) {
        self.queue.clear();
        for id in self.in_flight.drain(..) {
            self.tasks[id].stop();
        }
        self.started = false;
    }

    /// Abort everything and forget every task
    pub fn clear(&mut self) {
        self.stop();
        self.tasks.clear();
        self.failed.clear();
        self.completed = 0;
        self.size = 0;
        self.credit = 0;
        self.position = 0;
        self.speed = 0.0;
        self.last_sample = None;
        self.finished_fired = false;
    }

    /// Put every failed task back on the queue with its error cleared
    pub fn retry_failed(&mut self) -> usize {
        let failed = std::mem::take(&mut self.failed);
        for &id in &failed {
            self.tasks[id].reset();
            self.queue.push_back(id);
        }
        if !failed.is_empty() {
            self.started = true;
            tracing::info!(count = failed.len(), "retrying failed downloads");
        }
        failed.len()
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// One scheduling step using `now` as the sampling clock
    pub fn tick_at(&mut self, now: Instant) {
        if !self.started {
            return;
        }

        while self.in_flight.len() < self.max_downloads {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            self.tasks[id].start(self.transport.as_ref());
            self.in_flight.push(id);
        }

        let mut index = 0;
        while index < self.in_flight.len() {
            let id = self.in_flight[index];
            if !self.tasks[id].update() {
                index += 1;
                continue;
            }
            self.in_flight.swap_remove(index);
            match self.tasks[id].state() {
                TaskState::Completed => self.completed += 1,
                _ => self.failed.push(id),
            }
        }

        self.position = self
            .tasks
            .iter()
            .map(|t| t.bytes_transferred())
            .sum::<u64>()
            .saturating_sub(self.credit);

        self.sample(now);

        if self.completed == self.tasks.len() && !self.finished_fired {
            self.finished_fired = true;
            self.started = false;
            tracing::info!(tasks = self.tasks.len(), "all downloads finished");
            if let Some(listener) = self.on_finished.take() {
                listener();
            }
        }
    }

    fn sample(&mut self, now: Instant) {
        let Some((last_time, last_position)) = self.last_sample else {
            self.last_sample = Some((now, self.position));
            return;
        };
        let elapsed = now.saturating_duration_since(last_time);
        if elapsed < self.sample_interval || elapsed.is_zero() {
            return;
        }
        self.speed = self.position.saturating_sub(last_position) as f64 / elapsed.as_secs_f64();
        self.last_sample = Some((now, self.position));
        if let Some(listener) = self.on_progress.as_mut() {
            listener(self.position, self.size, self.speed);
        }
    }

    /// Nothing queued or in flight, and every task completed or failed
    pub fn is_settled(&self) -> bool {
        self.queue.is_empty()
            && self.in_flight.is_empty()
            && self.completed + self.failed.len() == self.tasks.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_fired
    }

    pub fn is_running(&self) -> bool {
        self.started
    }

    pub fn failed(&self) -> impl Iterator<Item = &DownloadTask> {
        self.failed.iter().map(|&id| &self.tasks[id])
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn tasks(&self) -> &[DownloadTask] {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut [DownloadTask] {
        &mut self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Bytes still to fetch at registration time
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes fetched since registration
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Sampled bytes per second
    pub fn speed(&self) -> f64 {
        self.speed
    }
}
