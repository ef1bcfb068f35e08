//! Transport capability: byte-range transfers that run independently of ticks
//!
//! A [`Transport`] opens a transfer for a URL starting at a byte offset and
//! streams everything it receives into a caller-supplied sink. The returned
//! [`Transfer`] only exposes progress, a terminal status and abort.

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const CHUNK_SIZE: usize = 64 * 1024;

/// URL schemes that route a resource name to the transport
pub const REMOTE_SCHEMES: [&str; 4] = ["http://", "https://", "file://", "ftp://"];

pub fn is_remote_url(name: &str) -> bool {
    REMOTE_SCHEMES.iter().any(|scheme| name.starts_with(scheme))
}

/// `<base>/<name>` with exactly one separator
pub fn join_url(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name.trim_start_matches('/'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    Done,
    Failed(String),
}

/// One in-flight transfer
pub trait Transfer: Send {
    /// Bytes delivered to the sink so far (excluding the range start)
    fn bytes_received(&self) -> u64;

    /// Non-blocking status check
    fn poll_status(&mut self) -> TransferStatus;

    /// Stop delivering bytes. On return the sink has been dropped and
    /// holds exactly what was delivered.
    fn abort(&mut self);
}

pub trait Transport: Send + Sync {
    fn open(&self, url: &str, range_start: u64, sink: Box<dyn Write + Send>) -> Box<dyn Transfer>;
}

/// Sink that collects bytes in memory, shareable with the code that reads them
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Transfer that failed before it started
struct FailedTransfer(String);

impl Transfer for FailedTransfer {
    fn bytes_received(&self) -> u64 {
        0
    }

    fn poll_status(&mut self) -> TransferStatus {
        TransferStatus::Failed(self.0.clone())
    }

    fn abort(&mut self) {}
}

/// Serves local paths and `file://` URLs, streaming on a worker thread
#[derive(Debug, Clone, Default)]
pub struct FileTransport;

impl FileTransport {
    pub fn new() -> Self {
        Self
    }

    fn resolve(url: &str) -> Option<PathBuf> {
        if let Some(path) = url.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        if is_remote_url(url) {
            return None;
        }
        Some(PathBuf::from(url))
    }
}

impl Transport for FileTransport {
    fn open(&self, url: &str, range_start: u64, sink: Box<dyn Write + Send>) -> Box<dyn Transfer> {
        let Some(path) = Self::resolve(url) else {
            return Box::new(FailedTransfer(format!("unsupported scheme: {}", url)));
        };

        let received = Arc::new(AtomicU64::new(0));
        let aborted = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded(1);

        let worker_received = Arc::clone(&received);
        let worker_aborted = Arc::clone(&aborted);
        std::thread::spawn(move || {
            let result = stream_file(&path, range_start, sink, &worker_received, &worker_aborted);
            let _ = tx.send(result.map_err(|e| e.to_string()));
        });

        Box::new(FileTransfer {
            received,
            aborted,
            rx,
            status: TransferStatus::Pending,
        })
    }
}

fn stream_file(
    path: &std::path::Path,
    range_start: u64,
    mut sink: Box<dyn Write + Send>,
    received: &AtomicU64,
    aborted: &AtomicBool,
) -> io::Result<()> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if range_start > len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("range start {} beyond length {}", range_start, len),
        ));
    }
    file.seek(SeekFrom::Start(range_start))?;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        if aborted.load(Ordering::Relaxed) {
            sink.flush()?;
            return Err(io::Error::new(io::ErrorKind::Interrupted, "aborted"));
        }
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        sink.write_all(&buffer[..n])?;
        received.fetch_add(n as u64, Ordering::Relaxed);
    }
    sink.flush()
}

struct FileTransfer {
    received: Arc<AtomicU64>,
    aborted: Arc<AtomicBool>,
    rx: Receiver<Result<(), String>>,
    status: TransferStatus,
}

impl Transfer for FileTransfer {
    fn bytes_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    fn poll_status(&mut self) -> TransferStatus {
        if self.status == TransferStatus::Pending {
            self.status = match self.rx.try_recv() {
                Ok(Ok(())) => TransferStatus::Done,
                Ok(Err(reason)) => TransferStatus::Failed(reason),
                Err(TryRecvError::Empty) => TransferStatus::Pending,
                Err(TryRecvError::Disconnected) => {
                    TransferStatus::Failed("transfer worker exited".to_string())
                }
            };
        }
        self.status.clone()
    }

    /// Stop the worker and wait until it has dropped the sink
    fn abort(&mut self) {
        self.aborted.store(true, Ordering::Relaxed);
        if self.status == TransferStatus::Pending {
            let _ = self.rx.recv();
            self.status = TransferStatus::Failed("aborted".to_string());
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: HashMap<String, Arc<[u8]>>,
    requests: Vec<(String, u64)>,
    held: HashSet<String>,
    interrupts: HashMap<String, u64>,
}

/// In-memory transport: objects keyed by URL, every request recorded.
///
/// Transfers complete on their first poll unless the URL is held. An
/// interrupted URL delivers a prefix and then fails.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert<U: Into<String>>(&self, url: U, bytes: Vec<u8>) {
        self.lock().objects.insert(url.into(), Arc::from(bytes));
    }

    pub fn remove(&self, url: &str) {
        self.lock().objects.remove(url);
    }

    /// Every `(url, range_start)` opened so far
    pub fn requests(&self) -> Vec<(String, u64)> {
        self.lock().requests.clone()
    }

    /// Keep transfers for `url` pending until [`MemoryTransport::release`]
    pub fn hold(&self, url: &str) {
        self.lock().held.insert(url.to_string());
    }

    pub fn release(&self, url: &str) {
        self.lock().held.remove(url);
    }

    /// The next transfer for `url` delivers at most `bytes` and then fails
    pub fn interrupt_after(&self, url: &str, bytes: u64) {
        self.lock().interrupts.insert(url.to_string(), bytes);
    }
}

impl Transport for MemoryTransport {
    fn open(&self, url: &str, range_start: u64, sink: Box<dyn Write + Send>) -> Box<dyn Transfer> {
        self.lock().requests.push((url.to_string(), range_start));
        Box::new(MemoryTransfer {
            transport: self.clone(),
            url: url.to_string(),
            range_start,
            sink: Some(sink),
            received: 0,
            status: TransferStatus::Pending,
        })
    }
}

struct MemoryTransfer {
    transport: MemoryTransport,
    url: String,
    range_start: u64,
    sink: Option<Box<dyn Write + Send>>,
    received: u64,
    status: TransferStatus,
}

impl MemoryTransfer {
    fn deliver(&mut self) -> TransferStatus {
        let (object, interrupt) = {
            let mut state = self.transport.lock();
            if state.held.contains(&self.url) {
                return TransferStatus::Pending;
            }
            let interrupt = state.interrupts.remove(&self.url);
            (state.objects.get(&self.url).cloned(), interrupt)
        };

        let Some(object) = object else {
            return TransferStatus::Failed(format!("not found: {}", self.url));
        };
        let start = self.range_start as usize;
        if start > object.len() {
            return TransferStatus::Failed(format!(
                "range start {} beyond length {}",
                start,
                object.len()
            ));
        }

        let mut end = object.len();
        if let Some(limit) = interrupt {
            end = end.min(start + limit as usize);
        }

        let Some(mut sink) = self.sink.take() else {
            return TransferStatus::Failed("sink already closed".to_string());
        };
        if let Err(e) = sink.write_all(&object[start..end]).and_then(|_| sink.flush()) {
            return TransferStatus::Failed(e.to_string());
        }
        self.received = (end - start) as u64;

        if interrupt.is_some() && end < object.len() {
            TransferStatus::Failed("connection reset".to_string())
        } else {
            TransferStatus::Done
        }
    }
}

impl Transfer for MemoryTransfer {
    fn bytes_received(&self) -> u64 {
        self.received
    }

    fn poll_status(&mut self) -> TransferStatus {
        if self.status == TransferStatus::Pending {
            self.status = self.deliver();
        }
        self.status.clone()
    }

    fn abort(&mut self) {
        self.sink = None;
        if self.status == TransferStatus::Pending {
            self.status = TransferStatus::Failed("aborted".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn wait(transfer: &mut Box<dyn Transfer>) -> TransferStatus {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let status = transfer.poll_status();
            if status != TransferStatus::Pending {
                return status;
            }
            assert!(Instant::now() < deadline, "transfer never finished");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_remote_url_detection() {
        assert!(is_remote_url("https://cdn.example.com/ui.pack"));
        assert!(is_remote_url("file:///srv/ui.pack"));
        assert!(!is_remote_url("Assets/UI/title.png"));
        assert_eq!(join_url("http://h/dlc/", "/ver"), "http://h/dlc/ver");
    }

    #[test]
    fn test_file_transport_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"0123456789").unwrap();

        let sink = SharedBuffer::new();
        let url = format!("file://{}", path.display());
        let mut transfer = FileTransport::new().open(&url, 4, Box::new(sink.clone()));
        assert_eq!(wait(&mut transfer), TransferStatus::Done);
        assert_eq!(transfer.bytes_received(), 6);
        assert_eq!(sink.take(), b"456789");
    }

    #[test]
    fn test_file_transport_missing_and_unsupported() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let mut transfer = FileTransport::new().open(
            missing.to_str().unwrap(),
            0,
            Box::new(SharedBuffer::new()),
        );
        assert!(matches!(wait(&mut transfer), TransferStatus::Failed(_)));

        let mut transfer =
            FileTransport::new().open("https://example.com/a", 0, Box::new(SharedBuffer::new()));
        assert!(matches!(transfer.poll_status(), TransferStatus::Failed(_)));
    }

    #[test]
    fn test_memory_transport_hold_and_interrupt() {
        let transport = MemoryTransport::new();
        transport.insert("mem://a", b"abcdef".to_vec());
        transport.hold("mem://a");

        let sink = SharedBuffer::new();
        let mut transfer = transport.open("mem://a", 1, Box::new(sink.clone()));
        assert_eq!(transfer.poll_status(), TransferStatus::Pending);
        transport.release("mem://a");
        assert_eq!(transfer.poll_status(), TransferStatus::Done);
        assert_eq!(sink.take(), b"bcdef");

        transport.interrupt_after("mem://a", 2);
        let mut transfer = transport.open("mem://a", 0, Box::new(sink.clone()));
        assert!(matches!(transfer.poll_status(), TransferStatus::Failed(_)));
        assert_eq!(transfer.bytes_received(), 2);
        assert_eq!(sink.take(), b"ab");

        assert_eq!(
            transport.requests(),
            vec![("mem://a".to_string(), 1), ("mem://a".to_string(), 0)]
        );
    }
}
