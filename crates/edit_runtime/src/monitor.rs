use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use log::debug;

/// A change notification for a watched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Changed,
    Deleted,
    Renamed { to: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FileEventPushError {
    #[error("file event ring is full")]
    Full,
}

/// Producer side of a watcher's event ring. Any notifier can feed it.
#[derive(Debug)]
pub struct FileEventSender {
    producer: rtrb::Producer<FileEvent>,
}

impl FileEventSender {
    pub fn push(&mut self, event: FileEvent) -> Result<(), FileEventPushError> {
        self.producer
            .push(event)
            .map_err(|_| FileEventPushError::Full)
    }
}

pub(crate) fn file_event_ring(
    capacity: usize,
) -> (FileEventSender, rtrb::Consumer<FileEvent>) {
    assert!(capacity > 0, "file event ring capacity must be positive");
    let (producer, consumer) = rtrb::RingBuffer::new(capacity);
    (FileEventSender { producer }, consumer)
}

/// Path shared between a watcher and its monitor so renames retarget both.
pub(crate) type WatchedPath = Arc<Mutex<PathBuf>>;

pub(crate) fn current_path(path: &WatchedPath) -> PathBuf {
    path.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

fn fingerprint(path: &Path) -> Option<Fingerprint> {
    let metadata = std::fs::metadata(path).ok()?;
    Some(Fingerprint {
        modified: metadata.modified().ok(),
        len: metadata.len(),
    })
}

/// Polls a file's modification time and length and reports transitions.
///
/// A file missing at start produces no event; its later appearance is a `Changed`.
pub struct FileMonitor {
    stop_requested: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl FileMonitor {
    pub fn spawn(
        path: impl Into<PathBuf>,
        poll_interval: Duration,
        events: FileEventSender,
    ) -> Self {
        Self::spawn_shared(Arc::new(Mutex::new(path.into())), poll_interval, events)
    }

    pub(crate) fn spawn_shared(
        path: WatchedPath,
        poll_interval: Duration,
        events: FileEventSender,
    ) -> Self {
        assert!(
            !poll_interval.is_zero(),
            "file monitor poll interval must be non-zero"
        );
        let stop_requested = Arc::new(AtomicBool::new(false));
        let worker_stop_requested = Arc::clone(&stop_requested);
        let join_handle = std::thread::Builder::new()
            .name("file_monitor".to_owned())
            .spawn(move || file_monitor_loop(path, poll_interval, worker_stop_requested, events))
            .expect("spawn file monitor thread");
        Self {
            stop_requested,
            join_handle: Some(join_handle),
        }
    }
}

impl Drop for FileMonitor {
    fn drop(&mut self) {
        self.stop_requested.store(true, Ordering::Release);
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.join().expect("join file monitor thread");
        }
    }
}

fn file_monitor_loop(
    path: WatchedPath,
    poll_interval: Duration,
    stop_requested: Arc<AtomicBool>,
    mut events: FileEventSender,
) {
    let mut watched = current_path(&path);
    let mut baseline = fingerprint(&watched);
    while !stop_requested.load(Ordering::Acquire) {
        std::thread::sleep(poll_interval);

        let latest_path = current_path(&path);
        if latest_path != watched {
            watched = latest_path;
            baseline = fingerprint(&watched);
            continue;
        }
        let current = fingerprint(&watched);
        if current == baseline {
            continue;
        }
        let event = if current.is_none() {
            FileEvent::Deleted
        } else {
            FileEvent::Changed
        };
        baseline = current;
        if events.push(event).is_err() {
            debug!("[file_monitor] event ring full, dropping event for {watched:?}");
        }
    }
}
