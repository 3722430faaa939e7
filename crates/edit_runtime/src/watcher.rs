use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{SendTimeoutError, Sender};
use document::{ImportError, MemberId};
use log::{info, warn};

use crate::config::ReferenceWatchConfig;
use crate::debounce::Debouncer;
use crate::import::load_bitmap;
use crate::message::DocumentMessage;
use crate::monitor::{
    FileEvent, FileEventSender, FileMonitor, WatchedPath, current_path, file_event_ring,
};

/// Keeps one linked layer in sync with its file.
///
/// Bursts of events are debounced into a single read-then-decode. A rename retargets the
/// watcher; a deletion is reported once and ends the watch.
pub struct ReferenceWatcher {
    member_id: MemberId,
    path: WatchedPath,
    stop_requested: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
    monitor: Option<FileMonitor>,
}

impl ReferenceWatcher {
    /// Watches `path` using the built-in polling monitor.
    pub fn spawn(
        member_id: MemberId,
        path: PathBuf,
        config: ReferenceWatchConfig,
        sender: Sender<DocumentMessage>,
    ) -> Self {
        let (events, consumer) = file_event_ring(config.event_capacity);
        let path = Arc::new(Mutex::new(path));
        let monitor = FileMonitor::spawn_shared(Arc::clone(&path), config.poll_interval, events);
        let mut watcher = Self::start(member_id, path, config, consumer, sender);
        watcher.monitor = Some(monitor);
        watcher
    }

    /// Watches `path` with events supplied by an external notifier.
    pub fn with_notifier(
        member_id: MemberId,
        path: PathBuf,
        config: ReferenceWatchConfig,
        sender: Sender<DocumentMessage>,
    ) -> (Self, FileEventSender) {
        let (events, consumer) = file_event_ring(config.event_capacity);
        let path = Arc::new(Mutex::new(path));
        let watcher = Self::start(member_id, path, config, consumer, sender);
        (watcher, events)
    }

    fn start(
        member_id: MemberId,
        path: WatchedPath,
        config: ReferenceWatchConfig,
        events: rtrb::Consumer<FileEvent>,
        sender: Sender<DocumentMessage>,
    ) -> Self {
        let stop_requested = Arc::new(AtomicBool::new(false));
        let worker = WatchWorker {
            member_id,
            path: Arc::clone(&path),
            config,
            stop_requested: Arc::clone(&stop_requested),
            sender,
        };
        let join_handle = std::thread::Builder::new()
            .name("reference_watcher".to_owned())
            .spawn(move || worker.run(events))
            .expect("spawn reference watcher thread");
        Self {
            member_id,
            path,
            stop_requested,
            join_handle: Some(join_handle),
            monitor: None,
        }
    }

    pub fn member_id(&self) -> MemberId {
        self.member_id
    }

    pub fn path(&self) -> PathBuf {
        current_path(&self.path)
    }

    /// False once the watched file was reported deleted.
    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|join_handle| !join_handle.is_finished())
    }
}

impl Drop for ReferenceWatcher {
    fn drop(&mut self) {
        self.stop_requested.store(true, Ordering::Release);
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.join().expect("join reference watcher thread");
        }
        self.monitor.take();
    }
}

struct WatchWorker {
    member_id: MemberId,
    path: WatchedPath,
    config: ReferenceWatchConfig,
    stop_requested: Arc<AtomicBool>,
    sender: Sender<DocumentMessage>,
}

impl WatchWorker {
    fn stopped(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    fn run(self, mut events: rtrb::Consumer<FileEvent>) {
        let mut debouncer = Debouncer::new(self.config.debounce_window);
        while !self.stopped() {
            let mut received = false;
            while let Ok(event) = events.pop() {
                received = true;
                match event {
                    FileEvent::Changed | FileEvent::Deleted => debouncer.record(Instant::now()),
                    FileEvent::Renamed { to } => {
                        if !self.retarget(to) {
                            return;
                        }
                    }
                }
            }

            let Some(coalesced) = debouncer.fire_due(Instant::now()) else {
                if !received {
                    std::thread::sleep(self.config.idle_sleep);
                }
                continue;
            };
            if !self.reload(coalesced) {
                return;
            }
        }
    }

    fn retarget(&self, to: PathBuf) -> bool {
        let from = {
            let mut path = self.path.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *path, to.clone())
        };
        info!(
            "[reference_watcher] {} moved from {from:?} to {to:?}",
            self.member_id
        );
        self.post(DocumentMessage::ReferenceRenamed {
            member_id: self.member_id,
            from,
            to,
        })
    }

    /// Returns false when the watch should end.
    fn reload(&self, coalesced: usize) -> bool {
        let path = current_path(&self.path);
        match load_bitmap(&path) {
            Ok(bitmap) => {
                info!(
                    "[reference_watcher] reloading {path:?} for {} after {coalesced} change(s)",
                    self.member_id
                );
                self.post(DocumentMessage::ReferenceReloaded {
                    member_id: self.member_id,
                    path,
                    bitmap,
                })
            }
            Err(ImportError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                info!(
                    "[reference_watcher] {path:?} is gone, stop watching {}",
                    self.member_id
                );
                self.post(DocumentMessage::ReferenceDeleted {
                    member_id: self.member_id,
                    path,
                });
                false
            }
            Err(error) => {
                warn!(
                    "[reference_watcher] keeping current content of {}: {error}",
                    self.member_id
                );
                self.post(DocumentMessage::SourceUnusable { path, error })
            }
        }
    }

    /// Blocks while the edit loop is backed up, giving up on stop or disconnect.
    fn post(&self, message: DocumentMessage) -> bool {
        let mut pending = message;
        loop {
            match self.sender.send_timeout(pending, self.retry_wait()) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(message)) => {
                    if self.stopped() {
                        return false;
                    }
                    pending = message;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    fn retry_wait(&self) -> Duration {
        self.config.idle_sleep.max(Duration::from_millis(1))
    }
}
