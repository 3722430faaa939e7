//! Single edit-serializing loop around a [`Document`].
//!
//! Every change arrives as a [`DocumentMessage`] on one bounded channel and is applied in
//! order by [`EditLoop`]. File reads and decodes run on background threads (imports,
//! [`ReferenceWatcher`]s) and post their finished results back as messages.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chunky::ChunkyImage;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use document::{Document, DocumentError, ImportError, MemberId, StructureMember};
use image::RgbaImage;
use log::{debug, info, warn};

mod config;
mod debounce;
mod import;
mod message;
mod monitor;
mod watcher;

pub use config::{
    EditLoopConfig, EditLoopConfigError, ReferenceWatchConfig, ReferenceWatchConfigError,
};
pub use debounce::Debouncer;
pub use import::{load_bitmap, load_document};
pub use message::{DocumentMessage, ImportRequest};
pub use monitor::{FileEvent, FileEventPushError, FileEventSender, FileMonitor};
pub use watcher::ReferenceWatcher;

const MAX_KEPT_REPORTS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EditLoopError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("source {path:?} is unusable: {source}")]
    SourceUnusable {
        path: PathBuf,
        #[source]
        source: ImportError,
    },
}

/// Outcome of one handled message, kept for callers that poll the loop.
#[derive(Debug)]
pub enum EditReport {
    Applied {
        kind: &'static str,
    },
    Failed {
        kind: &'static str,
        error: EditLoopError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickSummary {
    pub handled: usize,
    pub failed: usize,
    pub shutdown_requested: bool,
}

struct WatchedReference {
    path: PathBuf,
    watcher: ReferenceWatcher,
}

pub struct EditLoop {
    config: EditLoopConfig,
    watch_config: ReferenceWatchConfig,
    document: Document,
    sender: Sender<DocumentMessage>,
    receiver: Receiver<DocumentMessage>,
    watchers: HashMap<MemberId, WatchedReference>,
    reports: VecDeque<EditReport>,
    shutdown_requested: bool,
}

impl EditLoop {
    /// Takes ownership of `document` and starts watching its linked layers.
    pub fn new(
        document: Document,
        config: EditLoopConfig,
        watch_config: ReferenceWatchConfig,
    ) -> Result<Self, EditLoopConfigError> {
        config.validate()?;
        watch_config.validate()?;
        let (sender, receiver) = bounded(config.message_capacity);
        let mut edit_loop = Self {
            config,
            watch_config,
            document,
            sender,
            receiver,
            watchers: HashMap::new(),
            reports: VecDeque::new(),
            shutdown_requested: false,
        };
        edit_loop.sync_watchers();
        Ok(edit_loop)
    }

    pub fn config(&self) -> EditLoopConfig {
        self.config
    }

    pub fn sender(&self) -> Sender<DocumentMessage> {
        self.sender.clone()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Stops all watchers and hands the document back.
    pub fn into_document(self) -> Document {
        let Self {
            document, watchers, ..
        } = self;
        drop(watchers);
        document
    }

    pub fn watched_path(&self, member_id: MemberId) -> Option<&Path> {
        self.watchers
            .get(&member_id)
            .map(|watched| watched.path.as_path())
    }

    /// False when the member is unlinked or its file was reported deleted.
    pub fn is_watching(&self, member_id: MemberId) -> bool {
        self.watchers
            .get(&member_id)
            .is_some_and(|watched| watched.watcher.is_running())
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Drains the reports of recently handled messages, oldest first.
    pub fn take_reports(&mut self) -> Vec<EditReport> {
        self.reports.drain(..).collect()
    }

    /// Waits up to `wait` for a message, then handles it and whatever else is queued,
    /// at most `max_messages_per_tick` in total.
    pub fn tick(&mut self, wait: Duration) -> TickSummary {
        let mut summary = TickSummary {
            shutdown_requested: self.shutdown_requested,
            ..TickSummary::default()
        };
        if self.shutdown_requested {
            return summary;
        }
        let mut next = match self.receiver.recv_timeout(wait) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return summary,
        };
        while let Some(message) = next.take() {
            let kind = message.kind();
            summary.handled += 1;
            match self.handle(message) {
                Ok(()) => self.report(EditReport::Applied { kind }),
                Err(error) => {
                    warn!("[edit_loop] {kind} failed: {error}");
                    summary.failed += 1;
                    self.report(EditReport::Failed { kind, error });
                }
            }
            if self.shutdown_requested || summary.handled >= self.config.max_messages_per_tick {
                break;
            }
            next = self.receiver.try_recv().ok();
        }
        self.sync_watchers();
        summary.shutdown_requested = self.shutdown_requested;
        summary
    }

    /// Handles messages until a [`DocumentMessage::Shutdown`] arrives.
    pub fn run(mut self) -> Document {
        info!("[edit_loop] running");
        while !self.shutdown_requested {
            self.tick(self.config.idle_wait);
        }
        info!("[edit_loop] shut down at revision {}", self.document.revision());
        self.into_document()
    }

    fn report(&mut self, report: EditReport) {
        if self.reports.len() == MAX_KEPT_REPORTS {
            self.reports.pop_front();
        }
        self.reports.push_back(report);
    }

    fn handle(&mut self, message: DocumentMessage) -> Result<(), EditLoopError> {
        match message {
            DocumentMessage::Import(request) => {
                debug!("[edit_loop] importing {:?}", request.path());
                import::spawn_import(request, self.sender.clone());
            }
            DocumentMessage::DocumentImported { path, document } => {
                self.watchers.clear();
                self.document = *document;
                info!("[edit_loop] opened document from {path:?}");
            }
            DocumentMessage::LayerImported {
                path,
                bitmap,
                linked,
            } => self.add_imported_layer(path, &bitmap, linked)?,
            DocumentMessage::SourceUnusable { path, error } => {
                return Err(EditLoopError::SourceUnusable {
                    path,
                    source: error,
                });
            }
            DocumentMessage::LinkLayer { member_id, path } => {
                self.document
                    .set_linked_path(member_id, Some(path.clone()))?;
                import::spawn_import(
                    ImportRequest::Reference { member_id, path },
                    self.sender.clone(),
                );
            }
            DocumentMessage::ReferenceReloaded {
                member_id,
                path,
                bitmap,
            } => {
                if self.is_linked_to(member_id, &path) {
                    self.document
                        .reload_layer_content(member_id, &bitmap, (0, 0))?;
                    info!("[edit_loop] reloaded {member_id} from {path:?}");
                } else {
                    debug!("[edit_loop] dropping stale reload of {path:?} for {member_id}");
                }
            }
            DocumentMessage::ReferenceDeleted { member_id, path } => {
                if self.is_linked_to(member_id, &path) {
                    self.document.unlink_and_clear_layer(member_id)?;
                    info!("[edit_loop] {path:?} was deleted, cleared {member_id}");
                }
            }
            DocumentMessage::ReferenceRenamed {
                member_id,
                from,
                to,
            } => {
                if self.is_linked_to(member_id, &from) {
                    self.document.set_linked_path(member_id, Some(to.clone()))?;
                    // A watcher that did not see the rename itself is restarted on the new path.
                    match self.watchers.get_mut(&member_id) {
                        Some(watched) if watched.watcher.path() == to => watched.path = to,
                        _ => {
                            self.watchers.remove(&member_id);
                        }
                    }
                }
            }
            DocumentMessage::Draw {
                member_id,
                target,
                mut operation,
            } => {
                let drawn = self.document.draw(member_id, target, &mut *operation);
                operation.release();
                drawn?;
            }
            DocumentMessage::SetOpacity { member_id, opacity } => {
                self.document.set_opacity(member_id, opacity)?;
            }
            DocumentMessage::SetVisibility {
                member_id,
                is_visible,
            } => self.document.set_visibility(member_id, is_visible)?,
            DocumentMessage::Rename { member_id, name } => {
                self.document.rename(member_id, name)?;
            }
            DocumentMessage::RemoveMember { member_id } => {
                self.document.remove_member(member_id)?;
            }
            DocumentMessage::Undo => {
                if !self.document.undo()? {
                    debug!("[edit_loop] nothing to undo");
                }
            }
            DocumentMessage::Redo => {
                if !self.document.redo()? {
                    debug!("[edit_loop] nothing to redo");
                }
            }
            DocumentMessage::Shutdown => self.shutdown_requested = true,
        }
        Ok(())
    }

    fn add_imported_layer(
        &mut self,
        path: PathBuf,
        bitmap: &RgbaImage,
        linked: bool,
    ) -> Result<(), DocumentError> {
        let image = ChunkyImage::from_bitmap(self.document.size(), bitmap, (0, 0));
        let mut layer =
            StructureMember::layer_from_image(image).with_name(import::display_name(&path));
        if linked {
            layer = layer.with_linked_path(path.clone());
        }
        let top = self.document.root().len();
        let member_id = self.document.add_member(None, top, layer)?;
        info!("[edit_loop] imported {path:?} as {member_id}");
        Ok(())
    }

    fn is_linked_to(&self, member_id: MemberId, path: &Path) -> bool {
        self.document
            .member(member_id)
            .and_then(StructureMember::linked_path)
            .is_some_and(|linked| linked == path)
    }

    /// Watches exactly the layers that are currently linked, at their current paths.
    fn sync_watchers(&mut self) {
        let linked: HashMap<MemberId, PathBuf> = self
            .document
            .iter_members()
            .filter_map(|member| {
                member
                    .linked_path()
                    .map(|path| (member.id(), path.to_path_buf()))
            })
            .collect();
        self.watchers.retain(|member_id, watched| {
            let keep = linked.get(member_id) == Some(&watched.path);
            if !keep {
                debug!("[edit_loop] stop watching {:?} for {member_id}", watched.path);
            }
            keep
        });
        for (member_id, path) in linked {
            if self.watchers.contains_key(&member_id) {
                continue;
            }
            debug!("[edit_loop] watching {path:?} for {member_id}");
            let watcher = ReferenceWatcher::spawn(
                member_id,
                path.clone(),
                self.watch_config,
                self.sender.clone(),
            );
            self.watchers
                .insert(member_id, WatchedReference { path, watcher });
        }
    }
}
