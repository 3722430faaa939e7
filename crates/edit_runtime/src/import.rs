use std::path::Path;

use crossbeam_channel::Sender;
use document::{Document, DocumentDescription, HistoryConfig, ImportError, decode_bitmap};
use image::RgbaImage;
use log::{info, warn};

use crate::message::{DocumentMessage, ImportRequest};

fn read_file(path: &Path) -> Result<Vec<u8>, ImportError> {
    std::fs::read(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads the whole file into memory, then decodes it.
pub fn load_bitmap(path: &Path) -> Result<RgbaImage, ImportError> {
    let bytes = read_file(path)?;
    decode_bitmap(&bytes)
}

pub fn load_document(path: &Path, history_config: HistoryConfig) -> Result<Document, ImportError> {
    let bytes = read_file(path)?;
    let description = DocumentDescription::from_slice(&bytes)?;
    Document::from_description(&description, history_config)
}

pub(crate) fn run_import(request: ImportRequest) -> DocumentMessage {
    let path = request.path().to_path_buf();
    let loaded = match request {
        ImportRequest::Document {
            path,
            history_config,
        } => load_document(&path, history_config).map(|document| {
            DocumentMessage::DocumentImported {
                path,
                document: Box::new(document),
            }
        }),
        ImportRequest::Layer { path, linked } => {
            load_bitmap(&path).map(|bitmap| DocumentMessage::LayerImported {
                path,
                bitmap,
                linked,
            })
        }
        ImportRequest::Reference { member_id, path } => {
            load_bitmap(&path).map(|bitmap| DocumentMessage::ReferenceReloaded {
                member_id,
                path,
                bitmap,
            })
        }
    };
    loaded.unwrap_or_else(|error| {
        warn!("[import] {path:?} is unusable: {error}");
        DocumentMessage::SourceUnusable { path, error }
    })
}

/// Runs `request` on its own thread and posts the outcome to `sender`.
///
/// The thread ends once the message is delivered or the edit loop is gone.
pub(crate) fn spawn_import(request: ImportRequest, sender: Sender<DocumentMessage>) {
    let name = format!("import:{}", display_name(request.path()));
    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            let message = run_import(request);
            let kind = message.kind();
            if sender.send(message).is_err() {
                info!("[import] edit loop closed before {kind} was delivered");
            }
        })
        .expect("spawn import thread");
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
