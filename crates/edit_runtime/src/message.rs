use std::fmt;
use std::path::{Path, PathBuf};

use chunky::DrawOperation;
use document::{Document, HistoryConfig, ImageTarget, ImportError, MemberId};
use image::RgbaImage;

/// Work that reads a file off the edit loop and posts the decoded result back.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportRequest {
    /// A JSON document description that replaces the open document.
    Document {
        path: PathBuf,
        history_config: HistoryConfig,
    },
    /// An encoded image added as a new top layer, optionally kept linked to its file.
    Layer { path: PathBuf, linked: bool },
    /// Fresh content for a layer already linked to `path`.
    Reference { member_id: MemberId, path: PathBuf },
}

impl ImportRequest {
    pub fn path(&self) -> &Path {
        match self {
            ImportRequest::Document { path, .. }
            | ImportRequest::Layer { path, .. }
            | ImportRequest::Reference { path, .. } => path,
        }
    }
}

/// Everything that can change the document goes through one of these.
pub enum DocumentMessage {
    Import(ImportRequest),
    DocumentImported {
        path: PathBuf,
        document: Box<Document>,
    },
    LayerImported {
        path: PathBuf,
        bitmap: RgbaImage,
        linked: bool,
    },
    SourceUnusable {
        path: PathBuf,
        error: ImportError,
    },
    /// Links an existing layer to a file, loads it and starts watching.
    LinkLayer {
        member_id: MemberId,
        path: PathBuf,
    },
    ReferenceReloaded {
        member_id: MemberId,
        path: PathBuf,
        bitmap: RgbaImage,
    },
    ReferenceDeleted {
        member_id: MemberId,
        path: PathBuf,
    },
    ReferenceRenamed {
        member_id: MemberId,
        from: PathBuf,
        to: PathBuf,
    },
    Draw {
        member_id: MemberId,
        target: ImageTarget,
        operation: Box<dyn DrawOperation + Send>,
    },
    SetOpacity {
        member_id: MemberId,
        opacity: f32,
    },
    SetVisibility {
        member_id: MemberId,
        is_visible: bool,
    },
    Rename {
        member_id: MemberId,
        name: String,
    },
    RemoveMember {
        member_id: MemberId,
    },
    Undo,
    Redo,
    Shutdown,
}

impl DocumentMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentMessage::Import(_) => "import",
            DocumentMessage::DocumentImported { .. } => "document_imported",
            DocumentMessage::LayerImported { .. } => "layer_imported",
            DocumentMessage::SourceUnusable { .. } => "source_unusable",
            DocumentMessage::LinkLayer { .. } => "link_layer",
            DocumentMessage::ReferenceReloaded { .. } => "reference_reloaded",
            DocumentMessage::ReferenceDeleted { .. } => "reference_deleted",
            DocumentMessage::ReferenceRenamed { .. } => "reference_renamed",
            DocumentMessage::Draw { .. } => "draw",
            DocumentMessage::SetOpacity { .. } => "set_opacity",
            DocumentMessage::SetVisibility { .. } => "set_visibility",
            DocumentMessage::Rename { .. } => "rename",
            DocumentMessage::RemoveMember { .. } => "remove_member",
            DocumentMessage::Undo => "undo",
            DocumentMessage::Redo => "redo",
            DocumentMessage::Shutdown => "shutdown",
        }
    }
}

impl fmt::Debug for DocumentMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentMessage::Import(request) => f.debug_tuple("Import").field(request).finish(),
            DocumentMessage::SourceUnusable { path, error } => f
                .debug_struct("SourceUnusable")
                .field("path", path)
                .field("error", error)
                .finish(),
            DocumentMessage::ReferenceReloaded {
                member_id,
                path,
                bitmap,
            } => f
                .debug_struct("ReferenceReloaded")
                .field("member_id", member_id)
                .field("path", path)
                .field("size", &bitmap.dimensions())
                .finish(),
            DocumentMessage::ReferenceDeleted { member_id, path } => f
                .debug_struct("ReferenceDeleted")
                .field("member_id", member_id)
                .field("path", path)
                .finish(),
            DocumentMessage::ReferenceRenamed {
                member_id,
                from,
                to,
            } => f
                .debug_struct("ReferenceRenamed")
                .field("member_id", member_id)
                .field("from", from)
                .field("to", to)
                .finish(),
            DocumentMessage::Draw {
                member_id, target, ..
            } => f
                .debug_struct("Draw")
                .field("member_id", member_id)
                .field("target", target)
                .finish_non_exhaustive(),
            other => f.write_str(other.kind()),
        }
    }
}
