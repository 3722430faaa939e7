//! Layer/group tree over chunked images, with undo history and a flat interchange description.

use std::path::PathBuf;

use chunky::{
    ChunkyImage, CommitSummary, DrawOperation, EditSessionError, EditSessionId, ResourceLedger,
};
use image::RgbaImage;
use log::{debug, warn};
use model::{AffectedArea, ImageSize};

mod description;
mod flatten;
mod history;
mod member;
mod tree;

pub use description::{
    DocumentDescription, ImportError, LayerDescription, MaskDescription, decode_bitmap,
};
pub use history::{
    ChunkDelta, HistoryConfig, HistoryConfigError, HistoryEntry, ImageTarget, MemberLocation,
    MemberSnapshot, PlacedMember,
};
pub use member::{DEFAULT_MEMBER_NAME, MemberId, MemberKind, StructureMember};

use history::{History, HistorySide};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("member {member_id} not found")]
    MemberNotFound { member_id: MemberId },
    #[error("member id {member_id} already exists in the document")]
    DuplicateMemberId { member_id: MemberId },
    #[error("attaching {member_id} under {parent_id} would create a cycle")]
    CycleDetected {
        member_id: MemberId,
        parent_id: MemberId,
    },
    #[error("member {parent_id} is not a group")]
    ParentIsNotGroup { parent_id: MemberId },
    #[error("index {index} out of range for {len} children of {parent_id:?}")]
    IndexOutOfRange {
        parent_id: Option<MemberId>,
        index: usize,
        len: usize,
    },
    #[error("member {member_id} is not a layer")]
    MemberIsNotLayer { member_id: MemberId },
    #[error("member {member_id} has no mask")]
    MissingMask { member_id: MemberId },
    #[error("image of {member_id} is {actual:?}, document is {expected:?}")]
    SizeMismatch {
        member_id: MemberId,
        expected: ImageSize,
        actual: ImageSize,
    },
    #[error("image edit {active_session_id:?} on {active_member_id} is still open")]
    ImageEditActive {
        active_member_id: MemberId,
        active_session_id: EditSessionId,
    },
    #[error("no open image edit for {member_id} session {session_id:?}")]
    MissingImageEdit {
        member_id: MemberId,
        session_id: EditSessionId,
    },
    #[error(
        "image edit mismatch: open {expected_member_id}/{expected_session_id:?}, got {actual_member_id}/{actual_session_id:?}"
    )]
    ImageEditMismatch {
        expected_member_id: MemberId,
        expected_session_id: EditSessionId,
        actual_member_id: MemberId,
        actual_session_id: EditSessionId,
    },
    #[error("edit session failed on {member_id}: {source}")]
    Session {
        member_id: MemberId,
        #[source]
        source: EditSessionError,
    },
}

#[derive(Debug, Clone)]
struct ImageEditContext {
    member_id: MemberId,
    target: ImageTarget,
    session_id: EditSessionId,
    visited: AffectedArea,
}

/// Root of the member tree. Root children are ordered bottom to top.
#[derive(Debug)]
pub struct Document {
    size: ImageSize,
    root: Vec<StructureMember>,
    history: History,
    ledger: ResourceLedger,
    revision: u64,
    next_session_id: u64,
    active_image_edit: Option<ImageEditContext>,
}

impl Document {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_config(ImageSize::new(width, height), HistoryConfig::default())
    }

    pub fn with_config(size: ImageSize, history_config: HistoryConfig) -> Self {
        Self {
            size,
            root: Vec::new(),
            history: History::new(history_config),
            ledger: ResourceLedger::new(),
            revision: 0,
            next_session_id: 1,
            active_image_edit: None,
        }
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn history_config(&self) -> HistoryConfig {
        self.history.config()
    }

    pub fn root(&self) -> &[StructureMember] {
        &self.root
    }

    pub fn member(&self, id: MemberId) -> Option<&StructureMember> {
        tree::find(&self.root, id)
    }

    /// Direct mutable access bypasses history.
    pub fn member_mut(&mut self, id: MemberId) -> Option<&mut StructureMember> {
        tree::find_mut(&mut self.root, id)
    }

    pub fn contains(&self, id: MemberId) -> bool {
        self.member(id).is_some()
    }

    /// `Some(None)` for members of the root list, `None` when `id` is unknown.
    pub fn parent_of(&self, id: MemberId) -> Option<Option<MemberId>> {
        tree::location_of(&self.root, None, id).map(|location| location.parent)
    }

    pub fn location_of(&self, id: MemberId) -> Option<MemberLocation> {
        tree::location_of(&self.root, None, id)
    }

    /// Ancestors ordered from the root list down to the direct parent.
    pub fn ancestors_of(&self, id: MemberId) -> Option<Vec<MemberId>> {
        tree::ancestors_of(&self.root, id)
    }

    /// Every member, depth first, parents before children.
    pub fn iter_members(&self) -> impl Iterator<Item = &StructureMember> {
        let mut members = Vec::new();
        tree::visit(&self.root, &mut members);
        members.into_iter()
    }

    pub fn can_undo(&self) -> bool {
        self.history.undo_len() > 0
    }

    pub fn can_redo(&self) -> bool {
        self.history.redo_len() > 0
    }

    fn bump_revision(&mut self) {
        self.revision = self
            .revision
            .checked_add(1)
            .expect("document revision overflow");
    }

    fn ensure_no_image_edit(&self) -> Result<(), DocumentError> {
        match &self.active_image_edit {
            Some(active) => Err(DocumentError::ImageEditActive {
                active_member_id: active.member_id,
                active_session_id: active.session_id,
            }),
            None => Ok(()),
        }
    }

    fn placed(&self, id: MemberId) -> Result<PlacedMember, DocumentError> {
        let location = self
            .location_of(id)
            .ok_or(DocumentError::MemberNotFound { member_id: id })?;
        let member = self
            .member(id)
            .ok_or(DocumentError::MemberNotFound { member_id: id })?;
        Ok(PlacedMember {
            location,
            member: member.clone(),
        })
    }

    fn children_of_mut(
        &mut self,
        parent: Option<MemberId>,
    ) -> Result<&mut Vec<StructureMember>, DocumentError> {
        let Some(parent_id) = parent else {
            return Ok(&mut self.root);
        };
        tree::find_mut(&mut self.root, parent_id)
            .ok_or(DocumentError::MemberNotFound {
                member_id: parent_id,
            })?
            .children_mut()
            .ok_or(DocumentError::ParentIsNotGroup { parent_id })
    }

    fn check_member_sizes(&self, member: &StructureMember) -> Result<(), DocumentError> {
        let mut members = Vec::new();
        tree::visit(std::slice::from_ref(member), &mut members);
        for candidate in members {
            let images = candidate.image().into_iter().chain(candidate.mask());
            for image in images {
                if image.size() != self.size {
                    return Err(DocumentError::SizeMismatch {
                        member_id: candidate.id(),
                        expected: self.size,
                        actual: image.size(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_attach(
        &mut self,
        member_id: MemberId,
        parent: Option<MemberId>,
        index: usize,
    ) -> Result<(), DocumentError> {
        if let Some(parent_id) = parent {
            if parent_id == member_id {
                return Err(DocumentError::CycleDetected {
                    member_id,
                    parent_id,
                });
            }
            let ancestors = self
                .ancestors_of(parent_id)
                .ok_or(DocumentError::MemberNotFound {
                    member_id: parent_id,
                })?;
            if ancestors.contains(&member_id) {
                return Err(DocumentError::CycleDetected {
                    member_id,
                    parent_id,
                });
            }
        }
        let len = self.children_of_mut(parent)?.len();
        if index > len {
            return Err(DocumentError::IndexOutOfRange {
                parent_id: parent,
                index,
                len,
            });
        }
        Ok(())
    }

    fn insert_at(
        &mut self,
        location: MemberLocation,
        member: StructureMember,
    ) -> Result<(), DocumentError> {
        let children = self.children_of_mut(location.parent)?;
        if location.index > children.len() {
            return Err(DocumentError::IndexOutOfRange {
                parent_id: location.parent,
                index: location.index,
                len: children.len(),
            });
        }
        children.insert(location.index, member);
        Ok(())
    }

    fn detach(&mut self, id: MemberId) -> Result<(StructureMember, MemberLocation), DocumentError> {
        let location = self
            .location_of(id)
            .ok_or(DocumentError::MemberNotFound { member_id: id })?;
        let member = self.children_of_mut(location.parent)?.remove(location.index);
        Ok((member, location))
    }

    fn record_member_change(&mut self, before: Option<PlacedMember>, after: Option<PlacedMember>) {
        self.history
            .record(HistoryEntry::MemberSnapshot(MemberSnapshot { before, after }));
        self.bump_revision();
    }

    /// Inserts `member` at `index` among `parent`'s children (`None` for the root list).
    pub fn add_member(
        &mut self,
        parent: Option<MemberId>,
        index: usize,
        member: StructureMember,
    ) -> Result<MemberId, DocumentError> {
        self.ensure_no_image_edit()?;
        let mut seen = std::collections::HashSet::new();
        for id in member.subtree_ids() {
            if !seen.insert(id) || self.contains(id) {
                return Err(DocumentError::DuplicateMemberId { member_id: id });
            }
        }
        self.check_member_sizes(&member)?;
        self.check_attach(member.id(), parent, index)?;

        let id = member.id();
        let location = MemberLocation { parent, index };
        self.insert_at(location, member.clone())?;
        self.record_member_change(None, Some(PlacedMember { location, member }));
        debug!("[document] added member {id} at {location:?}");
        Ok(id)
    }

    /// Moves `id` under `new_parent` at `index`, counted after `id` is detached.
    pub fn move_member(
        &mut self,
        id: MemberId,
        new_parent: Option<MemberId>,
        index: usize,
    ) -> Result<(), DocumentError> {
        self.ensure_no_image_edit()?;
        let before = self.placed(id)?;
        if let Some(parent_id) = new_parent
            && (parent_id == id
                || self
                    .ancestors_of(parent_id)
                    .is_some_and(|ancestors| ancestors.contains(&id)))
        {
            return Err(DocumentError::CycleDetected {
                member_id: id,
                parent_id,
            });
        }

        let (member, old_location) = self.detach(id)?;
        if let Err(error) = self.check_attach(id, new_parent, index) {
            self.insert_at(old_location, member)?;
            return Err(error);
        }
        let location = MemberLocation {
            parent: new_parent,
            index,
        };
        self.insert_at(location, member)?;
        let after = self.placed(id)?;
        self.record_member_change(Some(before), Some(after));
        Ok(())
    }

    pub fn remove_member(&mut self, id: MemberId) -> Result<StructureMember, DocumentError> {
        self.ensure_no_image_edit()?;
        let (member, location) = self.detach(id)?;
        self.record_member_change(
            Some(PlacedMember {
                location,
                member: member.clone(),
            }),
            None,
        );
        debug!("[document] removed member {id}");
        Ok(member)
    }

    fn edit_member(
        &mut self,
        id: MemberId,
        edit: impl FnOnce(&mut StructureMember) -> Result<(), DocumentError>,
    ) -> Result<(), DocumentError> {
        self.ensure_no_image_edit()?;
        let before = self.placed(id)?;
        let member = self
            .member_mut(id)
            .ok_or(DocumentError::MemberNotFound { member_id: id })?;
        edit(member)?;
        let after = self.placed(id)?;
        self.record_member_change(Some(before), Some(after));
        Ok(())
    }

    pub fn set_opacity(&mut self, id: MemberId, opacity: f32) -> Result<(), DocumentError> {
        self.edit_member(id, |member| {
            member.set_opacity(opacity);
            Ok(())
        })
    }

    pub fn set_visibility(&mut self, id: MemberId, is_visible: bool) -> Result<(), DocumentError> {
        self.edit_member(id, |member| {
            member.set_visible(is_visible);
            Ok(())
        })
    }

    pub fn rename(&mut self, id: MemberId, name: impl Into<String>) -> Result<(), DocumentError> {
        let name = name.into();
        self.edit_member(id, |member| {
            member.set_name(name);
            Ok(())
        })
    }

    pub fn set_mask(&mut self, id: MemberId, mask: Option<ChunkyImage>) -> Result<(), DocumentError> {
        if let Some(mask) = &mask
            && mask.size() != self.size
        {
            return Err(DocumentError::SizeMismatch {
                member_id: id,
                expected: self.size,
                actual: mask.size(),
            });
        }
        self.edit_member(id, |member| {
            member.set_mask(mask);
            Ok(())
        })
    }

    pub fn set_linked_path(&mut self, id: MemberId, path: Option<PathBuf>) -> Result<(), DocumentError> {
        self.edit_member(id, |member| {
            if member.set_linked_path(path) {
                Ok(())
            } else {
                Err(DocumentError::MemberIsNotLayer { member_id: id })
            }
        })
    }

    /// Inserts a fresh-identity copy of `id` directly above it.
    pub fn duplicate_member(&mut self, id: MemberId) -> Result<MemberId, DocumentError> {
        self.ensure_no_image_edit()?;
        let source = self.placed(id)?;
        let copy = source.member.duplicate();
        self.add_member(source.location.parent, source.location.index + 1, copy)
    }

    /// Replaces the committed content of a layer, for reloads from outside the editor.
    pub fn replace_layer_content(
        &mut self,
        id: MemberId,
        bitmap: &RgbaImage,
        offset: (i32, i32),
    ) -> Result<(), DocumentError> {
        self.edit_member(id, |member| {
            let image = member
                .image_mut()
                .ok_or(DocumentError::MemberIsNotLayer { member_id: id })?;
            image
                .replace_from_bitmap(bitmap, offset)
                .map_err(|source| DocumentError::Session {
                    member_id: id,
                    source,
                })
        })
    }

    /// Swaps in fresh content read from a layer's linked file. Not an undoable edit:
    /// history entries that would write this layer are dropped, the rest are kept.
    pub fn reload_layer_content(
        &mut self,
        id: MemberId,
        bitmap: &RgbaImage,
        offset: (i32, i32),
    ) -> Result<(), DocumentError> {
        self.ensure_no_image_edit()?;
        let image = self
            .member_mut(id)
            .ok_or(DocumentError::MemberNotFound { member_id: id })?
            .image_mut()
            .ok_or(DocumentError::MemberIsNotLayer { member_id: id })?;
        image
            .replace_from_bitmap(bitmap, offset)
            .map_err(|source| DocumentError::Session {
                member_id: id,
                source,
            })?;
        let forgotten = self.history.forget_member(id);
        if forgotten > 0 {
            debug!("[document] reload of {id} dropped {forgotten} history entries");
        }
        self.bump_revision();
        Ok(())
    }

    /// Clears a linked layer whose source disappeared. The layer stays in the tree.
    pub fn unlink_and_clear_layer(&mut self, id: MemberId) -> Result<(), DocumentError> {
        self.edit_member(id, |member| {
            if !member.set_linked_path(None) {
                return Err(DocumentError::MemberIsNotLayer { member_id: id });
            }
            let image = member
                .image_mut()
                .ok_or(DocumentError::MemberIsNotLayer { member_id: id })?;
            image.clear().map_err(|source| DocumentError::Session {
                member_id: id,
                source,
            })
        })
    }

    fn target_image_mut(
        &mut self,
        member_id: MemberId,
        target: ImageTarget,
    ) -> Result<&mut ChunkyImage, DocumentError> {
        let member = self
            .member_mut(member_id)
            .ok_or(DocumentError::MemberNotFound { member_id })?;
        match target {
            ImageTarget::Content => member
                .image_mut()
                .ok_or(DocumentError::MemberIsNotLayer { member_id }),
            ImageTarget::Mask => member
                .mask_mut()
                .ok_or(DocumentError::MissingMask { member_id }),
        }
    }

    pub fn begin_image_edit(
        &mut self,
        member_id: MemberId,
        target: ImageTarget,
    ) -> Result<EditSessionId, DocumentError> {
        self.ensure_no_image_edit()?;
        let session_id = EditSessionId(self.next_session_id);
        let image = self.target_image_mut(member_id, target)?;
        image
            .begin_edit(session_id)
            .map_err(|source| DocumentError::Session { member_id, source })?;
        self.next_session_id = self
            .next_session_id
            .checked_add(1)
            .expect("edit session id overflow");
        self.active_image_edit = Some(ImageEditContext {
            member_id,
            target,
            session_id,
            visited: AffectedArea::empty(),
        });
        debug!("[document] begin {target:?} edit {session_id:?} on {member_id}");
        Ok(session_id)
    }

    fn validate_image_edit(
        &self,
        member_id: MemberId,
        session_id: EditSessionId,
    ) -> Result<ImageEditContext, DocumentError> {
        let Some(active) = &self.active_image_edit else {
            return Err(DocumentError::MissingImageEdit {
                member_id,
                session_id,
            });
        };
        if active.member_id != member_id || active.session_id != session_id {
            return Err(DocumentError::ImageEditMismatch {
                expected_member_id: active.member_id,
                expected_session_id: active.session_id,
                actual_member_id: member_id,
                actual_session_id: session_id,
            });
        }
        Ok(active.clone())
    }

    pub fn apply_to_image(
        &mut self,
        member_id: MemberId,
        session_id: EditSessionId,
        operation: &mut dyn DrawOperation,
    ) -> Result<AffectedArea, DocumentError> {
        let context = self.validate_image_edit(member_id, session_id)?;
        let visited = self
            .target_image_mut(member_id, context.target)?
            .apply(session_id, operation)
            .map_err(|source| DocumentError::Session { member_id, source })?;
        if let Some(active) = &mut self.active_image_edit {
            active.visited = active.visited.union(&visited);
        }
        Ok(visited)
    }

    /// Publishes the edit and records a chunk delta for exactly the visited chunks.
    pub fn commit_image_edit(
        &mut self,
        member_id: MemberId,
        session_id: EditSessionId,
    ) -> Result<CommitSummary, DocumentError> {
        let context = self.validate_image_edit(member_id, session_id)?;
        let image = self.target_image_mut(member_id, context.target)?;
        let before = image.capture_chunks(&context.visited);
        let summary = image
            .commit(session_id)
            .map_err(|source| DocumentError::Session { member_id, source })?;
        let after = image.capture_chunks(&context.visited);
        self.active_image_edit = None;
        if !context.visited.is_empty() {
            self.history.record(HistoryEntry::ChunkDelta(ChunkDelta {
                member_id,
                target: context.target,
                area: context.visited,
                before,
                after,
            }));
            self.bump_revision();
        }
        Ok(summary)
    }

    pub fn cancel_image_edit(
        &mut self,
        member_id: MemberId,
        session_id: EditSessionId,
    ) -> Result<(), DocumentError> {
        let context = self.validate_image_edit(member_id, session_id)?;
        self.target_image_mut(member_id, context.target)?
            .rollback(session_id)
            .map_err(|source| DocumentError::Session { member_id, source })?;
        self.active_image_edit = None;
        debug!("[document] cancelled edit {session_id:?} on {member_id}");
        Ok(())
    }

    /// Begin, apply and commit in one step. The edit is rolled back if `operation` cannot be applied.
    pub fn draw(
        &mut self,
        member_id: MemberId,
        target: ImageTarget,
        operation: &mut dyn DrawOperation,
    ) -> Result<CommitSummary, DocumentError> {
        let session_id = self.begin_image_edit(member_id, target)?;
        if let Err(error) = self.apply_to_image(member_id, session_id, operation) {
            self.cancel_image_edit(member_id, session_id)?;
            return Err(error);
        }
        self.commit_image_edit(member_id, session_id)
    }

    fn apply_history_entry(
        &mut self,
        entry: &HistoryEntry,
        side: HistorySide,
    ) -> Result<(), DocumentError> {
        match entry {
            HistoryEntry::ChunkDelta(delta) => {
                let snapshot = match side {
                    HistorySide::Before => &delta.before,
                    HistorySide::After => &delta.after,
                };
                self.target_image_mut(delta.member_id, delta.target)?
                    .restore_chunks(snapshot)
                    .map_err(|source| DocumentError::Session {
                        member_id: delta.member_id,
                        source,
                    })
            }
            HistoryEntry::MemberSnapshot(snapshot) => {
                let (target, current) = match side {
                    HistorySide::Before => (&snapshot.before, &snapshot.after),
                    HistorySide::After => (&snapshot.after, &snapshot.before),
                };
                if let Some(current) = current {
                    self.detach(current.member.id())?;
                }
                if let Some(target) = target {
                    self.insert_at(target.location, target.member.clone())?;
                }
                Ok(())
            }
        }
    }

    /// Returns whether an entry was undone.
    pub fn undo(&mut self) -> Result<bool, DocumentError> {
        self.ensure_no_image_edit()?;
        let Some(entry) = self.history.take_undo() else {
            return Ok(false);
        };
        if let Err(error) = self.apply_history_entry(&entry, HistorySide::Before) {
            warn!("[document] undo failed: {error}");
            self.history.push_redone(entry);
            return Err(error);
        }
        self.history.push_undone(entry);
        self.bump_revision();
        Ok(true)
    }

    /// Returns whether an entry was redone.
    pub fn redo(&mut self) -> Result<bool, DocumentError> {
        self.ensure_no_image_edit()?;
        let Some(entry) = self.history.take_redo() else {
            return Ok(false);
        };
        if let Err(error) = self.apply_history_entry(&entry, HistorySide::After) {
            warn!("[document] redo failed: {error}");
            self.history.push_undone(entry);
            return Err(error);
        }
        self.history.push_redone(entry);
        self.bump_revision();
        Ok(true)
    }
}

#[cfg(test)]
mod tests;
