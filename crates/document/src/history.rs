use std::collections::VecDeque;

use chunky::ChunkSnapshot;
use model::AffectedArea;
use serde::{Deserialize, Serialize};

use crate::member::{MemberId, StructureMember};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_entries: 100 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HistoryConfigError {
    #[error("history must keep at least one entry")]
    ZeroMaxEntries,
}

impl HistoryConfig {
    pub fn validate(&self) -> Result<(), HistoryConfigError> {
        if self.max_entries == 0 {
            return Err(HistoryConfigError::ZeroMaxEntries);
        }
        Ok(())
    }
}

/// Which image of a member a pixel edit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageTarget {
    Content,
    Mask,
}

/// Parent (`None` for the root list) and index among its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberLocation {
    pub parent: Option<MemberId>,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedMember {
    pub location: MemberLocation,
    pub member: StructureMember,
}

/// Committed chunks of one image before and after a pixel edit.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDelta {
    pub member_id: MemberId,
    pub target: ImageTarget,
    pub area: AffectedArea,
    pub before: ChunkSnapshot,
    pub after: ChunkSnapshot,
}

/// A member as it was placed before and after a structural edit.
/// `None` on one side means the member did not exist there.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberSnapshot {
    pub before: Option<PlacedMember>,
    pub after: Option<PlacedMember>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    ChunkDelta(ChunkDelta),
    MemberSnapshot(MemberSnapshot),
}

impl HistoryEntry {
    /// True when undoing or redoing this entry would write `member_id`'s content.
    pub(crate) fn touches(&self, member_id: MemberId) -> bool {
        match self {
            HistoryEntry::ChunkDelta(delta) => delta.member_id == member_id,
            HistoryEntry::MemberSnapshot(snapshot) => [&snapshot.before, &snapshot.after]
                .into_iter()
                .flatten()
                .any(|placed| placed.member.subtree_ids().contains(&member_id)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HistorySide {
    Before,
    After,
}

#[derive(Debug)]
pub(crate) struct History {
    config: HistoryConfig,
    undo: VecDeque<HistoryEntry>,
    redo: Vec<HistoryEntry>,
}

impl History {
    pub(crate) fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            undo: VecDeque::new(),
            redo: Vec::new(),
        }
    }

    pub(crate) fn config(&self) -> HistoryConfig {
        self.config
    }

    pub(crate) fn record(&mut self, entry: HistoryEntry) {
        self.redo.clear();
        self.undo.push_back(entry);
        while self.undo.len() > self.config.max_entries {
            self.undo.pop_front();
        }
    }

    pub(crate) fn take_undo(&mut self) -> Option<HistoryEntry> {
        self.undo.pop_back()
    }

    pub(crate) fn take_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop()
    }

    pub(crate) fn push_undone(&mut self, entry: HistoryEntry) {
        self.redo.push(entry);
    }

    pub(crate) fn push_redone(&mut self, entry: HistoryEntry) {
        self.undo.push_back(entry);
    }

    /// Drops every entry, undo and redo alike, that would write `member_id`.
    pub(crate) fn forget_member(&mut self, member_id: MemberId) -> usize {
        let before = self.undo.len() + self.redo.len();
        self.undo.retain(|entry| !entry.touches(member_id));
        self.redo.retain(|entry| !entry.touches(member_id));
        before - self.undo.len() - self.redo.len()
    }

    pub(crate) fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub(crate) fn redo_len(&self) -> usize {
        self.redo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> HistoryEntry {
        HistoryEntry::MemberSnapshot(MemberSnapshot {
            before: None,
            after: None,
        })
    }

    #[test]
    fn record_drops_oldest_beyond_limit_and_clears_redo() {
        let mut history = History::new(HistoryConfig { max_entries: 2 });
        history.record(entry());
        history.record(entry());
        let undone = history.take_undo().expect("entry to undo");
        history.push_undone(undone);
        assert_eq!(history.redo_len(), 1);

        history.record(entry());
        history.record(entry());
        assert_eq!(history.undo_len(), 2);
        assert_eq!(history.redo_len(), 0);
    }

    #[test]
    fn forget_member_keeps_unrelated_entries_on_both_stacks() {
        let kept = StructureMember::new_group(Vec::new()).with_name("kept");
        let reloaded = StructureMember::new_group(Vec::new()).with_name("reloaded");
        let snapshot_of = |member: &StructureMember| {
            HistoryEntry::MemberSnapshot(MemberSnapshot {
                before: None,
                after: Some(PlacedMember {
                    location: MemberLocation {
                        parent: None,
                        index: 0,
                    },
                    member: member.clone(),
                }),
            })
        };
        let mut history = History::new(HistoryConfig::default());
        history.record(snapshot_of(&kept));
        history.record(snapshot_of(&reloaded));
        history.record(snapshot_of(&kept));
        let undone = history.take_undo().expect("entry to undo");
        history.push_undone(undone);

        assert_eq!(history.forget_member(reloaded.id()), 1);
        assert_eq!(history.undo_len(), 1);
        assert_eq!(history.redo_len(), 1);
        assert!(!snapshot_of(&kept).touches(reloaded.id()));
        let parent = StructureMember::new_group(vec![reloaded.clone()]);
        assert!(snapshot_of(&parent).touches(reloaded.id()));
    }

    #[test]
    fn zero_entries_is_rejected() {
        assert_eq!(
            HistoryConfig { max_entries: 0 }.validate(),
            Err(HistoryConfigError::ZeroMaxEntries)
        );
        assert_eq!(HistoryConfig::default().validate(), Ok(()));
    }
}
