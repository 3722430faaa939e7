use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use image::RgbaImage;
use image::imageops;
use log::debug;
use model::{
    AffectedArea, ChunkDirtyBitset, ChunkPos, ChunkResolution, ImageLayout, ImageSize, PixelRect,
    RESOLUTION_COUNT,
};
use static_assertions::assert_impl_all;

use crate::chunk::Chunk;
use crate::operation::DrawOperation;
use crate::paint::Paint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EditSessionId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditSessionError {
    #[error("edit session {requested:?} cannot begin while {active:?} is active")]
    SessionAlreadyActive {
        active: EditSessionId,
        requested: EditSessionId,
    },
    #[error("no active edit session for {requested:?}")]
    NoActiveSession { requested: EditSessionId },
    #[error("edit session mismatch: active {active:?}, requested {requested:?}")]
    SessionMismatch {
        active: EditSessionId,
        requested: EditSessionId,
    },
    #[error("edit session {session_id:?} was already committed or rolled back")]
    SessionReplayed { session_id: EditSessionId },
    #[error("committed chunks cannot be replaced while {active:?} is open")]
    SessionOpen { active: EditSessionId },
}

type LevelMap = HashMap<ChunkPos, Chunk>;

#[derive(Debug, Clone, Default, PartialEq)]
struct ChunkLevels {
    levels: [LevelMap; RESOLUTION_COUNT],
}

impl ChunkLevels {
    fn level(&self, resolution: ChunkResolution) -> &LevelMap {
        &self.levels[resolution.index()]
    }

    fn level_mut(&mut self, resolution: ChunkResolution) -> &mut LevelMap {
        &mut self.levels[resolution.index()]
    }

    fn remove_all_levels(&mut self, pos: ChunkPos) {
        for level in &mut self.levels {
            level.remove(&pos);
        }
    }

    fn insert_all_levels(&mut self, pos: ChunkPos, chunks: [Chunk; RESOLUTION_COUNT]) {
        for (level, chunk) in self.levels.iter_mut().zip(chunks) {
            level.insert(pos, chunk);
        }
    }

    fn draw_chunk_on(
        &self,
        pos: ChunkPos,
        resolution: ChunkResolution,
        target: &mut RgbaImage,
        offset: (i32, i32),
        paint: &Paint,
    ) -> bool {
        let Some(chunk) = self.level(resolution).get(&pos) else {
            return false;
        };
        paint.draw_image(target, chunk.surface(), offset);
        true
    }

    fn positions(&self) -> HashSet<ChunkPos> {
        self.level(ChunkResolution::Full).keys().copied().collect()
    }
}

fn latest<'a>(
    working: &'a ChunkLevels,
    committed: &'a ChunkLevels,
    pos: ChunkPos,
    resolution: ChunkResolution,
) -> Option<&'a Chunk> {
    working
        .level(resolution)
        .get(&pos)
        .or_else(|| committed.level(resolution).get(&pos))
}

fn all_levels_from_full(full: Chunk) -> [Chunk; RESOLUTION_COUNT] {
    ChunkResolution::ALL.map(|resolution| full.downsample_to(resolution))
}

/// Read-only view of the image handed to operations while they draw.
///
/// Shows the latest state as it was before the current operation started.
pub struct CallerImage<'a> {
    layout: ImageLayout,
    committed: &'a ChunkLevels,
    working: &'a ChunkLevels,
}

impl CallerImage<'_> {
    pub fn size(&self) -> ImageSize {
        self.layout.size()
    }

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    pub fn latest_chunk(&self, pos: ChunkPos, resolution: ChunkResolution) -> Option<&Chunk> {
        latest(self.working, self.committed, pos, resolution)
    }
}

/// Committed chunks of an image plus what a commit changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub session_id: EditSessionId,
    pub dirty_chunks: Vec<ChunkPos>,
    pub trimmed_chunks: Vec<ChunkPos>,
}

/// Committed chunks for a set of positions, every level. `None` records an absent chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkSnapshot {
    chunks: BTreeMap<ChunkPos, Option<[Chunk; RESOLUTION_COUNT]>>,
}

impl ChunkSnapshot {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn area(&self) -> AffectedArea {
        AffectedArea::from_chunks(self.chunks.keys().copied())
    }

    pub fn chunk(&self, pos: ChunkPos, resolution: ChunkResolution) -> Option<&Chunk> {
        self.chunks
            .get(&pos)
            .and_then(|levels| levels.as_ref())
            .map(|levels| &levels[resolution.index()])
    }
}

#[derive(Debug)]
struct EditSession {
    id: EditSessionId,
    working: ChunkLevels,
    dirty: ChunkDirtyBitset,
}

/// Sparse chunked raster with an atomically published committed state
/// and at most one open edit session.
#[derive(Debug)]
pub struct ChunkyImage {
    layout: ImageLayout,
    committed: Arc<ArcSwap<ChunkLevels>>,
    session: Option<EditSession>,
    finished_sessions: HashSet<EditSessionId>,
}

/// `Send + Sync` handle onto the committed state of one image.
#[derive(Debug, Clone)]
pub struct CommittedReader {
    layout: ImageLayout,
    committed: Arc<ArcSwap<ChunkLevels>>,
}

assert_impl_all!(CommittedReader: Send, Sync);
assert_impl_all!(ChunkyImage: Send);

impl CommittedReader {
    pub fn size(&self) -> ImageSize {
        self.layout.size()
    }

    pub fn get_chunk(&self, pos: ChunkPos, resolution: ChunkResolution) -> Option<Chunk> {
        self.committed.load().level(resolution).get(&pos).cloned()
    }

    pub fn draw_committed_chunk_on(
        &self,
        pos: ChunkPos,
        resolution: ChunkResolution,
        target: &mut RgbaImage,
        offset: (i32, i32),
        paint: &Paint,
    ) -> bool {
        self.committed
            .load()
            .draw_chunk_on(pos, resolution, target, offset, paint)
    }

    pub fn find_committed_chunks(&self) -> HashSet<ChunkPos> {
        self.committed.load().positions()
    }
}

impl Clone for ChunkyImage {
    fn clone(&self) -> Self {
        Self {
            layout: self.layout,
            committed: Arc::new(ArcSwap::new(self.committed.load_full())),
            session: None,
            finished_sessions: self.finished_sessions.clone(),
        }
    }
}

impl PartialEq for ChunkyImage {
    /// Compares committed content only.
    fn eq(&self, other: &Self) -> bool {
        self.layout == other.layout && **self.committed.load() == **other.committed.load()
    }
}

impl ChunkyImage {
    pub fn new(size: ImageSize) -> Self {
        Self {
            layout: ImageLayout::new(size),
            committed: Arc::new(ArcSwap::from_pointee(ChunkLevels::default())),
            session: None,
            finished_sessions: HashSet::new(),
        }
    }

    pub fn size(&self) -> ImageSize {
        self.layout.size()
    }

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    pub fn committed_reader(&self) -> CommittedReader {
        CommittedReader {
            layout: self.layout,
            committed: Arc::clone(&self.committed),
        }
    }

    pub fn get_chunk(&self, pos: ChunkPos, resolution: ChunkResolution) -> Option<Chunk> {
        self.committed.load().level(resolution).get(&pos).cloned()
    }

    pub fn draw_committed_chunk_on(
        &self,
        pos: ChunkPos,
        resolution: ChunkResolution,
        target: &mut RgbaImage,
        offset: (i32, i32),
        paint: &Paint,
    ) -> bool {
        self.committed
            .load()
            .draw_chunk_on(pos, resolution, target, offset, paint)
    }

    pub fn find_committed_chunks(&self) -> HashSet<ChunkPos> {
        self.committed.load().positions()
    }

    pub fn active_session(&self) -> Option<EditSessionId> {
        self.session.as_ref().map(|session| session.id)
    }

    pub fn begin_edit(&mut self, session_id: EditSessionId) -> Result<(), EditSessionError> {
        if self.finished_sessions.contains(&session_id) {
            return Err(EditSessionError::SessionReplayed { session_id });
        }
        if let Some(active) = self.active_session() {
            return Err(EditSessionError::SessionAlreadyActive {
                active,
                requested: session_id,
            });
        }
        self.session = Some(EditSession {
            id: session_id,
            working: ChunkLevels::default(),
            dirty: ChunkDirtyBitset::new(self.layout),
        });
        debug!("[chunky] begin edit session {session_id:?}");
        Ok(())
    }

    fn check_session(&self, session_id: EditSessionId) -> Result<(), EditSessionError> {
        if self.finished_sessions.contains(&session_id) {
            return Err(EditSessionError::SessionReplayed { session_id });
        }
        match self.active_session() {
            None => Err(EditSessionError::NoActiveSession {
                requested: session_id,
            }),
            Some(active) if active != session_id => Err(EditSessionError::SessionMismatch {
                active,
                requested: session_id,
            }),
            Some(_) => Ok(()),
        }
    }

    fn take_session(&mut self, session_id: EditSessionId) -> Result<EditSession, EditSessionError> {
        self.check_session(session_id)?;
        let session = self.session.take().ok_or(EditSessionError::NoActiveSession {
            requested: session_id,
        })?;
        self.finished_sessions.insert(session_id);
        Ok(session)
    }

    /// Runs `operation` against the working state and returns the chunks it visited.
    pub fn apply(
        &mut self,
        session_id: EditSessionId,
        operation: &mut dyn DrawOperation,
    ) -> Result<AffectedArea, EditSessionError> {
        self.check_session(session_id)?;
        let layout = self.layout;
        let positions = operation.find_affected_area(layout.size()).resolve(&layout);
        let committed = self.committed.load_full();
        let session = self
            .session
            .as_mut()
            .ok_or(EditSessionError::NoActiveSession {
                requested: session_id,
            })?;

        let caller = CallerImage {
            layout,
            committed: &committed,
            working: &session.working,
        };
        let mut drawn = Vec::with_capacity(positions.len());
        for pos in positions {
            let latest_full = caller.latest_chunk(pos, ChunkResolution::Full);
            if operation.ignore_empty_chunks() && latest_full.is_none() {
                continue;
            }
            let mut full = latest_full
                .cloned()
                .unwrap_or_else(|| Chunk::new_transparent(ChunkResolution::Full));
            operation.draw_on_chunk(&mut full, pos, &caller);

            let chunks = ChunkResolution::ALL.map(|resolution| {
                if resolution == ChunkResolution::Full {
                    return full.clone();
                }
                if !operation.supports_resolution(resolution) {
                    return full.downsample_to(resolution);
                }
                let mut chunk = caller
                    .latest_chunk(pos, resolution)
                    .cloned()
                    .unwrap_or_else(|| Chunk::new_transparent(resolution));
                operation.draw_on_chunk(&mut chunk, pos, &caller);
                chunk
            });
            drawn.push((pos, chunks));
        }

        let visited = AffectedArea::from_chunks(drawn.iter().map(|(pos, _)| *pos));
        for (pos, chunks) in drawn {
            session.working.insert_all_levels(pos, chunks);
            session.dirty.set(pos);
        }
        debug!(
            "[chunky] session {session_id:?} drew {} chunks",
            visited.len().unwrap_or(0)
        );
        Ok(visited)
    }

    /// Publishes the working state. Fully transparent chunks are dropped.
    pub fn commit(&mut self, session_id: EditSessionId) -> Result<CommitSummary, EditSessionError> {
        let EditSession {
            mut working, dirty, ..
        } = self.take_session(session_id)?;
        let mut next = ChunkLevels::clone(&self.committed.load());
        let mut dirty_chunks = Vec::with_capacity(dirty.len());
        let mut trimmed_chunks = Vec::new();
        for pos in dirty.iter_dirty() {
            dirty_chunks.push(pos);
            let transparent = working
                .level(ChunkResolution::Full)
                .get(&pos)
                .is_none_or(Chunk::is_fully_transparent);
            if transparent {
                next.remove_all_levels(pos);
                trimmed_chunks.push(pos);
                continue;
            }
            for resolution in ChunkResolution::ALL {
                if let Some(chunk) = working.level_mut(resolution).remove(&pos) {
                    next.level_mut(resolution).insert(pos, chunk);
                }
            }
        }
        self.committed.store(Arc::new(next));
        debug!(
            "[chunky] committed session {session_id:?}: {} dirty, {} trimmed",
            dirty_chunks.len(),
            trimmed_chunks.len()
        );
        Ok(CommitSummary {
            session_id,
            dirty_chunks,
            trimmed_chunks,
        })
    }

    pub fn rollback(&mut self, session_id: EditSessionId) -> Result<(), EditSessionError> {
        let session = self.take_session(session_id)?;
        debug!(
            "[chunky] rolled back session {session_id:?} with {} dirty chunks",
            session.dirty.len()
        );
        Ok(())
    }

    /// Latest content at `pos`: working state if a session wrote it, committed otherwise.
    pub fn latest_chunk(&self, pos: ChunkPos, resolution: ChunkResolution) -> Option<Chunk> {
        let committed = self.committed.load();
        match &self.session {
            Some(session) => latest(&session.working, &committed, pos, resolution).cloned(),
            None => committed.level(resolution).get(&pos).cloned(),
        }
    }

    pub fn find_latest_chunks(&self) -> HashSet<ChunkPos> {
        let mut positions = self.find_committed_chunks();
        let Some(session) = &self.session else {
            return positions;
        };
        for (pos, chunk) in session.working.level(ChunkResolution::Full) {
            if chunk.is_fully_transparent() {
                positions.remove(pos);
            } else {
                positions.insert(*pos);
            }
        }
        positions
    }

    pub fn capture_chunks(&self, area: &AffectedArea) -> ChunkSnapshot {
        let committed = self.committed.load();
        let chunks = area
            .resolve(&self.layout)
            .into_iter()
            .map(|pos| {
                let levels = committed
                    .level(ChunkResolution::Full)
                    .get(&pos)
                    .map(|full| {
                        ChunkResolution::ALL.map(|resolution| {
                            committed
                                .level(resolution)
                                .get(&pos)
                                .cloned()
                                .unwrap_or_else(|| full.downsample_to(resolution))
                        })
                    });
                (pos, levels)
            })
            .collect();
        ChunkSnapshot { chunks }
    }

    /// Replaces committed chunks at the snapshot's positions. Absent entries remove chunks.
    pub fn restore_chunks(&mut self, snapshot: &ChunkSnapshot) -> Result<(), EditSessionError> {
        if let Some(active) = self.active_session() {
            return Err(EditSessionError::SessionOpen { active });
        }
        let mut next = ChunkLevels::clone(&self.committed.load());
        for (pos, levels) in &snapshot.chunks {
            next.remove_all_levels(*pos);
            if let Some(levels) = levels {
                next.insert_all_levels(*pos, levels.clone());
            }
        }
        self.committed.store(Arc::new(next));
        Ok(())
    }

    pub fn from_bitmap(size: ImageSize, bitmap: &RgbaImage, offset: (i32, i32)) -> Self {
        let image = Self::new(size);
        image
            .committed
            .store(Arc::new(Self::levels_from_bitmap(image.layout, bitmap, offset)));
        image
    }

    pub fn replace_from_bitmap(
        &mut self,
        bitmap: &RgbaImage,
        offset: (i32, i32),
    ) -> Result<(), EditSessionError> {
        if let Some(active) = self.active_session() {
            return Err(EditSessionError::SessionOpen { active });
        }
        self.committed
            .store(Arc::new(Self::levels_from_bitmap(self.layout, bitmap, offset)));
        Ok(())
    }

    /// Removes every committed chunk.
    pub fn clear(&mut self) -> Result<(), EditSessionError> {
        if let Some(active) = self.active_session() {
            return Err(EditSessionError::SessionOpen { active });
        }
        self.committed.store(Arc::new(ChunkLevels::default()));
        Ok(())
    }

    fn levels_from_bitmap(
        layout: ImageLayout,
        bitmap: &RgbaImage,
        offset: (i32, i32),
    ) -> ChunkLevels {
        let mut levels = ChunkLevels::default();
        let bitmap_rect = PixelRect::new(offset.0, offset.1, bitmap.width(), bitmap.height());
        let image_rect = PixelRect::from_size(layout.size());
        for pos in layout.chunks_in_rect(bitmap_rect) {
            let Some(chunk_rect) = layout.chunk_rect(pos, ChunkResolution::Full) else {
                continue;
            };
            let Some(copy_rect) = chunk_rect
                .intersect(&bitmap_rect)
                .and_then(|rect| rect.intersect(&image_rect))
            else {
                continue;
            };
            let mut full = Chunk::new_transparent(ChunkResolution::Full);
            let surface = full.surface_mut();
            for y in copy_rect.y..copy_rect.bottom() as i32 {
                for x in copy_rect.x..copy_rect.right() as i32 {
                    let source = *bitmap.get_pixel((x - offset.0) as u32, (y - offset.1) as u32);
                    surface.put_pixel((x - chunk_rect.x) as u32, (y - chunk_rect.y) as u32, source);
                }
            }
            if full.is_fully_transparent() {
                continue;
            }
            levels.insert_all_levels(pos, all_levels_from_full(full));
        }
        levels
    }

    /// Committed full-resolution content as one bitmap of the image size.
    pub fn export_bitmap(&self) -> RgbaImage {
        let size = self.layout.size();
        let mut out = RgbaImage::new(size.width, size.height);
        let committed = self.committed.load();
        for (pos, chunk) in committed.level(ChunkResolution::Full) {
            let (origin_x, origin_y) = pos.pixel_origin(ChunkResolution::Full);
            imageops::replace(&mut out, chunk.surface(), origin_x, origin_y);
        }
        out
    }
}
