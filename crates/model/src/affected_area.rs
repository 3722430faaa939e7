use std::collections::{BTreeSet, HashSet};

use crate::{ChunkPos, ImageLayout, ImageSize, PixelRect};

/// Chunks an operation may change. Always a superset of what actually changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AffectedArea {
    Everything,
    Chunks(BTreeSet<ChunkPos>),
}

impl Default for AffectedArea {
    fn default() -> Self {
        Self::empty()
    }
}

impl AffectedArea {
    pub fn empty() -> Self {
        AffectedArea::Chunks(BTreeSet::new())
    }

    pub fn everything() -> Self {
        AffectedArea::Everything
    }

    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = ChunkPos>,
    {
        AffectedArea::Chunks(chunks.into_iter().collect())
    }

    /// Chunks overlapping a full-resolution rectangle, clipped to an image of `image_size`.
    ///
    /// Work is bounded by the image, never by the rectangle.
    pub fn from_rect_in(rect: PixelRect, image_size: ImageSize) -> Self {
        Self::from_chunks(ImageLayout::new(image_size).chunks_in_rect(rect))
    }

    pub fn is_everything(&self) -> bool {
        matches!(self, AffectedArea::Everything)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AffectedArea::Everything => false,
            AffectedArea::Chunks(chunks) => chunks.is_empty(),
        }
    }

    /// Number of listed chunks. `None` for `Everything`.
    pub fn len(&self) -> Option<usize> {
        match self {
            AffectedArea::Everything => None,
            AffectedArea::Chunks(chunks) => Some(chunks.len()),
        }
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        match self {
            AffectedArea::Everything => true,
            AffectedArea::Chunks(chunks) => chunks.contains(&pos),
        }
    }

    pub fn union(&self, other: &AffectedArea) -> AffectedArea {
        match (self, other) {
            (AffectedArea::Everything, _) | (_, AffectedArea::Everything) => {
                AffectedArea::Everything
            }
            (AffectedArea::Chunks(left), AffectedArea::Chunks(right)) => {
                AffectedArea::Chunks(left.union(right).copied().collect())
            }
        }
    }

    pub fn intersect_with_chunks(&self, chunks: &HashSet<ChunkPos>) -> AffectedArea {
        match self {
            AffectedArea::Everything => AffectedArea::Chunks(chunks.iter().copied().collect()),
            AffectedArea::Chunks(own) => AffectedArea::Chunks(
                own.iter()
                    .filter(|pos| chunks.contains(pos))
                    .copied()
                    .collect(),
            ),
        }
    }

    /// Expands `Everything` to the whole grid and drops off-grid chunks.
    pub fn resolve(&self, layout: &ImageLayout) -> Vec<ChunkPos> {
        match self {
            AffectedArea::Everything => layout.iter_positions().collect(),
            AffectedArea::Chunks(chunks) => chunks
                .iter()
                .filter(|pos| layout.contains(**pos))
                .copied()
                .collect(),
        }
    }

    /// Listed chunks in row-major order. Empty for `Everything`; use [`Self::resolve`].
    pub fn iter(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        let chunks = match self {
            AffectedArea::Everything => None,
            AffectedArea::Chunks(chunks) => Some(chunks.iter().copied()),
        };
        chunks.into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_with_everything_is_everything() {
        let area = AffectedArea::from_chunks([ChunkPos::new(0, 0)]);
        assert!(area.union(&AffectedArea::everything()).is_everything());
        let merged = area.union(&AffectedArea::from_chunks([ChunkPos::new(1, 0)]));
        assert_eq!(merged.len(), Some(2));
    }

    #[test]
    fn resolve_clips_off_grid_chunks() {
        let layout = ImageLayout::new(ImageSize::new(256, 256));
        let area = AffectedArea::from_chunks([
            ChunkPos::new(-1, 0),
            ChunkPos::new(0, 0),
            ChunkPos::new(4, 4),
        ]);
        assert_eq!(area.resolve(&layout), vec![ChunkPos::new(0, 0)]);
    }

    #[test]
    fn resolve_everything_expands_to_grid() {
        let layout = ImageLayout::new(ImageSize::new(300, 300));
        assert_eq!(AffectedArea::everything().resolve(&layout).len(), 4);
    }

    #[test]
    fn rect_is_clipped_to_image() {
        let size = ImageSize::new(512, 512);
        let area = AffectedArea::from_rect_in(PixelRect::new(-10, -10, 20, 20), size);
        assert_eq!(area, AffectedArea::from_chunks([ChunkPos::new(0, 0)]));
        assert!(AffectedArea::from_rect_in(PixelRect::new(5, 5, 0, 3), size).is_empty());
        assert!(AffectedArea::from_rect_in(PixelRect::new(600, 0, 10, 10), size).is_empty());
    }

    #[test]
    fn huge_rect_on_small_image_stays_small() {
        let area = AffectedArea::from_rect_in(
            PixelRect::new(i32::MIN, i32::MIN, u32::MAX, u32::MAX),
            ImageSize::new(256, 256),
        );
        assert_eq!(area, AffectedArea::from_chunks([ChunkPos::new(0, 0)]));
    }

    #[test]
    fn intersect_everything_takes_other_set() {
        let other: HashSet<_> = [ChunkPos::new(2, 3)].into_iter().collect();
        assert_eq!(
            AffectedArea::everything().intersect_with_chunks(&other),
            AffectedArea::from_chunks([ChunkPos::new(2, 3)])
        );
        assert!(
            AffectedArea::from_chunks([ChunkPos::new(0, 0)])
                .intersect_with_chunks(&other)
                .is_empty()
        );
    }
}
