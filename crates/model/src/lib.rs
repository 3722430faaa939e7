use bitvec::prelude::{BitVec, Lsb0};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

mod affected_area;

pub use affected_area::AffectedArea;

/// Edge length of a full-resolution chunk in pixels.
pub const FULL_CHUNK_SIZE: u32 = 256;
pub const RESOLUTION_COUNT: usize = 4;

// Every level must divide the full chunk evenly.
const_assert!(FULL_CHUNK_SIZE % 8 == 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChunkResolution {
    Full,
    Half,
    Quarter,
    Eighth,
}

impl ChunkResolution {
    pub const ALL: [ChunkResolution; RESOLUTION_COUNT] = [
        ChunkResolution::Full,
        ChunkResolution::Half,
        ChunkResolution::Quarter,
        ChunkResolution::Eighth,
    ];

    pub const fn downsample_factor(self) -> u32 {
        match self {
            ChunkResolution::Full => 1,
            ChunkResolution::Half => 2,
            ChunkResolution::Quarter => 4,
            ChunkResolution::Eighth => 8,
        }
    }

    /// Pixel edge of a chunk stored at this level.
    pub const fn chunk_size(self) -> u32 {
        FULL_CHUNK_SIZE / self.downsample_factor()
    }

    pub const fn index(self) -> usize {
        match self {
            ChunkResolution::Full => 0,
            ChunkResolution::Half => 1,
            ChunkResolution::Quarter => 2,
            ChunkResolution::Eighth => 3,
        }
    }

    pub fn multiplier(self) -> f32 {
        1.0 / self.downsample_factor() as f32
    }

    pub fn lower_levels() -> impl Iterator<Item = ChunkResolution> {
        Self::ALL.into_iter().skip(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Chunk containing the pixel `(pixel_x, pixel_y)` expressed in pixels of `resolution`.
    pub fn containing_pixel(pixel_x: i32, pixel_y: i32, resolution: ChunkResolution) -> Self {
        let size = resolution.chunk_size() as i32;
        Self {
            x: pixel_x.div_euclid(size),
            y: pixel_y.div_euclid(size),
        }
    }

    /// Top-left pixel of this chunk in pixels of `resolution`.
    pub fn pixel_origin(self, resolution: ChunkResolution) -> (i64, i64) {
        let size = resolution.chunk_size() as i64;
        (self.x as i64 * size, self.y as i64 * size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Size of this image when stored at `resolution`, rounded up.
    pub fn at_resolution(self, resolution: ChunkResolution) -> Self {
        let factor = resolution.downsample_factor();
        Self {
            width: self.width.div_ceil(factor),
            height: self.height.div_ceil(factor),
        }
    }
}

/// Axis-aligned pixel rectangle; `x`/`y` may be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn from_size(size: ImageSize) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        (x as i64) >= self.x as i64
            && (y as i64) >= self.y as i64
            && (x as i64) < self.right()
            && (y as i64) < self.bottom()
    }

    pub fn intersect(&self, other: &PixelRect) -> Option<PixelRect> {
        let left = (self.x as i64).max(other.x as i64);
        let top = (self.y as i64).max(other.y as i64);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(PixelRect {
            x: left as i32,
            y: top as i32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }

    /// Scales the rectangle down to `resolution`, growing it so it still covers every touched pixel.
    pub fn scaled_to(&self, resolution: ChunkResolution) -> PixelRect {
        let factor = resolution.downsample_factor() as i64;
        let left = (self.x as i64).div_euclid(factor);
        let top = (self.y as i64).div_euclid(factor);
        let right = (self.right() + factor - 1).div_euclid(factor);
        let bottom = (self.bottom() + factor - 1).div_euclid(factor);
        PixelRect {
            x: left as i32,
            y: top as i32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("chunk ({x}, {y}) is outside the chunk grid")]
    ChunkOutOfBounds { x: i32, y: i32 },
    #[error("chunk grid layouts differ")]
    LayoutMismatch,
}

/// Chunk grid of one image. All resolution levels share this grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    size: ImageSize,
    chunks_per_row: u32,
    chunks_per_column: u32,
}

impl ImageLayout {
    pub fn new(size: ImageSize) -> Self {
        Self {
            size,
            chunks_per_row: size.width.div_ceil(FULL_CHUNK_SIZE),
            chunks_per_column: size.height.div_ceil(FULL_CHUNK_SIZE),
        }
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn chunks_per_row(&self) -> u32 {
        self.chunks_per_row
    }

    pub fn chunks_per_column(&self) -> u32 {
        self.chunks_per_column
    }

    pub const fn max_chunks(&self) -> usize {
        self.chunks_per_row as usize * self.chunks_per_column as usize
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        pos.x >= 0
            && pos.y >= 0
            && (pos.x as u32) < self.chunks_per_row
            && (pos.y as u32) < self.chunks_per_column
    }

    pub fn chunk_index(&self, pos: ChunkPos) -> Result<usize, LayoutError> {
        if !self.contains(pos) {
            return Err(LayoutError::ChunkOutOfBounds { x: pos.x, y: pos.y });
        }
        Ok(pos.y as usize * self.chunks_per_row as usize + pos.x as usize)
    }

    pub fn chunk_pos(&self, index: usize) -> Result<ChunkPos, LayoutError> {
        if index >= self.max_chunks() {
            return Err(LayoutError::ChunkOutOfBounds {
                x: i32::MAX,
                y: i32::MAX,
            });
        }
        let row = self.chunks_per_row as usize;
        Ok(ChunkPos::new((index % row) as i32, (index / row) as i32))
    }

    pub fn iter_positions(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        (0..self.chunks_per_column as i32).flat_map(move |y| {
            (0..self.chunks_per_row as i32).map(move |x| ChunkPos::new(x, y))
        })
    }

    /// Chunks of this grid touched by a full-resolution pixel rectangle.
    pub fn chunks_in_rect(&self, rect: PixelRect) -> Vec<ChunkPos> {
        let Some(clipped) = rect.intersect(&PixelRect::from_size(self.size)) else {
            return Vec::new();
        };
        let first = ChunkPos::containing_pixel(clipped.x, clipped.y, ChunkResolution::Full);
        let last = ChunkPos::containing_pixel(
            (clipped.right() - 1) as i32,
            (clipped.bottom() - 1) as i32,
            ChunkResolution::Full,
        );
        let mut chunks = Vec::new();
        for y in first.y..=last.y {
            for x in first.x..=last.x {
                chunks.push(ChunkPos::new(x, y));
            }
        }
        chunks
    }

    /// Pixel rectangle of `pos` at `resolution`, clipped to the image.
    pub fn chunk_rect(&self, pos: ChunkPos, resolution: ChunkResolution) -> Option<PixelRect> {
        let size = resolution.chunk_size();
        let (origin_x, origin_y) = pos.pixel_origin(resolution);
        let rect = PixelRect::new(origin_x as i32, origin_y as i32, size, size);
        let level_size = self.size.at_resolution(resolution);
        rect.intersect(&PixelRect::from_size(level_size))
    }
}

/// One bit per chunk of an [`ImageLayout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDirtyBitset {
    layout: ImageLayout,
    bits: BitVec<usize, Lsb0>,
    dirty_count: usize,
}

impl ChunkDirtyBitset {
    pub fn new(layout: ImageLayout) -> Self {
        Self {
            layout,
            bits: BitVec::repeat(false, layout.max_chunks()),
            dirty_count: 0,
        }
    }

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    pub fn is_empty(&self) -> bool {
        self.dirty_count == 0
    }

    pub fn is_full(&self) -> bool {
        self.dirty_count == self.bits.len() && !self.bits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dirty_count
    }

    /// Marks `pos` dirty. Positions off the grid are an addressing bug in the caller.
    pub fn set(&mut self, pos: ChunkPos) {
        let index = self
            .layout
            .chunk_index(pos)
            .unwrap_or_else(|error| panic!("dirty bitset addressed with invalid chunk: {error}"));
        let was_dirty = self.bits[index];
        self.bits.set(index, true);
        self.dirty_count += !was_dirty as usize;
    }

    pub fn is_set(&self, pos: ChunkPos) -> bool {
        match self.layout.chunk_index(pos) {
            Ok(index) => self.bits[index],
            Err(_) => false,
        }
    }

    pub fn merge_from(&mut self, other: &ChunkDirtyBitset) -> Result<(), LayoutError> {
        if self.layout != other.layout {
            return Err(LayoutError::LayoutMismatch);
        }
        for index in other.bits.iter_ones() {
            if !self.bits[index] {
                self.bits.set(index, true);
                self.dirty_count += 1;
            }
        }
        Ok(())
    }

    pub fn iter_dirty(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        let row = self.layout.chunks_per_row() as usize;
        self.bits
            .iter_ones()
            .map(move |index| ChunkPos::new((index % row) as i32, (index / row) as i32))
    }

    pub fn clear(&mut self) {
        self.bits.fill(false);
        self.dirty_count = 0;
    }
}
