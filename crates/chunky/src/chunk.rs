use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use image::RgbaImage;
use model::ChunkResolution;

use crate::blend::downsample_box;

/// One tile of pixels at a single resolution level.
///
/// The surface is shared between clones until one of them writes.
#[derive(Debug, Clone)]
pub struct Chunk {
    resolution: ChunkResolution,
    surface: Arc<RgbaImage>,
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.resolution == other.resolution
            && (Arc::ptr_eq(&self.surface, &other.surface)
                || self.surface.as_raw() == other.surface.as_raw())
    }
}

impl Eq for Chunk {}

impl Chunk {
    pub fn new_transparent(resolution: ChunkResolution) -> Self {
        let size = resolution.chunk_size();
        Self {
            resolution,
            surface: Arc::new(RgbaImage::new(size, size)),
        }
    }

    pub fn from_surface(resolution: ChunkResolution, surface: RgbaImage) -> Self {
        let size = resolution.chunk_size();
        if surface.dimensions() != (size, size) {
            panic!(
                "chunk surface is {:?} but {resolution:?} chunks are {size}x{size}",
                surface.dimensions()
            );
        }
        Self {
            resolution,
            surface: Arc::new(surface),
        }
    }

    pub fn resolution(&self) -> ChunkResolution {
        self.resolution
    }

    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut RgbaImage {
        Arc::make_mut(&mut self.surface)
    }

    pub fn shares_surface_with(&self, other: &Chunk) -> bool {
        Arc::ptr_eq(&self.surface, &other.surface)
    }

    pub fn is_fully_transparent(&self) -> bool {
        self.surface.pixels().all(|pixel| pixel[3] == 0)
    }

    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.resolution.hash(&mut hasher);
        self.surface.as_raw().hash(&mut hasher);
        hasher.finish()
    }

    /// Derives a lower level from this chunk. Only finer-to-coarser is allowed.
    pub fn downsample_to(&self, resolution: ChunkResolution) -> Chunk {
        let from = self.resolution.downsample_factor();
        let to = resolution.downsample_factor();
        if to < from {
            panic!(
                "cannot derive {resolution:?} chunk from coarser {:?} chunk",
                self.resolution
            );
        }
        if to == from {
            return self.clone();
        }
        Chunk::from_surface(resolution, downsample_box(&self.surface, to / from))
    }
}
