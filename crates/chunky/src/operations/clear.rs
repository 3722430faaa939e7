use image::Rgba;
use model::{AffectedArea, ChunkPos, ChunkResolution, ImageSize, PixelRect};

use super::blend_rect_into_chunk;
use crate::blend::BlendMode;
use crate::chunk::Chunk;
use crate::chunky_image::CallerImage;
use crate::operation::DrawOperation;
use crate::paint::{Paint, ResourceLedger};

/// Erases a rectangle. Chunks that end up empty are trimmed at commit.
#[derive(Debug)]
pub struct ClearRegionOperation {
    rect: PixelRect,
    paint: Paint,
}

impl ClearRegionOperation {
    pub fn new(rect: PixelRect, ledger: &ResourceLedger) -> Self {
        Self {
            rect,
            paint: ledger.acquire_paint(BlendMode::DstOut, 1.0),
        }
    }
}

impl DrawOperation for ClearRegionOperation {
    fn find_affected_area(&self, image_size: ImageSize) -> AffectedArea {
        AffectedArea::from_rect_in(self.rect, image_size)
    }

    fn draw_on_chunk(&mut self, target: &mut Chunk, pos: ChunkPos, _caller: &CallerImage<'_>) {
        blend_rect_into_chunk(target, pos, self.rect, Rgba([0, 0, 0, 255]), &self.paint);
    }

    fn ignore_empty_chunks(&self) -> bool {
        true
    }

    fn supports_resolution(&self, _resolution: ChunkResolution) -> bool {
        true
    }

    fn release(&mut self) {
        self.paint.release();
    }
}
