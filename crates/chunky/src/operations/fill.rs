use image::Rgba;
use model::{AffectedArea, ChunkPos, ChunkResolution, ImageSize, PixelRect};

use super::blend_rect_into_chunk;
use crate::blend::BlendMode;
use crate::chunk::Chunk;
use crate::chunky_image::CallerImage;
use crate::operation::DrawOperation;
use crate::paint::{Paint, ResourceLedger};

#[derive(Debug)]
pub struct RectangleFillOperation {
    rect: PixelRect,
    color: Rgba<u8>,
    paint: Paint,
}

impl RectangleFillOperation {
    pub fn new(rect: PixelRect, color: Rgba<u8>, ledger: &ResourceLedger) -> Self {
        Self::with_blend(rect, color, BlendMode::Normal, 1.0, ledger)
    }

    pub fn with_blend(
        rect: PixelRect,
        color: Rgba<u8>,
        blend_mode: BlendMode,
        opacity: f32,
        ledger: &ResourceLedger,
    ) -> Self {
        Self {
            rect,
            color,
            paint: ledger.acquire_paint(blend_mode, opacity),
        }
    }
}

impl DrawOperation for RectangleFillOperation {
    fn find_affected_area(&self, image_size: ImageSize) -> AffectedArea {
        AffectedArea::from_rect_in(self.rect, image_size)
    }

    fn draw_on_chunk(&mut self, target: &mut Chunk, pos: ChunkPos, _caller: &CallerImage<'_>) {
        blend_rect_into_chunk(target, pos, self.rect, self.color, &self.paint);
    }

    fn supports_resolution(&self, _resolution: ChunkResolution) -> bool {
        true
    }

    fn release(&mut self) {
        self.paint.release();
    }
}
