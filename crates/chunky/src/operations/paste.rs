use std::sync::Arc;

use image::RgbaImage;
use model::{AffectedArea, ChunkPos, ChunkResolution, ImageSize, PixelRect};

use crate::blend::BlendMode;
use crate::chunk::Chunk;
use crate::chunky_image::CallerImage;
use crate::operation::DrawOperation;
use crate::paint::{Paint, ResourceLedger};

/// Places a bitmap at an integer offset in full-resolution pixels.
#[derive(Debug)]
pub struct PasteImageOperation {
    bitmap: Arc<RgbaImage>,
    offset: (i32, i32),
    paint: Paint,
}

impl PasteImageOperation {
    pub fn new(
        bitmap: Arc<RgbaImage>,
        offset: (i32, i32),
        blend_mode: BlendMode,
        ledger: &ResourceLedger,
    ) -> Self {
        Self {
            bitmap,
            offset,
            paint: ledger.acquire_paint(blend_mode, 1.0),
        }
    }

    fn bounds(&self) -> PixelRect {
        PixelRect::new(
            self.offset.0,
            self.offset.1,
            self.bitmap.width(),
            self.bitmap.height(),
        )
    }
}

impl DrawOperation for PasteImageOperation {
    fn find_affected_area(&self, image_size: ImageSize) -> AffectedArea {
        AffectedArea::from_rect_in(self.bounds(), image_size)
    }

    fn draw_on_chunk(&mut self, target: &mut Chunk, pos: ChunkPos, _caller: &CallerImage<'_>) {
        let (origin_x, origin_y) = pos.pixel_origin(ChunkResolution::Full);
        let local_offset = (
            (self.offset.0 as i64 - origin_x) as i32,
            (self.offset.1 as i64 - origin_y) as i32,
        );
        self.paint
            .draw_image(target.surface_mut(), &self.bitmap, local_offset);
    }

    fn release(&mut self) {
        self.paint.release();
    }
}
