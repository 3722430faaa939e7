use model::{AffectedArea, ChunkPos, ChunkResolution, ImageSize};

use crate::blend::BlendMode;
use crate::chunk::Chunk;
use crate::chunky_image::{CallerImage, ChunkyImage, CommittedReader};
use crate::operation::DrawOperation;
use crate::paint::{Paint, ResourceLedger};

/// Multiplies target alpha by the mask's committed alpha, chunk by chunk.
///
/// Only chunks present in both the mask and the target are visited.
#[derive(Debug)]
pub struct ApplyMaskOperation {
    mask: CommittedReader,
    paint: Paint,
}

impl ApplyMaskOperation {
    pub fn new(mask: &ChunkyImage, ledger: &ResourceLedger) -> Self {
        Self {
            mask: mask.committed_reader(),
            paint: ledger.acquire_paint(BlendMode::DstIn, 1.0),
        }
    }
}

impl DrawOperation for ApplyMaskOperation {
    fn find_affected_area(&self, _image_size: ImageSize) -> AffectedArea {
        AffectedArea::from_chunks(self.mask.find_committed_chunks())
    }

    fn draw_on_chunk(&mut self, target: &mut Chunk, pos: ChunkPos, _caller: &CallerImage<'_>) {
        let resolution = target.resolution();
        self.mask.draw_committed_chunk_on(
            pos,
            resolution,
            target.surface_mut(),
            (0, 0),
            &self.paint,
        );
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
