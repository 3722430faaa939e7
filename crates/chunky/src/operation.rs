use model::{AffectedArea, ChunkPos, ChunkResolution, ImageSize};

use crate::chunk::Chunk;
use crate::chunky_image::CallerImage;

/// A pixel mutation scoped to the chunks it declares.
///
/// The executor in [`crate::ChunkyImage::apply`] asks for the affected area first,
/// then hands every visited chunk to [`DrawOperation::draw_on_chunk`] once per level.
/// Implementations must not depend on chunk order.
pub trait DrawOperation {
    /// Pure: computed before any chunk is touched.
    fn find_affected_area(&self, image_size: ImageSize) -> AffectedArea;

    fn draw_on_chunk(&mut self, target: &mut Chunk, pos: ChunkPos, caller: &CallerImage<'_>);

    /// When true, chunks with no content are skipped instead of allocated.
    fn ignore_empty_chunks(&self) -> bool {
        false
    }

    /// Levels this operation can draw directly. Other levels are downsampled from full.
    fn supports_resolution(&self, resolution: ChunkResolution) -> bool {
        resolution == ChunkResolution::Full
    }

    /// Frees paints and other ledger resources. Must be idempotent.
    fn release(&mut self);
}
