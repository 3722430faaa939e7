//! Chunked raster storage with committed/working state and scoped draw operations.

mod blend;
mod chunk;
mod chunky_image;
mod operation;
mod operations;
mod paint;

pub use blend::{BlendMode, blend_pixel, composite_onto, downsample_box};
pub use chunk::Chunk;
pub use chunky_image::{
    CallerImage, ChunkSnapshot, ChunkyImage, CommitSummary, CommittedReader, EditSessionError,
    EditSessionId,
};
pub use operation::DrawOperation;
pub use operations::{
    ApplyMaskOperation, ClearRegionOperation, PasteImageOperation, RectangleFillOperation,
    StrokeOperation,
};
pub use paint::{Paint, ResourceKind, ResourceLedger, ScratchSurface};

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use image::{Rgba, RgbaImage};
    use model::{ChunkPos, ChunkResolution, ImageSize};

    use crate::ChunkyImage;

    /// Image of `size` whose listed full-resolution chunks are filled with `color`.
    pub fn image_with_filled_chunks(
        size: ImageSize,
        chunks: &[ChunkPos],
        color: Rgba<u8>,
    ) -> ChunkyImage {
        let mut bitmap = RgbaImage::new(size.width, size.height);
        let chunk_size = ChunkResolution::Full.chunk_size();
        for pos in chunks {
            let (origin_x, origin_y) = pos.pixel_origin(ChunkResolution::Full);
            for y in 0..chunk_size as i64 {
                for x in 0..chunk_size as i64 {
                    let (pixel_x, pixel_y) = (origin_x + x, origin_y + y);
                    if pixel_x < size.width as i64 && pixel_y < size.height as i64 {
                        bitmap.put_pixel(pixel_x as u32, pixel_y as u32, color);
                    }
                }
            }
        }
        ChunkyImage::from_bitmap(size, &bitmap, (0, 0))
    }

    pub fn mean_alpha(image: &RgbaImage) -> f64 {
        let total: u64 = image.pixels().map(|pixel| pixel[3] as u64).sum();
        total as f64 / (image.width() as u64 * image.height() as u64).max(1) as f64
    }
}
