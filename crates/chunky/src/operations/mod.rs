mod apply_mask;
mod clear;
mod fill;
mod paste;
mod stroke;

pub use apply_mask::ApplyMaskOperation;
pub use clear::ClearRegionOperation;
pub use fill::RectangleFillOperation;
pub use paste::PasteImageOperation;
pub use stroke::StrokeOperation;

use image::Rgba;
use model::{ChunkPos, PixelRect};

use crate::blend::blend_pixel;
use crate::chunk::Chunk;
use crate::paint::Paint;

/// Blends `color` into every pixel of `target` covered by `rect`, with `rect` in full-resolution pixels.
fn blend_rect_into_chunk(
    target: &mut Chunk,
    pos: ChunkPos,
    rect: PixelRect,
    color: Rgba<u8>,
    paint: &Paint,
) {
    let resolution = target.resolution();
    let level_rect = rect.scaled_to(resolution);
    let size = resolution.chunk_size();
    let (origin_x, origin_y) = pos.pixel_origin(resolution);
    let chunk_rect = PixelRect::new(origin_x as i32, origin_y as i32, size, size);
    let Some(covered) = level_rect.intersect(&chunk_rect) else {
        return;
    };
    let mode = paint.blend_mode();
    let opacity = paint.opacity();
    let surface = target.surface_mut();
    for y in covered.y..covered.bottom() as i32 {
        for x in covered.x..covered.right() as i32 {
            let pixel = surface.get_pixel_mut((x - chunk_rect.x) as u32, (y - chunk_rect.y) as u32);
            *pixel = blend_pixel(*pixel, color, mode, opacity);
        }
    }
}
