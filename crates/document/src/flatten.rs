use chunky::{BlendMode, ResourceLedger};
use image::RgbaImage;
use image::imageops::{self, FilterType};
use model::ChunkResolution;

use crate::Document;
use crate::member::{MemberKind, StructureMember};

fn apply_mask(target: &mut RgbaImage, member: &StructureMember, ledger: &ResourceLedger) {
    let Some(mask) = member.mask() else {
        return;
    };
    let mut cutout = ledger.acquire_paint(BlendMode::DstOut, 1.0);
    let mut keep = ledger.acquire_paint(BlendMode::DstIn, 1.0);
    let covered = mask.find_committed_chunks();
    let layout = mask.layout();
    let size = ChunkResolution::Full.chunk_size();
    let opaque = RgbaImage::from_pixel(size, size, image::Rgba([0, 0, 0, 255]));
    for pos in layout.iter_positions() {
        let (origin_x, origin_y) = pos.pixel_origin(ChunkResolution::Full);
        let offset = (origin_x as i32, origin_y as i32);
        if covered.contains(&pos) {
            mask.draw_committed_chunk_on(pos, ChunkResolution::Full, target, offset, &keep);
            continue;
        }
        // No mask chunk means fully transparent mask there.
        cutout.draw_image(target, &opaque, offset);
    }
    keep.release();
    cutout.release();
}

fn composite_members(
    target: &mut RgbaImage,
    members: &[StructureMember],
    ledger: &ResourceLedger,
) {
    for member in members {
        if !member.is_visible() || member.opacity() <= 0.0 {
            continue;
        }
        let mut layer_paint = ledger.acquire_paint(BlendMode::Normal, member.opacity());
        match member.kind() {
            MemberKind::Layer { image, .. } => {
                let mut content = image.export_bitmap();
                apply_mask(&mut content, member, ledger);
                layer_paint.draw_image(target, &content, (0, 0));
            }
            MemberKind::Group { children } => {
                let mut isolated = ledger.acquire_surface(target.width(), target.height());
                composite_members(isolated.image_mut(), children, ledger);
                apply_mask(isolated.image_mut(), member, ledger);
                layer_paint.draw_image(target, isolated.image(), (0, 0));
                isolated.release();
            }
        }
        layer_paint.release();
    }
}

impl Document {
    /// Composites visible members bottom to top. Groups blend in isolation.
    pub fn flatten(&self) -> RgbaImage {
        let size = self.size();
        let mut out = RgbaImage::new(size.width, size.height);
        composite_members(&mut out, self.root(), self.ledger());
        out
    }

    /// Flattened image scaled down so its longer edge is at most `max_edge`.
    pub fn preview(&self, max_edge: u32) -> RgbaImage {
        let flattened = self.flatten();
        let max_edge = max_edge.max(1);
        let longest = flattened.width().max(flattened.height());
        if longest <= max_edge {
            return flattened;
        }
        let scale = max_edge as f64 / longest as f64;
        let width = ((flattened.width() as f64 * scale).round() as u32).max(1);
        let height = ((flattened.height() as f64 * scale).round() as u32).max(1);
        imageops::resize(&flattened, width, height, FilterType::Triangle)
    }
}
