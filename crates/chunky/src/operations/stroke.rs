use image::Rgba;
use model::{AffectedArea, ChunkPos, ChunkResolution, ImageSize, PixelRect};

use crate::blend::{BlendMode, blend_pixel};
use crate::chunk::Chunk;
use crate::chunky_image::CallerImage;
use crate::operation::DrawOperation;
use crate::paint::{Paint, ResourceLedger};

/// Round-dab polyline with antialiased edges.
#[derive(Debug)]
pub struct StrokeOperation {
    points: Vec<(f32, f32)>,
    radius: f32,
    color: Rgba<u8>,
    paint: Paint,
}

fn distance_to_segment(point: (f32, f32), start: (f32, f32), end: (f32, f32)) -> f32 {
    let (dx, dy) = (end.0 - start.0, end.1 - start.1);
    let length_squared = dx * dx + dy * dy;
    let t = if length_squared <= f32::EPSILON {
        0.0
    } else {
        (((point.0 - start.0) * dx + (point.1 - start.1) * dy) / length_squared).clamp(0.0, 1.0)
    };
    let (nearest_x, nearest_y) = (start.0 + t * dx, start.1 + t * dy);
    ((point.0 - nearest_x).powi(2) + (point.1 - nearest_y).powi(2)).sqrt()
}

impl StrokeOperation {
    pub fn new(
        points: Vec<(f32, f32)>,
        radius: f32,
        color: Rgba<u8>,
        ledger: &ResourceLedger,
    ) -> Self {
        Self {
            points,
            radius: radius.max(0.0),
            color,
            paint: ledger.acquire_paint(BlendMode::Normal, 1.0),
        }
    }

    /// Pixel bounds of every dab, clipped to the image.
    fn bounds(&self, image_size: ImageSize) -> Option<PixelRect> {
        let first = self.points.first()?;
        let (mut min_x, mut min_y) = (first.0 as f64, first.1 as f64);
        let (mut max_x, mut max_y) = (min_x, min_y);
        for (x, y) in &self.points {
            min_x = min_x.min(*x as f64);
            min_y = min_y.min(*y as f64);
            max_x = max_x.max(*x as f64);
            max_y = max_y.max(*y as f64);
        }
        let reach = self.radius as f64 + 1.0;
        let left = (min_x - reach).floor().max(0.0);
        let top = (min_y - reach).floor().max(0.0);
        let right = (max_x + reach).ceil().min(image_size.width as f64);
        let bottom = (max_y + reach).ceil().min(image_size.height as f64);
        if !(right > left && bottom > top) {
            return None;
        }
        Some(PixelRect::new(
            left as i32,
            top as i32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }

    fn segments(&self, scale: f32) -> Vec<((f32, f32), (f32, f32))> {
        let scaled = |point: &(f32, f32)| (point.0 * scale, point.1 * scale);
        match self.points.as_slice() {
            [] => Vec::new(),
            [single] => vec![(scaled(single), scaled(single))],
            points => points
                .windows(2)
                .map(|pair| (scaled(&pair[0]), scaled(&pair[1])))
                .collect(),
        }
    }
}

impl DrawOperation for StrokeOperation {
    fn find_affected_area(&self, image_size: ImageSize) -> AffectedArea {
        self.bounds(image_size)
            .map(|bounds| AffectedArea::from_rect_in(bounds, image_size))
            .unwrap_or_default()
    }

    fn draw_on_chunk(&mut self, target: &mut Chunk, pos: ChunkPos, _caller: &CallerImage<'_>) {
        let resolution = target.resolution();
        let scale = resolution.multiplier();
        let radius = self.radius * scale;
        let size = resolution.chunk_size();
        let (origin_x, origin_y) = pos.pixel_origin(resolution);
        let reach = radius + 1.0;
        let chunk_min = (origin_x as f32 - reach, origin_y as f32 - reach);
        let chunk_max = (
            (origin_x + size as i64) as f32 + reach,
            (origin_y + size as i64) as f32 + reach,
        );
        let segments: Vec<_> = self
            .segments(scale)
            .into_iter()
            .filter(|(start, end)| {
                start.0.max(end.0) >= chunk_min.0
                    && start.0.min(end.0) <= chunk_max.0
                    && start.1.max(end.1) >= chunk_min.1
                    && start.1.min(end.1) <= chunk_max.1
            })
            .collect();
        if segments.is_empty() {
            return;
        }
        let mode = self.paint.blend_mode();
        let opacity = self.paint.opacity();
        let surface = target.surface_mut();
        for (local_x, local_y, pixel) in surface.enumerate_pixels_mut() {
            let center = (
                (origin_x + local_x as i64) as f32 + 0.5,
                (origin_y + local_y as i64) as f32 + 0.5,
            );
            let distance = segments
                .iter()
                .map(|(start, end)| distance_to_segment(center, *start, *end))
                .fold(f32::INFINITY, f32::min);
            let coverage = (radius - distance + 0.5).clamp(0.0, 1.0);
            if coverage <= 0.0 {
                continue;
            }
            let mut dab = self.color;
            dab[3] = (dab[3] as f32 * coverage).round() as u8;
            *pixel = blend_pixel(*pixel, dab, mode, opacity);
        }
    }

    fn supports_resolution(&self, _resolution: ChunkResolution) -> bool {
        true
    }

    fn release(&mut self) {
        self.paint.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_handles_degenerate_segment() {
        assert_eq!(distance_to_segment((3.0, 4.0), (0.0, 0.0), (0.0, 0.0)), 5.0);
        assert_eq!(distance_to_segment((5.0, 2.0), (0.0, 0.0), (10.0, 0.0)), 2.0);
    }

    #[test]
    fn bounds_cover_radius() {
        let ledger = ResourceLedger::new();
        let size = ImageSize::new(64, 64);
        let stroke = StrokeOperation::new(vec![(10.0, 10.0)], 4.0, Rgba([0, 0, 0, 255]), &ledger);
        assert_eq!(stroke.bounds(size), Some(PixelRect::new(5, 5, 10, 10)));
        let edge = StrokeOperation::new(vec![(1.0, 62.0)], 4.0, Rgba([0, 0, 0, 255]), &ledger);
        assert_eq!(edge.bounds(size), Some(PixelRect::new(0, 57, 6, 7)));
        let outside =
            StrokeOperation::new(vec![(-50.0, -50.0)], 4.0, Rgba([0, 0, 0, 255]), &ledger);
        assert_eq!(outside.bounds(size), None);
        let empty = StrokeOperation::new(Vec::new(), 4.0, Rgba([0, 0, 0, 255]), &ledger);
        assert!(empty.find_affected_area(size).is_empty());
    }

    #[test]
    fn stroke_spanning_billions_of_pixels_stays_on_canvas() {
        let ledger = ResourceLedger::new();
        let size = ImageSize::new(256, 256);
        let stroke = StrokeOperation::new(
            vec![(-3.0e9, 10.0), (3.0e9, 10.0)],
            2.0,
            Rgba([0, 0, 0, 255]),
            &ledger,
        );
        assert_eq!(stroke.bounds(size), Some(PixelRect::new(0, 7, 256, 6)));
        assert_eq!(
            stroke.find_affected_area(size),
            AffectedArea::from_chunks([ChunkPos::new(0, 0)])
        );
    }
}
