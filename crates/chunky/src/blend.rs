use image::{Rgba, RgbaImage};

/// Porter-Duff and separable modes over straight-alpha RGBA8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Normal,
    Multiply,
    /// Replaces the destination, scaled by opacity.
    Src,
    /// Keeps destination colour, multiplies destination alpha by source alpha.
    DstIn,
    /// Keeps destination colour, multiplies destination alpha by inverse source alpha.
    DstOut,
}

fn unit(value: u8) -> f32 {
    value as f32 / 255.0
}

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn finish(red: f32, green: f32, blue: f32, alpha: f32) -> Rgba<u8> {
    let alpha_byte = to_byte(alpha);
    if alpha_byte == 0 {
        return Rgba([0, 0, 0, 0]);
    }
    Rgba([to_byte(red), to_byte(green), to_byte(blue), alpha_byte])
}

pub fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    let opacity = opacity.clamp(0.0, 1.0);
    let dst_alpha = unit(dst[3]);
    let src_alpha = unit(src[3]);
    match mode {
        BlendMode::DstIn => {
            let alpha = dst_alpha * (1.0 - opacity + opacity * src_alpha);
            finish(unit(dst[0]), unit(dst[1]), unit(dst[2]), alpha)
        }
        BlendMode::DstOut => {
            let alpha = dst_alpha * (1.0 - opacity * src_alpha);
            finish(unit(dst[0]), unit(dst[1]), unit(dst[2]), alpha)
        }
        BlendMode::Src => {
            let alpha = src_alpha * opacity + dst_alpha * (1.0 - opacity);
            if alpha <= 0.0 {
                return Rgba([0, 0, 0, 0]);
            }
            let channel = |index: usize| {
                (unit(src[index]) * src_alpha * opacity
                    + unit(dst[index]) * dst_alpha * (1.0 - opacity))
                    / alpha
            };
            finish(channel(0), channel(1), channel(2), alpha)
        }
        BlendMode::Normal | BlendMode::Multiply => {
            let src_alpha = src_alpha * opacity;
            let alpha = src_alpha + dst_alpha * (1.0 - src_alpha);
            if alpha <= 0.0 {
                return Rgba([0, 0, 0, 0]);
            }
            let channel = |index: usize| {
                let source = unit(src[index]);
                let destination = unit(dst[index]);
                let mixed = match mode {
                    BlendMode::Multiply => source * destination,
                    _ => source,
                };
                (src_alpha * (1.0 - dst_alpha) * source
                    + src_alpha * dst_alpha * mixed
                    + (1.0 - src_alpha) * dst_alpha * destination)
                    / alpha
            };
            finish(channel(0), channel(1), channel(2), alpha)
        }
    }
}

/// Composites `src` onto `dst` with its top-left corner at `offset` in `dst` pixels.
pub fn composite_onto(
    dst: &mut RgbaImage,
    src: &RgbaImage,
    offset: (i32, i32),
    mode: BlendMode,
    opacity: f32,
) {
    let (offset_x, offset_y) = (offset.0 as i64, offset.1 as i64);
    let x_start = (-offset_x).max(0);
    let y_start = (-offset_y).max(0);
    let x_end = (src.width() as i64).min(dst.width() as i64 - offset_x);
    let y_end = (src.height() as i64).min(dst.height() as i64 - offset_y);
    for src_y in y_start..y_end {
        for src_x in x_start..x_end {
            let dst_x = (src_x + offset_x) as u32;
            let dst_y = (src_y + offset_y) as u32;
            let source = *src.get_pixel(src_x as u32, src_y as u32);
            let target = dst.get_pixel_mut(dst_x, dst_y);
            *target = blend_pixel(*target, source, mode, opacity);
        }
    }
}

/// Averages `factor` x `factor` blocks, weighting colour by alpha.
pub fn downsample_box(src: &RgbaImage, factor: u32) -> RgbaImage {
    assert!(factor > 0, "downsample factor must be positive");
    let width = src.width().div_ceil(factor);
    let height = src.height().div_ceil(factor);
    let mut out = RgbaImage::new(width, height);
    for (out_x, out_y, pixel) in out.enumerate_pixels_mut() {
        let mut sums = [0.0f32; 4];
        let mut samples = 0.0f32;
        for y in (out_y * factor)..((out_y + 1) * factor).min(src.height()) {
            for x in (out_x * factor)..((out_x + 1) * factor).min(src.width()) {
                let source = src.get_pixel(x, y);
                let alpha = unit(source[3]);
                sums[0] += unit(source[0]) * alpha;
                sums[1] += unit(source[1]) * alpha;
                sums[2] += unit(source[2]) * alpha;
                sums[3] += alpha;
                samples += 1.0;
            }
        }
        if sums[3] <= 0.0 {
            continue;
        }
        *pixel = finish(
            sums[0] / sums[3],
            sums[1] / sums[3],
            sums[2] / sums[3],
            sums[3] / samples,
        );
    }
    out
}
