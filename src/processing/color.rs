use image::RgbaImage;
use palette::{FromColor, Hsv, LinSrgb, Srgb};

/// Neutral wash used when an image's colors are unknown.
pub const NEUTRAL_GRAY: [u8; 3] = [128, 128, 128];

const HUE_BUCKETS: usize = 12;
const SAMPLE_TARGET: u32 = 64;

/// Up to `max_colors` dominant colors, most common first.
///
/// Pixels are sampled on a sparse grid, bucketed by hue, and each bucket is
/// averaged in linear light. Low-saturation pixels share one extra bucket.
pub fn dominant_colors(img: &RgbaImage, max_colors: usize) -> Vec<[u8; 3]> {
    if img.width() == 0 || img.height() == 0 || max_colors == 0 {
        return Vec::new();
    }
    let step_x = (img.width() / SAMPLE_TARGET).max(1);
    let step_y = (img.height() / SAMPLE_TARGET).max(1);

    let mut buckets = [(LinSrgb::new(0.0f32, 0.0, 0.0), 0u32); HUE_BUCKETS + 1];
    for y in (0..img.height()).step_by(step_y as usize) {
        for x in (0..img.width()).step_by(step_x as usize) {
            let px = img.get_pixel(x, y);
            if px[3] == 0 {
                continue;
            }
            let srgb = Srgb::new(px[0], px[1], px[2]).into_format::<f32>();
            let hsv = Hsv::from_color(srgb);
            let slot = if hsv.saturation < 0.15 || hsv.value < 0.08 {
                HUE_BUCKETS
            } else {
                let degrees = hsv.hue.into_positive_degrees();
                ((degrees / 360.0 * HUE_BUCKETS as f32) as usize).min(HUE_BUCKETS - 1)
            };
            let lin: LinSrgb<f32> = srgb.into_linear();
            let (sum, count) = &mut buckets[slot];
            *sum = *sum + lin;
            *count += 1;
        }
    }

    let mut ranked: Vec<_> = buckets.iter().filter(|(_, count)| *count > 0).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(max_colors)
        .map(|(sum, count)| {
            let n = *count as f32;
            let mean = LinSrgb::new(sum.red / n, sum.green / n, sum.blue / n);
            let out: Srgb<u8> = Srgb::from_linear(mean);
            [out.red, out.green, out.blue]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn solid_image_has_one_dominant_color() {
        let img = RgbaImage::from_pixel(32, 32, Rgba([200, 20, 20, 255]));
        let colors = dominant_colors(&img, 3);
        assert_eq!(colors.len(), 1);
        let [r, g, b] = colors[0];
        assert!(r > 190 && g < 30 && b < 30, "got {:?}", colors[0]);
    }

    #[test]
    fn larger_region_ranks_first() {
        let mut img = RgbaImage::from_pixel(64, 64, Rgba([20, 20, 220, 255]));
        for y in 0..16 {
            for x in 0..64 {
                img.put_pixel(x, y, Rgba([20, 220, 20, 255]));
            }
        }
        let colors = dominant_colors(&img, 2);
        assert_eq!(colors.len(), 2);
        assert!(colors[0][2] > 200, "blue should dominate: {:?}", colors);
        assert!(colors[1][1] > 200, "green second: {:?}", colors);
    }

    #[test]
    fn transparent_image_has_no_palette() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
        assert!(dominant_colors(&img, 3).is_empty());
    }
}
