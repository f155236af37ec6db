//! Green spill suppression on subject pixels.

use crate::compositor::color::{hsv_to_rgb, rgb_to_hsv};
use crate::compositor::morphology::Mask;
use crate::utils::saturate_u8;
use crate::Frame;
use image::Rgb;
use imageproc::map::map_colors2;

/// Saturation multiplier inside the spill hue band.
pub const SATURATION_GAIN: f32 = 0.3;
/// Green multiplier applied after desaturation.
pub const GREEN_GAIN: f32 = 0.85;
/// Red and blue multiplier applied after desaturation.
pub const OTHER_GAIN: f32 = 1.08;

/// Suppresses spill on a single pixel whose hue lies in `(hue_min, hue_max]`.
#[must_use]
pub fn suppress_pixel(rgb: [u8; 3], hue_min: u8, hue_max: u8) -> [u8; 3] {
    let [h, s, v] = rgb_to_hsv(rgb[0], rgb[1], rgb[2]);
    if h <= hue_min || h > hue_max {
        return rgb;
    }

    let s = saturate_u8(f32::from(s) * SATURATION_GAIN);
    let [r, g, b] = hsv_to_rgb(h, s, v);
    [
        saturate_u8(f32::from(r) * OTHER_GAIN),
        saturate_u8(f32::from(g) * GREEN_GAIN),
        saturate_u8(f32::from(b) * OTHER_GAIN),
    ]
}

/// Returns a copy of `frame` with spill removed where `mask` is non-zero.
#[must_use]
pub fn suppress_spill(frame: &Frame, mask: &Mask, hue_min: u8, hue_max: u8) -> Frame {
    map_colors2(frame, mask, |p, m| {
        if m[0] > 0 {
            Rgb(suppress_pixel(p.0, hue_min, hue_max))
        } else {
            p
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    #[test]
    fn greenish_subject_pixel_is_desaturated() {
        let out = suppress_pixel([120, 200, 110], 35, 85);
        assert!(out[1] < 200);
        let spread_before = 200 - 110;
        let spread_after = i32::from(out[1]) - i32::from(out[0].min(out[2]));
        assert!(spread_after < spread_before);
    }

    #[test]
    fn out_of_band_pixels_are_untouched() {
        assert_eq!(suppress_pixel([220, 170, 140], 35, 85), [220, 170, 140]);
        assert_eq!(suppress_pixel([30, 30, 30], 35, 85), [30, 30, 30]);
    }

    #[test]
    fn only_masked_pixels_change() {
        let frame: Frame = ImageBuffer::from_pixel(4, 1, Rgb([120, 200, 110]));
        let mask: Mask = ImageBuffer::from_raw(4, 1, vec![0, 255, 0, 255]).unwrap();
        let out = suppress_spill(&frame, &mask, 35, 85);
        assert_eq!(out.get_pixel(0, 0), &Rgb([120, 200, 110]));
        assert_ne!(out.get_pixel(1, 0), &Rgb([120, 200, 110]));
        assert_eq!(mask.get_pixel(2, 0), &Luma([0]));
    }
}
