//! Foreground mask extraction.

use crate::compositor::color::{rgb_to_hsv, rgb_to_ycrcb};
use crate::compositor::morphology::{close, open, Mask};
use crate::compositor::thresholds::KeyParams;
use crate::config::MaskMode;
use crate::Frame;
use image::Luma;
use imageproc::map::map_colors;

/// `G − R` must exceed this for a pixel to count as backdrop.
pub const RED_MARGIN: i32 = 15;
/// `G − B` must exceed this; negative so teal and cyan backdrops still key
/// while blue-dominant clothing does not.
pub const BLUE_MARGIN: i32 = -10;

/// Radius of the optional open/close cleanup.
pub const CLEANUP_RADIUS: u32 = 1;

/// Green/teal dominance test with signed arithmetic.
#[inline]
pub fn is_dominance_backdrop(rgb: [u8; 3]) -> bool {
    let [r, g, b] = rgb.map(i32::from);
    g - r > RED_MARGIN && g - b > BLUE_MARGIN
}

/// Classifies one pixel as backdrop under `mode`.
#[inline]
pub fn is_backdrop(rgb: [u8; 3], params: &KeyParams, mode: MaskMode) -> bool {
    if is_dominance_backdrop(rgb) {
        return true;
    }
    match mode {
        MaskMode::DominanceHeuristic => false,
        MaskMode::Adaptive => {
            let [r, g, b] = rgb;
            params.matches_backdrop(rgb, rgb_to_hsv(r, g, b), rgb_to_ycrcb(r, g, b))
        }
    }
}

/// Produces the subject mask of `frame`: 255 where the pixel is not
/// backdrop, 0 elsewhere.
#[must_use]
pub fn extract_mask(frame: &Frame, params: &KeyParams, mode: MaskMode, cleanup: bool) -> Mask {
    let mask = map_colors(frame, |p| {
        Luma([if is_backdrop(p.0, params, mode) { 0 } else { 255 }])
    });
    if cleanup {
        close(&open(&mask, CLEANUP_RADIUS), CLEANUP_RADIUS)
    } else {
        mask
    }
}
