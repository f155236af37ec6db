//! Subject lighting correction.
//!
//! Pulls the subject's Lab statistics part of the way toward the background
//! template so the subject sits in the scene's light. Without a template a
//! fixed warm gain is applied instead. Only pixels under the mask change.

use crate::compositor::color::{lab_to_rgb, rgb_to_lab};
use crate::compositor::morphology::Mask;
use crate::utils::saturate_u8;
use crate::Frame;
use image::Rgb;
use imageproc::map::map_colors2;

/// Fraction of the template/subject Lab mean difference applied per channel.
pub const TEMPLATE_PULL: f64 = 0.15;
/// Extra lightness pull applied when the template is brighter.
pub const BRIGHTNESS_PULL: f64 = 0.1;
/// RGB gains used when there is no template to match.
pub const DEFAULT_GAINS: [f32; 3] = [1.08, 1.05, 1.1];

/// Per-pixel correction applied to subject pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightingCorrection {
    /// Per-channel RGB multipliers
    Gains([f32; 3]),
    /// Offsets added to the 8-bit Lab channels
    LabShift([f32; 3]),
}

impl Default for LightingCorrection {
    fn default() -> Self {
        Self::Gains(DEFAULT_GAINS)
    }
}

impl LightingCorrection {
    /// Shift that moves `subject_mean` toward `template_mean` (both 8-bit Lab).
    #[must_use]
    pub fn toward(template_mean: [f64; 3], subject_mean: [f64; 3]) -> Self {
        let mut shift = [0.0f32; 3];
        for (s, (t, p)) in shift.iter_mut().zip(template_mean.iter().zip(subject_mean)) {
            *s = ((t - p) * TEMPLATE_PULL) as f32;
        }
        let brightness = template_mean[0] - subject_mean[0];
        if brightness > 0.0 {
            shift[0] += (brightness * BRIGHTNESS_PULL) as f32;
        }
        Self::LabShift(shift)
    }

    /// Correction for `subject` under `mask`.
    ///
    /// With a template, the shift is derived from the template's mean over
    /// the whole frame and the subject's mean over the mask. Otherwise, or
    /// when either mean is undefined, the default gains are used.
    #[must_use]
    pub fn for_subject(template: Option<&Frame>, subject: &Frame, mask: &Mask) -> Self {
        let means = template.and_then(|t| Some((lab_mean(t, None)?, lab_mean(subject, Some(mask))?)));
        match means {
            Some((template_mean, subject_mean)) => Self::toward(template_mean, subject_mean),
            None => Self::default(),
        }
    }

    /// Corrects one pixel.
    #[must_use]
    pub fn apply(self, rgb: [u8; 3]) -> [u8; 3] {
        match self {
            Self::Gains(gains) => {
                let mut out = rgb;
                for (v, g) in out.iter_mut().zip(gains) {
                    *v = saturate_u8(f32::from(*v) * g);
                }
                out
            }
            Self::LabShift(shift) => {
                let mut lab = rgb_to_lab(rgb[0], rgb[1], rgb[2]);
                for (v, s) in lab.iter_mut().zip(shift) {
                    *v = saturate_u8(f32::from(*v) + s);
                }
                lab_to_rgb(lab[0], lab[1], lab[2])
            }
        }
    }

    /// Mode code and parameters in the layout the device kernels take.
    #[must_use]
    pub const fn encode(self) -> (u32, [f32; 3]) {
        match self {
            Self::Gains(gains) => (0, gains),
            Self::LabShift(shift) => (1, shift),
        }
    }
}

/// Mean 8-bit Lab of `frame`, restricted to non-zero `mask` pixels when a
/// mask is given. `None` when no pixel qualifies.
#[must_use]
pub fn lab_mean(frame: &Frame, mask: Option<&Mask>) -> Option<[f64; 3]> {
    let mut sum = [0.0f64; 3];
    let mut count = 0u64;
    for (x, y, p) in frame.enumerate_pixels() {
        if mask.is_some_and(|m| !m.get_pixel_checked(x, y).is_some_and(|v| v[0] > 0)) {
            continue;
        }
        let lab = rgb_to_lab(p[0], p[1], p[2]);
        for (s, v) in sum.iter_mut().zip(lab) {
            *s += f64::from(v);
        }
        count += 1;
    }
    (count > 0).then(|| sum.map(|s| s / count as f64))
}

/// Returns a copy of `subject` with `correction` applied where `mask` is
/// non-zero.
#[must_use]
pub fn correct_lighting(subject: &Frame, mask: &Mask, correction: LightingCorrection) -> Frame {
    map_colors2(subject, mask, |p, m| {
        if m[0] > 0 {
            Rgb(correction.apply(p.0))
        } else {
            p
        }
    })
}
