//! Edge-blend compositing.
//!
//! Only the band around the mask boundary is blended. The interior is a
//! straight copy of the subject and everything outside the dilated mask is
//! left exactly as the background was.

use crate::compositor::gaussian::{GaussianBlur, GaussianKernel};
use crate::compositor::morphology::{threshold, BoundaryRings, Mask};
use crate::config::BlendConfig;
use crate::error::Error;
use crate::utils::{bounding_box, crop, paste, saturate_u8, validate_matching_dimensions, Rect};
use crate::{AlphaMatte, Frame};
use image::Rgb;

/// Unmixed and recomposited value of one channel inside the inner ring.
///
/// `alpha` is the raw matte value; it is scaled by `bias` and the recovered
/// foreground `F = (S − (1−α)·B) / max(α, min_alpha)` is clamped to the byte
/// range before recompositing `F·α + B·(1−α)`.
#[inline]
pub(crate) fn unmix_channel(subject: f32, background: f32, alpha: f32, bias: f32, min_alpha: f32) -> f32 {
    let a = (alpha * bias).clamp(0.0, 1.0);
    let inv = 1.0 - a;
    let foreground = ((-inv).mul_add(background, subject) / a.max(min_alpha)).clamp(0.0, 255.0);
    foreground.mul_add(a, background * inv)
}

/// Region the compositor touches: the mask bounding box grown by the outer
/// ring and the blur kernel radius.
#[must_use]
pub fn blend_roi(binary_mask: &Mask, config: &BlendConfig) -> Option<Rect> {
    let (width, height) = binary_mask.dimensions();
    let blur_radius = if config.edge_blur {
        GaussianKernel::new(config.edge_blur_sigma()).radius()
    } else {
        0
    };
    bounding_box(binary_mask).map(|bbox| bbox.expand(config.outer_ring + blur_radius + 1, width, height))
}

/// Composites `subject` over `background` using the hard mask and the matte.
///
/// # Errors
///
/// * [`Error::DimensionMismatch`] when the four inputs do not share a size.
pub fn composite(
    hard_mask: &Mask,
    alpha: &AlphaMatte,
    subject: &Frame,
    background: &Frame,
    config: &BlendConfig,
) -> Result<Frame, Error> {
    let dims = background.dimensions();
    validate_matching_dimensions(dims, subject.dimensions())?;
    validate_matching_dimensions(dims, hard_mask.dimensions())?;
    validate_matching_dimensions(dims, alpha.dimensions())?;

    let binary = threshold(hard_mask, 127);
    let mut output = background.clone();
    let Some(roi) = blend_roi(&binary, config) else {
        return Ok(output);
    };

    let background_roi = crop(background, roi);
    let subject_roi = crop(subject, roi);
    let alpha_roi = crop(alpha, roi);
    let rings = BoundaryRings::new(&crop(&binary, roi), config.inner_ring, config.outer_ring);

    let mut composed = background_roi.clone();
    for (x, y, out) in composed.enumerate_pixels_mut() {
        if rings.interior.get_pixel(x, y)[0] > 0 {
            *out = *subject_roi.get_pixel(x, y);
        } else if rings.ring_inner.get_pixel(x, y)[0] > 0 {
            let s = subject_roi.get_pixel(x, y);
            let b = background_roi.get_pixel(x, y);
            let a = alpha_roi.get_pixel(x, y)[0];
            *out = Rgb(std::array::from_fn(|c| {
                saturate_u8(unmix_channel(
                    f32::from(s[c]),
                    f32::from(b[c]),
                    a,
                    config.ring_alpha_bias,
                    config.min_alpha,
                ))
            }));
        }
        // outer ring and beyond keep the background
    }

    if config.edge_blur && config.edge_blur_radius > 0.0 {
        let kernel = GaussianKernel::new(config.edge_blur_sigma());
        let blurred_subject = composed.gaussian_blur(&kernel);
        let blurred_background = background_roi.gaussian_blur(&kernel);
        let band = rings.band();
        let w = config.subject_weight;

        for (x, y, out) in composed.enumerate_pixels_mut() {
            if band.get_pixel(x, y)[0] == 0 {
                continue;
            }
            let s = blurred_subject.get_pixel(x, y);
            let b = blurred_background.get_pixel(x, y);
            *out = Rgb(std::array::from_fn(|c| {
                saturate_u8(w.mul_add(f32::from(s[c]), (1.0 - w) * f32::from(b[c])))
            }));
        }
    }

    paste(&mut output, &composed, roi);
    tracing::trace!(?roi, "edge blend composited");
    Ok(output)
}
