//! Test utilities for chroma-composite
//!
//! Synthetic frames and masks shared by the unit tests.
//! It is only compiled when running tests.

use crate::utils::Rect;
use crate::{Frame, Image};
use image::{ImageBuffer, Luma, Rgb};

/// Backdrop color of the synthetic frames.
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

/// Creates a frame filled with pure backdrop green.
///
/// # Returns
/// A `width`x`height` RGB frame
pub fn green_frame(width: u32, height: u32) -> Frame {
    ImageBuffer::from_pixel(width, height, GREEN)
}

/// Creates a green frame with a solid `color` rectangle.
///
/// # Returns
/// A `width`x`height` RGB frame
pub fn rectangle_frame(width: u32, height: u32, rect: Rect, color: Rgb<u8>) -> Frame {
    ImageBuffer::from_fn(width, height, |x, y| if rect.contains(x, y) { color } else { GREEN })
}

/// Creates a binary mask that is 255 inside `rect`.
pub fn rectangle_mask(width: u32, height: u32, rect: Rect) -> Image<Luma<u8>> {
    ImageBuffer::from_fn(width, height, |x, y| Luma([if rect.contains(x, y) { 255 } else { 0 }]))
}

/// Creates a frame with a smooth color gradient, useful as a background.
pub fn gradient_frame(width: u32, height: u32) -> Frame {
    ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    })
}

/// Population variance of a float image.
pub fn variance(image: &Image<Luma<f32>>) -> f64 {
    let n = f64::from(image.width() * image.height());
    let mean = image.pixels().map(|p| f64::from(p[0])).sum::<f64>() / n;
    image
        .pixels()
        .map(|p| (f64::from(p[0]) - mean).powi(2))
        .sum::<f64>()
        / n
}
