//! Internal utility functions for chroma-composite.
//!
//! Validation, rounding and rectangle helpers shared by the CPU stages, the
//! host device and the pipeline.

use crate::error::Error;
use crate::Image;
use image::{Luma, Pixel};
use imageproc::definitions::Clamp;

/// Rounds to the nearest integer and saturates into `0..=255`.
///
/// Every 8-bit output in the crate goes through this function so the CPU
/// path and the device kernels agree bit for bit.
#[inline]
pub fn saturate_u8(value: f32) -> u8 {
    <u8 as Clamp<f32>>::clamp(value + 0.5)
}

/// Validates that an image has non-zero dimensions.
pub fn validate_non_empty_image(width: u32, height: u32) -> Result<(), Error> {
    if width == 0 || height == 0 {
        Err(Error::EmptyImage)
    } else {
        Ok(())
    }
}

/// Validates that two images have matching dimensions.
pub fn validate_matching_dimensions(
    expected: (u32, u32),
    actual: (u32, u32),
) -> Result<(), Error> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { expected, actual })
    }
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge.
    #[must_use]
    pub const fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    #[must_use]
    pub const fn bottom(&self) -> u32 {
        self.y + self.height
    }

    #[must_use]
    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Grows the rectangle by `margin` on every side, clipped to
    /// `width`x`height`.
    #[must_use]
    pub fn expand(&self, margin: u32, width: u32, height: u32) -> Self {
        let x0 = self.x.saturating_sub(margin);
        let y0 = self.y.saturating_sub(margin);
        let x1 = self.right().saturating_add(margin).min(width);
        let y1 = self.bottom().saturating_add(margin).min(height);
        Self::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }
}

/// Bounding box of all non-zero pixels, or `None` for an all-zero mask.
pub fn bounding_box(mask: &Image<Luma<u8>>) -> Option<Rect> {
    let (width, height) = mask.dimensions();
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut found = false;

    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] > 0 {
            found = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    (found && width > 0 && height > 0)
        .then(|| Rect::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Copies the pixels of `rect` into a new image.
pub fn crop<P>(image: &Image<P>, rect: Rect) -> Image<P>
where
    P: Pixel + 'static,
{
    image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Writes `patch` back into `image` at the origin of `rect`.
pub fn paste<P>(image: &mut Image<P>, patch: &Image<P>, rect: Rect)
where
    P: Pixel + 'static,
{
    image::imageops::replace(image, patch, i64::from(rect.x), i64::from(rect.y));
}

/// Runs `f` over every row of `data`, in parallel when the `rayon` feature
/// is enabled.
pub fn for_each_row<F>(data: &mut [f32], row_len: usize, f: F)
where
    F: Fn(usize, &mut [f32]) + Send + Sync,
{
    if row_len == 0 {
        return;
    }

    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        data.par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| f(y, row));
    }

    #[cfg(not(feature = "rayon"))]
    {
        data.chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| f(y, row));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    #[test]
    fn test_saturate_u8() {
        assert_eq!(saturate_u8(-10.0), 0);
        assert_eq!(saturate_u8(0.0), 0);
        assert_eq!(saturate_u8(0.49), 0);
        assert_eq!(saturate_u8(0.5), 1);
        assert_eq!(saturate_u8(127.5), 128);
        assert_eq!(saturate_u8(254.6), 255);
        assert_eq!(saturate_u8(300.0), 255);
    }

    #[test]
    fn test_validate_non_empty_image() {
        assert!(validate_non_empty_image(100, 100).is_ok());
        assert!(validate_non_empty_image(1, 1).is_ok());
        assert_eq!(validate_non_empty_image(0, 100), Err(Error::EmptyImage));
        assert_eq!(validate_non_empty_image(100, 0), Err(Error::EmptyImage));
    }

    #[test]
    fn test_validate_matching_dimensions() {
        assert!(validate_matching_dimensions((100, 100), (100, 100)).is_ok());
        assert_eq!(
            validate_matching_dimensions((100, 100), (100, 50)),
            Err(Error::DimensionMismatch {
                expected: (100, 100),
                actual: (100, 50)
            })
        );
    }

    #[test]
    fn test_rect_expand_clips_to_bounds() {
        let rect = Rect::new(2, 3, 4, 5);
        assert_eq!(rect.expand(10, 20, 20), Rect::new(0, 0, 16, 18));
        assert_eq!(rect.expand(1, 20, 20), Rect::new(1, 2, 6, 7));
        assert_eq!(rect.expand(0, 4, 4), Rect::new(2, 3, 2, 1));
    }

    #[test]
    fn test_bounding_box() {
        let mut mask: Image<Luma<u8>> = ImageBuffer::new(10, 8);
        assert_eq!(bounding_box(&mask), None);

        mask.put_pixel(2, 3, Luma([255]));
        mask.put_pixel(6, 5, Luma([1]));
        assert_eq!(bounding_box(&mask), Some(Rect::new(2, 3, 5, 3)));
    }

    #[test]
    fn test_crop_and_paste_round_trip_region() {
        let mut image: Image<Luma<u8>> = ImageBuffer::from_fn(6, 6, |x, y| Luma([(x + y * 6) as u8]));
        let rect = Rect::new(1, 2, 3, 2);
        let mut patch = crop(&image, rect);
        assert_eq!(patch.dimensions(), (3, 2));
        assert_eq!(patch.get_pixel(0, 0)[0], 13);

        patch.put_pixel(0, 0, Luma([200]));
        paste(&mut image, &patch, rect);
        assert_eq!(image.get_pixel(1, 2)[0], 200);
        assert_eq!(image.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_for_each_row_visits_rows_in_order() {
        let mut data = vec![0.0f32; 12];
        for_each_row(&mut data, 4, |y, row| {
            for value in row.iter_mut() {
                *value = y as f32;
            }
        });
        assert_eq!(&data[0..4], &[0.0; 4]);
        assert_eq!(&data[8..12], &[2.0; 4]);
    }
}
