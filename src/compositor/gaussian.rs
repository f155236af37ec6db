//! Separable Gaussian blur on 8-bit images.
//!
//! Kernel sizing follows OpenCV (`round(6σ + 1) | 1` when no explicit size is
//! given); borders replicate the edge pixel; each pass rounds back to 8 bits
//! so the device kernels can keep their intermediates in byte buffers.

use crate::utils::saturate_u8;
use crate::Image;
use image::{ImageBuffer, Luma, Pixel, Rgb};

/// Normalised 1-D Gaussian weights of odd length.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    sigma: f32,
    weights: Vec<f32>,
}

impl GaussianKernel {
    /// Kernel sized from sigma alone.
    #[must_use]
    pub fn new(sigma: f32) -> Self {
        let size = ((sigma * 6.0 + 1.0).round().max(1.0) as usize) | 1;
        Self::with_size(size, sigma)
    }

    /// Kernel with an explicit (odd) size.
    #[must_use]
    pub fn with_size(size: usize, sigma: f32) -> Self {
        let size = size.max(1) | 1;
        let sigma = if sigma > 0.0 {
            sigma
        } else {
            0.3f32.mul_add((size as f32 - 1.0).mul_add(0.5, -1.0), 0.8)
        };

        let center = (size / 2) as f32;
        let denom = 2.0 * sigma * sigma;
        let mut weights: Vec<f32> = (0..size)
            .map(|i| {
                let d = i as f32 - center;
                (-(d * d) / denom).exp()
            })
            .collect();
        let sum: f32 = weights.iter().sum();
        for w in &mut weights {
            *w /= sum;
        }

        Self { sigma, weights }
    }

    #[must_use]
    pub fn radius(&self) -> u32 {
        (self.weights.len() / 2) as u32
    }

    #[must_use]
    pub fn sigma(&self) -> f32 {
        self.sigma
    }

    #[must_use]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }
}

/// Direction of a separable filter pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Horizontal,
    Vertical,
}

/// Gaussian blur extension for 8-bit images.
pub trait GaussianBlur {
    /// Blurs the whole image with replicated borders.
    #[must_use]
    fn gaussian_blur(&self, kernel: &GaussianKernel) -> Self;
}

impl GaussianBlur for Image<Rgb<u8>> {
    fn gaussian_blur(&self, kernel: &GaussianKernel) -> Self {
        blur_image(self, kernel)
    }
}

impl GaussianBlur for Image<Luma<u8>> {
    fn gaussian_blur(&self, kernel: &GaussianKernel) -> Self {
        blur_image(self, kernel)
    }
}

fn blur_image<P>(image: &Image<P>, kernel: &GaussianKernel) -> Image<P>
where
    P: Pixel<Subpixel = u8>,
{
    let (width, height) = image.dimensions();
    let channels = usize::from(P::CHANNEL_COUNT);
    let horizontal = blur_pass(
        image.as_raw(),
        width as usize,
        height as usize,
        channels,
        kernel.weights(),
        Axis::Horizontal,
    );
    let vertical = blur_pass(
        &horizontal,
        width as usize,
        height as usize,
        channels,
        kernel.weights(),
        Axis::Vertical,
    );
    ImageBuffer::from_raw(width, height, vertical).unwrap_or_else(|| ImageBuffer::new(width, height))
}

/// One separable pass over interleaved 8-bit data.
pub(crate) fn blur_pass(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    weights: &[f32],
    axis: Axis,
) -> Vec<u8> {
    let radius = (weights.len() / 2) as isize;
    let mut out = vec![0u8; width * height * channels];
    if width == 0 || height == 0 {
        return out;
    }

    for y in 0..height {
        for x in 0..width {
            for c in 0..channels {
                let mut acc = 0.0f32;
                for (k, &w) in weights.iter().enumerate() {
                    let offset = k as isize - radius;
                    let (sx, sy) = match axis {
                        Axis::Horizontal => {
                            ((x as isize + offset).clamp(0, width as isize - 1) as usize, y)
                        }
                        Axis::Vertical => {
                            (x, (y as isize + offset).clamp(0, height as isize - 1) as usize)
                        }
                    };
                    acc = w.mul_add(f32::from(data[(sy * width + sx) * channels + c]), acc);
                }
                out[(y * width + x) * channels + c] = saturate_u8(acc);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_size_follows_sigma() {
        assert_eq!(GaussianKernel::new(2.0).weights().len(), 13);
        assert_eq!(GaussianKernel::new(9.0).radius(), 27);
        assert_eq!(GaussianKernel::with_size(9, 2.0).radius(), 4);
    }

    #[test]
    fn kernel_is_normalised_and_symmetric() {
        let kernel = GaussianKernel::with_size(9, 2.0);
        let sum: f32 = kernel.weights().iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        let w = kernel.weights();
        for i in 0..w.len() / 2 {
            assert!((w[i] - w[w.len() - 1 - i]).abs() < 1e-7);
        }
        assert!(w[4] > w[3]);
    }

    #[test]
    fn constant_image_is_preserved() {
        let image: Image<Rgb<u8>> = ImageBuffer::from_pixel(12, 9, Rgb([10, 200, 77]));
        let blurred = image.gaussian_blur(&GaussianKernel::new(3.0));
        assert_eq!(blurred, image);
    }

    #[test]
    fn step_edge_is_softened() {
        let mask: Image<Luma<u8>> =
            ImageBuffer::from_fn(20, 1, |x, _| Luma([if x < 10 { 0 } else { 255 }]));
        let blurred = mask.gaussian_blur(&GaussianKernel::with_size(9, 2.0));
        assert_eq!(blurred.get_pixel(0, 0)[0], 0);
        assert_eq!(blurred.get_pixel(19, 0)[0], 255);
        let mid = blurred.get_pixel(10, 0)[0];
        assert!(mid > 100 && mid < 255, "mid {mid}");
        for x in 1..20 {
            assert!(blurred.get_pixel(x, 0)[0] >= blurred.get_pixel(x - 1, 0)[0]);
        }
    }
}
