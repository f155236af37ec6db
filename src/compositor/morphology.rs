//! Binary mask morphology with elliptical structuring elements.
//!
//! The element of radius `r` covers, for each row offset `dy`, the columns
//! `|dx| <= round(sqrt(r² − dy²))`, which reproduces OpenCV's
//! `MORPH_ELLIPSE` of size `(2r+1)²`. Neighbours outside the image are
//! ignored rather than treated as zero, so erosion does not eat in from the
//! frame border.

use crate::Image;
use image::{ImageBuffer, Luma};

/// Mask type: 255 marks subject pixels, 0 marks background.
pub type Mask = Image<Luma<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MorphOp {
    Erode,
    Dilate,
}

/// Column half-width of the elliptical element for `dy` in `-r..=r`.
pub fn ellipse_half_widths(radius: u32) -> Vec<u32> {
    let r = radius as i64;
    (-r..=r)
        .map(|dy| {
            let span = ((r * r - dy * dy) as f32).sqrt();
            (span + 0.5).floor() as u32
        })
        .collect()
}

/// Applies `op` over a single-channel buffer.
pub(crate) fn morph_plane<T>(src: &[T], width: usize, height: usize, radius: u32, op: MorphOp) -> Vec<T>
where
    T: Copy + PartialOrd,
{
    if radius == 0 || width == 0 || height == 0 {
        return src.to_vec();
    }

    let half_widths = ellipse_half_widths(radius);
    let r = radius as isize;
    let mut out = src.to_vec();

    for y in 0..height {
        for x in 0..width {
            let mut acc = src[y * width + x];
            for (row, &hw) in half_widths.iter().enumerate() {
                let sy = y as isize + row as isize - r;
                if sy < 0 || sy >= height as isize {
                    continue;
                }
                let hw = hw as isize;
                let x0 = (x as isize - hw).max(0) as usize;
                let x1 = (x as isize + hw).min(width as isize - 1) as usize;
                let line = &src[sy as usize * width..(sy as usize + 1) * width];
                for &v in &line[x0..=x1] {
                    let replace = match op {
                        MorphOp::Erode => v < acc,
                        MorphOp::Dilate => v > acc,
                    };
                    if replace {
                        acc = v;
                    }
                }
            }
            out[y * width + x] = acc;
        }
    }
    out
}

fn apply(mask: &Mask, radius: u32, op: MorphOp) -> Mask {
    let (width, height) = mask.dimensions();
    let data = morph_plane(mask.as_raw(), width as usize, height as usize, radius, op);
    ImageBuffer::from_raw(width, height, data).unwrap_or_else(|| mask.clone())
}

/// Elliptical erosion.
pub fn erode(mask: &Mask, radius: u32) -> Mask {
    apply(mask, radius, MorphOp::Erode)
}

/// Elliptical dilation.
pub fn dilate(mask: &Mask, radius: u32) -> Mask {
    apply(mask, radius, MorphOp::Dilate)
}

/// Erosion followed by dilation.
pub fn open(mask: &Mask, radius: u32) -> Mask {
    dilate(&erode(mask, radius), radius)
}

/// Dilation followed by erosion.
pub fn close(mask: &Mask, radius: u32) -> Mask {
    erode(&dilate(mask, radius), radius)
}

/// Binarises a mask: values above `threshold` become 255, the rest 0.
pub fn threshold(mask: &Mask, threshold: u8) -> Mask {
    imageproc::map::map_subpixels(mask, |v| if v > threshold { 255 } else { 0 })
}

/// Saturating `a − b`.
pub fn subtract(a: &Mask, b: &Mask) -> Mask {
    imageproc::map::map_colors2(a, b, |pa, pb| Luma([pa[0].saturating_sub(pb[0])]))
}

/// Interior and boundary bands of a binary mask.
///
/// The four sets `interior`, `ring_inner`, `ring_outer` and the complement
/// of `dilated` partition the frame.
#[derive(Debug, Clone)]
pub struct BoundaryRings {
    /// Mask eroded by the inner ring radius
    pub interior: Mask,
    /// `mask − interior`
    pub ring_inner: Mask,
    /// `dilated − mask`
    pub ring_outer: Mask,
    /// Mask dilated by the outer ring radius
    pub dilated: Mask,
}

impl BoundaryRings {
    /// Builds the rings of a binary (0/255) mask.
    #[must_use]
    pub fn new(binary_mask: &Mask, inner_radius: u32, outer_radius: u32) -> Self {
        let interior = erode(binary_mask, inner_radius);
        let dilated = dilate(binary_mask, outer_radius);
        let ring_inner = subtract(binary_mask, &interior);
        let ring_outer = subtract(&dilated, binary_mask);
        Self {
            interior,
            ring_inner,
            ring_outer,
            dilated,
        }
    }

    /// `ring_inner ∪ ring_outer`, the only pixels the edge pass may touch.
    #[must_use]
    pub fn band(&self) -> Mask {
        imageproc::map::map_colors2(&self.ring_inner, &self.ring_outer, |a, b| {
            Luma([a[0].max(b[0])])
        })
    }
}
