//! Subject regions derived from the mask.

use crate::compositor::morphology::Mask;
use crate::utils::Rect;
use image::Luma;
use imageproc::region_labelling::{connected_components, Connectivity};
use itertools::Itertools;

/// Bounding boxes smaller than this are ignored.
pub const MIN_REGION_AREA: u64 = 1000;
/// At most this many regions are reported.
pub const MAX_REGIONS: usize = 3;

/// A connected subject component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Region {
    pub bounds: Rect,
    /// Number of mask pixels in the component
    pub pixel_count: u64,
}

/// 8-connected components of `mask`, largest bounding boxes first.
#[must_use]
pub fn derive_regions(mask: &Mask) -> Vec<Region> {
    // No bounding box can reach MIN_REGION_AREA, and a 1x1 foreground mask
    // trips imageproc's union-find bounds assertion.
    let (width, height) = mask.dimensions();
    if u64::from(width) * u64::from(height) < MIN_REGION_AREA {
        return Vec::new();
    }

    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    // (min_x, min_y, max_x, max_y, count) per label
    let mut extents: Vec<Option<(u32, u32, u32, u32, u64)>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if extents.len() < label {
            extents.resize(label, None);
        }
        let slot = &mut extents[label - 1];
        *slot = Some(match *slot {
            None => (x, y, x, y, 1),
            Some((x0, y0, x1, y1, n)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y), n + 1),
        });
    }

    extents
        .into_iter()
        .flatten()
        .map(|(x0, y0, x1, y1, n)| Region {
            bounds: Rect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1),
            pixel_count: n,
        })
        .filter(|r| r.bounds.area() >= MIN_REGION_AREA)
        .sorted_by_key(|r| std::cmp::Reverse(r.bounds.area()))
        .take(MAX_REGIONS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::rectangle_mask;
    use image::ImageBuffer;

    #[test]
    fn empty_mask_has_no_regions() {
        assert!(derive_regions(&ImageBuffer::new(40, 40)).is_empty());
    }

    #[test]
    fn single_pixel_subject_has_no_regions() {
        let mask: Mask = ImageBuffer::from_pixel(1, 1, Luma([255]));
        assert!(derive_regions(&mask).is_empty());
        let mask: Mask = ImageBuffer::from_pixel(20, 20, Luma([255]));
        assert!(derive_regions(&mask).is_empty());
    }

    #[test]
    fn small_components_are_dropped() {
        let mask = rectangle_mask(100, 100, Rect::new(10, 10, 20, 20));
        assert!(derive_regions(&mask).is_empty());
    }

    #[test]
    fn largest_three_are_kept_in_order() {
        let mut mask = rectangle_mask(200, 200, Rect::new(0, 0, 40, 40));
        for rect in [
            Rect::new(100, 0, 50, 50),
            Rect::new(0, 100, 35, 35),
            Rect::new(100, 100, 60, 60),
        ] {
            for y in rect.y..rect.bottom() {
                for x in rect.x..rect.right() {
                    mask.put_pixel(x, y, Luma([255]));
                }
            }
        }
        let regions = derive_regions(&mask);
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].bounds, Rect::new(100, 100, 60, 60));
        assert_eq!(regions[1].bounds, Rect::new(100, 0, 50, 50));
        assert_eq!(regions[2].bounds, Rect::new(0, 0, 40, 40));
        assert_eq!(regions[2].pixel_count, 1600);
    }
}
