//! Substitute backgrounds and subject placement.

use crate::compositor::morphology::Mask;
use crate::Frame;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};

/// Scale factors this close to one leave the subject untouched.
pub const SCALE_TOLERANCE: f32 = 0.01;

/// What to composite the subject onto.
#[derive(Debug, Clone, Copy)]
pub enum BackgroundSource<'a> {
    /// A static template, cached per `key` and frame size
    Image { key: &'a str, image: &'a Frame },
    /// One frame of a background video, resized on every call
    VideoFrame(&'a Frame),
    Solid(Rgb<u8>),
    /// Black
    None,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    key: String,
    width: u32,
    height: u32,
    frame: Frame,
}

/// Resized template cache owned by a pipeline.
#[derive(Debug, Clone, Default)]
pub struct BackgroundCache {
    entry: Option<CacheEntry>,
    hits: u64,
    misses: u64,
}

impl BackgroundCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Background for a `width`x`height` frame.
    ///
    /// Templates are resized once per key and size. An empty template or
    /// video frame yields black.
    pub fn resolve(&mut self, source: &BackgroundSource<'_>, width: u32, height: u32) -> Frame {
        match *source {
            BackgroundSource::Image { key, image } => {
                if let Some(entry) = &self.entry {
                    if entry.key == key && entry.width == width && entry.height == height {
                        self.hits += 1;
                        return entry.frame.clone();
                    }
                }
                self.misses += 1;
                let frame = fit(image, width, height);
                tracing::debug!(key, width, height, "background template cached");
                self.entry = Some(CacheEntry {
                    key: key.to_owned(),
                    width,
                    height,
                    frame: frame.clone(),
                });
                frame
            }
            BackgroundSource::VideoFrame(image) => fit(image, width, height),
            BackgroundSource::Solid(color) => ImageBuffer::from_pixel(width, height, color),
            BackgroundSource::None => ImageBuffer::new(width, height),
        }
    }

    /// Drops the cached template.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    #[must_use]
    pub fn is_cached(&self, key: &str) -> bool {
        self.entry.as_ref().is_some_and(|e| e.key == key)
    }

    /// `(hits, misses)` of template lookups.
    #[must_use]
    pub const fn lookups(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

fn fit(image: &Frame, width: u32, height: u32) -> Frame {
    if image.width() == 0 || image.height() == 0 {
        tracing::warn!("empty background image, using black");
        return ImageBuffer::new(width, height);
    }
    if image.dimensions() == (width, height) {
        image.clone()
    } else {
        imageops::resize(image, width, height, FilterType::Triangle)
    }
}

/// Scales the subject and its mask by `factor` and centres them on a canvas
/// of the original size.
///
/// Pixels the scaled subject does not cover are black with a zero mask;
/// a subject scaled beyond the canvas is cropped around its centre.
#[must_use]
pub fn scale_and_center(subject: &Frame, mask: &Mask, factor: f32) -> (Frame, Mask) {
    let (width, height) = subject.dimensions();
    if (factor - 1.0).abs() <= SCALE_TOLERANCE || width == 0 || height == 0 {
        return (subject.clone(), mask.clone());
    }

    let scaled_width = ((width as f32).mul_add(factor, 0.5) as u32).max(1);
    let scaled_height = ((height as f32).mul_add(factor, 0.5) as u32).max(1);
    let scaled_subject = imageops::resize(subject, scaled_width, scaled_height, FilterType::Triangle);
    let scaled_mask = imageops::resize(mask, scaled_width, scaled_height, FilterType::Nearest);

    let x = (i64::from(width) - i64::from(scaled_width)) / 2;
    let y = (i64::from(height) - i64::from(scaled_height)) / 2;

    let mut canvas: Frame = ImageBuffer::new(width, height);
    let mut mask_canvas: Mask = ImageBuffer::new(width, height);
    imageops::replace(&mut canvas, &scaled_subject, x, y);
    imageops::replace(&mut mask_canvas, &scaled_mask, x, y);

    tracing::debug!(factor, scaled_width, scaled_height, "subject scaled");
    (canvas, mask_canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{gradient_frame, rectangle_frame, rectangle_mask};
    use crate::utils::{bounding_box, Rect};

    #[test]
    fn templates_are_cached_per_key_and_size() {
        let template = gradient_frame(32, 32);
        let mut cache = BackgroundCache::new();
        let source = BackgroundSource::Image {
            key: "beach",
            image: &template,
        };

        let first = cache.resolve(&source, 16, 12);
        let second = cache.resolve(&source, 16, 12);
        assert_eq!(first, second);
        assert_eq!(first.dimensions(), (16, 12));
        assert_eq!(cache.lookups(), (1, 1));
        assert!(cache.is_cached("beach"));

        cache.resolve(&source, 20, 20);
        assert_eq!(cache.lookups(), (1, 2));

        cache.invalidate();
        assert!(!cache.is_cached("beach"));
        cache.resolve(&source, 20, 20);
        assert_eq!(cache.lookups(), (1, 3));
    }

    #[test]
    fn video_frames_are_never_cached() {
        let frame = gradient_frame(8, 8);
        let mut cache = BackgroundCache::new();
        let out = cache.resolve(&BackgroundSource::VideoFrame(&frame), 8, 8);
        assert_eq!(out, frame);
        assert!(!cache.is_cached(""));
        assert_eq!(cache.lookups(), (0, 0));
    }

    #[test]
    fn solid_and_none_fill_the_frame() {
        let mut cache = BackgroundCache::new();
        let solid = cache.resolve(&BackgroundSource::Solid(Rgb([1, 2, 3])), 4, 3);
        assert!(solid.pixels().all(|p| *p == Rgb([1, 2, 3])));
        let black = cache.resolve(&BackgroundSource::None, 4, 3);
        assert!(black.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn empty_template_falls_back_to_black() {
        let empty = Frame::new(0, 0);
        let mut cache = BackgroundCache::new();
        let out = cache.resolve(&BackgroundSource::VideoFrame(&empty), 5, 5);
        assert_eq!(out.dimensions(), (5, 5));
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn unit_scale_is_identity() {
        let frame = gradient_frame(10, 10);
        let mask = rectangle_mask(10, 10, Rect::new(2, 2, 4, 4));
        let (s, m) = scale_and_center(&frame, &mask, 1.005);
        assert_eq!(s, frame);
        assert_eq!(m, mask);
    }

    #[test]
    fn half_scale_centres_the_subject() {
        let rect = Rect::new(0, 0, 40, 40);
        let frame = rectangle_frame(40, 40, rect, Rgb([200, 0, 0]));
        let mask = rectangle_mask(40, 40, rect);
        let (s, m) = scale_and_center(&frame, &mask, 0.5);

        assert_eq!(s.dimensions(), (40, 40));
        assert_eq!(bounding_box(&m), Some(Rect::new(10, 10, 20, 20)));
        assert_eq!(*s.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn upscaling_crops_around_the_centre() {
        let rect = Rect::new(0, 0, 20, 20);
        let mask = rectangle_mask(20, 20, rect);
        let frame = rectangle_frame(20, 20, rect, Rgb([10, 20, 30]));
        let (s, m) = scale_and_center(&frame, &mask, 2.0);
        assert_eq!(s.dimensions(), (20, 20));
        assert!(m.pixels().all(|p| p[0] == 255));
    }
}
