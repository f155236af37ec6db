//! Edge case and error condition tests
//!
//! Boundary sizes, invalid parameters and mismatched inputs. Public pipeline
//! operations must answer all of them with an empty or cloned image instead
//! of an error.

use chroma_composite::compositor::background_model::BackgroundColorModel;
use chroma_composite::compositor::box_filter::BoxFilter;
use chroma_composite::compositor::edge_blend;
use chroma_composite::compositor::guided_filter::{guided_filter, matte};
use chroma_composite::{
    AlphaMatte, BackgroundCache, BackgroundSource, BlendConfig, BoxFilterError, CompositingPipeline,
    CompositorConfig, ConfigError, Error, Frame, GpuBufferPool, GuidedFilterError, HostDevice,
    Image, Mask, MattingConfig,
};
use image::{ImageBuffer, Luma, Rgb};
use std::sync::Arc;

/// Helper to create minimal 1x1 frame
fn create_minimal_frame() -> Frame {
    ImageBuffer::from_pixel(1, 1, Rgb([128, 128, 128]))
}

fn create_filled_frame(width: u32, height: u32, color: Rgb<u8>) -> Frame {
    ImageBuffer::from_pixel(width, height, color)
}

#[test]
fn test_empty_frame_produces_empty_output() {
    let mut pipeline = CompositingPipeline::new(CompositorConfig::default());
    let out = pipeline.process_frame(&Frame::new(0, 0), &BackgroundSource::Solid(Rgb([1, 2, 3])));
    assert_eq!(out.frame.dimensions(), (0, 0));
    assert!(!out.metrics.model_updated);
    assert!(!pipeline.model().is_initialized());

    let mask = pipeline.extract_foreground_mask(&Frame::new(0, 0));
    assert_eq!(mask.dimensions(), (0, 0));
}

#[test]
fn test_minimum_frame_size_is_composited() {
    let mut pipeline =
        CompositingPipeline::with_device(CompositorConfig::default(), Arc::new(HostDevice::new()));
    let out = pipeline.process_frame(&create_minimal_frame(), &BackgroundSource::None);
    assert_eq!(out.frame.dimensions(), (1, 1));
    assert!(out.metrics.regions.is_empty());
}

#[test]
fn test_single_subject_pixel_frames_are_composited() {
    let mut pipeline = CompositingPipeline::new(CompositorConfig::default());
    for (width, height) in [(1, 1), (1, 8), (8, 1), (2, 2), (3, 3)] {
        let frame = create_filled_frame(width, height, Rgb([200, 20, 20]));
        let out = pipeline.process_frame(&frame, &BackgroundSource::Solid(Rgb([0, 0, 255])));
        assert_eq!(out.frame.dimensions(), (width, height));
        assert!(out.metrics.regions.is_empty());
    }
}

#[test]
fn test_tiny_frames_are_skipped_for_calibration() {
    let mut model = BackgroundColorModel::new();
    assert!(!model.update(&Frame::new(0, 0)));
    assert!(!model.is_initialized());

    // the whole 12x12 frame is border, so it is accepted
    assert!(model.update(&create_filled_frame(12, 12, Rgb([0, 255, 0]))));
    assert_eq!(model.frames_observed(), 1);
}

#[test]
fn test_mismatched_composite_inputs() {
    let mask: Mask = ImageBuffer::new(8, 8);
    let alpha: AlphaMatte = ImageBuffer::new(8, 8);
    let subject = create_filled_frame(8, 8, Rgb([255, 0, 0]));
    let background = create_filled_frame(9, 8, Rgb([0, 0, 255]));

    let result = edge_blend::composite(&mask, &alpha, &subject, &background, &BlendConfig::default());
    assert!(matches!(result, Err(Error::DimensionMismatch { .. })));

    let mut pipeline = CompositingPipeline::new(CompositorConfig::default());
    assert_eq!(pipeline.composite_frame(&mask, &alpha, &subject, &background), background);
}

#[test]
fn test_empty_mask_returns_background_unchanged() {
    let mask: Mask = ImageBuffer::new(16, 16);
    let alpha: AlphaMatte = ImageBuffer::new(16, 16);
    let subject = create_filled_frame(16, 16, Rgb([255, 0, 0]));
    let background = create_filled_frame(16, 16, Rgb([10, 20, 30]));

    let out = edge_blend::composite(&mask, &alpha, &subject, &background, &BlendConfig::default())
        .unwrap();
    assert_eq!(out, background);
}

#[test]
fn test_full_mask_copies_the_subject() {
    let mask: Mask = ImageBuffer::from_pixel(16, 16, Luma([255]));
    let alpha: AlphaMatte = ImageBuffer::from_pixel(16, 16, Luma([1.0]));
    let subject = create_filled_frame(16, 16, Rgb([200, 100, 50]));
    let background = create_filled_frame(16, 16, Rgb([0, 0, 0]));

    let out = edge_blend::composite(&mask, &alpha, &subject, &background, &BlendConfig::default())
        .unwrap();
    assert_eq!(*out.get_pixel(8, 8), Rgb([200, 100, 50]));
}

#[test]
fn test_guided_filter_parameter_errors() {
    let image: Image<Luma<f32>> = ImageBuffer::from_pixel(4, 4, Luma([0.5]));
    assert_eq!(
        guided_filter(&image, &image, 0, 1e-3),
        Err(GuidedFilterError::InvalidRadius { radius: 0 })
    );
    assert!(matches!(
        guided_filter(&image, &image, 1, -1.0),
        Err(GuidedFilterError::InvalidEpsilon { .. })
    ));
    assert!(matches!(
        guided_filter(&image, &image, 1, f32::NAN),
        Err(GuidedFilterError::InvalidEpsilon { .. })
    ));

    let other: Image<Luma<f32>> = ImageBuffer::new(5, 4);
    assert!(matches!(
        guided_filter(&image, &other, 1, 1e-3),
        Err(GuidedFilterError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_guided_filter_radius_larger_than_image() {
    let image: Image<Luma<f32>> = ImageBuffer::from_fn(3, 3, |x, _| Luma([x as f32 / 2.0]));
    let out = guided_filter(&image, &image, 50, 1e-3).unwrap();
    assert_eq!(out.dimensions(), (3, 3));
    assert!(out.pixels().all(|p| (0.0..=1.0).contains(&p[0])));
}

#[test]
fn test_box_filter_rejects_empty_image() {
    let empty: Image<Luma<f32>> = ImageBuffer::new(0, 0);
    assert_eq!(empty.box_filter_square(2), Err(BoxFilterError::EmptyImage));
}

#[test]
fn test_matte_of_mismatched_guide_is_an_error() {
    let guide = create_filled_frame(10, 10, Rgb([0, 255, 0]));
    let mask: Mask = ImageBuffer::new(10, 12);
    assert!(matches!(
        matte(&guide, &mask, &MattingConfig::default(), &BlendConfig::default()),
        Err(GuidedFilterError::DimensionMismatch { .. })
    ));

    let mut pipeline = CompositingPipeline::new(CompositorConfig::default());
    let alpha = pipeline.matte_alpha(&guide, &mask, 6, 5e-3);
    assert_eq!(alpha.dimensions(), (10, 12));
    assert!(alpha.pixels().all(|p| p[0] == 0.0));
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let err = CompositorConfig::builder().rings(1, 0).build().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { field: "blend.outer_ring", .. }));

    let mut pipeline = CompositingPipeline::new(CompositorConfig::default());
    let mut bad = CompositorConfig::default();
    bad.blend.subject_weight = 1.5;
    assert!(pipeline.set_config(bad).is_err());
    assert_eq!(pipeline.config(), &CompositorConfig::default());
}

#[test]
fn test_pool_rejects_zero_resolution() {
    let mut pipeline =
        CompositingPipeline::with_device(CompositorConfig::default(), Arc::new(HostDevice::new()));
    assert!(!pipeline.pool_initialize(0, 10));
    assert!(!pipeline.pool_initialize(10, 0));
    assert!(pipeline.pool_initialize(10, 10));
}

#[test]
fn test_pool_release_is_idempotent() {
    let mut pool = GpuBufferPool::new(Arc::new(HostDevice::new()));
    pool.release();
    pool.initialize(16, 16).unwrap();
    pool.release();
    pool.release();
    assert!(!pool.is_initialized());
    assert_eq!(pool.dimensions(), None);
}

#[test]
fn test_empty_background_template_becomes_black() {
    let mut cache = BackgroundCache::new();
    let empty = Frame::new(0, 0);
    let out = cache.resolve(
        &BackgroundSource::Image {
            key: "missing",
            image: &empty,
        },
        6,
        4,
    );
    assert_eq!(out.dimensions(), (6, 4));
    assert!(out.pixels().all(|p| *p == Rgb([0, 0, 0])));
}

#[test]
fn test_extreme_pixel_values_survive_the_pipeline() {
    let mut pipeline = CompositingPipeline::new(CompositorConfig::default());
    for color in [Rgb([0, 0, 0]), Rgb([255, 255, 255]), Rgb([255, 0, 255])] {
        let frame = create_filled_frame(32, 32, color);
        let out = pipeline.process_frame(&frame, &BackgroundSource::Solid(Rgb([0, 0, 255])));
        assert_eq!(out.frame.dimensions(), (32, 32));
    }
}
