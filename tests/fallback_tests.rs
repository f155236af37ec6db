//! Device fallback tests
//!
//! A device that rejects selected kernels exercises the CPU fallback of
//! every stage; the host device checks that both paths agree.

use chroma_composite::device::{DeviceBuffer, ElementKind, Extent, HostBuffer, HostStream, Kernel};
use chroma_composite::utils::Rect;
use chroma_composite::{
    BackgroundSource, BufferCategory, ComputeDevice, CompositingPipeline, CompositorConfig,
    DeviceError, ExecutionPath, Frame, GpuBufferPool, HostDevice, Stage, StreamKind,
};
use image::{ImageBuffer, Rgb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Host device that fails every launch of the listed kernels.
#[derive(Debug, Default)]
struct FaultyDevice {
    inner: HostDevice,
    failing: Vec<&'static str>,
    rejected: AtomicU64,
}

impl FaultyDevice {
    fn failing(kernels: &[&'static str]) -> Self {
        Self {
            failing: kernels.to_vec(),
            ..Self::default()
        }
    }
}

impl ComputeDevice for FaultyDevice {
    type Buffer = HostBuffer;
    type Stream = HostStream;

    fn name(&self) -> &str {
        "faulty"
    }

    fn create_stream(&self, label: &str) -> Result<HostStream, DeviceError> {
        self.inner.create_stream(label)
    }

    fn allocate(
        &self,
        width: u32,
        height: u32,
        channels: u32,
        kind: ElementKind,
    ) -> Result<HostBuffer, DeviceError> {
        self.inner.allocate(width, height, channels, kind)
    }

    fn upload(
        &self,
        stream: &HostStream,
        extent: Extent,
        data: &[f32],
        dst: &HostBuffer,
    ) -> Result<(), DeviceError> {
        self.inner.upload(stream, extent, data, dst)
    }

    fn launch(
        &self,
        stream: &HostStream,
        extent: Extent,
        kernel: &Kernel<'_, HostBuffer>,
    ) -> Result<(), DeviceError> {
        if self.failing.contains(&kernel.name()) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(DeviceError::Validation(format!("{} rejected", kernel.name())));
        }
        self.inner.launch(stream, extent, kernel)
    }

    fn synchronize(&self, stream: &HostStream) -> Result<(), DeviceError> {
        self.inner.synchronize(stream)
    }

    fn download(
        &self,
        stream: &HostStream,
        src: &HostBuffer,
        extent: Extent,
    ) -> Result<Vec<f32>, DeviceError> {
        self.inner.download(stream, src, extent)
    }
}

/// Green frame with a red rectangle
fn create_subject_frame(width: u32, height: u32, rect: Rect) -> Frame {
    ImageBuffer::from_fn(width, height, |x, y| {
        if rect.contains(x, y) {
            Rgb([220, 30, 30])
        } else {
            Rgb([0, 255, 0])
        }
    })
}

/// Smooth background gradient
fn create_background(width: u32, height: u32) -> Frame {
    ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width) as u8, 90, (y * 255 / height) as u8])
    })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn mean_abs_diff(a: &Frame, b: &Frame) -> f64 {
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| u64::from(x.abs_diff(y)))
        .sum();
    total as f64 / a.as_raw().len() as f64
}

#[test]
fn test_failing_kernels_fall_back_without_losing_the_frame() {
    init_tracing();
    let rect = Rect::new(24, 16, 32, 40);
    let frame = create_subject_frame(80, 64, rect);
    let background = create_background(80, 64);
    let source = BackgroundSource::VideoFrame(&background);

    let device = Arc::new(FaultyDevice::failing(&["chroma_key", "guided_output"]));
    let mut faulty = CompositingPipeline::with_device(CompositorConfig::default(), Arc::clone(&device));
    let mut cpu = CompositingPipeline::new(CompositorConfig::default());

    for frame_index in 0..3u64 {
        let expected = cpu.process_frame(&frame, &source);
        let out = faulty.process_frame(&frame, &source);

        assert_eq!(out.metrics.path(Stage::Mask), Some(ExecutionPath::CpuFallback));
        assert_eq!(out.metrics.path(Stage::Spill), Some(ExecutionPath::Device));
        assert_eq!(out.metrics.path(Stage::Matte), Some(ExecutionPath::CpuFallback));
        assert_eq!(out.metrics.path(Stage::Blend), Some(ExecutionPath::Device));
        assert_eq!(out.metrics.fallbacks, 2);
        assert_eq!(out.metrics.total_fallbacks, 2 * (frame_index + 1));

        assert_eq!(out.frame.dimensions(), (80, 64));
        assert!(mean_abs_diff(&expected.frame, &out.frame) < 1.0);
    }

    let fallback = faulty.fallback();
    assert_eq!(fallback.fallbacks(Stage::Mask), 3);
    assert_eq!(fallback.fallbacks(Stage::Matte), 3);
    assert_eq!(fallback.fallbacks(Stage::Blend), 0);
    assert_eq!(fallback.device_runs(Stage::Blend), 3);
    assert_eq!(device.rejected.load(Ordering::Relaxed), 6);
}

#[test]
fn test_every_stage_falls_back_when_all_launches_fail() {
    init_tracing();
    let everything = [
        "grayscale",
        "affine",
        "binary",
        "threshold",
        "box_mean",
        "guided_coefficients",
        "guided_output",
        "morphology",
        "gaussian",
        "chroma_key",
        "adaptive_key",
        "spill_suppress",
        "lighting",
        "masked_copy",
        "add_weighted",
        "unmix",
    ];
    let rect = Rect::new(10, 10, 20, 20);
    let frame = create_subject_frame(48, 40, rect);
    let background = create_background(48, 40);
    let source = BackgroundSource::VideoFrame(&background);

    let config = CompositorConfig::builder().lighting_correction(true).build().unwrap();
    let mut faulty =
        CompositingPipeline::with_device(config.clone(), Arc::new(FaultyDevice::failing(&everything)));
    let mut cpu = CompositingPipeline::new(config);

    let expected = cpu.process_frame(&frame, &source);
    let out = faulty.process_frame(&frame, &source);
    for stage in Stage::ALL {
        assert_eq!(out.metrics.path(stage), Some(ExecutionPath::CpuFallback), "{stage}");
    }
    assert_eq!(out.frame, expected.frame);
}

#[test]
fn test_host_device_matches_cpu_within_tolerance() {
    let rect = Rect::new(30, 20, 60, 70);
    let frame = create_subject_frame(128, 112, rect);
    let background = create_background(128, 112);
    let source = BackgroundSource::VideoFrame(&background);

    let config = CompositorConfig::builder().lighting_correction(true).build().unwrap();
    let mut device = CompositingPipeline::with_device(config.clone(), Arc::new(HostDevice::new()));
    let mut cpu = CompositingPipeline::new(config);

    for _ in 0..5 {
        let a = cpu.process_frame(&frame, &source);
        let b = device.process_frame(&frame, &source);
        assert_eq!(b.metrics.fallbacks, 0);
        assert!(Stage::ALL
            .iter()
            .all(|&s| b.metrics.path(s) == Some(ExecutionPath::Device)));
        assert!(mean_abs_diff(&a.frame, &b.frame) < 1.0);
    }
    assert_eq!(device.device_name(), Some("host"));
}

#[test]
fn test_guided_matte_equivalence() {
    let rect = Rect::new(12, 12, 40, 30);
    let guide = create_subject_frame(64, 56, rect);
    let mask = ImageBuffer::from_fn(64, 56, |x, y| {
        image::Luma([if rect.contains(x, y) { 255u8 } else { 0 }])
    });

    let mut device =
        CompositingPipeline::with_device(CompositorConfig::default(), Arc::new(HostDevice::new()));
    assert!(device.pool_initialize(64, 56));
    let mut cpu = CompositingPipeline::new(CompositorConfig::default());

    let a = cpu.matte_alpha(&guide, &mask, 6, 5e-3);
    let b = device.matte_alpha(&guide, &mask, 6, 5e-3);
    let mean: f64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(p, q)| f64::from((p[0] - q[0]).abs()))
        .sum::<f64>()
        / f64::from(64 * 56);
    assert!(mean < 0.01, "mean absolute difference {mean}");
    assert_eq!(device.fallback().device_runs(Stage::Matte), 1);
}

#[test]
fn test_pool_exhaustion_returns_valid_buffers() {
    let mut pool = GpuBufferPool::new(Arc::new(HostDevice::new()));
    pool.initialize(32, 24).unwrap();

    for category in BufferCategory::ALL {
        let mut first = None;
        for i in 0..(category.ring_size() * 50) {
            let buffer = pool.next_buffer(category, StreamKind::Composition);
            assert!(!buffer.is_placeholder());
            assert_eq!((buffer.width(), buffer.height()), (32, 24));
            assert_eq!(buffer.channels(), category.channels());
            if i == 0 {
                first = Some(buffer);
            } else if i % category.ring_size() == 0 {
                assert!(buffer.shares_storage(first.as_ref().unwrap()));
            }
        }
    }
    assert_eq!(pool.stats().placeholder_handouts, 0);
}

#[test]
fn test_uninitialised_pool_hands_out_placeholders() {
    let mut pool = GpuBufferPool::new(Arc::new(HostDevice::new()));
    for category in BufferCategory::ALL {
        for _ in 0..3 {
            assert!(pool.next_buffer(category, StreamKind::Detection).is_placeholder());
        }
    }
    assert_eq!(pool.stats().placeholder_handouts, 3 * BufferCategory::ALL.len() as u64);
}
