//! Per-frame compositing pipeline.
//!
//! The pipeline owns every piece of mutable state: the background color
//! model, the buffer pool, the fallback counters and the template cache. The
//! public operations never fail. Invalid input geometry is logged and
//! answered with an empty or cloned image, and device failures are rerouted
//! to the CPU stage.

use crate::accelerated;
use crate::background::{scale_and_center, BackgroundCache, BackgroundSource};
use crate::compositor::background_model::BackgroundColorModel;
use crate::compositor::guided_filter::validate_guided_filter_params;
use crate::compositor::lighting::{self, LightingCorrection};
use crate::compositor::morphology::Mask;
use crate::compositor::regions::{derive_regions, Region};
use crate::compositor::thresholds::{derive_thresholds, AdaptiveThresholds, KeyParams};
use crate::compositor::{edge_blend, guided_filter, mask, spill};
use crate::config::{CompositorConfig, MattingConfig};
use crate::device::{ComputeDevice, HostDevice};
use crate::error::ConfigError;
use crate::fallback::{ExecutionPath, FallbackController, Stage};
use crate::pool::GpuBufferPool;
use crate::{AlphaMatte, Frame};
use image::{ImageBuffer, Luma};
use imageproc::map::map_colors;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Timing of one stage of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StageTiming {
    pub stage: Stage,
    pub path: ExecutionPath,
    pub duration: Duration,
}

/// Observable per-frame metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameMetrics {
    /// Zero-based index of the frame within the pipeline's lifetime
    pub frame_index: u64,
    /// Whether the background model accepted the frame
    pub model_updated: bool,
    pub stages: Vec<StageTiming>,
    /// CPU fallbacks taken while producing this frame
    pub fallbacks: u64,
    /// CPU fallbacks since the pipeline was created
    pub total_fallbacks: u64,
    /// Largest subject regions of the extracted mask
    pub regions: Vec<Region>,
    pub total: Duration,
}

impl FrameMetrics {
    /// Execution path of `stage`, if it ran.
    #[must_use]
    pub fn path(&self, stage: Stage) -> Option<ExecutionPath> {
        self.stages.iter().find(|t| t.stage == stage).map(|t| t.path)
    }
}

/// A composited frame and how it was produced.
#[derive(Debug, Clone)]
pub struct CompositeOutput {
    pub frame: Frame,
    pub metrics: FrameMetrics,
}

fn timed<T>(f: impl FnOnce() -> (T, ExecutionPath)) -> (T, ExecutionPath, Duration) {
    let start = Instant::now();
    let (value, path) = f();
    (value, path, start.elapsed())
}

/// Matte equal to the hard mask scaled to [0, 1].
fn unit_matte(mask: &Mask) -> AlphaMatte {
    map_colors(mask, |p| Luma([f32::from(p[0]) / 255.0]))
}

/// Chroma-key compositing pipeline, optionally backed by a compute device.
pub struct CompositingPipeline<D: ComputeDevice = HostDevice> {
    config: CompositorConfig,
    model: BackgroundColorModel,
    pool: Option<GpuBufferPool<D>>,
    fallback: FallbackController,
    backgrounds: BackgroundCache,
    frames_processed: u64,
}

impl<D: ComputeDevice> std::fmt::Debug for CompositingPipeline<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositingPipeline")
            .field("config", &self.config)
            .field("model", &self.model)
            .field("pool", &self.pool)
            .field("fallback", &self.fallback)
            .field("frames_processed", &self.frames_processed)
            .finish_non_exhaustive()
    }
}

impl CompositingPipeline<HostDevice> {
    /// CPU-only pipeline.
    #[must_use]
    pub fn new(config: CompositorConfig) -> Self {
        Self::build(config, None)
    }
}

impl<D: ComputeDevice> CompositingPipeline<D> {
    /// Pipeline that tries `device` before the CPU for every stage.
    #[must_use]
    pub fn with_device(config: CompositorConfig, device: Arc<D>) -> Self {
        tracing::info!(device = device.name(), "compositing pipeline attached to device");
        Self::build(config, Some(GpuBufferPool::new(device)))
    }

    /// Out-of-range configuration values are reset to their defaults and
    /// logged, so the pipeline never runs with parameters `validate` rejects.
    fn build(mut config: CompositorConfig, pool: Option<GpuBufferPool<D>>) -> Self {
        let reset = config.sanitize();
        if !reset.is_empty() {
            tracing::warn!(fields = ?reset, "invalid configuration values reset to defaults");
        }
        Self {
            config,
            model: BackgroundColorModel::new(),
            pool,
            fallback: FallbackController::new(),
            backgrounds: BackgroundCache::new(),
            frames_processed: 0,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Replaces the configuration after validating it.
    ///
    /// # Errors
    ///
    /// Returns the validation error and keeps the previous configuration.
    pub fn set_config(&mut self, config: CompositorConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    #[must_use]
    pub const fn model(&self) -> &BackgroundColorModel {
        &self.model
    }

    /// Forgets everything learnt about the backdrop.
    pub fn reset_model(&mut self) {
        self.model.reset();
    }

    #[must_use]
    pub const fn fallback(&self) -> &FallbackController {
        &self.fallback
    }

    #[must_use]
    pub const fn pool(&self) -> Option<&GpuBufferPool<D>> {
        self.pool.as_ref()
    }

    #[must_use]
    pub fn device_name(&self) -> Option<&str> {
        self.pool.as_ref().map(|p| p.device().name())
    }

    #[must_use]
    pub const fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    #[must_use]
    pub const fn background_cache(&self) -> &BackgroundCache {
        &self.backgrounds
    }

    /// Drops the cached background template.
    pub fn invalidate_background(&mut self) {
        self.backgrounds.invalidate();
    }

    /// Folds the frame border into the background model. Returns whether the
    /// frame was accepted.
    pub fn update_background_model(&mut self, frame: &Frame) -> bool {
        let accepted = self.model.update(frame);
        if accepted {
            tracing::debug!(frames = self.model.frames_observed(), "background model updated");
        } else {
            tracing::debug!(dimensions = ?frame.dimensions(), "frame skipped for calibration");
        }
        accepted
    }

    /// Thresholds for the current model.
    #[must_use]
    pub fn thresholds(&self) -> AdaptiveThresholds {
        derive_thresholds(&self.model, &self.config.key)
    }

    /// Encoded classifier parameters for the current model.
    #[must_use]
    pub fn key_params(&self) -> KeyParams {
        KeyParams::new(&self.thresholds(), &self.model)
    }

    /// Allocates the buffer pool for `width`x`height`. Returns whether the
    /// pool is ready.
    pub fn pool_initialize(&mut self, width: u32, height: u32) -> bool {
        let Some(pool) = self.pool.as_mut() else {
            tracing::warn!("pool initialisation requested without a compute device");
            return false;
        };
        if width == 0 || height == 0 {
            tracing::warn!(width, height, "pool initialisation with an empty resolution");
            return false;
        }
        match pool.initialize(width, height) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, width, height, "buffer pool allocation failed");
                false
            }
        }
    }

    /// Frees device memory. The pipeline stays usable and falls back to the
    /// CPU until the pool is initialised again.
    pub fn release(&mut self) {
        if let Some(pool) = self.pool.as_mut() {
            pool.release();
        }
        self.backgrounds.invalidate();
    }

    fn device_pool(&mut self) -> Option<&mut GpuBufferPool<D>> {
        if self.config.use_device {
            self.pool.as_mut()
        } else {
            None
        }
    }

    /// Subject mask of `frame`: 255 for subject, 0 for backdrop.
    pub fn extract_foreground_mask(&mut self, frame: &Frame) -> Mask {
        self.mask_stage(frame).0
    }

    fn mask_stage(&mut self, frame: &Frame) -> (Mask, ExecutionPath) {
        let _span = tracing::debug_span!("mask").entered();
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            tracing::warn!("empty frame passed to mask extraction");
            return (Mask::new(width, height), ExecutionPath::Cpu);
        }

        let params = &self.key_params();
        let mode = self.config.key.mode;
        let cleanup = self.config.key.cleanup;
        let pool = if self.config.use_device {
            self.pool.as_mut()
        } else {
            None
        };
        self.fallback.run(
            Stage::Mask,
            pool.map(|pool| {
                move || accelerated::mask::extract_mask(pool, frame, params, mode, cleanup)
            }),
            || mask::extract_mask(frame, params, mode, cleanup),
        )
    }

    fn spill_stage(&mut self, frame: &Frame, subject_mask: &Mask) -> (Frame, ExecutionPath) {
        let _span = tracing::debug_span!("spill").entered();
        let hue_min = self.config.key.hue_min;
        let hue_max = self.config.key.hue_max;
        let pool = if self.config.use_device {
            self.pool.as_mut()
        } else {
            None
        };
        self.fallback.run(
            Stage::Spill,
            pool.map(|pool| {
                move || accelerated::mask::suppress_spill(pool, frame, subject_mask, hue_min, hue_max)
            }),
            || spill::suppress_spill(frame, subject_mask, hue_min, hue_max),
        )
    }

    /// Pulls the lighting of `subject` under `mask` toward `template`, or
    /// applies the default warm gain when there is no template.
    ///
    /// A mask of a different size is logged and answered with a copy of the
    /// subject.
    pub fn correct_subject_lighting(
        &mut self,
        subject: &Frame,
        mask: &Mask,
        template: Option<&Frame>,
    ) -> Frame {
        if subject.dimensions() != mask.dimensions() {
            tracing::warn!(
                subject = ?subject.dimensions(),
                mask = ?mask.dimensions(),
                "subject and mask sizes differ"
            );
            return subject.clone();
        }
        let template = template.filter(|t| t.dimensions() == subject.dimensions());
        let correction = LightingCorrection::for_subject(template, subject, mask);
        self.lighting_stage(subject, mask, correction).0
    }

    fn lighting_stage(
        &mut self,
        subject: &Frame,
        mask: &Mask,
        correction: LightingCorrection,
    ) -> (Frame, ExecutionPath) {
        let _span = tracing::debug_span!("lighting").entered();
        tracing::trace!(?correction, "lighting correction");
        let pool = if self.config.use_device {
            self.pool.as_mut()
        } else {
            None
        };
        self.fallback.run(
            Stage::Lighting,
            pool.map(|pool| {
                move || accelerated::lighting::correct_lighting(pool, subject, mask, correction)
            }),
            || lighting::correct_lighting(subject, mask, correction),
        )
    }

    /// Soft alpha of `hard_mask` guided by `guide`.
    ///
    /// Mismatched sizes or invalid filter parameters are logged and answered
    /// with the hard mask scaled to [0, 1].
    pub fn matte_alpha(&mut self, guide: &Frame, hard_mask: &Mask, radius: u32, epsilon: f32) -> AlphaMatte {
        let matting = MattingConfig {
            radius,
            epsilon,
            ..self.config.matting.clone()
        };
        self.matte_stage(guide, hard_mask, &matting).0
    }

    fn matte_stage(
        &mut self,
        guide: &Frame,
        hard_mask: &Mask,
        matting: &MattingConfig,
    ) -> (AlphaMatte, ExecutionPath) {
        let _span = tracing::debug_span!("matte").entered();
        if guide.dimensions() != hard_mask.dimensions() {
            tracing::warn!(
                guide = ?guide.dimensions(),
                mask = ?hard_mask.dimensions(),
                "guide and mask sizes differ"
            );
            return (unit_matte(hard_mask), ExecutionPath::Cpu);
        }
        if let Err(error) = validate_guided_filter_params(matting.radius, matting.epsilon) {
            tracing::warn!(%error, "invalid matting parameters");
            return (unit_matte(hard_mask), ExecutionPath::Cpu);
        }

        let blend = &self.config.blend;
        let pool = if self.config.use_device {
            self.pool.as_mut()
        } else {
            None
        };
        self.fallback.run(
            Stage::Matte,
            pool.map(|pool| move || accelerated::matte::matte(pool, guide, hard_mask, matting, blend)),
            || {
                guided_filter::matte(guide, hard_mask, matting, blend).unwrap_or_else(|error| {
                    tracing::warn!(%error, "CPU matte failed");
                    unit_matte(hard_mask)
                })
            },
        )
    }

    /// Final composite of `subject` over `background`.
    ///
    /// An empty background yields a copy of the subject; any other size
    /// mismatch yields a copy of the background.
    pub fn composite_frame(
        &mut self,
        hard_mask: &Mask,
        alpha: &AlphaMatte,
        subject: &Frame,
        background: &Frame,
    ) -> Frame {
        self.composite_stage(hard_mask, alpha, subject, background).0
    }

    fn composite_stage(
        &mut self,
        hard_mask: &Mask,
        alpha: &AlphaMatte,
        subject: &Frame,
        background: &Frame,
    ) -> (Frame, ExecutionPath) {
        let _span = tracing::debug_span!("blend").entered();
        let dims = background.dimensions();
        if dims.0 == 0 || dims.1 == 0 {
            tracing::warn!("empty background passed to compositing");
            return (subject.clone(), ExecutionPath::Cpu);
        }
        if subject.dimensions() != dims || hard_mask.dimensions() != dims || alpha.dimensions() != dims {
            tracing::warn!(
                background = ?dims,
                subject = ?subject.dimensions(),
                mask = ?hard_mask.dimensions(),
                alpha = ?alpha.dimensions(),
                "compositing inputs differ in size"
            );
            return (background.clone(), ExecutionPath::Cpu);
        }

        let blend = &self.config.blend;
        let pool = if self.config.use_device {
            self.pool.as_mut()
        } else {
            None
        };
        self.fallback.run(
            Stage::Blend,
            pool.map(|pool| {
                move || accelerated::blend::composite(pool, hard_mask, alpha, subject, background, blend)
            }),
            || {
                edge_blend::composite(hard_mask, alpha, subject, background, blend).unwrap_or_else(
                    |error| {
                        tracing::warn!(%error, "CPU composite failed");
                        background.clone()
                    },
                )
            },
        )
    }

    /// Runs every stage on `frame`.
    ///
    /// The model is updated first, the pool is sized to the frame when a
    /// device is attached, and the matte is guided by the hard composite of
    /// the subject over the background.
    pub fn process_frame(&mut self, frame: &Frame, source: &BackgroundSource<'_>) -> CompositeOutput {
        let start = Instant::now();
        let frame_index = self.frames_processed;
        self.frames_processed += 1;
        let _span = tracing::debug_span!("frame", index = frame_index).entered();

        let mut metrics = FrameMetrics {
            frame_index,
            ..FrameMetrics::default()
        };
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            tracing::warn!("empty frame, nothing to composite");
            metrics.total_fallbacks = self.fallback.total_fallbacks();
            metrics.total = start.elapsed();
            return CompositeOutput {
                frame: Frame::new(width, height),
                metrics,
            };
        }

        let fallbacks_before = self.fallback.total_fallbacks();
        metrics.model_updated = self.update_background_model(frame);
        if self.device_pool().is_some() {
            self.pool_initialize(width, height);
        }

        let (hard_mask, path, duration) = timed(|| self.mask_stage(frame));
        metrics.stages.push(StageTiming {
            stage: Stage::Mask,
            path,
            duration,
        });
        metrics.regions = derive_regions(&hard_mask);

        let subject = if self.config.key.spill_suppression {
            let (subject, path, duration) = timed(|| self.spill_stage(frame, &hard_mask));
            metrics.stages.push(StageTiming {
                stage: Stage::Spill,
                path,
                duration,
            });
            subject
        } else {
            frame.clone()
        };

        let (subject, hard_mask) = scale_and_center(&subject, &hard_mask, self.config.person_scale);
        let background = self.backgrounds.resolve(source, width, height);

        let subject = if self.config.lighting_correction {
            let template = matches!(source, BackgroundSource::Image { .. }).then_some(&background);
            let correction = LightingCorrection::for_subject(template, &subject, &hard_mask);
            let (subject, path, duration) =
                timed(|| self.lighting_stage(&subject, &hard_mask, correction));
            metrics.stages.push(StageTiming {
                stage: Stage::Lighting,
                path,
                duration,
            });
            subject
        } else {
            subject
        };

        let guide: Frame = ImageBuffer::from_fn(width, height, |x, y| {
            if hard_mask.get_pixel(x, y)[0] > 127 {
                *subject.get_pixel(x, y)
            } else {
                *background.get_pixel(x, y)
            }
        });

        let matting = self.config.matting.clone();
        let (alpha, path, duration) = timed(|| self.matte_stage(&guide, &hard_mask, &matting));
        metrics.stages.push(StageTiming {
            stage: Stage::Matte,
            path,
            duration,
        });

        let (composite, path, duration) =
            timed(|| self.composite_stage(&hard_mask, &alpha, &subject, &background));
        metrics.stages.push(StageTiming {
            stage: Stage::Blend,
            path,
            duration,
        });

        metrics.total_fallbacks = self.fallback.total_fallbacks();
        metrics.fallbacks = metrics.total_fallbacks - fallbacks_before;
        metrics.total = start.elapsed();
        tracing::debug!(
            frame = frame_index,
            model_updated = metrics.model_updated,
            fallbacks = metrics.fallbacks,
            regions = metrics.regions.len(),
            elapsed_us = metrics.total.as_micros() as u64,
            "frame composited"
        );

        CompositeOutput {
            frame: composite,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaskMode;
    use crate::test_utils::{gradient_frame, green_frame, rectangle_frame, rectangle_mask};
    use crate::utils::{bounding_box, Rect};
    use image::Rgb;

    #[test]
    fn cpu_pipeline_reports_cpu_paths() {
        let config = CompositorConfig::builder().lighting_correction(true).build().unwrap();
        let mut pipeline = CompositingPipeline::new(config);
        let frame = rectangle_frame(64, 48, Rect::new(20, 10, 24, 28), Rgb([220, 30, 40]));
        let background = gradient_frame(64, 48);

        let out = pipeline.process_frame(&frame, &BackgroundSource::VideoFrame(&background));
        assert_eq!(out.frame.dimensions(), (64, 48));
        assert_eq!(out.metrics.frame_index, 0);
        assert!(out.metrics.model_updated);
        for stage in Stage::ALL {
            assert_eq!(out.metrics.path(stage), Some(ExecutionPath::Cpu));
        }
        assert_eq!(out.metrics.fallbacks, 0);
        assert!(!pipeline.pool_initialize(64, 48));
    }

    #[test]
    fn host_device_pipeline_matches_cpu_pipeline() {
        let frame = rectangle_frame(64, 48, Rect::new(20, 10, 24, 28), Rgb([220, 30, 40]));
        let background = gradient_frame(64, 48);
        let source = BackgroundSource::VideoFrame(&background);

        let mut cpu = CompositingPipeline::new(CompositorConfig::default());
        let mut device =
            CompositingPipeline::with_device(CompositorConfig::default(), Arc::new(HostDevice::new()));

        for _ in 0..3 {
            let a = cpu.process_frame(&frame, &source);
            let b = device.process_frame(&frame, &source);
            assert_eq!(b.metrics.path(Stage::Matte), Some(ExecutionPath::Device));
            assert_eq!(b.metrics.fallbacks, 0);

            let diff: u64 = a
                .frame
                .as_raw()
                .iter()
                .zip(b.frame.as_raw())
                .map(|(&x, &y)| u64::from(x.abs_diff(y)))
                .sum();
            assert!(diff as f64 / a.frame.as_raw().len() as f64 <= 1.0);
        }
        assert_eq!(device.pool().and_then(GpuBufferPool::dimensions), Some((64, 48)));
    }

    #[test]
    fn disabled_device_uses_cpu() {
        let config = CompositorConfig::builder().use_device(false).build().unwrap();
        let mut pipeline = CompositingPipeline::with_device(config, Arc::new(HostDevice::new()));
        let frame = green_frame(32, 32);
        let out = pipeline.process_frame(&frame, &BackgroundSource::None);
        assert_eq!(out.metrics.path(Stage::Mask), Some(ExecutionPath::Cpu));
        assert!(!pipeline.pool().is_some_and(GpuBufferPool::is_initialized));
    }

    #[test]
    fn uninitialised_pool_falls_back_per_stage() {
        let mut pipeline =
            CompositingPipeline::with_device(CompositorConfig::default(), Arc::new(HostDevice::new()));
        let frame = green_frame(16, 16);
        let mask = pipeline.extract_foreground_mask(&frame);
        assert!(mask.pixels().all(|p| p[0] == 0));
        assert_eq!(pipeline.fallback().fallbacks(Stage::Mask), 1);
    }

    #[test]
    fn empty_frame_yields_empty_output() {
        let mut pipeline = CompositingPipeline::new(CompositorConfig::default());
        let out = pipeline.process_frame(&Frame::new(0, 0), &BackgroundSource::None);
        assert_eq!(out.frame.dimensions(), (0, 0));
        assert!(out.metrics.stages.is_empty());
        assert_eq!(pipeline.frames_processed(), 1);
    }

    #[test]
    fn invalid_matting_parameters_return_unit_matte() {
        let mut pipeline = CompositingPipeline::new(CompositorConfig::default());
        let guide = gradient_frame(20, 20);
        let mask = rectangle_mask(20, 20, Rect::new(5, 5, 10, 10));
        let alpha = pipeline.matte_alpha(&guide, &mask, 0, 1e-3);
        assert_eq!(alpha, unit_matte(&mask));
        let alpha = pipeline.matte_alpha(&guide, &mask, 4, -1.0);
        assert_eq!(alpha, unit_matte(&mask));
    }

    #[test]
    fn mismatched_composite_inputs_return_clones() {
        let mut pipeline = CompositingPipeline::new(CompositorConfig::default());
        let subject = gradient_frame(10, 10);
        let background = green_frame(12, 12);
        let mask = rectangle_mask(10, 10, Rect::new(2, 2, 4, 4));
        let alpha = unit_matte(&mask);

        assert_eq!(
            pipeline.composite_frame(&mask, &alpha, &subject, &background),
            background
        );
        assert_eq!(
            pipeline.composite_frame(&mask, &alpha, &subject, &Frame::new(0, 0)),
            subject
        );
    }

    #[test]
    fn adaptive_mode_finds_the_subject() {
        let config = CompositorConfig::builder()
            .mask_mode(MaskMode::Adaptive)
            .build()
            .unwrap();
        let mut pipeline = CompositingPipeline::new(config);
        let rect = Rect::new(30, 20, 40, 30);
        let frame = rectangle_frame(120, 90, rect, Rgb([230, 20, 20]));
        for _ in 0..10 {
            pipeline.update_background_model(&frame);
        }
        let mask = pipeline.extract_foreground_mask(&frame);
        assert_eq!(bounding_box(&mask), Some(rect));
    }

    #[test]
    fn invalid_configuration_is_reset_at_construction() {
        let mut config = CompositorConfig::default();
        config.blend.outer_ring = 0;
        config.blend.subject_weight = 1.5;
        config.matting.epsilon = -1.0;
        config.person_scale = 0.75;

        let mut pipeline = CompositingPipeline::new(config);
        assert!(pipeline.config().validate().is_ok());
        assert_eq!(pipeline.config().blend.outer_ring, 4);
        assert!((pipeline.config().blend.subject_weight - 0.6).abs() < f32::EPSILON);
        assert!((pipeline.config().matting.epsilon - 5e-3).abs() < f32::EPSILON);
        assert!((pipeline.config().person_scale - 0.75).abs() < f32::EPSILON);

        let frame = rectangle_frame(48, 40, Rect::new(14, 10, 20, 20), Rgb([220, 30, 40]));
        let out = pipeline.process_frame(&frame, &BackgroundSource::None);
        assert_eq!(out.frame.dimensions(), (48, 40));
    }

    #[test]
    fn lighting_follows_the_template() {
        let config = CompositorConfig::builder().lighting_correction(true).build().unwrap();
        let rect = Rect::new(20, 16, 40, 32);
        let frame = rectangle_frame(80, 64, rect, Rgb([90, 40, 40]));
        let template: Frame = ImageBuffer::from_pixel(80, 64, Rgb([235, 225, 210]));
        let source = BackgroundSource::Image {
            key: "bright",
            image: &template,
        };

        let mut plain = CompositingPipeline::new(CompositorConfig::default());
        let mut lit = CompositingPipeline::new(config.clone());
        let mut device = CompositingPipeline::with_device(config, Arc::new(HostDevice::new()));

        let before = plain.process_frame(&frame, &source);
        let after = lit.process_frame(&frame, &source);
        let on_device = device.process_frame(&frame, &source);

        assert_eq!(before.metrics.path(Stage::Lighting), None);
        assert_eq!(after.metrics.path(Stage::Lighting), Some(ExecutionPath::Cpu));
        assert_eq!(on_device.metrics.path(Stage::Lighting), Some(ExecutionPath::Device));

        let center = (rect.x + rect.width / 2, rect.y + rect.height / 2);
        let dark = before.frame.get_pixel(center.0, center.1);
        let bright = after.frame.get_pixel(center.0, center.1);
        let brightness = |p: &Rgb<u8>| p.0.iter().map(|&v| u32::from(v)).sum::<u32>();
        assert!(brightness(bright) > brightness(dark));
        assert_eq!(on_device.frame.get_pixel(center.0, center.1), bright);
        // far from the subject the template is untouched
        assert_eq!(after.frame.get_pixel(2, 2), template.get_pixel(2, 2));
    }

    #[test]
    fn lighting_without_template_applies_gains() {
        let mut pipeline = CompositingPipeline::new(CompositorConfig::default());
        let subject: Frame = ImageBuffer::from_pixel(6, 4, Rgb([100, 100, 100]));
        let mask = rectangle_mask(6, 4, Rect::new(0, 0, 3, 4));

        let out = pipeline.correct_subject_lighting(&subject, &mask, None);
        assert_eq!(out.get_pixel(1, 1), &Rgb([108, 105, 110]));
        assert_eq!(out.get_pixel(4, 1), &Rgb([100, 100, 100]));

        let wrong = rectangle_mask(3, 3, Rect::new(0, 0, 1, 1));
        assert_eq!(pipeline.correct_subject_lighting(&subject, &wrong, None), subject);
    }

    #[test]
    fn release_keeps_pipeline_usable() {
        let mut pipeline =
            CompositingPipeline::with_device(CompositorConfig::default(), Arc::new(HostDevice::new()));
        let frame = green_frame(24, 24);
        pipeline.process_frame(&frame, &BackgroundSource::Solid(Rgb([9, 9, 9])));
        pipeline.release();
        pipeline.release();
        assert!(!pipeline.pool().is_some_and(GpuBufferPool::is_initialized));

        let out = pipeline.process_frame(&frame, &BackgroundSource::Solid(Rgb([9, 9, 9])));
        assert!(out.frame.pixels().all(|p| *p == Rgb([9, 9, 9])));
    }
}
