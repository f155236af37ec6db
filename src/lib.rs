//! Real-time chroma-key compositing.
//!
//! [`CompositingPipeline`] keys a subject out of a green or teal backdrop,
//! refines the boundary with a guided-filter matte and composites it onto a
//! substitute background. Every stage has a CPU implementation in
//! [`compositor`] and a device implementation in [`accelerated`]; the
//! [`FallbackController`] reroutes failed device stages to the CPU.

pub mod accelerated;
pub mod background;
pub mod compositor;
pub mod config;
pub mod device;
mod error;
pub mod fallback;
pub mod pipeline;
pub mod pool;
pub mod utils;

#[cfg(test)]
mod test_utils;

use image::{ImageBuffer, Luma, Pixel, Rgb};

pub use background::{BackgroundCache, BackgroundSource};
pub use compositor::background_model::{BackgroundColorModel, ColorStatistics};
pub use compositor::lighting::LightingCorrection;
pub use compositor::morphology::Mask;
pub use compositor::regions::Region;
pub use compositor::thresholds::{AdaptiveThresholds, KeyParams};
pub use config::{BlendConfig, CompositorConfig, CompositorConfigBuilder, KeyConfig, MaskMode, MattingConfig};
pub use device::{ComputeDevice, HostDevice};
#[cfg(feature = "wgpu")]
pub use device::WgpuDevice;
pub use error::{
    BoxFilterError, ConfigError, DeviceError, Error, GuidedFilterError, StageError,
};
pub use fallback::{ExecutionPath, FallbackController, Stage};
pub use pipeline::{CompositeOutput, CompositingPipeline, FrameMetrics, StageTiming};
pub use pool::{BufferCategory, GpuBufferPool, PoolStats, StreamKind};

pub type Image<P> = ImageBuffer<P, Vec<<P as Pixel>::Subpixel>>;

/// 8-bit RGB video frame.
pub type Frame = Image<Rgb<u8>>;

/// Soft alpha in `[0, 1]`.
pub type AlphaMatte = Image<Luma<f32>>;
