//! Compute device abstraction.
//!
//! A device owns typed 2D buffers and executes a fixed set of [`Kernel`]s on
//! them, ordered per stream. Buffers are allocated at full frame size;
//! kernels run over a compact [`Extent`] no larger than the buffer, with
//! element `(x, y, c)` stored at `(y * extent.width + x) * channels + c`.
//!
//! [`HostDevice`] executes everything eagerly on the CPU and is always
//! available. The `wgpu` feature adds [`WgpuDevice`].

mod host;
#[cfg(feature = "wgpu")]
mod shaders;
#[cfg(feature = "wgpu")]
mod wgpu_backend;

pub use host::{HostBuffer, HostDevice, HostStream};
#[cfg(feature = "wgpu")]
pub use wgpu_backend::{WgpuBuffer, WgpuDevice, WgpuStream};

pub use crate::compositor::gaussian::Axis;
pub use crate::compositor::lighting::LightingCorrection;
pub use crate::compositor::morphology::MorphOp;
use crate::error::DeviceError;
use std::fmt::Debug;

/// Element interpretation of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Writes are rounded to nearest and saturated to `0..=255`.
    Byte,
    Float,
}

/// Launch size of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered.
    #[must_use]
    pub const fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Handle to device memory.
///
/// Handles are cheap to clone and share the underlying storage. The
/// `Default` value is the empty placeholder an uninitialised pool returns;
/// every device operation rejects it.
pub trait DeviceBuffer: Clone + Default + Debug + Send + Sync {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn channels(&self) -> u32;
    fn kind(&self) -> ElementKind;
    fn is_placeholder(&self) -> bool;
    /// Whether both handles refer to the same storage.
    fn shares_storage(&self, other: &Self) -> bool;

    /// Capacity in `f32` elements.
    fn len(&self) -> usize {
        self.width() as usize * self.height() as usize * self.channels() as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    /// Division by zero yields zero
    Divide,
    Max,
}

impl BinaryOp {
    #[inline]
    pub(crate) fn apply(self, lhs: f32, rhs: f32) -> f32 {
        match self {
            Self::Add => lhs + rhs,
            Self::Subtract => lhs - rhs,
            Self::Multiply => lhs * rhs,
            Self::Divide => {
                if rhs == 0.0 {
                    0.0
                } else {
                    lhs / rhs
                }
            }
            Self::Max => lhs.max(rhs),
        }
    }

    #[cfg(feature = "wgpu")]
    pub(crate) const fn code(self) -> u32 {
        match self {
            Self::Add => 0,
            Self::Subtract => 1,
            Self::Multiply => 2,
            Self::Divide => 3,
            Self::Max => 4,
        }
    }
}

/// Work a device can execute.
#[derive(Debug)]
pub enum Kernel<'a, B> {
    /// `dst = round(luma(src)) * scale`
    Grayscale { src: &'a B, dst: &'a B, scale: f32 },
    /// `dst = src * scale + offset`
    Affine {
        src: &'a B,
        dst: &'a B,
        scale: f32,
        offset: f32,
    },
    Binary {
        op: BinaryOp,
        lhs: &'a B,
        rhs: &'a B,
        dst: &'a B,
    },
    /// `dst = src > threshold ? value : 0`
    Threshold {
        src: &'a B,
        dst: &'a B,
        threshold: f32,
        value: f32,
    },
    /// Clipped-window mean along one axis.
    BoxMean {
        src: &'a B,
        dst: &'a B,
        radius: u32,
        axis: Axis,
    },
    /// Linear coefficients of the guided filter from windowed moments.
    GuidedCoefficients {
        mean_guide: &'a B,
        mean_input: &'a B,
        corr_guide: &'a B,
        corr_cross: &'a B,
        a: &'a B,
        b: &'a B,
        epsilon: f32,
    },
    /// `dst = clamp(mean_a * guide + mean_b, 0, 1)`
    GuidedOutput {
        mean_a: &'a B,
        mean_b: &'a B,
        guide: &'a B,
        dst: &'a B,
    },
    /// Elliptical erosion or dilation.
    Morphology {
        src: &'a B,
        dst: &'a B,
        op: MorphOp,
        radius: u32,
    },
    /// One separable Gaussian pass with replicated borders. `weights` is a
    /// single-row, single-channel buffer.
    Gaussian {
        src: &'a B,
        dst: &'a B,
        weights: &'a B,
        axis: Axis,
    },
    /// Dominance heuristic: 255 for subject, 0 for backdrop.
    ChromaKey {
        src: &'a B,
        dst: &'a B,
        red_margin: i32,
        blue_margin: i32,
    },
    /// Heuristic or adaptive classifier; `params` holds encoded key params.
    AdaptiveKey {
        src: &'a B,
        dst: &'a B,
        params: &'a B,
    },
    SpillSuppress {
        src: &'a B,
        mask: &'a B,
        dst: &'a B,
        hue_min: u8,
        hue_max: u8,
    },
    /// Subject lighting correction where `mask > 0`; other pixels are
    /// copied from `src`.
    Lighting {
        src: &'a B,
        mask: &'a B,
        dst: &'a B,
        correction: LightingCorrection,
    },
    /// `dst = src` where `mask > 0`; other pixels of `dst` are kept.
    MaskedCopy {
        src: &'a B,
        mask: &'a B,
        dst: &'a B,
    },
    /// `dst = lhs * lhs_weight + rhs * rhs_weight`
    AddWeighted {
        lhs: &'a B,
        rhs: &'a B,
        dst: &'a B,
        lhs_weight: f32,
        rhs_weight: f32,
    },
    /// Matting-equation unmix where `ring > 0`; other pixels of `dst` are
    /// kept.
    Unmix {
        subject: &'a B,
        background: &'a B,
        alpha: &'a B,
        ring: &'a B,
        dst: &'a B,
        bias: f32,
        min_alpha: f32,
    },
}

impl<'a, B: DeviceBuffer> Kernel<'a, B> {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Grayscale { .. } => "grayscale",
            Self::Affine { .. } => "affine",
            Self::Binary { .. } => "binary",
            Self::Threshold { .. } => "threshold",
            Self::BoxMean { .. } => "box_mean",
            Self::GuidedCoefficients { .. } => "guided_coefficients",
            Self::GuidedOutput { .. } => "guided_output",
            Self::Morphology { .. } => "morphology",
            Self::Gaussian { .. } => "gaussian",
            Self::ChromaKey { .. } => "chroma_key",
            Self::AdaptiveKey { .. } => "adaptive_key",
            Self::SpillSuppress { .. } => "spill_suppress",
            Self::Lighting { .. } => "lighting",
            Self::MaskedCopy { .. } => "masked_copy",
            Self::AddWeighted { .. } => "add_weighted",
            Self::Unmix { .. } => "unmix",
        }
    }

    /// Per-pixel image inputs.
    pub(crate) fn inputs(&self) -> Vec<&'a B> {
        match *self {
            Self::Grayscale { src, .. }
            | Self::Affine { src, .. }
            | Self::Threshold { src, .. }
            | Self::BoxMean { src, .. }
            | Self::Morphology { src, .. }
            | Self::Gaussian { src, .. }
            | Self::ChromaKey { src, .. }
            | Self::AdaptiveKey { src, .. } => vec![src],
            Self::Binary { lhs, rhs, .. } | Self::AddWeighted { lhs, rhs, .. } => vec![lhs, rhs],
            Self::GuidedCoefficients {
                mean_guide,
                mean_input,
                corr_guide,
                corr_cross,
                ..
            } => vec![mean_guide, mean_input, corr_guide, corr_cross],
            Self::GuidedOutput {
                mean_a,
                mean_b,
                guide,
                ..
            } => vec![mean_a, mean_b, guide],
            Self::SpillSuppress { src, mask, .. }
            | Self::Lighting { src, mask, .. }
            | Self::MaskedCopy { src, mask, .. } => vec![src, mask],
            Self::Unmix {
                subject,
                background,
                alpha,
                ring,
                ..
            } => vec![subject, background, alpha, ring],
        }
    }

    /// Parameter buffers that are not indexed by pixel.
    pub(crate) fn auxiliary(&self) -> Option<&'a B> {
        match *self {
            Self::Gaussian { weights, .. } => Some(weights),
            Self::AdaptiveKey { params, .. } => Some(params),
            _ => None,
        }
    }

    pub(crate) fn outputs(&self) -> Vec<&'a B> {
        match *self {
            Self::GuidedCoefficients { a, b, .. } => vec![a, b],
            Self::Grayscale { dst, .. }
            | Self::Affine { dst, .. }
            | Self::Binary { dst, .. }
            | Self::Threshold { dst, .. }
            | Self::BoxMean { dst, .. }
            | Self::GuidedOutput { dst, .. }
            | Self::Morphology { dst, .. }
            | Self::Gaussian { dst, .. }
            | Self::ChromaKey { dst, .. }
            | Self::AdaptiveKey { dst, .. }
            | Self::SpillSuppress { dst, .. }
            | Self::Lighting { dst, .. }
            | Self::MaskedCopy { dst, .. }
            | Self::AddWeighted { dst, .. }
            | Self::Unmix { dst, .. } => vec![dst],
        }
    }

    /// Required channel count of each input followed by each output; `None`
    /// means "same as the first input".
    fn channel_layout(&self) -> Vec<Option<u32>> {
        match self {
            Self::Grayscale { .. } | Self::ChromaKey { .. } | Self::AdaptiveKey { .. } => {
                vec![Some(3), Some(1)]
            }
            Self::SpillSuppress { .. } | Self::Lighting { .. } => vec![Some(3), Some(1), Some(3)],
            Self::MaskedCopy { .. } => vec![None, Some(1), None],
            Self::Unmix { .. } => vec![Some(3), Some(3), Some(1), Some(1), Some(3)],
            Self::GuidedCoefficients { .. } => vec![Some(1); 6],
            Self::GuidedOutput { .. } => vec![Some(1); 4],
            Self::Morphology { .. } | Self::Threshold { .. } => vec![Some(1), Some(1)],
            Self::Affine { .. } | Self::BoxMean { .. } | Self::Gaussian { .. } => vec![None, None],
            Self::Binary { .. } | Self::AddWeighted { .. } => vec![None, None, None],
        }
    }

    /// Checks buffers against `extent` before anything is executed.
    pub(crate) fn validate(&self, extent: Extent) -> Result<(), DeviceError> {
        let inputs = self.inputs();
        let outputs = self.outputs();
        let aux = self.auxiliary();

        let images = inputs.iter().chain(outputs.iter());
        if images.clone().chain(aux.iter()).any(|b| b.is_placeholder()) {
            return Err(DeviceError::PlaceholderBuffer);
        }

        for buffer in images.clone() {
            if extent.width > buffer.width() || extent.height > buffer.height() {
                return Err(DeviceError::ExtentTooLarge {
                    extent: (extent.width, extent.height),
                    capacity: (buffer.width(), buffer.height()),
                });
            }
        }

        for (i, out) in outputs.iter().enumerate() {
            let aliased = inputs.iter().any(|b| b.shares_storage(out))
                || aux.is_some_and(|b| b.shares_storage(out))
                || outputs[i + 1..].iter().any(|b| b.shares_storage(out));
            if aliased {
                return Err(DeviceError::AliasedBuffers { kernel: self.name() });
            }
        }

        let first = inputs.first().map_or(1, |b| b.channels());
        for (buffer, expected) in images.zip(self.channel_layout()) {
            let expected = expected.unwrap_or(first);
            if buffer.channels() != expected {
                return Err(DeviceError::ChannelMismatch {
                    kernel: self.name(),
                    expected,
                    actual: buffer.channels(),
                });
            }
        }
        Ok(())
    }
}

/// A compute backend.
///
/// Work launched on one stream executes in launch order. Work on different
/// streams is unordered until [`synchronize`](Self::synchronize) is called
/// on the producing stream.
pub trait ComputeDevice: Send + Sync {
    type Buffer: DeviceBuffer;
    type Stream: Debug + Send + Sync;

    /// Human-readable adapter name.
    fn name(&self) -> &str;

    fn create_stream(&self, label: &str) -> Result<Self::Stream, DeviceError>;

    fn allocate(
        &self,
        width: u32,
        height: u32,
        channels: u32,
        kind: ElementKind,
    ) -> Result<Self::Buffer, DeviceError>;

    /// Writes compact `extent`-sized data into `dst`.
    fn upload(
        &self,
        stream: &Self::Stream,
        extent: Extent,
        data: &[f32],
        dst: &Self::Buffer,
    ) -> Result<(), DeviceError>;

    fn launch(
        &self,
        stream: &Self::Stream,
        extent: Extent,
        kernel: &Kernel<'_, Self::Buffer>,
    ) -> Result<(), DeviceError>;

    /// Blocks until all work launched on `stream` has completed.
    fn synchronize(&self, stream: &Self::Stream) -> Result<(), DeviceError>;

    /// Reads the compact `extent` region of `src` after synchronising
    /// `stream`.
    fn download(
        &self,
        stream: &Self::Stream,
        src: &Self::Buffer,
        extent: Extent,
    ) -> Result<Vec<f32>, DeviceError>;
}

/// Checks an upload against its destination.
pub(crate) fn validate_upload<B: DeviceBuffer>(
    extent: Extent,
    data: &[f32],
    dst: &B,
) -> Result<(), DeviceError> {
    if dst.is_placeholder() {
        return Err(DeviceError::PlaceholderBuffer);
    }
    if extent.width > dst.width() || extent.height > dst.height() {
        return Err(DeviceError::ExtentTooLarge {
            extent: (extent.width, extent.height),
            capacity: (dst.width(), dst.height()),
        });
    }
    let expected = extent.pixels() * dst.channels() as usize;
    if data.len() != expected {
        return Err(DeviceError::UploadSize {
            actual: data.len(),
            capacity: expected,
        });
    }
    Ok(())
}

/// Checks a download against its source.
pub(crate) fn validate_download<B: DeviceBuffer>(extent: Extent, src: &B) -> Result<(), DeviceError> {
    if src.is_placeholder() {
        return Err(DeviceError::PlaceholderBuffer);
    }
    if extent.width > src.width() || extent.height > src.height() {
        return Err(DeviceError::ExtentTooLarge {
            extent: (extent.width, extent.height),
            capacity: (src.width(), src.height()),
        });
    }
    Ok(())
}
