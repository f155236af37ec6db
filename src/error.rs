use thiserror::Error;

/// Error type for image-level validation
///
/// Returned by helpers that check frames, masks and mattes before any
/// expensive work is started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Two images that must share a size do not
    #[error("Image dimensions do not match: expected {expected:?}, actual {actual:?}")]
    DimensionMismatch {
        /// Expected dimensions (width, height)
        expected: (u32, u32),
        /// Actual dimensions (width, height)
        actual: (u32, u32),
    },

    /// An image with zero width or height was supplied
    #[error("Image must not be empty")]
    EmptyImage,

    /// Invalid parameter provided to the operation
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Error type for box filter operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoxFilterError {
    /// The input image has zero area
    #[error("Cannot box filter an empty image")]
    EmptyImage,
}

/// Error type for guided filter operations
///
/// Covers parameter validation as well as shape checks between the
/// guidance image and the filter input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuidedFilterError {
    /// The window radius must be at least one
    #[error("Invalid radius {radius}: must be at least 1")]
    InvalidRadius { radius: u32 },

    /// The regularisation term must be finite and strictly positive
    #[error("Invalid epsilon {epsilon}: must be finite and > 0")]
    InvalidEpsilon { epsilon: f32 },

    /// The guidance image and the input do not share dimensions
    #[error("Guidance dimensions {guidance_dims:?} do not match input dimensions {input_dims:?}")]
    DimensionMismatch {
        guidance_dims: (u32, u32),
        input_dims: (u32, u32),
    },

    /// Box filtering of an intermediate image failed
    #[error(transparent)]
    BoxFilter(#[from] BoxFilterError),
}

/// Error type reported by compute devices
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// No compatible adapter was found
    #[error("No compatible GPU adapter available")]
    NoAdapter,

    /// The logical device could not be created
    #[error("Failed to create device: {0}")]
    DeviceCreation(String),

    /// A kernel output shares storage with one of its inputs
    #[error("Kernel {kernel} writes into a buffer it also reads")]
    AliasedBuffers { kernel: &'static str },

    /// The launch extent does not fit into a buffer
    #[error("Extent {extent:?} exceeds buffer capacity {capacity:?}")]
    ExtentTooLarge {
        extent: (u32, u32),
        capacity: (u32, u32),
    },

    /// A buffer has the wrong number of channels for the kernel
    #[error("Kernel {kernel} expected {expected} channel(s), got {actual}")]
    ChannelMismatch {
        kernel: &'static str,
        expected: u32,
        actual: u32,
    },

    /// Upload data does not match the destination size
    #[error("Upload of {actual} values does not fit buffer of {capacity} values")]
    UploadSize { actual: usize, capacity: usize },

    /// The buffer is the empty placeholder handed out by an uninitialised pool
    #[error("Placeholder buffer used in a device operation")]
    PlaceholderBuffer,

    /// The backend rejected a command
    #[error("Device validation error: {0}")]
    Validation(String),

    /// Reading results back to the host failed
    #[error("Buffer map failed: {0}")]
    MapFailed(String),

    /// A host buffer lock was poisoned by a panicking writer
    #[error("Buffer lock poisoned")]
    Poisoned,
}

/// Error type for configuration validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field holds a value outside its accepted range
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Error type for a single pipeline stage
///
/// Stage errors never escape the public pipeline operations; they decide
/// whether the fallback controller reroutes a stage to the CPU.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    /// The compute device failed
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The CPU guided filter rejected its inputs
    #[error(transparent)]
    GuidedFilter(#[from] GuidedFilterError),

    /// Image validation failed
    #[error(transparent)]
    Image(#[from] Error),

    /// No device is attached to the pipeline
    #[error("No compute device attached")]
    NoDevice,

    /// The buffer pool has not been initialised for the frame size
    #[error("Buffer pool is not initialised for {width}x{height}")]
    PoolUninitialized { width: u32, height: u32 },
}
