//! Device-or-CPU stage execution.

use crate::error::StageError;
use std::fmt;

/// Pipeline stages that have a device implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Stage {
    Mask,
    Spill,
    Lighting,
    Matte,
    Blend,
}

impl Stage {
    pub const ALL: [Self; 5] = [
        Self::Mask,
        Self::Spill,
        Self::Lighting,
        Self::Matte,
        Self::Blend,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mask => "mask",
            Self::Spill => "spill",
            Self::Lighting => "lighting",
            Self::Matte => "matte",
            Self::Blend => "blend",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a stage actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExecutionPath {
    Device,
    /// No device attempt was made
    Cpu,
    /// The device attempt failed and the CPU produced the result
    CpuFallback,
}

/// Runs each stage on the device when possible and on the CPU otherwise.
///
/// Device errors never propagate: they are logged and counted, and the CPU
/// closure produces the stage output instead.
#[derive(Debug, Clone, Default)]
pub struct FallbackController {
    fallbacks: [u64; Stage::ALL.len()],
    device_runs: [u64; Stage::ALL.len()],
}

impl FallbackController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `device` if given, and `cpu` when it is absent or fails.
    pub fn run<T, G, C>(&mut self, stage: Stage, device: Option<G>, cpu: C) -> (T, ExecutionPath)
    where
        G: FnOnce() -> Result<T, StageError>,
        C: FnOnce() -> T,
    {
        let Some(device) = device else {
            return (cpu(), ExecutionPath::Cpu);
        };

        match device() {
            Ok(value) => {
                self.device_runs[stage.index()] += 1;
                (value, ExecutionPath::Device)
            }
            Err(error) => {
                self.fallbacks[stage.index()] += 1;
                tracing::warn!(stage = stage.name(), %error, "device stage failed, using CPU");
                (cpu(), ExecutionPath::CpuFallback)
            }
        }
    }

    /// Number of CPU fallbacks of `stage`.
    #[must_use]
    pub const fn fallbacks(&self, stage: Stage) -> u64 {
        self.fallbacks[stage.index()]
    }

    /// Number of successful device runs of `stage`.
    #[must_use]
    pub const fn device_runs(&self, stage: Stage) -> u64 {
        self.device_runs[stage.index()]
    }

    #[must_use]
    pub fn total_fallbacks(&self) -> u64 {
        self.fallbacks.iter().sum()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
