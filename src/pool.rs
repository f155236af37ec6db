//! Device buffer pool.
//!
//! All frame-sized device memory is allocated once per resolution and handed
//! out round-robin per category. Stages never allocate per frame; they borrow
//! the next slot of a ring and must be done with it before the ring wraps.
//!
//! Each slot remembers the stream it was last handed to. When a slot moves to
//! a different stream while that stream still has unsynchronised work, the
//! pool synchronises the previous stream first, so ring wraparound can never
//! alias data another stream is still producing.

use crate::compositor::gaussian::GaussianKernel;
use crate::compositor::morphology::MorphOp;
use crate::compositor::thresholds::KEY_PARAMS_LEN;
use crate::device::{ComputeDevice, DeviceBuffer, ElementKind, Extent, Kernel};
use crate::error::{DeviceError, StageError};
use std::collections::HashMap;
use std::sync::Arc;

/// Buffer categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferCategory {
    /// Color frames and composites
    Frame,
    /// Subject masks and boundary rings
    Segmentation,
    /// Masks produced on the detection stream
    Detection,
    /// Scratch masks
    Temp,
    /// Float planes of the guided filter
    GuidedFilter,
    /// Intermediate pass of the separable box mean
    BoxFilter,
    /// Intermediate and final passes of the edge blur
    EdgeBlur,
    /// Reserved capacity for an edge-detection pass. No stage requests it
    /// yet; the ring is allocated so the pool footprint stays fixed.
    EdgeDetection,
}

impl BufferCategory {
    pub const ALL: [Self; 8] = [
        Self::Frame,
        Self::Segmentation,
        Self::Detection,
        Self::Temp,
        Self::GuidedFilter,
        Self::BoxFilter,
        Self::EdgeBlur,
        Self::EdgeDetection,
    ];

    /// Number of slots in the ring.
    #[must_use]
    pub const fn ring_size(self) -> usize {
        match self {
            Self::Frame | Self::Temp | Self::EdgeBlur => 4,
            Self::Segmentation | Self::Detection | Self::BoxFilter | Self::EdgeDetection => 2,
            Self::GuidedFilter => 16,
        }
    }

    #[must_use]
    pub const fn channels(self) -> u32 {
        match self {
            Self::Frame | Self::EdgeBlur => 3,
            _ => 1,
        }
    }

    #[must_use]
    pub const fn kind(self) -> ElementKind {
        match self {
            Self::GuidedFilter | Self::BoxFilter => ElementKind::Float,
            _ => ElementKind::Byte,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// The three independent streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Detection,
    Segmentation,
    Composition,
}

impl StreamKind {
    pub const ALL: [Self; 3] = [Self::Detection, Self::Segmentation, Self::Composition];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::Segmentation => "segmentation",
            Self::Composition => "composition",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Counters describing pool usage since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers allocated by all `initialize` calls
    pub buffers_allocated: u64,
    /// Successful `next_buffer` calls
    pub handouts: u64,
    /// Handouts that returned a slot that had been handed out before
    pub reuses: u64,
    /// Synchronisations inserted because a slot changed streams
    pub fences_inserted: u64,
    /// `next_buffer` calls answered with the placeholder
    pub placeholder_handouts: u64,
    pub initializations: u64,
}

/// A reusable morphology operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MorphologyFilter {
    pub op: MorphOp,
    pub radius: u32,
}

impl MorphologyFilter {
    #[must_use]
    pub fn kernel<'a, B>(&self, src: &'a B, dst: &'a B) -> Kernel<'a, B> {
        Kernel::Morphology {
            src,
            dst,
            op: self.op,
            radius: self.radius,
        }
    }
}

/// A Gaussian kernel together with its device-resident weights.
#[derive(Debug, Clone)]
pub struct GaussianFilter<B> {
    pub kernel: GaussianKernel,
    pub weights: B,
}

/// Long-lived filter objects, built on first use and kept until release.
#[derive(Debug)]
pub struct FilterBank<B> {
    gaussian: HashMap<(usize, u32), GaussianFilter<B>>,
    morphology: HashMap<(MorphOp, u32), MorphologyFilter>,
    key_params: B,
}

impl<B: DeviceBuffer> FilterBank<B> {
    #[must_use]
    pub fn gaussian_filters(&self) -> usize {
        self.gaussian.len()
    }

    #[must_use]
    pub fn morphology_filters(&self) -> usize {
        self.morphology.len()
    }
}

#[derive(Debug)]
struct Slot<B> {
    buffer: B,
    last_stream: Option<StreamKind>,
}

#[derive(Debug)]
struct Ring<B> {
    slots: Vec<Slot<B>>,
    cursor: usize,
}

struct PoolState<D: ComputeDevice> {
    width: u32,
    height: u32,
    rings: Vec<Ring<D::Buffer>>,
    streams: Vec<D::Stream>,
    /// Whether the stream has work that has not been synchronised
    pending: [bool; 3],
    filters: FilterBank<D::Buffer>,
}

/// Ring-buffered device memory for one frame resolution.
pub struct GpuBufferPool<D: ComputeDevice> {
    device: Arc<D>,
    state: Option<PoolState<D>>,
    placeholder: D::Buffer,
    stats: PoolStats,
}

impl<D: ComputeDevice> std::fmt::Debug for GpuBufferPool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBufferPool")
            .field("device", &self.device.name())
            .field("dimensions", &self.dimensions())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<D: ComputeDevice> GpuBufferPool<D> {
    /// Creates an empty, inert pool.
    #[must_use]
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            state: None,
            placeholder: D::Buffer::default(),
            stats: PoolStats::default(),
        }
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Resolution the pool is allocated for.
    #[must_use]
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.state.as_ref().map(|s| (s.width, s.height))
    }

    #[must_use]
    pub const fn stats(&self) -> PoolStats {
        self.stats
    }

    #[must_use]
    pub fn filters(&self) -> Option<&FilterBank<D::Buffer>> {
        self.state.as_ref().map(|s| &s.filters)
    }

    /// Allocates every category for `width`x`height`.
    ///
    /// Initialising with the current resolution does nothing. On failure the
    /// pool is left released.
    ///
    /// # Errors
    ///
    /// Returns the device error of the first failed allocation.
    pub fn initialize(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        if self.dimensions() == Some((width, height)) {
            return Ok(());
        }
        self.release();

        let state = self.allocate_state(width, height)?;
        let allocated: usize = state.rings.iter().map(|r| r.slots.len()).sum();
        self.stats.buffers_allocated += allocated as u64;
        self.stats.initializations += 1;
        self.state = Some(state);

        tracing::info!(
            device = self.device.name(),
            width,
            height,
            buffers = allocated,
            "buffer pool initialised"
        );
        Ok(())
    }

    fn allocate_state(&self, width: u32, height: u32) -> Result<PoolState<D>, DeviceError> {
        let rings = BufferCategory::ALL
            .iter()
            .map(|&category| {
                let slots = (0..category.ring_size())
                    .map(|_| {
                        self.device
                            .allocate(width, height, category.channels(), category.kind())
                            .map(|buffer| Slot {
                                buffer,
                                last_stream: None,
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Ring { slots, cursor: 0 })
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;

        let streams = StreamKind::ALL
            .iter()
            .map(|kind| self.device.create_stream(kind.label()))
            .collect::<Result<Vec<_>, _>>()?;

        let key_params = self
            .device
            .allocate(KEY_PARAMS_LEN as u32, 1, 1, ElementKind::Float)?;

        Ok(PoolState {
            width,
            height,
            rings,
            streams,
            pending: [false; 3],
            filters: FilterBank {
                gaussian: HashMap::new(),
                morphology: HashMap::new(),
                key_params,
            },
        })
    }

    /// Frees all device memory. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(state) = self.state.take() {
            for (kind, stream) in StreamKind::ALL.iter().zip(&state.streams) {
                if state.pending[kind.index()] {
                    if let Err(error) = self.device.synchronize(stream) {
                        tracing::warn!(stream = kind.label(), %error, "synchronisation failed during release");
                    }
                }
            }
            tracing::debug!(width = state.width, height = state.height, "buffer pool released");
        }
    }

    /// Hands out the next slot of `category` for work on `stream`.
    ///
    /// Never fails. An uninitialised pool logs a warning and returns the
    /// shared placeholder, which every device operation rejects.
    pub fn next_buffer(&mut self, category: BufferCategory, stream: StreamKind) -> D::Buffer {
        let Some(state) = self.state.as_mut() else {
            tracing::warn!(?category, "buffer requested from an uninitialised pool");
            self.stats.placeholder_handouts += 1;
            return self.placeholder.clone();
        };

        let ring = &mut state.rings[category.index()];
        let index = ring.cursor;
        ring.cursor = (ring.cursor + 1) % ring.slots.len();
        let slot = &mut ring.slots[index];

        if let Some(previous) = slot.last_stream {
            self.stats.reuses += 1;
            if previous != stream && state.pending[previous.index()] {
                match self.device.synchronize(&state.streams[previous.index()]) {
                    Ok(()) => {
                        state.pending[previous.index()] = false;
                        self.stats.fences_inserted += 1;
                        tracing::debug!(
                            ?category,
                            slot = index,
                            from = previous.label(),
                            to = stream.label(),
                            "fence inserted before slot reuse"
                        );
                    }
                    Err(error) => {
                        tracing::warn!(?category, slot = index, %error, "fence before slot reuse failed");
                    }
                }
            }
        }
        slot.last_stream = Some(stream);
        self.stats.handouts += 1;
        slot.buffer.clone()
    }

    fn state(&self) -> Result<&PoolState<D>, StageError> {
        self.state.as_ref().ok_or(StageError::PoolUninitialized {
            width: 0,
            height: 0,
        })
    }

    /// Fails unless the pool buffers can hold a `width`x`height` plane.
    pub(crate) fn ensure_fits(&self, width: u32, height: u32) -> Result<(), StageError> {
        match self.dimensions() {
            Some((w, h)) if width <= w && height <= h => Ok(()),
            _ => Err(StageError::PoolUninitialized { width, height }),
        }
    }

    fn mark_pending(&mut self, stream: StreamKind) {
        if let Some(state) = self.state.as_mut() {
            state.pending[stream.index()] = true;
        }
    }

    pub fn upload(
        &mut self,
        stream: StreamKind,
        extent: Extent,
        data: &[f32],
        dst: &D::Buffer,
    ) -> Result<(), StageError> {
        let state = self.state()?;
        self.device
            .upload(&state.streams[stream.index()], extent, data, dst)?;
        self.mark_pending(stream);
        Ok(())
    }

    pub fn launch(
        &mut self,
        stream: StreamKind,
        extent: Extent,
        kernel: &Kernel<'_, D::Buffer>,
    ) -> Result<(), StageError> {
        let state = self.state()?;
        self.device
            .launch(&state.streams[stream.index()], extent, kernel)?;
        self.mark_pending(stream);
        Ok(())
    }

    /// Waits for all work on `stream`.
    pub fn synchronize(&mut self, stream: StreamKind) -> Result<(), StageError> {
        let state = self.state()?;
        self.device.synchronize(&state.streams[stream.index()])?;
        if let Some(state) = self.state.as_mut() {
            state.pending[stream.index()] = false;
        }
        Ok(())
    }

    /// Synchronises every stream with outstanding work.
    pub fn synchronize_all(&mut self) -> Result<(), StageError> {
        for stream in StreamKind::ALL {
            let pending = self.state()?.pending[stream.index()];
            if pending {
                self.synchronize(stream)?;
            }
        }
        Ok(())
    }

    /// Reads `src` back to the host. This is the barrier of `stream`.
    pub fn download(
        &mut self,
        stream: StreamKind,
        src: &D::Buffer,
        extent: Extent,
    ) -> Result<Vec<f32>, StageError> {
        let state = self.state()?;
        let data = self
            .device
            .download(&state.streams[stream.index()], src, extent)?;
        if let Some(state) = self.state.as_mut() {
            state.pending[stream.index()] = false;
        }
        Ok(data)
    }

    /// Gaussian filter for `kernel`, uploading its weights on first use.
    pub fn gaussian(
        &mut self,
        kernel: &GaussianKernel,
        stream: StreamKind,
    ) -> Result<GaussianFilter<D::Buffer>, StageError> {
        let key = (kernel.weights().len(), kernel.sigma().to_bits());
        if let Some(filter) = self.state()?.filters.gaussian.get(&key) {
            return Ok(filter.clone());
        }

        let len = kernel.weights().len() as u32;
        let weights = self.device.allocate(len, 1, 1, ElementKind::Float)?;
        self.upload(stream, Extent::new(len, 1), kernel.weights(), &weights)?;

        let filter = GaussianFilter {
            kernel: kernel.clone(),
            weights,
        };
        if let Some(state) = self.state.as_mut() {
            state.filters.gaussian.insert(key, filter.clone());
        }
        tracing::debug!(size = len, sigma = kernel.sigma(), "gaussian filter created");
        Ok(filter)
    }

    /// Morphology operator for `op` with `radius`.
    pub fn morphology(&mut self, op: MorphOp, radius: u32) -> Result<MorphologyFilter, StageError> {
        let state = self.state.as_mut().ok_or(StageError::PoolUninitialized {
            width: 0,
            height: 0,
        })?;
        Ok(*state
            .filters
            .morphology
            .entry((op, radius))
            .or_insert(MorphologyFilter { op, radius }))
    }

    /// Uploads encoded classifier parameters and returns their buffer.
    pub fn key_params(&mut self, values: &[f32], stream: StreamKind) -> Result<D::Buffer, StageError> {
        let buffer = self.state()?.filters.key_params.clone();
        self.upload(stream, Extent::new(values.len() as u32, 1), values, &buffer)?;
        Ok(buffer)
    }
}

impl<D: ComputeDevice> Drop for GpuBufferPool<D> {
    fn drop(&mut self) {
        self.release();
    }
}
