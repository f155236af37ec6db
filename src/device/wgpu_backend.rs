//! wgpu backend.
//!
//! Buffers are `f32` storage buffers. Each stream records command buffers
//! and submits them in order on [`ComputeDevice::synchronize`]; downloads
//! synchronise first, so they are the only point where the host waits.

use super::shaders;
use super::{
    validate_download, validate_upload, Axis, ComputeDevice, DeviceBuffer, ElementKind, Extent,
    Kernel, MorphOp,
};
use crate::compositor::spill::{GREEN_GAIN, OTHER_GAIN, SATURATION_GAIN};
use crate::error::DeviceError;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wgpu::util::DeviceExt;

const WORKGROUP_SIZE: u32 = 256;
const MAX_GROUPS_PER_DIMENSION: u32 = 65_535;

/// Parameter block shared by every shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct KernelUniform {
    dims: [u32; 4],
    flags: [u32; 4],
    values: [f32; 4],
}

#[derive(Debug)]
struct WgpuStorage {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    channels: u32,
    kind: ElementKind,
}

/// Handle to a GPU storage buffer.
#[derive(Debug, Clone, Default)]
pub struct WgpuBuffer {
    storage: Option<Arc<WgpuStorage>>,
}

impl DeviceBuffer for WgpuBuffer {
    fn width(&self) -> u32 {
        self.storage.as_ref().map_or(0, |s| s.width)
    }

    fn height(&self) -> u32 {
        self.storage.as_ref().map_or(0, |s| s.height)
    }

    fn channels(&self) -> u32 {
        self.storage.as_ref().map_or(0, |s| s.channels)
    }

    fn kind(&self) -> ElementKind {
        self.storage.as_ref().map_or(ElementKind::Float, |s| s.kind)
    }

    fn is_placeholder(&self) -> bool {
        self.storage.is_none()
    }

    fn shares_storage(&self, other: &Self) -> bool {
        match (&self.storage, &other.storage) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl WgpuBuffer {
    fn raw(&self) -> Result<&wgpu::Buffer, DeviceError> {
        self.storage
            .as_ref()
            .map(|s| &s.buffer)
            .ok_or(DeviceError::PlaceholderBuffer)
    }
}

/// Ordered list of recorded, not yet submitted command buffers.
#[derive(Debug)]
pub struct WgpuStream {
    label: String,
    pending: Mutex<Vec<wgpu::CommandBuffer>>,
}

impl WgpuStream {
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    fn push(&self, commands: wgpu::CommandBuffer) -> Result<(), DeviceError> {
        self.pending
            .lock()
            .map_err(|_| DeviceError::Poisoned)?
            .push(commands);
        Ok(())
    }
}

/// wgpu implementation of [`ComputeDevice`].
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: HashMap<&'static str, wgpu::ComputePipeline>,
    adapter_name: String,
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("adapter", &self.adapter_name)
            .field("pipelines", &self.pipelines.len())
            .finish_non_exhaustive()
    }
}

impl WgpuDevice {
    /// Check if a compatible adapter exists.
    pub fn is_available() -> bool {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .is_some()
        })
    }

    /// Create a device on the first high-performance adapter.
    pub fn new() -> Result<Self, DeviceError> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(DeviceError::NoAdapter)?;

        let adapter_limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("chroma_composite_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter_limits,
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| DeviceError::DeviceCreation(e.to_string()))?;

        let adapter_name = adapter.get_info().name;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipelines = shaders::ALL
            .iter()
            .map(|&(name, body, color)| (name, create_pipeline(&device, name, body, color)))
            .collect();
        if let Some(error) = device.pop_error_scope().await {
            return Err(DeviceError::DeviceCreation(error.to_string()));
        }

        tracing::info!(adapter = %adapter_name, "wgpu device ready");
        Ok(Self {
            device,
            queue,
            pipelines,
            adapter_name,
        })
    }

    fn pipeline(&self, name: &'static str) -> Result<&wgpu::ComputePipeline, DeviceError> {
        self.pipelines
            .get(name)
            .ok_or_else(|| DeviceError::Validation(format!("no pipeline for kernel {name}")))
    }

    /// Runs `f` inside a validation error scope.
    fn scoped<T>(&self, f: impl FnOnce() -> Result<T, DeviceError>) -> Result<T, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let result = f();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(DeviceError::Validation(error.to_string())),
            None => result,
        }
    }
}

fn create_pipeline(device: &wgpu::Device, name: &str, body: &str, color: bool) -> wgpu::ComputePipeline {
    let source = if color {
        format!("{}{}{}", shaders::PRELUDE, shaders::COLOR, body)
    } else {
        format!("{}{}", shaders::PRELUDE, body)
    };
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(name),
        layout: None, // Auto layout
        module: &module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}

const fn axis_code(axis: Axis) -> u32 {
    match axis {
        Axis::Horizontal => 0,
        Axis::Vertical => 1,
    }
}

/// Builds the parameter block of `kernel` and returns it with the number of
/// invocations to dispatch.
fn uniform_for(kernel: &Kernel<'_, WgpuBuffer>, extent: Extent) -> KernelUniform {
    let pixels = extent.pixels() as u32;
    let first = kernel.inputs().first().map_or(1, |b| b.channels());
    let saturate = kernel
        .outputs()
        .first()
        .map_or(0, |b| u32::from(b.kind() == ElementKind::Byte));

    let mut u = KernelUniform {
        dims: [extent.width, extent.height, first, 0],
        flags: [saturate, 0, 0, pixels],
        values: [0.0; 4],
    };
    let elements = pixels * first;

    match *kernel {
        Kernel::Grayscale { scale, .. } => u.values[0] = scale,
        Kernel::Affine { scale, offset, .. } => {
            u.values = [scale, offset, 0.0, 0.0];
            u.flags[3] = elements;
        }
        Kernel::Binary { op, .. } => {
            u.dims[3] = op.code();
            u.flags[3] = elements;
        }
        Kernel::Threshold {
            threshold, value, ..
        } => u.values = [threshold, value, 0.0, 0.0],
        Kernel::BoxMean { radius, axis, .. } => {
            u.dims[3] = radius;
            u.flags[1] = axis_code(axis);
            u.flags[3] = elements;
        }
        Kernel::GuidedCoefficients { epsilon, .. } => u.values[0] = epsilon,
        Kernel::GuidedOutput { .. } => {}
        Kernel::Morphology { op, radius, .. } => {
            u.dims[3] = radius;
            u.flags[1] = match op {
                MorphOp::Erode => 0,
                MorphOp::Dilate => 1,
            };
        }
        Kernel::Gaussian { weights, axis, .. } => {
            u.dims[3] = weights.width();
            u.flags[1] = axis_code(axis);
            u.flags[3] = elements;
        }
        Kernel::ChromaKey {
            red_margin,
            blue_margin,
            ..
        } => u.values = [red_margin as f32, blue_margin as f32, 0.0, 0.0],
        Kernel::AdaptiveKey { .. } => {
            u.values = [
                crate::compositor::mask::RED_MARGIN as f32,
                crate::compositor::mask::BLUE_MARGIN as f32,
                0.0,
                0.0,
            ];
        }
        Kernel::SpillSuppress {
            hue_min, hue_max, ..
        } => {
            u.flags[1] = u32::from(hue_min);
            u.flags[2] = u32::from(hue_max);
            u.values = [SATURATION_GAIN, GREEN_GAIN, OTHER_GAIN, 0.0];
        }
        Kernel::Lighting { correction, .. } => {
            let (mode, [p0, p1, p2]) = correction.encode();
            u.flags[1] = mode;
            u.values = [p0, p1, p2, 0.0];
        }
        Kernel::MaskedCopy { .. } => u.flags[3] = elements,
        Kernel::AddWeighted {
            lhs_weight,
            rhs_weight,
            ..
        } => {
            u.values = [lhs_weight, rhs_weight, 0.0, 0.0];
            u.flags[3] = elements;
        }
        Kernel::Unmix {
            bias, min_alpha, ..
        } => u.values = [bias, min_alpha, 0.0, 0.0],
    }
    u
}

/// Workgroup counts for `invocations`, spilling into the second dimension.
fn workgroups(invocations: u32) -> (u32, u32) {
    let groups = invocations.div_ceil(WORKGROUP_SIZE).max(1);
    if groups <= MAX_GROUPS_PER_DIMENSION {
        (groups, 1)
    } else {
        (MAX_GROUPS_PER_DIMENSION, groups.div_ceil(MAX_GROUPS_PER_DIMENSION))
    }
}

impl ComputeDevice for WgpuDevice {
    type Buffer = WgpuBuffer;
    type Stream = WgpuStream;

    fn name(&self) -> &str {
        &self.adapter_name
    }

    fn create_stream(&self, label: &str) -> Result<WgpuStream, DeviceError> {
        Ok(WgpuStream {
            label: label.to_owned(),
            pending: Mutex::new(Vec::new()),
        })
    }

    fn allocate(
        &self,
        width: u32,
        height: u32,
        channels: u32,
        kind: ElementKind,
    ) -> Result<WgpuBuffer, DeviceError> {
        // ゼロサイズのバッファは作れないため最低 1 要素確保する
        let size = (u64::from(width) * u64::from(height) * u64::from(channels)).max(1) * 4;
        let buffer = self.scoped(|| {
            Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("pool_buffer"),
                size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }))
        })?;
        Ok(WgpuBuffer {
            storage: Some(Arc::new(WgpuStorage {
                buffer,
                width,
                height,
                channels,
                kind,
            })),
        })
    }

    fn upload(
        &self,
        stream: &WgpuStream,
        extent: Extent,
        data: &[f32],
        dst: &WgpuBuffer,
    ) -> Result<(), DeviceError> {
        validate_upload(extent, data, dst)?;
        if data.is_empty() {
            return Ok(());
        }
        let values: Vec<f32> = match dst.kind() {
            ElementKind::Byte => data
                .iter()
                .map(|&v| f32::from(crate::utils::saturate_u8(v)))
                .collect(),
            ElementKind::Float => data.to_vec(),
        };
        let target = dst.raw()?;

        let commands = self.scoped(|| {
            let staging = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("upload_staging"),
                contents: bytemuck::cast_slice(&values),
                usage: wgpu::BufferUsages::COPY_SRC,
            });
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("upload_encoder"),
                });
            encoder.copy_buffer_to_buffer(&staging, 0, target, 0, (values.len() * 4) as u64);
            Ok(encoder.finish())
        })?;
        stream.push(commands)
    }

    fn launch(
        &self,
        stream: &WgpuStream,
        extent: Extent,
        kernel: &Kernel<'_, WgpuBuffer>,
    ) -> Result<(), DeviceError> {
        kernel.validate(extent)?;
        if extent.is_empty() {
            return Ok(());
        }

        let pipeline = self.pipeline(kernel.name())?;
        let uniform = uniform_for(kernel, extent);
        let (groups_x, groups_y) = workgroups(uniform.flags[3]);

        // inputs, auxiliary, outputs, parameters
        let mut buffers: Vec<&wgpu::Buffer> = Vec::new();
        for b in kernel.inputs() {
            buffers.push(b.raw()?);
        }
        if let Some(aux) = kernel.auxiliary() {
            buffers.push(aux.raw()?);
        }
        for b in kernel.outputs() {
            buffers.push(b.raw()?);
        }

        let commands = self.scoped(|| {
            let params = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("kernel_params"),
                contents: bytemuck::bytes_of(&uniform),
                usage: wgpu::BufferUsages::UNIFORM,
            });

            let mut entries: Vec<wgpu::BindGroupEntry<'_>> = buffers
                .iter()
                .enumerate()
                .map(|(i, b)| wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource: b.as_entire_binding(),
                })
                .collect();
            entries.push(wgpu::BindGroupEntry {
                binding: buffers.len() as u32,
                resource: params.as_entire_binding(),
            });

            let layout = pipeline.get_bind_group_layout(0);
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(kernel.name()),
                layout: &layout,
                entries: &entries,
            });

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(kernel.name()),
                });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(kernel.name()),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups_x, groups_y, 1);
            }
            Ok(encoder.finish())
        })?;
        stream.push(commands)
    }

    fn synchronize(&self, stream: &WgpuStream) -> Result<(), DeviceError> {
        let pending: Vec<wgpu::CommandBuffer> = stream
            .pending
            .lock()
            .map_err(|_| DeviceError::Poisoned)?
            .drain(..)
            .collect();
        if !pending.is_empty() {
            self.queue.submit(pending);
        }
        let _ = self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn download(
        &self,
        stream: &WgpuStream,
        src: &WgpuBuffer,
        extent: Extent,
    ) -> Result<Vec<f32>, DeviceError> {
        validate_download(extent, src)?;
        self.synchronize(stream)?;

        let len = extent.pixels() * src.channels() as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let size = (len * 4) as u64;
        let source = src.raw()?;

        let staging = self.scoped(|| {
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("download_staging"),
                size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });
            let mut encoder = self.device.create_command_encoder(&Default::default());
            encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
            self.queue.submit(std::iter::once(encoder.finish()));
            Ok(staging)
        })?;

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| DeviceError::MapFailed("map channel closed".into()))?
            .map_err(|e| DeviceError::MapFailed(e.to_string()))?;

        let data = slice.get_mapped_range();
        let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroups_spill_into_second_dimension() {
        assert_eq!(workgroups(0), (1, 1));
        assert_eq!(workgroups(256), (1, 1));
        assert_eq!(workgroups(257), (2, 1));
        let (x, y) = workgroups(1920 * 1080 * 16);
        assert_eq!(x, MAX_GROUPS_PER_DIMENSION);
        assert!(u64::from(x) * u64::from(y) * 256 >= 1920 * 1080 * 16);
    }

    #[test]
    fn binary_op_codes_match_the_shader() {
        use crate::device::BinaryOp;
        let codes = [
            BinaryOp::Add,
            BinaryOp::Subtract,
            BinaryOp::Multiply,
            BinaryOp::Divide,
            BinaryOp::Max,
        ]
        .map(BinaryOp::code);
        assert_eq!(codes, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn uniform_is_48_bytes() {
        assert_eq!(std::mem::size_of::<KernelUniform>(), 48);
    }
}
