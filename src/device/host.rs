//! In-process reference device.
//!
//! Every kernel runs eagerly on the calling thread (rows in parallel with the
//! `rayon` feature) using the same per-pixel arithmetic as the CPU stages, so
//! the two paths agree exactly on 8-bit outputs.

use super::{
    validate_download, validate_upload, Axis, ComputeDevice, DeviceBuffer, ElementKind, Extent,
    Kernel,
};
use crate::compositor::color::luma;
use crate::compositor::edge_blend::unmix_channel;
use crate::compositor::mask::is_backdrop;
use crate::compositor::morphology::morph_plane;
use crate::compositor::spill::suppress_pixel;
use crate::compositor::thresholds::KeyParams;
use crate::config::MaskMode;
use crate::error::DeviceError;
use crate::utils::{for_each_row, saturate_u8};
use std::sync::{Arc, RwLock};

#[derive(Debug)]
struct HostStorage {
    width: u32,
    height: u32,
    channels: u32,
    kind: ElementKind,
    data: RwLock<Vec<f32>>,
}

/// Shared handle to host memory.
#[derive(Debug, Clone, Default)]
pub struct HostBuffer {
    storage: Option<Arc<HostStorage>>,
}

impl DeviceBuffer for HostBuffer {
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

impl HostBuffer {
    fn storage(&self) -> Result<&HostStorage, DeviceError> {
        self.storage.as_deref().ok_or(DeviceError::PlaceholderBuffer)
    }

    /// Compact `extent` prefix of the buffer.
    fn read(&self, extent: Extent) -> Result<Vec<f32>, DeviceError> {
        let storage = self.storage()?;
        let len = extent.pixels() * storage.channels as usize;
        let data = storage.data.read().map_err(|_| DeviceError::Poisoned)?;
        Ok(data[..len].to_vec())
    }

    fn read_all(&self) -> Result<Vec<f32>, DeviceError> {
        let storage = self.storage()?;
        let data = storage.data.read().map_err(|_| DeviceError::Poisoned)?;
        Ok(data.clone())
    }

    fn write(&self, values: &[f32]) -> Result<(), DeviceError> {
        let storage = self.storage()?;
        let mut data = storage.data.write().map_err(|_| DeviceError::Poisoned)?;
        let dst = &mut data[..values.len()];
        match storage.kind {
            ElementKind::Byte => {
                for (d, &v) in dst.iter_mut().zip(values) {
                    *d = f32::from(saturate_u8(v));
                }
            }
            ElementKind::Float => dst.copy_from_slice(values),
        }
        Ok(())
    }
}

/// Stream of the host device. Work is executed at launch time, so a stream
/// is only a label.
#[derive(Debug, Clone)]
pub struct HostStream {
    label: String,
}

impl HostStream {
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// CPU implementation of [`ComputeDevice`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HostDevice;

impl HostDevice {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[inline]
fn rgb_at(data: &[f32], i: usize) -> [u8; 3] {
    [
        saturate_u8(data[3 * i]),
        saturate_u8(data[3 * i + 1]),
        saturate_u8(data[3 * i + 2]),
    ]
}

/// Maps every pixel of a compact plane with `channels` outputs per pixel.
fn map_pixels<F>(extent: Extent, channels: usize, f: F) -> Vec<f32>
where
    F: Fn(usize, &mut [f32]) + Send + Sync,
{
    let width = extent.width as usize;
    let mut out = vec![0.0; extent.pixels() * channels];
    for_each_row(&mut out, width * channels, |y, row| {
        for (x, px) in row.chunks_exact_mut(channels).enumerate() {
            f(y * width + x, px);
        }
    });
    out
}

fn box_mean(src: &[f32], extent: Extent, channels: usize, radius: u32, axis: Axis) -> Vec<f32> {
    let width = extent.width as usize;
    let height = extent.height as usize;
    let r = radius as usize;
    let mut out = vec![0.0; src.len()];

    match axis {
        Axis::Horizontal => {
            for_each_row(&mut out, width * channels, |y, row| {
                let line = &src[y * width * channels..(y + 1) * width * channels];
                for c in 0..channels {
                    let mut prefix = vec![0.0f64; width + 1];
                    for x in 0..width {
                        prefix[x + 1] = prefix[x] + f64::from(line[x * channels + c]);
                    }
                    for x in 0..width {
                        let x0 = x.saturating_sub(r);
                        let x1 = (x + r).min(width - 1);
                        let sum = prefix[x1 + 1] - prefix[x0];
                        row[x * channels + c] = (sum / (x1 - x0 + 1) as f64) as f32;
                    }
                }
            });
        }
        Axis::Vertical => {
            let stride = width * channels;
            let mut prefix = vec![0.0f64; (height + 1) * stride];
            for y in 0..height {
                for i in 0..stride {
                    prefix[(y + 1) * stride + i] = prefix[y * stride + i] + f64::from(src[y * stride + i]);
                }
            }
            for_each_row(&mut out, stride, |y, row| {
                let y0 = y.saturating_sub(r);
                let y1 = (y + r).min(height - 1);
                let count = (y1 - y0 + 1) as f64;
                for (i, v) in row.iter_mut().enumerate() {
                    let sum = prefix[(y1 + 1) * stride + i] - prefix[y0 * stride + i];
                    *v = (sum / count) as f32;
                }
            });
        }
    }
    out
}

fn gaussian_pass(src: &[f32], extent: Extent, channels: usize, weights: &[f32], axis: Axis) -> Vec<f32> {
    let width = extent.width as usize;
    let height = extent.height as usize;
    let radius = (weights.len() / 2) as isize;
    let mut out = vec![0.0; src.len()];

    for_each_row(&mut out, width * channels, |y, row| {
        for x in 0..width {
            for c in 0..channels {
                let mut acc = 0.0f32;
                for (k, &w) in weights.iter().enumerate() {
                    let offset = k as isize - radius;
                    let (sx, sy) = match axis {
                        Axis::Horizontal => ((x as isize + offset).clamp(0, width as isize - 1) as usize, y),
                        Axis::Vertical => (x, (y as isize + offset).clamp(0, height as isize - 1) as usize),
                    };
                    acc = w.mul_add(src[(sy * width + sx) * channels + c], acc);
                }
                row[x * channels + c] = acc;
            }
        }
    });
    out
}

impl HostDevice {
    fn execute(&self, extent: Extent, kernel: &Kernel<'_, HostBuffer>) -> Result<(), DeviceError> {
        match *kernel {
            Kernel::Grayscale { src, dst, scale } => {
                let s = src.read(extent)?;
                let out = map_pixels(extent, 1, |i, px| {
                    let [r, g, b] = rgb_at(&s, i);
                    px[0] = f32::from(saturate_u8(luma(r, g, b))) * scale;
                });
                dst.write(&out)
            }
            Kernel::Affine {
                src,
                dst,
                scale,
                offset,
            } => {
                let s = src.read(extent)?;
                let out: Vec<f32> = s.iter().map(|v| v.mul_add(scale, offset)).collect();
                dst.write(&out)
            }
            Kernel::Binary { op, lhs, rhs, dst } => {
                let l = lhs.read(extent)?;
                let r = rhs.read(extent)?;
                let out: Vec<f32> = l.iter().zip(&r).map(|(&a, &b)| op.apply(a, b)).collect();
                dst.write(&out)
            }
            Kernel::Threshold {
                src,
                dst,
                threshold,
                value,
            } => {
                let s = src.read(extent)?;
                let out: Vec<f32> = s
                    .iter()
                    .map(|&v| if v > threshold { value } else { 0.0 })
                    .collect();
                dst.write(&out)
            }
            Kernel::BoxMean {
                src,
                dst,
                radius,
                axis,
            } => {
                let s = src.read(extent)?;
                dst.write(&box_mean(&s, extent, src.channels() as usize, radius, axis))
            }
            Kernel::GuidedCoefficients {
                mean_guide,
                mean_input,
                corr_guide,
                corr_cross,
                a,
                b,
                epsilon,
            } => {
                let mg = mean_guide.read(extent)?;
                let mp = mean_input.read(extent)?;
                let cg = corr_guide.read(extent)?;
                let cx = corr_cross.read(extent)?;
                let mut out_a = vec![0.0; mg.len()];
                let mut out_b = vec![0.0; mg.len()];
                for i in 0..mg.len() {
                    let var = mg[i].mul_add(-mg[i], cg[i]);
                    let cov = mg[i].mul_add(-mp[i], cx[i]);
                    let coef = cov / (var + epsilon);
                    out_a[i] = coef;
                    out_b[i] = coef.mul_add(-mg[i], mp[i]);
                }
                a.write(&out_a)?;
                b.write(&out_b)
            }
            Kernel::GuidedOutput {
                mean_a,
                mean_b,
                guide,
                dst,
            } => {
                let ma = mean_a.read(extent)?;
                let mb = mean_b.read(extent)?;
                let g = guide.read(extent)?;
                let out: Vec<f32> = (0..g.len())
                    .map(|i| ma[i].mul_add(g[i], mb[i]).clamp(0.0, 1.0))
                    .collect();
                dst.write(&out)
            }
            Kernel::Morphology {
                src,
                dst,
                op,
                radius,
            } => {
                let s = src.read(extent)?;
                let out = morph_plane(
                    &s,
                    extent.width as usize,
                    extent.height as usize,
                    radius,
                    op,
                );
                dst.write(&out)
            }
            Kernel::Gaussian {
                src,
                dst,
                weights,
                axis,
            } => {
                let s = src.read(extent)?;
                let w = weights.read_all()?;
                dst.write(&gaussian_pass(&s, extent, src.channels() as usize, &w, axis))
            }
            Kernel::ChromaKey {
                src,
                dst,
                red_margin,
                blue_margin,
            } => {
                let s = src.read(extent)?;
                let out = map_pixels(extent, 1, |i, px| {
                    let [r, g, b] = rgb_at(&s, i).map(i32::from);
                    let backdrop = g - r > red_margin && g - b > blue_margin;
                    px[0] = if backdrop { 0.0 } else { 255.0 };
                });
                dst.write(&out)
            }
            Kernel::AdaptiveKey { src, dst, params } => {
                let s = src.read(extent)?;
                let params = KeyParams::from_slice(&params.read_all()?)
                    .ok_or_else(|| DeviceError::Validation("key parameter buffer too small".into()))?;
                let out = map_pixels(extent, 1, |i, px| {
                    let backdrop = is_backdrop(rgb_at(&s, i), &params, MaskMode::Adaptive);
                    px[0] = if backdrop { 0.0 } else { 255.0 };
                });
                dst.write(&out)
            }
            Kernel::SpillSuppress {
                src,
                mask,
                dst,
                hue_min,
                hue_max,
            } => {
                let s = src.read(extent)?;
                let m = mask.read(extent)?;
                let out = map_pixels(extent, 3, |i, px| {
                    let rgb = rgb_at(&s, i);
                    let rgb = if m[i] > 0.0 {
                        suppress_pixel(rgb, hue_min, hue_max)
                    } else {
                        rgb
                    };
                    for (p, v) in px.iter_mut().zip(rgb) {
                        *p = f32::from(v);
                    }
                });
                dst.write(&out)
            }
            Kernel::Lighting {
                src,
                mask,
                dst,
                correction,
            } => {
                let s = src.read(extent)?;
                let m = mask.read(extent)?;
                let out = map_pixels(extent, 3, |i, px| {
                    let rgb = rgb_at(&s, i);
                    let rgb = if m[i] > 0.0 { correction.apply(rgb) } else { rgb };
                    for (p, v) in px.iter_mut().zip(rgb) {
                        *p = f32::from(v);
                    }
                });
                dst.write(&out)
            }
            Kernel::MaskedCopy { src, mask, dst } => {
                let s = src.read(extent)?;
                let m = mask.read(extent)?;
                let mut out = dst.read(extent)?;
                let channels = src.channels() as usize;
                for i in (0..m.len()).filter(|&i| m[i] > 0.0) {
                    out[i * channels..(i + 1) * channels]
                        .copy_from_slice(&s[i * channels..(i + 1) * channels]);
                }
                dst.write(&out)
            }
            Kernel::AddWeighted {
                lhs,
                rhs,
                dst,
                lhs_weight,
                rhs_weight,
            } => {
                let l = lhs.read(extent)?;
                let r = rhs.read(extent)?;
                let out: Vec<f32> = l
                    .iter()
                    .zip(&r)
                    .map(|(&a, &b)| lhs_weight.mul_add(a, rhs_weight * b))
                    .collect();
                dst.write(&out)
            }
            Kernel::Unmix {
                subject,
                background,
                alpha,
                ring,
                dst,
                bias,
                min_alpha,
            } => {
                let s = subject.read(extent)?;
                let b = background.read(extent)?;
                let a = alpha.read(extent)?;
                let m = ring.read(extent)?;
                let mut out = dst.read(extent)?;
                for i in (0..m.len()).filter(|&i| m[i] > 0.0) {
                    for c in 0..3 {
                        let k = 3 * i + c;
                        out[k] = unmix_channel(s[k], b[k], a[i], bias, min_alpha);
                    }
                }
                dst.write(&out)
            }
        }
    }
}

impl ComputeDevice for HostDevice {
    type Buffer = HostBuffer;
    type Stream = HostStream;

    fn name(&self) -> &str {
        "host"
    }

    fn create_stream(&self, label: &str) -> Result<HostStream, DeviceError> {
        Ok(HostStream {
            label: label.to_owned(),
        })
    }

    fn allocate(
        &self,
        width: u32,
        height: u32,
        channels: u32,
        kind: ElementKind,
    ) -> Result<HostBuffer, DeviceError> {
        let len = width as usize * height as usize * channels as usize;
        Ok(HostBuffer {
            storage: Some(Arc::new(HostStorage {
                width,
                height,
                channels,
                kind,
                data: RwLock::new(vec![0.0; len]),
            })),
        })
    }

    fn upload(
        &self,
        _stream: &HostStream,
        extent: Extent,
        data: &[f32],
        dst: &HostBuffer,
    ) -> Result<(), DeviceError> {
        validate_upload(extent, data, dst)?;
        dst.write(data)
    }

    fn launch(
        &self,
        _stream: &HostStream,
        extent: Extent,
        kernel: &Kernel<'_, HostBuffer>,
    ) -> Result<(), DeviceError> {
        kernel.validate(extent)?;
        if extent.is_empty() {
            return Ok(());
        }
        self.execute(extent, kernel)
    }

    fn synchronize(&self, _stream: &HostStream) -> Result<(), DeviceError> {
        Ok(())
    }

    fn download(
        &self,
        _stream: &HostStream,
        src: &HostBuffer,
        extent: Extent,
    ) -> Result<Vec<f32>, DeviceError> {
        validate_download(extent, src)?;
        src.read(extent)
    }
}
