//! Device implementations of the compositor stages.
//!
//! Every stage borrows its buffers from a [`GpuBufferPool`], launches
//! [`Kernel`](crate::device::Kernel)s on the pool streams and ends with a
//! download. Results match the CPU stages in [`crate::compositor`]; any
//! failure is reported as a [`StageError`](crate::error::StageError) so the
//! caller can fall back.
//!
//! [`GpuBufferPool`]: crate::pool::GpuBufferPool

pub mod blend;
pub mod lighting;
pub mod mask;
pub mod matte;

use crate::error::{DeviceError, StageError};
use crate::{AlphaMatte, Frame, Image};
use image::{ImageBuffer, Luma, Pixel};
use crate::compositor::morphology::Mask;
use crate::utils::saturate_u8;

/// Flattens an 8-bit image into device values.
pub(crate) fn plane<P>(image: &Image<P>) -> Vec<f32>
where
    P: Pixel<Subpixel = u8>,
{
    image.as_raw().iter().map(|&v| f32::from(v)).collect()
}

fn bytes_image<P>(width: u32, height: u32, data: &[f32]) -> Result<Image<P>, StageError>
where
    P: Pixel<Subpixel = u8>,
{
    let bytes: Vec<u8> = data.iter().map(|&v| saturate_u8(v)).collect();
    ImageBuffer::from_raw(width, height, bytes).ok_or_else(|| {
        StageError::Device(DeviceError::Validation(format!(
            "downloaded {} values for a {width}x{height} image",
            data.len()
        )))
    })
}

pub(crate) fn frame_from_plane(width: u32, height: u32, data: &[f32]) -> Result<Frame, StageError> {
    bytes_image(width, height, data)
}

pub(crate) fn mask_from_plane(width: u32, height: u32, data: &[f32]) -> Result<Mask, StageError> {
    bytes_image(width, height, data)
}

pub(crate) fn matte_from_plane(
    width: u32,
    height: u32,
    data: Vec<f32>,
) -> Result<AlphaMatte, StageError> {
    let len = data.len();
    ImageBuffer::<Luma<f32>, _>::from_raw(width, height, data).ok_or_else(|| {
        StageError::Device(DeviceError::Validation(format!(
            "downloaded {len} values for a {width}x{height} matte"
        )))
    })
}
