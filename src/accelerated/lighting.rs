//! Subject lighting correction on the device.

use super::{frame_from_plane, plane};
use crate::compositor::lighting::LightingCorrection;
use crate::compositor::morphology::Mask;
use crate::device::{ComputeDevice, Extent, Kernel};
use crate::error::StageError;
use crate::pool::{BufferCategory, GpuBufferPool, StreamKind};
use crate::utils::{validate_matching_dimensions, validate_non_empty_image};
use crate::Frame;

/// Device counterpart of [`crate::compositor::lighting::correct_lighting`],
/// run on the composition stream.
pub fn correct_lighting<D: ComputeDevice>(
    pool: &mut GpuBufferPool<D>,
    subject: &Frame,
    mask: &Mask,
    correction: LightingCorrection,
) -> Result<Frame, StageError> {
    let (width, height) = subject.dimensions();
    validate_non_empty_image(width, height)?;
    validate_matching_dimensions((width, height), mask.dimensions())?;
    pool.ensure_fits(width, height)?;

    let stream = StreamKind::Composition;
    let extent = Extent::new(width, height);
    let src = pool.next_buffer(BufferCategory::Frame, stream);
    let region = pool.next_buffer(BufferCategory::Temp, stream);
    let dst = pool.next_buffer(BufferCategory::Frame, stream);

    pool.upload(stream, extent, &plane(subject), &src)?;
    pool.upload(stream, extent, &plane(mask), &region)?;
    pool.launch(
        stream,
        extent,
        &Kernel::Lighting {
            src: &src,
            mask: &region,
            dst: &dst,
            correction,
        },
    )?;

    let data = pool.download(stream, &dst, extent)?;
    frame_from_plane(width, height, &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::lighting;
    use crate::device::HostDevice;
    use crate::test_utils::{gradient_frame, rectangle_mask};
    use crate::utils::Rect;
    use std::sync::Arc;

    fn pool(width: u32, height: u32) -> GpuBufferPool<HostDevice> {
        let mut pool = GpuBufferPool::new(Arc::new(HostDevice::new()));
        pool.initialize(width, height).unwrap();
        pool
    }

    #[test]
    fn device_lighting_matches_cpu() {
        let subject = gradient_frame(40, 30);
        let mask = rectangle_mask(40, 30, Rect::new(8, 6, 20, 16));
        let mut pool = pool(40, 30);

        for correction in [
            LightingCorrection::default(),
            LightingCorrection::LabShift([12.5, -3.0, 4.0]),
        ] {
            let cpu = lighting::correct_lighting(&subject, &mask, correction);
            let device = correct_lighting(&mut pool, &subject, &mask, correction).unwrap();
            assert_eq!(cpu, device, "{correction:?}");
        }
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let subject = gradient_frame(16, 16);
        let mask = rectangle_mask(8, 8, Rect::new(2, 2, 4, 4));
        let mut pool = pool(16, 16);
        assert!(correct_lighting(&mut pool, &subject, &mask, LightingCorrection::default()).is_err());
    }
}
