//! Mask extraction and spill suppression on the device.

use super::{frame_from_plane, mask_from_plane, plane};
use crate::compositor::mask::{BLUE_MARGIN, CLEANUP_RADIUS, RED_MARGIN};
use crate::compositor::morphology::{Mask, MorphOp};
use crate::compositor::thresholds::KeyParams;
use crate::config::MaskMode;
use crate::device::{ComputeDevice, Extent, Kernel};
use crate::error::StageError;
use crate::pool::{BufferCategory, GpuBufferPool, StreamKind};
use crate::utils::{validate_matching_dimensions, validate_non_empty_image};
use crate::Frame;

/// Device counterpart of [`crate::compositor::mask::extract_mask`], run on
/// the detection stream.
pub fn extract_mask<D: ComputeDevice>(
    pool: &mut GpuBufferPool<D>,
    frame: &Frame,
    params: &KeyParams,
    mode: MaskMode,
    cleanup: bool,
) -> Result<Mask, StageError> {
    let (width, height) = frame.dimensions();
    validate_non_empty_image(width, height)?;
    pool.ensure_fits(width, height)?;

    let stream = StreamKind::Detection;
    let extent = Extent::new(width, height);
    let src = pool.next_buffer(BufferCategory::Frame, stream);
    let raw = pool.next_buffer(BufferCategory::Segmentation, stream);
    pool.upload(stream, extent, &plane(frame), &src)?;

    match mode {
        MaskMode::DominanceHeuristic => pool.launch(
            stream,
            extent,
            &Kernel::ChromaKey {
                src: &src,
                dst: &raw,
                red_margin: RED_MARGIN,
                blue_margin: BLUE_MARGIN,
            },
        )?,
        MaskMode::Adaptive => {
            let key = pool.key_params(params.as_slice(), stream)?;
            pool.launch(
                stream,
                extent,
                &Kernel::AdaptiveKey {
                    src: &src,
                    dst: &raw,
                    params: &key,
                },
            )?;
        }
    }

    let result = if cleanup {
        let erode = pool.morphology(MorphOp::Erode, CLEANUP_RADIUS)?;
        let dilate = pool.morphology(MorphOp::Dilate, CLEANUP_RADIUS)?;
        let opened_half = pool.next_buffer(BufferCategory::Temp, stream);
        let opened = pool.next_buffer(BufferCategory::Temp, stream);
        let closed_half = pool.next_buffer(BufferCategory::Temp, stream);
        let closed = pool.next_buffer(BufferCategory::Temp, stream);

        pool.launch(stream, extent, &erode.kernel(&raw, &opened_half))?;
        pool.launch(stream, extent, &dilate.kernel(&opened_half, &opened))?;
        pool.launch(stream, extent, &dilate.kernel(&opened, &closed_half))?;
        pool.launch(stream, extent, &erode.kernel(&closed_half, &closed))?;
        closed
    } else {
        raw
    };

    let data = pool.download(stream, &result, extent)?;
    mask_from_plane(width, height, &data)
}

/// Device counterpart of [`crate::compositor::spill::suppress_spill`], run
/// on the composition stream.
pub fn suppress_spill<D: ComputeDevice>(
    pool: &mut GpuBufferPool<D>,
    frame: &Frame,
    mask: &Mask,
    hue_min: u8,
    hue_max: u8,
) -> Result<Frame, StageError> {
    let (width, height) = frame.dimensions();
    validate_non_empty_image(width, height)?;
    validate_matching_dimensions((width, height), mask.dimensions())?;
    pool.ensure_fits(width, height)?;

    let stream = StreamKind::Composition;
    let extent = Extent::new(width, height);
    let src = pool.next_buffer(BufferCategory::Frame, stream);
    let subject = pool.next_buffer(BufferCategory::Temp, stream);
    let dst = pool.next_buffer(BufferCategory::Frame, stream);

    pool.upload(stream, extent, &plane(frame), &src)?;
    pool.upload(stream, extent, &plane(mask), &subject)?;
    pool.launch(
        stream,
        extent,
        &Kernel::SpillSuppress {
            src: &src,
            mask: &subject,
            dst: &dst,
            hue_min,
            hue_max,
        },
    )?;

    let data = pool.download(stream, &dst, extent)?;
    frame_from_plane(width, height, &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::background_model::BackgroundColorModel;
    use crate::compositor::thresholds::derive_thresholds;
    use crate::compositor::{mask, spill};
    use crate::config::KeyConfig;
    use crate::device::HostDevice;
    use crate::test_utils::{gradient_frame, rectangle_frame};
    use crate::utils::Rect;
    use image::Rgb;
    use std::sync::Arc;

    fn pool(width: u32, height: u32) -> GpuBufferPool<HostDevice> {
        let mut pool = GpuBufferPool::new(Arc::new(HostDevice::new()));
        pool.initialize(width, height).unwrap();
        pool
    }

    fn params(frame: &Frame) -> KeyParams {
        let mut model = BackgroundColorModel::new();
        model.update(frame);
        KeyParams::new(&derive_thresholds(&model, &KeyConfig::default()), &model)
    }

    #[test]
    fn device_mask_matches_cpu_in_both_modes() {
        let frame = rectangle_frame(64, 48, Rect::new(20, 12, 24, 20), Rgb([200, 40, 60]));
        let params = params(&frame);
        let mut pool = pool(64, 48);

        for mode in [MaskMode::DominanceHeuristic, MaskMode::Adaptive] {
            for cleanup in [false, true] {
                let cpu = mask::extract_mask(&frame, &params, mode, cleanup);
                let device = extract_mask(&mut pool, &frame, &params, mode, cleanup).unwrap();
                assert_eq!(cpu, device, "mode {mode:?}, cleanup {cleanup}");
            }
        }
    }

    #[test]
    fn device_spill_matches_cpu() {
        let frame = gradient_frame(40, 30);
        let mask = mask::extract_mask(&frame, &params(&frame), MaskMode::DominanceHeuristic, false);
        let mut pool = pool(40, 30);

        let cpu = spill::suppress_spill(&frame, &mask, 35, 85);
        let device = suppress_spill(&mut pool, &frame, &mask, 35, 85).unwrap();
        assert_eq!(cpu, device);
    }

    #[test]
    fn uninitialised_pool_is_reported() {
        let frame = rectangle_frame(8, 8, Rect::new(2, 2, 4, 4), Rgb([255, 0, 0]));
        let mut pool = GpuBufferPool::new(Arc::new(HostDevice::new()));
        let err = extract_mask(
            &mut pool,
            &frame,
            &params(&frame),
            MaskMode::DominanceHeuristic,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, StageError::PoolUninitialized { width: 8, height: 8 }));
    }

    #[test]
    fn frames_larger_than_the_pool_are_rejected() {
        let frame = rectangle_frame(16, 16, Rect::new(2, 2, 4, 4), Rgb([255, 0, 0]));
        let mut pool = pool(8, 8);
        assert!(extract_mask(
            &mut pool,
            &frame,
            &params(&frame),
            MaskMode::DominanceHeuristic,
            false
        )
        .is_err());
    }
}
