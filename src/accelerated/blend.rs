//! Edge-blend compositing on the device.
//!
//! The segmentation stream builds the boundary rings, the detection stream
//! uploads and blurs the background, and the composition stream assembles
//! the result. Composition waits for the other two streams once, right
//! before it first reads their buffers.

use super::{frame_from_plane, plane};
use crate::compositor::edge_blend::blend_roi;
use crate::compositor::gaussian::{Axis, GaussianKernel};
use crate::compositor::morphology::{threshold, Mask, MorphOp};
use crate::config::BlendConfig;
use crate::device::{BinaryOp, ComputeDevice, Extent, Kernel};
use crate::error::StageError;
use crate::pool::{BufferCategory, GpuBufferPool, StreamKind};
use crate::utils::{crop, paste, validate_matching_dimensions};
use crate::{AlphaMatte, Frame};

fn gaussian_blur<D: ComputeDevice>(
    pool: &mut GpuBufferPool<D>,
    stream: StreamKind,
    extent: Extent,
    src: &D::Buffer,
    weights: &D::Buffer,
) -> Result<D::Buffer, StageError> {
    let pass = pool.next_buffer(BufferCategory::EdgeBlur, stream);
    let dst = pool.next_buffer(BufferCategory::EdgeBlur, stream);
    pool.launch(
        stream,
        extent,
        &Kernel::Gaussian {
            src,
            dst: &pass,
            weights,
            axis: Axis::Horizontal,
        },
    )?;
    pool.launch(
        stream,
        extent,
        &Kernel::Gaussian {
            src: &pass,
            dst: &dst,
            weights,
            axis: Axis::Vertical,
        },
    )?;
    Ok(dst)
}

/// Device counterpart of [`crate::compositor::edge_blend::composite`].
pub fn composite<D: ComputeDevice>(
    pool: &mut GpuBufferPool<D>,
    hard_mask: &Mask,
    alpha: &AlphaMatte,
    subject: &Frame,
    background: &Frame,
    config: &BlendConfig,
) -> Result<Frame, StageError> {
    let dims = background.dimensions();
    validate_matching_dimensions(dims, subject.dimensions())?;
    validate_matching_dimensions(dims, hard_mask.dimensions())?;
    validate_matching_dimensions(dims, alpha.dimensions())?;
    pool.ensure_fits(dims.0, dims.1)?;

    let Some(roi) = blend_roi(&threshold(hard_mask, 127), config) else {
        return Ok(background.clone());
    };
    let extent = Extent::new(roi.width, roi.height);

    // rings
    let seg = StreamKind::Segmentation;
    let erode = pool.morphology(MorphOp::Erode, config.inner_ring)?;
    let dilate = pool.morphology(MorphOp::Dilate, config.outer_ring)?;
    let raw = pool.next_buffer(BufferCategory::Temp, seg);
    let binary = pool.next_buffer(BufferCategory::Temp, seg);
    let interior = pool.next_buffer(BufferCategory::Temp, seg);
    let dilated = pool.next_buffer(BufferCategory::Temp, seg);
    let ring_inner = pool.next_buffer(BufferCategory::Segmentation, seg);
    let ring_outer = pool.next_buffer(BufferCategory::Segmentation, seg);
    let band = pool.next_buffer(BufferCategory::Detection, seg);

    pool.upload(seg, extent, &plane(&crop(hard_mask, roi)), &raw)?;
    pool.launch(
        seg,
        extent,
        &Kernel::Threshold {
            src: &raw,
            dst: &binary,
            threshold: 127.0,
            value: 255.0,
        },
    )?;
    pool.launch(seg, extent, &erode.kernel(&binary, &interior))?;
    pool.launch(seg, extent, &dilate.kernel(&binary, &dilated))?;
    for (op, lhs, rhs, dst) in [
        (BinaryOp::Subtract, &binary, &interior, &ring_inner),
        (BinaryOp::Subtract, &dilated, &binary, &ring_outer),
        (BinaryOp::Max, &ring_inner, &ring_outer, &band),
    ] {
        pool.launch(seg, extent, &Kernel::Binary { op, lhs, rhs, dst })?;
    }

    // background
    let det = StreamKind::Detection;
    let back = pool.next_buffer(BufferCategory::Frame, det);
    let composed = pool.next_buffer(BufferCategory::Frame, det);
    pool.upload(det, extent, &plane(&crop(background, roi)), &back)?;
    pool.launch(
        det,
        extent,
        &Kernel::Affine {
            src: &back,
            dst: &composed,
            scale: 1.0,
            offset: 0.0,
        },
    )?;

    let blur = config.edge_blur && config.edge_blur_radius > 0.0;
    let blurred_back = if blur {
        let filter = pool.gaussian(&GaussianKernel::new(config.edge_blur_sigma()), det)?;
        let blurred = gaussian_blur(pool, det, extent, &back, &filter.weights)?;
        Some((filter, blurred))
    } else {
        None
    };

    // subject and matte
    let comp = StreamKind::Composition;
    let fore = pool.next_buffer(BufferCategory::Frame, comp);
    let matte = pool.next_buffer(BufferCategory::GuidedFilter, comp);
    pool.upload(comp, extent, &plane(&crop(subject, roi)), &fore)?;
    pool.upload(comp, extent, crop(alpha, roi).as_raw(), &matte)?;

    pool.synchronize(det)?;
    pool.synchronize(seg)?;

    pool.launch(
        comp,
        extent,
        &Kernel::MaskedCopy {
            src: &fore,
            mask: &interior,
            dst: &composed,
        },
    )?;
    pool.launch(
        comp,
        extent,
        &Kernel::Unmix {
            subject: &fore,
            background: &back,
            alpha: &matte,
            ring: &ring_inner,
            dst: &composed,
            bias: config.ring_alpha_bias,
            min_alpha: config.min_alpha,
        },
    )?;

    if let Some((filter, blurred_back)) = blurred_back {
        let blurred = gaussian_blur(pool, comp, extent, &composed, &filter.weights)?;
        let mixed = pool.next_buffer(BufferCategory::Frame, comp);
        pool.launch(
            comp,
            extent,
            &Kernel::AddWeighted {
                lhs: &blurred,
                rhs: &blurred_back,
                dst: &mixed,
                lhs_weight: config.subject_weight,
                rhs_weight: 1.0 - config.subject_weight,
            },
        )?;
        pool.launch(
            comp,
            extent,
            &Kernel::MaskedCopy {
                src: &mixed,
                mask: &band,
                dst: &composed,
            },
        )?;
    }

    let data = pool.download(comp, &composed, extent)?;
    let patch = frame_from_plane(roi.width, roi.height, &data)?;
    let mut output = background.clone();
    paste(&mut output, &patch, roi);
    tracing::trace!(?roi, "device edge blend composited");
    Ok(output)
}
