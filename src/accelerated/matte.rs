//! デバイス上のガイデッドフィルタとアルファマット
//!
//! マスクの前処理とリングはセグメンテーションストリーム、ガイドと
//! フィルタ本体はコンポジションストリームで実行し、フィルタが前処理済み
//! マスクを読む直前に一度だけ同期します。

use super::{matte_from_plane, plane};
use crate::compositor::gaussian::{Axis, GaussianKernel};
use crate::compositor::guided_filter::{
    embed_matte, matte_roi, validate_guided_filter_params, PRESMOOTH_KERNEL_SIZE,
};
use crate::compositor::morphology::{threshold, Mask, MorphOp};
use crate::config::{BlendConfig, MattingConfig};
use crate::device::{BinaryOp, ComputeDevice, Extent, Kernel};
use crate::error::{GuidedFilterError, StageError};
use crate::pool::{BufferCategory, GpuBufferPool, StreamKind};
use crate::utils::crop;
use crate::{AlphaMatte, Frame, Image};
use image::{ImageBuffer, Luma};

/// 分離可能なボックス平均（横→縦）
fn box_mean<D: ComputeDevice>(
    pool: &mut GpuBufferPool<D>,
    stream: StreamKind,
    extent: Extent,
    src: &D::Buffer,
    radius: u32,
) -> Result<D::Buffer, StageError> {
    let pass = pool.next_buffer(BufferCategory::BoxFilter, stream);
    let dst = pool.next_buffer(BufferCategory::GuidedFilter, stream);
    pool.launch(
        stream,
        extent,
        &Kernel::BoxMean {
            src,
            dst: &pass,
            radius,
            axis: Axis::Horizontal,
        },
    )?;
    pool.launch(
        stream,
        extent,
        &Kernel::BoxMean {
            src: &pass,
            dst: &dst,
            radius,
            axis: Axis::Vertical,
        },
    )?;
    Ok(dst)
}

/// Guided filter over two float planes already on the device.
///
/// Hands out eleven guided-filter slots and returns the last one.
fn filter_planes<D: ComputeDevice>(
    pool: &mut GpuBufferPool<D>,
    stream: StreamKind,
    extent: Extent,
    guide: &D::Buffer,
    input: &D::Buffer,
    radius: u32,
    epsilon: f32,
) -> Result<D::Buffer, StageError> {
    let guide_sq = pool.next_buffer(BufferCategory::GuidedFilter, stream);
    let cross = pool.next_buffer(BufferCategory::GuidedFilter, stream);
    pool.launch(
        stream,
        extent,
        &Kernel::Binary {
            op: BinaryOp::Multiply,
            lhs: guide,
            rhs: guide,
            dst: &guide_sq,
        },
    )?;
    pool.launch(
        stream,
        extent,
        &Kernel::Binary {
            op: BinaryOp::Multiply,
            lhs: guide,
            rhs: input,
            dst: &cross,
        },
    )?;

    let mean_guide = box_mean(pool, stream, extent, guide, radius)?;
    let mean_input = box_mean(pool, stream, extent, input, radius)?;
    let corr_guide = box_mean(pool, stream, extent, &guide_sq, radius)?;
    let corr_cross = box_mean(pool, stream, extent, &cross, radius)?;

    let a = pool.next_buffer(BufferCategory::GuidedFilter, stream);
    let b = pool.next_buffer(BufferCategory::GuidedFilter, stream);
    pool.launch(
        stream,
        extent,
        &Kernel::GuidedCoefficients {
            mean_guide: &mean_guide,
            mean_input: &mean_input,
            corr_guide: &corr_guide,
            corr_cross: &corr_cross,
            a: &a,
            b: &b,
            epsilon,
        },
    )?;

    let mean_a = box_mean(pool, stream, extent, &a, radius)?;
    let mean_b = box_mean(pool, stream, extent, &b, radius)?;

    let output = pool.next_buffer(BufferCategory::GuidedFilter, stream);
    pool.launch(
        stream,
        extent,
        &Kernel::GuidedOutput {
            mean_a: &mean_a,
            mean_b: &mean_b,
            guide,
            dst: &output,
        },
    )?;
    Ok(output)
}

/// ガイド画像 `guide` で `input` をデバイス上でフィルタリングする
///
/// [`crate::compositor::guided_filter::guided_filter`] と同じ式・同じ
/// 境界処理で、結果は [0, 1] にクランプされます。
pub fn guided_filter<D: ComputeDevice>(
    pool: &mut GpuBufferPool<D>,
    guide: &Image<Luma<f32>>,
    input: &Image<Luma<f32>>,
    radius: u32,
    epsilon: f32,
) -> Result<Image<Luma<f32>>, StageError> {
    validate_guided_filter_params(radius, epsilon)?;
    if guide.dimensions() != input.dimensions() {
        return Err(GuidedFilterError::DimensionMismatch {
            guidance_dims: guide.dimensions(),
            input_dims: input.dimensions(),
        }
        .into());
    }
    let (width, height) = guide.dimensions();
    if width == 0 || height == 0 {
        return Ok(ImageBuffer::new(width, height));
    }
    pool.ensure_fits(width, height)?;

    let stream = StreamKind::Composition;
    let extent = Extent::new(width, height);
    let guide_buffer = pool.next_buffer(BufferCategory::GuidedFilter, stream);
    let input_buffer = pool.next_buffer(BufferCategory::GuidedFilter, stream);
    pool.upload(stream, extent, guide.as_raw(), &guide_buffer)?;
    pool.upload(stream, extent, input.as_raw(), &input_buffer)?;

    let output = filter_planes(
        pool,
        stream,
        extent,
        &guide_buffer,
        &input_buffer,
        radius,
        epsilon,
    )?;
    let data = pool.download(stream, &output, extent)?;
    matte_from_plane(width, height, data)
}

/// [`crate::compositor::guided_filter::matte`] のデバイス版
///
/// ROI の外側は 0 のままです。
pub fn matte<D: ComputeDevice>(
    pool: &mut GpuBufferPool<D>,
    guide: &Frame,
    hard_mask: &Mask,
    matting: &MattingConfig,
    blend: &BlendConfig,
) -> Result<AlphaMatte, StageError> {
    validate_guided_filter_params(matting.radius, matting.epsilon)?;
    if guide.dimensions() != hard_mask.dimensions() {
        return Err(GuidedFilterError::DimensionMismatch {
            guidance_dims: guide.dimensions(),
            input_dims: hard_mask.dimensions(),
        }
        .into());
    }

    let (width, height) = hard_mask.dimensions();
    pool.ensure_fits(width, height)?;
    let Some(roi) = matte_roi(&threshold(hard_mask, 127), matting, blend) else {
        return Ok(ImageBuffer::new(width, height));
    };
    let extent = Extent::new(roi.width, roi.height);

    // セグメンテーション: 前処理とリング
    let seg = StreamKind::Segmentation;
    let presmooth = pool.gaussian(
        &GaussianKernel::with_size(PRESMOOTH_KERNEL_SIZE, matting.presmooth_sigma),
        seg,
    )?;
    let erode = pool.morphology(MorphOp::Erode, blend.inner_ring)?;
    let dilate = pool.morphology(MorphOp::Dilate, blend.outer_ring)?;

    let raw = pool.next_buffer(BufferCategory::Temp, seg);
    let pass = pool.next_buffer(BufferCategory::Temp, seg);
    let smoothed = pool.next_buffer(BufferCategory::Temp, seg);
    let binary = pool.next_buffer(BufferCategory::Temp, seg);
    let interior = pool.next_buffer(BufferCategory::Segmentation, seg);
    let dilated = pool.next_buffer(BufferCategory::Segmentation, seg);
    let input = pool.next_buffer(BufferCategory::GuidedFilter, seg);
    let interior_unit = pool.next_buffer(BufferCategory::GuidedFilter, seg);
    let dilated_unit = pool.next_buffer(BufferCategory::GuidedFilter, seg);

    pool.upload(seg, extent, &plane(&crop(hard_mask, roi)), &raw)?;
    for (src, dst, axis) in [
        (&raw, &pass, Axis::Horizontal),
        (&pass, &smoothed, Axis::Vertical),
    ] {
        pool.launch(
            seg,
            extent,
            &Kernel::Gaussian {
                src,
                dst,
                weights: &presmooth.weights,
                axis,
            },
        )?;
    }
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
    for (src, dst) in [
        (&smoothed, &input),
        (&interior, &interior_unit),
        (&dilated, &dilated_unit),
    ] {
        pool.launch(
            seg,
            extent,
            &Kernel::Affine {
                src,
                dst,
                scale: 1.0 / 255.0,
                offset: 0.0,
            },
        )?;
    }

    // コンポジション: ガイドの正規化
    let comp = StreamKind::Composition;
    let rgb = pool.next_buffer(BufferCategory::Frame, comp);
    let gray = pool.next_buffer(BufferCategory::GuidedFilter, comp);
    pool.upload(comp, extent, &plane(&crop(guide, roi)), &rgb)?;
    pool.launch(
        comp,
        extent,
        &Kernel::Grayscale {
            src: &rgb,
            dst: &gray,
            scale: 1.0 / 255.0,
        },
    )?;

    pool.synchronize(seg)?;

    let filtered = filter_planes(
        pool,
        comp,
        extent,
        &gray,
        &input,
        matting.radius,
        matting.epsilon,
    )?;

    // alpha = max(q * dilated, interior): 1 in the interior, 0 outside the
    // dilated mask. The second slot wraps onto `input`, whose readers are
    // already queued on this stream.
    let gated = pool.next_buffer(BufferCategory::GuidedFilter, comp);
    let alpha = pool.next_buffer(BufferCategory::GuidedFilter, comp);
    pool.launch(
        comp,
        extent,
        &Kernel::Binary {
            op: BinaryOp::Multiply,
            lhs: &filtered,
            rhs: &dilated_unit,
            dst: &gated,
        },
    )?;
    pool.launch(
        comp,
        extent,
        &Kernel::Binary {
            op: BinaryOp::Max,
            lhs: &gated,
            rhs: &interior_unit,
            dst: &alpha,
        },
    )?;

    let data = pool.download(comp, &alpha, extent)?;
    let patch = matte_from_plane(roi.width, roi.height, data)?;
    tracing::trace!(?roi, "device matte computed");
    Ok(embed_matte(width, height, roi, &patch))
}
