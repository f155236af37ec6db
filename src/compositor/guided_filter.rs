//! ガイデッドフィルタによるアルファマット生成
//!
//! グレースケールのガイド画像 `I` と入力 `P` から局所線形係数
//! `a = cov(I,P) / (var(I) + ε)`、`b = mean(P) − a·mean(I)` を求め、
//! 係数をもう一度ボックス平均して `q = mean(a)·I + mean(b)` を出力します。
//! 窓は `(2 * radius + 1)` 四方です。

use crate::compositor::box_filter::BoxFilter;
use crate::compositor::gaussian::{GaussianBlur, GaussianKernel};
use crate::compositor::morphology::{threshold, BoundaryRings, Mask};
use crate::config::{BlendConfig, MattingConfig};
use crate::error::GuidedFilterError;
use crate::utils::{bounding_box, crop, saturate_u8, Rect};
use crate::{AlphaMatte, Frame, Image};
use image::{ImageBuffer, Luma};
use imageproc::map::{map_colors, map_colors2};

/// 前処理ガウシアンのカーネルサイズ
pub const PRESMOOTH_KERNEL_SIZE: usize = 9;

/// Fixed margin added around the mask bounding box on top of the filter
/// and ring extents.
const ROI_SLACK: u32 = 4;

/// グレースケールガイド付きフィルタ
///
/// ガイドの平均と分散は構築時に一度だけ計算し、複数の入力に再利用できます。
#[derive(Debug, Clone)]
pub struct GuidedFilterGray {
    guidance: Image<Luma<f32>>,
    radius: u32,
    epsilon: f32,
    guidance_mean: Image<Luma<f32>>,
    guidance_var: Image<Luma<f32>>,
}

impl GuidedFilterGray {
    /// ガイド画像から平均と分散を前計算する
    pub fn new(
        guidance: &Image<Luma<f32>>,
        radius: u32,
        epsilon: f32,
    ) -> Result<Self, GuidedFilterError> {
        validate_guided_filter_params(radius, epsilon)?;

        let guidance_mean = guidance.box_filter_square(radius)?;
        let guidance_sq = map_colors(guidance, |p| Luma([p[0] * p[0]]));
        let guidance_sq_mean = guidance_sq.box_filter_square(radius)?;

        // var(I) = E[I²] − E[I]²
        let guidance_var = map_colors2(&guidance_mean, &guidance_sq_mean, |mean_p, sq_mean_p| {
            let mean_val = mean_p[0];
            Luma([mean_val.mul_add(-mean_val, sq_mean_p[0])])
        });

        Ok(Self {
            guidance: guidance.clone(),
            radius,
            epsilon,
            guidance_mean,
            guidance_var,
        })
    }

    /// 入力をフィルタリングし、結果を [0, 1] にクランプして返す
    pub fn filter(&self, input: &Image<Luma<f32>>) -> Result<Image<Luma<f32>>, GuidedFilterError> {
        if input.dimensions() != self.guidance.dimensions() {
            return Err(GuidedFilterError::DimensionMismatch {
                guidance_dims: self.guidance.dimensions(),
                input_dims: input.dimensions(),
            });
        }

        let input_mean = input.box_filter_square(self.radius)?;

        // E[I * p]
        let cross = map_colors2(input, &self.guidance, |p, i| Luma([p[0] * i[0]]));
        let cross_mean = cross.box_filter_square(self.radius)?;

        let (width, height) = input.dimensions();
        let mut a = ImageBuffer::new(width, height);
        let mut b = ImageBuffer::new(width, height);

        for (x, y, a_px) in a.enumerate_pixels_mut() {
            let mean_i = self.guidance_mean.get_pixel(x, y)[0];
            let mean_p = input_mean.get_pixel(x, y)[0];
            let var_i = self.guidance_var.get_pixel(x, y)[0];
            let corr = cross_mean.get_pixel(x, y)[0];

            // cov(I, p) = E[I * p] − E[I] * E[p]
            let cov = mean_i.mul_add(-mean_p, corr);
            let a_val = cov / (var_i + self.epsilon);
            *a_px = Luma([a_val]);
            b.put_pixel(x, y, Luma([a_val.mul_add(-mean_i, mean_p)]));
        }

        let a_mean = a.box_filter_square(self.radius)?;
        let b_mean = b.box_filter_square(self.radius)?;

        Ok(ImageBuffer::from_fn(width, height, |x, y| {
            let i = self.guidance.get_pixel(x, y)[0];
            let q = a_mean.get_pixel(x, y)[0].mul_add(i, b_mean.get_pixel(x, y)[0]);
            Luma([q.clamp(0.0, 1.0)])
        }))
    }
}

pub(crate) fn validate_guided_filter_params(radius: u32, epsilon: f32) -> Result<(), GuidedFilterError> {
    if radius == 0 {
        return Err(GuidedFilterError::InvalidRadius { radius });
    }
    if !(epsilon.is_finite() && epsilon > 0.0) {
        return Err(GuidedFilterError::InvalidEpsilon { epsilon });
    }
    Ok(())
}

/// ガイド画像 `guide` で `input` をフィルタリングする
///
/// どちらも [0, 1] に正規化されている前提で、出力は [0, 1] にクランプされます。
///
/// # エラー
///
/// * `radius` が 0 の場合
/// * `epsilon` が正の有限値でない場合
/// * 画像サイズが一致しない場合
pub fn guided_filter(
    guide: &Image<Luma<f32>>,
    input: &Image<Luma<f32>>,
    radius: u32,
    epsilon: f32,
) -> Result<Image<Luma<f32>>, GuidedFilterError> {
    validate_guided_filter_params(radius, epsilon)?;
    if guide.dimensions() != input.dimensions() {
        return Err(GuidedFilterError::DimensionMismatch {
            guidance_dims: guide.dimensions(),
            input_dims: input.dimensions(),
        });
    }
    GuidedFilterGray::new(guide, radius, epsilon)?.filter(input)
}

/// Region of the frame the matte is computed in: the bounding box of the
/// binarised mask grown by twice the filter radius, the outer ring and a
/// small slack. `None` when the mask is empty.
pub fn matte_roi(binary_mask: &Mask, matting: &MattingConfig, blend: &BlendConfig) -> Option<Rect> {
    let (width, height) = binary_mask.dimensions();
    let margin = 2 * matting.radius + blend.outer_ring + ROI_SLACK;
    bounding_box(binary_mask).map(|bbox| bbox.expand(margin, width, height))
}

/// 8ビットのガイドを丸めたグレースケールにし、[0, 1] へ正規化する
pub fn normalized_gray(guide: &Frame) -> Image<Luma<f32>> {
    map_colors(guide, |p| {
        let gray = saturate_u8(crate::compositor::color::luma(p[0], p[1], p[2]));
        Luma([f32::from(gray) / 255.0])
    })
}

/// Forces the matte to 1 in the interior and 0 outside the dilated mask.
pub(crate) fn pin_matte(alpha: &mut Image<Luma<f32>>, rings: &BoundaryRings) {
    for (x, y, a) in alpha.enumerate_pixels_mut() {
        if rings.interior.get_pixel(x, y)[0] > 0 {
            a[0] = 1.0;
        } else if rings.dilated.get_pixel(x, y)[0] == 0 {
            a[0] = 0.0;
        }
    }
}

/// Places an ROI matte into an otherwise zero frame-sized matte.
pub(crate) fn embed_matte(width: u32, height: u32, roi: Rect, patch: &Image<Luma<f32>>) -> AlphaMatte {
    let mut full = ImageBuffer::new(width, height);
    crate::utils::paste(&mut full, patch, roi);
    full
}

/// ハードマスクからリング限定のアルファマットを計算する
///
/// 1. ガイドをグレースケール化して 255 で割る
/// 2. マスクを 9x9 ガウシアンで前処理して 255 で割る
/// 3. ROI 内でガイデッドフィルタを適用する
/// 4. 内部を 1、膨張マスクの外側を 0 に固定する
///
/// マスクが空の場合は全て 0 のマットを返します。
pub fn matte(
    guide: &Frame,
    hard_mask: &Mask,
    matting: &MattingConfig,
    blend: &BlendConfig,
) -> Result<AlphaMatte, GuidedFilterError> {
    validate_guided_filter_params(matting.radius, matting.epsilon)?;
    if guide.dimensions() != hard_mask.dimensions() {
        return Err(GuidedFilterError::DimensionMismatch {
            guidance_dims: guide.dimensions(),
            input_dims: hard_mask.dimensions(),
        });
    }

    let (width, height) = hard_mask.dimensions();
    let binary = threshold(hard_mask, 127);
    let Some(roi) = matte_roi(&binary, matting, blend) else {
        return Ok(ImageBuffer::new(width, height));
    };

    let guide_roi = normalized_gray(&crop(guide, roi));

    let kernel = GaussianKernel::with_size(PRESMOOTH_KERNEL_SIZE, matting.presmooth_sigma);
    let smoothed = crop(hard_mask, roi).gaussian_blur(&kernel);
    let input_roi = map_colors(&smoothed, |p| Luma([f32::from(p[0]) / 255.0]));

    let mut alpha_roi = guided_filter(&guide_roi, &input_roi, matting.radius, matting.epsilon)?;

    let rings = BoundaryRings::new(&crop(&binary, roi), blend.inner_ring, blend.outer_ring);
    pin_matte(&mut alpha_roi, &rings);

    Ok(embed_matte(width, height, roi, &alpha_roi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{rectangle_mask, variance};
    use image::Rgb;

    fn step_image(width: u32, height: u32) -> Image<Luma<f32>> {
        ImageBuffer::from_fn(width, height, |x, _| Luma([if x < width / 2 { 0.0 } else { 1.0 }]))
    }

    #[test]
    fn rejects_invalid_parameters() {
        let img = step_image(8, 8);
        assert_eq!(
            guided_filter(&img, &img, 0, 0.1).unwrap_err(),
            GuidedFilterError::InvalidRadius { radius: 0 }
        );
        assert!(matches!(
            guided_filter(&img, &img, 2, 0.0),
            Err(GuidedFilterError::InvalidEpsilon { .. })
        ));
        assert!(matches!(
            guided_filter(&img, &img, 2, f32::INFINITY),
            Err(GuidedFilterError::InvalidEpsilon { .. })
        ));
        let other = step_image(9, 8);
        assert!(matches!(
            guided_filter(&img, &other, 2, 0.1),
            Err(GuidedFilterError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn constant_input_is_preserved() {
        let guide = step_image(16, 12);
        let input: Image<Luma<f32>> = ImageBuffer::from_pixel(16, 12, Luma([0.3]));
        let out = guided_filter(&guide, &input, 3, 1e-3).unwrap();
        for p in out.pixels() {
            assert!((p[0] - 0.3).abs() < 1e-4);
        }
    }

    #[test]
    fn small_epsilon_keeps_the_edge() {
        let img = step_image(32, 8);
        let out = guided_filter(&img, &img, 4, 1e-6).unwrap();
        assert!(out.get_pixel(15, 4)[0] < 0.05);
        assert!(out.get_pixel(16, 4)[0] > 0.95);
    }

    #[test]
    fn variance_shrinks_as_epsilon_grows() {
        let img = step_image(40, 10);
        let variances: Vec<f64> = [1e-4_f32, 1e-2, 1.0, 100.0]
            .iter()
            .map(|&eps| variance(&guided_filter(&img, &img, 4, eps).unwrap()))
            .collect();
        for pair in variances.windows(2) {
            assert!(pair[1] < pair[0], "{variances:?}");
        }
    }

    #[test]
    fn empty_mask_gives_zero_matte() {
        let guide: Frame = ImageBuffer::from_pixel(20, 20, Rgb([0, 255, 0]));
        let mask: Mask = ImageBuffer::new(20, 20);
        let alpha = matte(&guide, &mask, &MattingConfig::default(), &BlendConfig::default()).unwrap();
        assert!(alpha.pixels().all(|p| p[0] == 0.0));
    }

    #[test]
    fn matte_is_pinned_inside_and_outside() {
        let mask = rectangle_mask(64, 64, Rect::new(20, 20, 24, 24));
        let guide: Frame = ImageBuffer::from_fn(64, 64, |x, y| {
            if mask.get_pixel(x, y)[0] > 0 {
                Rgb([200, 40, 40])
            } else {
                Rgb([0, 255, 0])
            }
        });
        let matting = MattingConfig::default();
        let blend = BlendConfig::default();
        let alpha = matte(&guide, &mask, &matting, &blend).unwrap();

        assert_eq!(alpha.get_pixel(32, 32)[0], 1.0);
        assert_eq!(alpha.get_pixel(2, 2)[0], 0.0);
        assert_eq!(alpha.get_pixel(20 + 24 + 5, 32)[0], 0.0);
        assert!(alpha.pixels().all(|p| (0.0..=1.0).contains(&p[0])));
    }
}
