//! Backdrop color model estimated from the frame border.
//!
//! Four strips along the frame edges are assumed to show the backdrop most of
//! the time. Their HSV, chroma and RGB statistics are smoothed exponentially
//! across frames so a subject briefly covering the border cannot drag the
//! model away.

use crate::compositor::color::{rgb_to_hsv, rgb_to_ycrcb, HUE_RANGE};
use crate::Frame;
use std::f64::consts::TAU;

/// Weight kept from the previous estimate on every accepted update.
pub const HISTORY_WEIGHT: f32 = 0.85;

/// Diagonal regularisation added to the RGB covariance before inversion.
pub const COVARIANCE_EPSILON: f64 = 1e-3;

const MIN_BORDER: u32 = 6;
const BORDER_DIVISOR: u32 = 24;

/// Mean and standard deviation of the backdrop color.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ColorStatistics {
    /// Circular mean in 8-bit hue units (`0..180`)
    pub hue_mean: f32,
    pub hue_std: f32,
    pub sat_mean: f32,
    pub sat_std: f32,
    pub val_mean: f32,
    pub val_std: f32,
    pub cb_mean: f32,
    pub cb_std: f32,
    pub cr_mean: f32,
    pub cr_std: f32,
    /// `[r, g, b]`
    pub rgb_mean: [f32; 3],
    /// `[r, g, b]`
    pub rgb_std: [f32; 3],
}

/// 3x3 matrix over `[r, g, b]`.
pub type Matrix3 = [[f32; 3]; 3];

/// Exponentially smoothed backdrop statistics.
#[derive(Debug, Clone, Default)]
pub struct BackgroundColorModel {
    stats: ColorStatistics,
    inverse_covariance: Option<Matrix3>,
    initialized: bool,
    frames_observed: u64,
}

impl BackgroundColorModel {
    /// Uninitialised model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialised model seeded with explicit statistics. The inverse
    /// covariance stays unset until the first accepted update.
    #[must_use]
    pub fn from_statistics(stats: ColorStatistics) -> Self {
        Self {
            stats,
            inverse_covariance: None,
            initialized: true,
            frames_observed: 0,
        }
    }

    #[must_use]
    pub const fn statistics(&self) -> &ColorStatistics {
        &self.stats
    }

    /// Inverse of the regularised RGB covariance, once one has been computed.
    #[must_use]
    pub const fn inverse_covariance(&self) -> Option<&Matrix3> {
        self.inverse_covariance.as_ref()
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of frames accepted by [`update`](Self::update).
    #[must_use]
    pub const fn frames_observed(&self) -> u64 {
        self.frames_observed
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Mahalanobis distance of `rgb` from the model mean, when the inverse
    /// covariance is available.
    #[must_use]
    pub fn mahalanobis(&self, rgb: [u8; 3]) -> Option<f32> {
        let inv = self.inverse_covariance.as_ref()?;
        let d = [
            f32::from(rgb[0]) - self.stats.rgb_mean[0],
            f32::from(rgb[1]) - self.stats.rgb_mean[1],
            f32::from(rgb[2]) - self.stats.rgb_mean[2],
        ];
        Some(quadratic_form(inv, d).max(0.0).sqrt())
    }

    /// Samples the frame border and folds its statistics into the model.
    ///
    /// Returns `false` when the frame was skipped because it is empty or the
    /// border holds fewer than `rows + cols` pixels.
    pub fn update(&mut self, frame: &Frame) -> bool {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return false;
        }

        let border_x = (width / BORDER_DIVISOR).max(MIN_BORDER).min(width);
        let border_y = (height / BORDER_DIVISOR).max(MIN_BORDER).min(height);

        let mut acc = Accumulator::default();
        for (x, y, p) in frame.enumerate_pixels() {
            let in_border = x < border_x
                || x >= width - border_x
                || y < border_y
                || y >= height - border_y;
            if in_border {
                acc.push(p.0);
            }
        }

        if acc.count < u64::from(width) + u64::from(height) {
            tracing::debug!(
                samples = acc.count,
                width,
                height,
                "background model skipped frame with too few border samples"
            );
            return false;
        }

        let measured = acc.statistics();

        if acc.count > 3 {
            match invert3(&acc.covariance()) {
                Some(inv) => self.inverse_covariance = Some(inv),
                None => tracing::warn!("background covariance is singular, keeping previous inverse"),
            }
        }

        if self.initialized {
            self.stats = blend_statistics(&self.stats, &measured);
        } else {
            self.stats = measured;
            self.initialized = true;
        }
        self.frames_observed += 1;

        tracing::debug!(
            frames = self.frames_observed,
            hue = self.stats.hue_mean,
            sat = self.stats.sat_mean,
            val = self.stats.val_mean,
            "background model updated"
        );
        true
    }
}

fn blend(old: f32, new: f32) -> f32 {
    HISTORY_WEIGHT.mul_add(old, (1.0 - HISTORY_WEIGHT) * new)
}

/// Signed shortest step from `from` to `to` on the hue circle.
fn hue_delta(from: f32, to: f32) -> f32 {
    let half = HUE_RANGE / 2.0;
    (to - from + half).rem_euclid(HUE_RANGE) - half
}

fn blend_statistics(old: &ColorStatistics, new: &ColorStatistics) -> ColorStatistics {
    let hue_mean = (1.0 - HISTORY_WEIGHT)
        .mul_add(hue_delta(old.hue_mean, new.hue_mean), old.hue_mean)
        .rem_euclid(HUE_RANGE);

    ColorStatistics {
        hue_mean,
        hue_std: blend(old.hue_std, new.hue_std),
        sat_mean: blend(old.sat_mean, new.sat_mean),
        sat_std: blend(old.sat_std, new.sat_std),
        val_mean: blend(old.val_mean, new.val_mean),
        val_std: blend(old.val_std, new.val_std),
        cb_mean: blend(old.cb_mean, new.cb_mean),
        cb_std: blend(old.cb_std, new.cb_std),
        cr_mean: blend(old.cr_mean, new.cr_mean),
        cr_std: blend(old.cr_std, new.cr_std),
        rgb_mean: std::array::from_fn(|c| blend(old.rgb_mean[c], new.rgb_mean[c])),
        rgb_std: std::array::from_fn(|c| blend(old.rgb_std[c], new.rgb_std[c])),
    }
}

/// Running sums over the sampled border pixels.
#[derive(Default)]
struct Accumulator {
    count: u64,
    hue_sin: f64,
    hue_cos: f64,
    hues: Vec<f32>,
    sat: Moments,
    val: Moments,
    cb: Moments,
    cr: Moments,
    rgb: [Moments; 3],
    cross: [[f64; 3]; 3],
}

#[derive(Default, Clone, Copy)]
struct Moments {
    sum: f64,
    sum_sq: f64,
}

impl Moments {
    fn push(&mut self, v: f64) {
        self.sum += v;
        self.sum_sq += v * v;
    }

    fn mean(&self, n: f64) -> f64 {
        self.sum / n
    }

    fn std(&self, n: f64) -> f64 {
        let mean = self.mean(n);
        (self.sum_sq / n - mean * mean).max(0.0).sqrt()
    }
}

impl Accumulator {
    fn push(&mut self, rgb: [u8; 3]) {
        let [r, g, b] = rgb;
        let [h, s, v] = rgb_to_hsv(r, g, b);
        let [_, cr, cb] = rgb_to_ycrcb(r, g, b);

        let angle = f64::from(h) * TAU / f64::from(HUE_RANGE);
        self.hue_sin += angle.sin();
        self.hue_cos += angle.cos();
        self.hues.push(f32::from(h));

        self.sat.push(f64::from(s));
        self.val.push(f64::from(v));
        self.cb.push(f64::from(cb));
        self.cr.push(f64::from(cr));

        let values = rgb.map(f64::from);
        for (i, &vi) in values.iter().enumerate() {
            self.rgb[i].push(vi);
            for (j, &vj) in values.iter().enumerate() {
                self.cross[i][j] += vi * vj;
            }
        }
        self.count += 1;
    }

    fn hue_mean(&self) -> f32 {
        if self.hue_sin.abs() < 1e-9 && self.hue_cos.abs() < 1e-9 {
            return 0.0;
        }
        let angle = self.hue_sin.atan2(self.hue_cos).rem_euclid(TAU);
        (angle * f64::from(HUE_RANGE) / TAU) as f32
    }

    fn statistics(&self) -> ColorStatistics {
        let n = self.count as f64;
        let hue_mean = self.hue_mean();
        let hue_var = self
            .hues
            .iter()
            .map(|&h| f64::from(hue_delta(hue_mean, h)).powi(2))
            .sum::<f64>()
            / n;

        // 標準偏差の下限: HSV と CbCr は 1、RGB は 4
        let floor1 = |s: f64| s.max(1.0) as f32;
        let floor4 = |s: f64| s.max(4.0) as f32;

        ColorStatistics {
            hue_mean,
            hue_std: floor1(hue_var.sqrt()),
            sat_mean: self.sat.mean(n) as f32,
            sat_std: floor1(self.sat.std(n)),
            val_mean: self.val.mean(n) as f32,
            val_std: floor1(self.val.std(n)),
            cb_mean: self.cb.mean(n) as f32,
            cb_std: floor1(self.cb.std(n)),
            cr_mean: self.cr.mean(n) as f32,
            cr_std: floor1(self.cr.std(n)),
            rgb_mean: std::array::from_fn(|c| self.rgb[c].mean(n) as f32),
            rgb_std: std::array::from_fn(|c| floor4(self.rgb[c].std(n))),
        }
    }

    /// Population covariance with the diagonal regulariser applied.
    fn covariance(&self) -> [[f64; 3]; 3] {
        let n = self.count as f64;
        let means: [f64; 3] = std::array::from_fn(|c| self.rgb[c].mean(n));
        std::array::from_fn(|i| {
            std::array::from_fn(|j| {
                let cov = self.cross[i][j] / n - means[i] * means[j];
                if i == j {
                    cov + COVARIANCE_EPSILON
                } else {
                    cov
                }
            })
        })
    }
}

/// Cofactor inverse of a 3x3 matrix, `None` when it is singular.
pub(crate) fn invert3(m: &[[f64; 3]; 3]) -> Option<Matrix3> {
    let c00 = m[1][1] * m[2][2] - m[1][2] * m[2][1];
    let c01 = m[1][2] * m[2][0] - m[1][0] * m[2][2];
    let c02 = m[1][0] * m[2][1] - m[1][1] * m[2][0];
    let det = m[0][0] * c00 + m[0][1] * c01 + m[0][2] * c02;
    if !det.is_finite() || det.abs() < f64::MIN_POSITIVE {
        return None;
    }

    let inv_det = 1.0 / det;
    let adj = [
        [
            c00,
            m[0][2] * m[2][1] - m[0][1] * m[2][2],
            m[0][1] * m[1][2] - m[0][2] * m[1][1],
        ],
        [
            c01,
            m[0][0] * m[2][2] - m[0][2] * m[2][0],
            m[0][2] * m[1][0] - m[0][0] * m[1][2],
        ],
        [
            c02,
            m[0][1] * m[2][0] - m[0][0] * m[2][1],
            m[0][0] * m[1][1] - m[0][1] * m[1][0],
        ],
    ];
    let inv: Matrix3 = std::array::from_fn(|i| std::array::from_fn(|j| (adj[i][j] * inv_det) as f32));
    inv.iter().flatten().all(|v| v.is_finite()).then_some(inv)
}

/// `dᵀ·M·d`
pub(crate) fn quadratic_form(m: &Matrix3, d: [f32; 3]) -> f32 {
    let mut acc = 0.0;
    for i in 0..3 {
        for j in 0..3 {
            acc = (d[i] * m[i][j]).mul_add(d[j], acc);
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{green_frame, rectangle_frame};
    use crate::utils::Rect;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn uniform_green_frame_initialises_model() {
        let mut model = BackgroundColorModel::new();
        assert!(!model.is_initialized());
        assert!(model.update(&green_frame(64, 48)));

        let stats = model.statistics();
        assert!((stats.hue_mean - 60.0).abs() < 1e-3);
        assert_eq!(stats.sat_mean, 255.0);
        assert_eq!(stats.val_mean, 255.0);
        assert_eq!(stats.rgb_mean, [0.0, 255.0, 0.0]);
        assert_eq!(stats.hue_std, 1.0);
        assert_eq!(stats.rgb_std, [4.0, 4.0, 4.0]);
        assert_eq!(model.frames_observed(), 1);

        let inv = model.inverse_covariance().unwrap();
        assert!((inv[0][0] - 1000.0).abs() < 1.0);
        assert!(inv[0][1].abs() < 1e-3);
    }

    #[test]
    fn tiny_and_empty_frames_are_skipped() {
        let mut model = BackgroundColorModel::new();
        assert!(!model.update(&ImageBuffer::new(0, 0)));
        assert!(!model.update(&ImageBuffer::from_pixel(1, 1, Rgb([0, 255, 0]))));
        assert!(!model.is_initialized());
    }

    #[test]
    fn updates_blend_with_history() {
        let mut model = BackgroundColorModel::new();
        model.update(&ImageBuffer::from_pixel(48, 48, Rgb([0, 200, 0])));
        model.update(&ImageBuffer::from_pixel(48, 48, Rgb([0, 100, 0])));
        let g = model.statistics().rgb_mean[1];
        assert!((g - 185.0).abs() < 1e-3, "{g}");
    }

    #[test]
    fn subject_in_centre_does_not_reach_the_border() {
        let mut model = BackgroundColorModel::new();
        let frame = rectangle_frame(96, 96, Rect::new(30, 30, 36, 36), Rgb([255, 0, 0]));
        model.update(&frame);
        assert_eq!(model.statistics().rgb_mean, [0.0, 255.0, 0.0]);
    }

    #[test]
    fn hue_mean_wraps_around_red() {
        let frame: Frame = ImageBuffer::from_fn(48, 48, |x, _| {
            if x % 2 == 0 {
                Rgb([255, 0, 10])
            } else {
                Rgb([255, 10, 0])
            }
        });
        let mut model = BackgroundColorModel::new();
        model.update(&frame);
        let stats = model.statistics();
        assert!(stats.hue_mean < 3.0 || stats.hue_mean > 177.0, "{}", stats.hue_mean);
        assert!(stats.hue_std < 5.0);
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        let m = [[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 1.0, 1.0]];
        assert!(invert3(&m).is_none());
        let id = invert3(&[[2.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 5.0]]).unwrap();
        assert!((id[1][1] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn mahalanobis_needs_covariance() {
        let model = BackgroundColorModel::from_statistics(ColorStatistics::default());
        assert!(model.is_initialized());
        assert!(model.mahalanobis([0, 0, 0]).is_none());

        let mut model = BackgroundColorModel::new();
        model.update(&green_frame(32, 32));
        assert_eq!(model.mahalanobis([0, 255, 0]), Some(0.0));
        assert!(model.mahalanobis([255, 0, 0]).unwrap() > 100.0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut model = BackgroundColorModel::new();
        model.update(&green_frame(32, 32));
        model.reset();
        assert!(!model.is_initialized());
        assert!(model.inverse_covariance().is_none());
        assert_eq!(model.frames_observed(), 0);
    }
}
