//! Decision boundaries derived from the backdrop color model.

use crate::compositor::background_model::BackgroundColorModel;
use crate::compositor::color::{hue_distance, HUE_RANGE};
use crate::config::KeyConfig;

/// Circular hue interval in 8-bit hue units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HueWindow {
    pub center: f32,
    pub half_width: f32,
}

impl HueWindow {
    /// Largest half-width; a window this wide accepts every hue.
    pub const MAX_HALF_WIDTH: f32 = HUE_RANGE / 2.0;

    #[must_use]
    pub fn new(center: f32, half_width: f32) -> Self {
        Self {
            center: center.rem_euclid(HUE_RANGE),
            half_width: half_width.clamp(0.0, Self::MAX_HALF_WIDTH),
        }
    }

    /// Window spanning `min..=max` without wrapping.
    #[must_use]
    pub fn from_bounds(min: u8, max: u8) -> Self {
        let (min, max) = (f32::from(min.min(max)), f32::from(min.max(max)));
        Self::new((min + max) / 2.0, (max - min) / 2.0)
    }

    #[must_use]
    pub fn contains(&self, hue: f32) -> bool {
        hue_distance(hue, self.center) <= self.half_width
    }
}

/// Concrete thresholds used by the adaptive classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveThresholds {
    pub hue: HueWindow,
    pub strict_sat_min: u8,
    pub strict_val_min: u8,
    pub relaxed_sat_min: u8,
    pub relaxed_val_min: u8,
    pub dark_sat_min: u8,
    pub dark_val_max: u8,
    pub cb_min: f32,
    pub cb_max: f32,
    pub cr_max: f32,
    /// Minimum `G − max(R, B)` of a backdrop pixel
    pub green_delta: f32,
    /// Minimum `G / (R + G + B)` of a backdrop pixel
    pub green_ratio_min: f32,
    pub luma_min: f32,
    /// Per-channel `[r, g, b]` inverse variance for the diagonal distance
    pub inv_var: [f32; 3],
    pub color_distance: f32,
    pub color_guard: f32,
}

fn clamp_byte(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn inv_variance(std: f32) -> f32 {
    let bounded = std.max(5.0);
    1.0 / bounded.mul_add(bounded, 50.0)
}

/// Derives the thresholds for the current model.
///
/// An uninitialised model yields fixed conservative defaults built from the
/// configured hue window and floors.
#[must_use]
pub fn derive_thresholds(model: &BackgroundColorModel, key: &KeyConfig) -> AdaptiveThresholds {
    if !model.is_initialized() {
        let sat = i32::from(key.saturation_min);
        let val = i32::from(key.value_min);
        return AdaptiveThresholds {
            hue: HueWindow::from_bounds(key.hue_min.min(179), key.hue_max.min(179)),
            strict_sat_min: key.saturation_min,
            strict_val_min: key.value_min,
            relaxed_sat_min: clamp_byte((sat - 10).max(10) as f32),
            relaxed_val_min: clamp_byte((val - 10).max(10) as f32),
            dark_sat_min: clamp_byte((sat - 10).max(5) as f32),
            dark_val_max: clamp_byte((val + 50) as f32),
            cb_min: 50.0,
            cb_max: 150.0,
            cr_max: 150.0,
            green_delta: 8.0,
            green_ratio_min: 0.45,
            luma_min: 45.0,
            inv_var: [0.0; 3],
            color_distance: 3.0,
            color_guard: 4.6,
        };
    }

    let stats = model.statistics();
    let hue_std = stats.hue_std.max(4.0);
    let sat_std = stats.sat_std.max(4.0);
    let val_std = stats.val_std.max(4.0);
    let cb_std = stats.cb_std.max(2.5);
    let cr_std = stats.cr_std.max(2.5);

    let hue_padding = (2.5 * hue_std).round() + 4.0;
    let relaxed_sat_amount = (1.9 * sat_std).round() + 5.0;
    let relaxed_val_amount = (1.6 * val_std).round() + 5.0;

    let cb_range = 2.2f32.mul_add(cb_std, 6.0);

    let [red, green, blue] = stats.rgb_mean;
    let dominance = green - red.max(blue);
    let rgb_sum = (red + green + blue).max(1.0);
    let avg_std = stats.rgb_std.iter().sum::<f32>() / 3.0;
    let color_distance = 0.08f32.mul_add(avg_std, 1.2).clamp(2.5, 4.5);

    AdaptiveThresholds {
        hue: HueWindow::new(stats.hue_mean.round(), hue_padding),
        strict_sat_min: clamp_byte((-0.6f32).mul_add(sat_std, stats.sat_mean)),
        strict_val_min: clamp_byte((-0.6f32).mul_add(val_std, stats.val_mean)),
        relaxed_sat_min: clamp_byte((stats.sat_mean - relaxed_sat_amount).round().max(18.0)),
        relaxed_val_min: clamp_byte((stats.val_mean - relaxed_val_amount).round().max(18.0)),
        dark_sat_min: clamp_byte((-0.8f32).mul_add(sat_std, stats.sat_mean).round().max(5.0)),
        dark_val_max: clamp_byte(2.2f32.mul_add(val_std, stats.val_mean)),
        cb_min: (stats.cb_mean - cb_range).max(0.0),
        cb_max: (stats.cb_mean + cb_range).min(255.0),
        cr_max: (2.4f32.mul_add(cr_std, stats.cr_mean) + 6.0).min(255.0),
        green_delta: 0.35f32.mul_add(dominance, 6.0).max(4.0),
        green_ratio_min: (green / rgb_sum - 0.05).clamp(0.35, 0.8),
        luma_min: (-1.2f32).mul_add(val_std, stats.val_mean).max(25.0),
        inv_var: stats.rgb_std.map(inv_variance),
        color_distance,
        color_guard: color_distance + 1.6,
    }
}

/// Number of `f32` values in an encoded [`KeyParams`].
pub const KEY_PARAMS_LEN: usize = 36;

/// How the color-distance test measures distance from the backdrop mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    /// The model is uninitialised; the distance test never matches.
    Disabled = 0,
    /// Per-channel inverse variance.
    Diagonal = 1,
    /// Full inverse covariance.
    Mahalanobis = 2,
}

mod slot {
    pub const HUE_CENTER: usize = 0;
    pub const HUE_HALF_WIDTH: usize = 1;
    pub const STRICT_SAT: usize = 2;
    pub const STRICT_VAL: usize = 3;
    pub const RELAXED_SAT: usize = 4;
    pub const RELAXED_VAL: usize = 5;
    pub const DARK_SAT: usize = 6;
    pub const DARK_VAL_MAX: usize = 7;
    pub const CB_MIN: usize = 8;
    pub const CB_MAX: usize = 9;
    pub const CR_MAX: usize = 10;
    pub const GREEN_DELTA: usize = 11;
    pub const GREEN_RATIO: usize = 12;
    pub const LUMA_MIN: usize = 13;
    pub const DISTANCE: usize = 14;
    pub const GUARD: usize = 15;
    pub const INV_VAR: usize = 16;
    pub const MEAN: usize = 19;
    pub const METRIC: usize = 22;
    pub const INV_COV: usize = 24;
}

/// Flattened classifier parameters.
///
/// The same encoding is read by the CPU classifier and uploaded as a buffer
/// for the device kernels, so both paths see identical numbers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyParams {
    values: [f32; KEY_PARAMS_LEN],
}

impl KeyParams {
    #[must_use]
    pub fn new(thresholds: &AdaptiveThresholds, model: &BackgroundColorModel) -> Self {
        let mut values = [0.0; KEY_PARAMS_LEN];
        values[slot::HUE_CENTER] = thresholds.hue.center;
        values[slot::HUE_HALF_WIDTH] = thresholds.hue.half_width;
        values[slot::STRICT_SAT] = f32::from(thresholds.strict_sat_min);
        values[slot::STRICT_VAL] = f32::from(thresholds.strict_val_min);
        values[slot::RELAXED_SAT] = f32::from(thresholds.relaxed_sat_min);
        values[slot::RELAXED_VAL] = f32::from(thresholds.relaxed_val_min);
        values[slot::DARK_SAT] = f32::from(thresholds.dark_sat_min);
        values[slot::DARK_VAL_MAX] = f32::from(thresholds.dark_val_max);
        values[slot::CB_MIN] = thresholds.cb_min;
        values[slot::CB_MAX] = thresholds.cb_max;
        values[slot::CR_MAX] = thresholds.cr_max;
        values[slot::GREEN_DELTA] = thresholds.green_delta;
        values[slot::GREEN_RATIO] = thresholds.green_ratio_min;
        values[slot::LUMA_MIN] = thresholds.luma_min;
        values[slot::DISTANCE] = thresholds.color_distance;
        values[slot::GUARD] = thresholds.color_guard;
        values[slot::INV_VAR..slot::INV_VAR + 3].copy_from_slice(&thresholds.inv_var);
        values[slot::MEAN..slot::MEAN + 3].copy_from_slice(&model.statistics().rgb_mean);

        let metric = if !model.is_initialized() {
            DistanceMetric::Disabled
        } else if let Some(inv) = model.inverse_covariance() {
            for (i, row) in inv.iter().enumerate() {
                values[slot::INV_COV + 3 * i..slot::INV_COV + 3 * i + 3].copy_from_slice(row);
            }
            DistanceMetric::Mahalanobis
        } else {
            DistanceMetric::Diagonal
        };
        values[slot::METRIC] = metric as u8 as f32;

        Self { values }
    }

    /// Decodes parameters previously produced by [`as_slice`](Self::as_slice).
    #[must_use]
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        let values: [f32; KEY_PARAMS_LEN] = values.get(..KEY_PARAMS_LEN)?.try_into().ok()?;
        Some(Self { values })
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    #[must_use]
    pub fn hue_window(&self) -> HueWindow {
        HueWindow::new(self.values[slot::HUE_CENTER], self.values[slot::HUE_HALF_WIDTH])
    }

    #[must_use]
    pub fn metric(&self) -> DistanceMetric {
        match self.values[slot::METRIC] as u8 {
            1 => DistanceMetric::Diagonal,
            2 => DistanceMetric::Mahalanobis,
            _ => DistanceMetric::Disabled,
        }
    }

    /// Green dominance test shared by the relaxed, dark and guard rules.
    fn dominant(&self, r: f32, g: f32, b: f32) -> bool {
        let sum = (r + g + b).max(1.0);
        g - r.max(b) >= self.values[slot::GREEN_DELTA] && g / sum >= self.values[slot::GREEN_RATIO]
    }

    fn distance(&self, r: f32, g: f32, b: f32) -> Option<f32> {
        let mean = &self.values[slot::MEAN..slot::MEAN + 3];
        let d = [r - mean[0], g - mean[1], b - mean[2]];
        match self.metric() {
            DistanceMetric::Disabled => None,
            DistanceMetric::Diagonal => {
                let inv = &self.values[slot::INV_VAR..slot::INV_VAR + 3];
                let sq = (0..3).fold(0.0f32, |acc, c| (d[c] * d[c]).mul_add(inv[c], acc));
                Some(sq.sqrt())
            }
            DistanceMetric::Mahalanobis => {
                let m = &self.values[slot::INV_COV..slot::INV_COV + 9];
                let mut sq = 0.0f32;
                for i in 0..3 {
                    for j in 0..3 {
                        sq = (d[i] * m[3 * i + j]).mul_add(d[j], sq);
                    }
                }
                Some(sq.max(0.0).sqrt())
            }
        }
    }

    /// Adaptive backdrop test for one pixel. `hsv` and `ycrcb` must be the
    /// 8-bit conversions of `rgb`.
    #[must_use]
    pub fn matches_backdrop(&self, rgb: [u8; 3], hsv: [u8; 3], ycrcb: [u8; 3]) -> bool {
        let v = &self.values;
        let [r, g, b] = rgb.map(f32::from);
        let [h, s, val] = hsv.map(f32::from);
        let [_, cr, cb] = ycrcb.map(f32::from);

        let in_hue = self.hue_window().contains(h);
        let dominant = self.dominant(r, g, b);

        let strict = in_hue && s >= v[slot::STRICT_SAT] && val >= v[slot::STRICT_VAL];
        let relaxed = in_hue
            && s >= v[slot::RELAXED_SAT]
            && val >= v[slot::RELAXED_VAL]
            && dominant
            && cb >= v[slot::CB_MIN]
            && cb <= v[slot::CB_MAX]
            && cr <= v[slot::CR_MAX];
        let dark = in_hue && s >= v[slot::DARK_SAT] && val <= v[slot::DARK_VAL_MAX] && dominant;
        let near = self.distance(r, g, b).is_some_and(|d| {
            (d <= v[slot::DISTANCE] && val >= v[slot::LUMA_MIN]) || (d <= v[slot::GUARD] && dominant)
        });

        strict || relaxed || dark || near
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::background_model::ColorStatistics;

    fn stats_with_spread(spread: f32) -> ColorStatistics {
        ColorStatistics {
            hue_mean: 60.0,
            hue_std: spread,
            sat_mean: 200.0,
            sat_std: spread,
            val_mean: 180.0,
            val_std: spread,
            cb_mean: 60.0,
            cb_std: spread,
            cr_mean: 40.0,
            cr_std: spread,
            rgb_mean: [30.0, 180.0, 40.0],
            rgb_std: [spread; 3],
        }
    }

    #[test]
    fn uninitialised_model_uses_configured_window() {
        let t = derive_thresholds(&BackgroundColorModel::new(), &KeyConfig::default());
        assert!(t.hue.contains(35.0));
        assert!(t.hue.contains(85.0));
        assert!(!t.hue.contains(86.0));
        assert_eq!(t.strict_sat_min, 50);
        assert_eq!(t.relaxed_sat_min, 40);
        assert_eq!(t.dark_sat_min, 40);
        assert_eq!(t.dark_val_max, 100);
        assert_eq!(t.color_distance, 3.0);
        assert!((t.color_guard - 4.6).abs() < 1e-6);
    }

    #[test]
    fn initialised_model_pads_hue_by_spread() {
        let model = BackgroundColorModel::from_statistics(stats_with_spread(6.0));
        let t = derive_thresholds(&model, &KeyConfig::default());
        assert_eq!(t.hue.center, 60.0);
        assert_eq!(t.hue.half_width, 19.0);
        assert_eq!(t.strict_sat_min, 196);
        assert_eq!(t.relaxed_sat_min, 184);
        assert!((t.green_delta - (0.35 * 140.0 + 6.0)).abs() < 1e-4);
    }

    #[test]
    fn hue_window_wraps() {
        let window = HueWindow::new(175.0, 10.0);
        assert!(window.contains(3.0));
        assert!(window.contains(168.0));
        assert!(!window.contains(20.0));
        assert_eq!(HueWindow::new(10.0, 500.0).half_width, 90.0);
    }

    #[test]
    fn key_params_round_trip_through_slice() {
        let model = BackgroundColorModel::from_statistics(stats_with_spread(5.0));
        let params = KeyParams::new(&derive_thresholds(&model, &KeyConfig::default()), &model);
        assert_eq!(params.metric(), DistanceMetric::Diagonal);
        assert_eq!(KeyParams::from_slice(params.as_slice()), Some(params));
        assert!(KeyParams::from_slice(&[0.0; 4]).is_none());
    }

    #[test]
    fn backdrop_colour_matches_and_skin_does_not() {
        let model = BackgroundColorModel::from_statistics(stats_with_spread(5.0));
        let params = KeyParams::new(&derive_thresholds(&model, &KeyConfig::default()), &model);
        let check = |rgb: [u8; 3]| {
            let hsv = crate::compositor::color::rgb_to_hsv(rgb[0], rgb[1], rgb[2]);
            let ycrcb = crate::compositor::color::rgb_to_ycrcb(rgb[0], rgb[1], rgb[2]);
            params.matches_backdrop(rgb, hsv, ycrcb)
        };
        assert!(check([30, 180, 40]));
        assert!(!check([220, 170, 140]));
        assert!(!check([40, 60, 200]));
    }
}
