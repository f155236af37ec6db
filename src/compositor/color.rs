//! 8-bit color conversions following the OpenCV conventions the thresholds
//! are expressed in: hue in `0..=179`, saturation and value in `0..=255`,
//! chroma offset by 128.

use crate::utils::saturate_u8;

/// Hue range of the 8-bit HSV representation.
pub const HUE_RANGE: f32 = 180.0;

/// BT.601 luma, unrounded.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299f32.mul_add(
        f32::from(r),
        0.587f32.mul_add(f32::from(g), 0.114 * f32::from(b)),
    )
}

/// Converts an RGB triple to 8-bit `[h, s, v]`.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (ri, gi, bi) = (i32::from(r), i32::from(g), i32::from(b));
    let v = ri.max(gi).max(bi);
    let min = ri.min(gi).min(bi);
    let diff = v - min;

    let s = if v == 0 {
        0.0
    } else {
        (255.0 * diff as f32 / v as f32 + 0.5).floor()
    };

    let h = if diff == 0 {
        0.0
    } else {
        let sector = if v == ri {
            gi - bi
        } else if v == gi {
            bi - ri + 2 * diff
        } else {
            ri - gi + 4 * diff
        };
        let h = (sector as f32 * 30.0 / diff as f32 + 0.5).floor();
        if h < 0.0 {
            h + HUE_RANGE
        } else {
            h
        }
    };

    [h as u8, s as u8, v as u8]
}

/// Converts an 8-bit `[h, s, v]` triple back to RGB.
pub fn hsv_to_rgb(h: u8, s: u8, v: u8) -> [u8; 3] {
    let v_f = f32::from(v) / 255.0;
    let s_f = f32::from(s) / 255.0;
    if s == 0 {
        return [v, v, v];
    }

    let mut hue = f32::from(h) * 6.0 / HUE_RANGE;
    let sector = hue.floor();
    hue -= sector;
    let sector = (sector as i32).rem_euclid(6);

    let p = v_f * (1.0 - s_f);
    let q = v_f * (1.0 - s_f * hue);
    let t = v_f * (1.0 - s_f * (1.0 - hue));

    let (r, g, b) = match sector {
        0 => (v_f, t, p),
        1 => (q, v_f, p),
        2 => (p, v_f, t),
        3 => (p, q, v_f),
        4 => (t, p, v_f),
        _ => (v_f, p, q),
    };

    [
        saturate_u8(r * 255.0),
        saturate_u8(g * 255.0),
        saturate_u8(b * 255.0),
    ]
}

/// Converts an RGB triple to `[y, cr, cb]`.
pub fn rgb_to_ycrcb(r: u8, g: u8, b: u8) -> [u8; 3] {
    let y = luma(r, g, b);
    let cr = (f32::from(r) - y).mul_add(0.713, 128.0);
    let cb = (f32::from(b) - y).mul_add(0.564, 128.0);
    [saturate_u8(y), saturate_u8(cr), saturate_u8(cb)]
}

const LAB_EPSILON: f32 = 0.008_856;
/// D65 white point, X and Z relative to Y
const WHITE_X: f32 = 0.950_456;
const WHITE_Z: f32 = 1.088_754;

#[inline]
fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055f32.mul_add(c.powf(1.0 / 2.4), -0.055)
    }
}

#[inline]
fn lab_f(t: f32) -> f32 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        7.787f32.mul_add(t, 16.0 / 116.0)
    }
}

#[inline]
fn lab_f_inv(f: f32) -> f32 {
    // cbrt(LAB_EPSILON)
    if f > 0.206_893 {
        f * f * f
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

/// Converts an RGB triple to 8-bit `[l, a, b]`: `L * 255 / 100`, `a + 128`,
/// `b + 128`, sRGB primaries and D65 white.
pub fn rgb_to_lab(r: u8, g: u8, b: u8) -> [u8; 3] {
    let [r, g, b] = [r, g, b].map(|c| srgb_to_linear(f32::from(c) / 255.0));

    let x = (0.412_453 * r + 0.357_580 * g + 0.180_423 * b) / WHITE_X;
    let y = 0.212_671 * r + 0.715_160 * g + 0.072_169 * b;
    let z = (0.019_334 * r + 0.119_193 * g + 0.950_227 * b) / WHITE_Z;

    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    let l = if y > LAB_EPSILON {
        116.0f32.mul_add(fy, -16.0)
    } else {
        903.3 * y
    };
    [
        saturate_u8(l * 255.0 / 100.0),
        saturate_u8(500.0f32.mul_add(fx - fy, 128.0)),
        saturate_u8(200.0f32.mul_add(fy - fz, 128.0)),
    ]
}

/// Converts an 8-bit `[l, a, b]` triple back to RGB.
pub fn lab_to_rgb(l: u8, a: u8, b: u8) -> [u8; 3] {
    let l = f32::from(l) * 100.0 / 255.0;
    let a = f32::from(a) - 128.0;
    let b = f32::from(b) - 128.0;

    let fy = (l + 16.0) / 116.0;
    let x = lab_f_inv(fy + a / 500.0) * WHITE_X;
    let y = lab_f_inv(fy);
    let z = lab_f_inv(fy - b / 200.0) * WHITE_Z;

    let r = 3.240_479 * x - 1.537_150 * y - 0.498_535 * z;
    let g = -0.969_256 * x + 1.875_991 * y + 0.041_556 * z;
    let bl = 0.055_648 * x - 0.204_043 * y + 1.057_311 * z;

    [r, g, bl].map(|c| saturate_u8(linear_to_srgb(c.clamp(0.0, 1.0)) * 255.0))
}

/// Shortest distance between two hues on the 180-unit circle.
#[inline]
pub fn hue_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).abs() % HUE_RANGE;
    d.min(HUE_RANGE - d)
}
