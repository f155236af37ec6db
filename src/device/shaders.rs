//! WGSL compute shaders for the wgpu backend.
//!
//! Every shader is prefixed with [`PRELUDE`] and runs one invocation per
//! element (or per pixel) of the launch extent with a 256-wide workgroup.
//! Large launches spill into the second dispatch dimension.

/// Shared parameter block and helpers.
///
/// `dims` = width, height, channels, kernel specific;
/// `flags` = saturate, kernel specific, kernel specific, invocation count;
/// `values` = kernel specific scalars.
pub const PRELUDE: &str = r#"
struct Params {
    dims: vec4<u32>,
    flags: vec4<u32>,
    values: vec4<f32>,
}

fn saturate_byte(v: f32) -> f32 {
    return clamp(floor(v + 0.5), 0.0, 255.0);
}

fn invocation(gid: vec3<u32>, nwg: vec3<u32>) -> u32 {
    return gid.x + gid.y * nwg.x * 256u;
}
"#;

/// Color conversions matching the 8-bit CPU conversions.
pub const COLOR: &str = r#"
fn rgb_to_hsv(r: f32, g: f32, b: f32) -> vec3<f32> {
    let v = max(max(r, g), b);
    let mn = min(min(r, g), b);
    let diff = v - mn;
    var s = 0.0;
    if (v > 0.0) {
        s = floor(255.0 * diff / v + 0.5);
    }
    var h = 0.0;
    if (diff > 0.0) {
        var sector: f32;
        if (v == r) {
            sector = g - b;
        } else if (v == g) {
            sector = b - r + 2.0 * diff;
        } else {
            sector = r - g + 4.0 * diff;
        }
        h = floor(sector * 30.0 / diff + 0.5);
        if (h < 0.0) {
            h = h + 180.0;
        }
    }
    return vec3<f32>(h, s, v);
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> vec3<f32> {
    if (s == 0.0) {
        return vec3<f32>(v, v, v);
    }
    let vf = v / 255.0;
    let sf = s / 255.0;
    var hue = h * 6.0 / 180.0;
    let sector_f = floor(hue);
    hue = hue - sector_f;
    let sector = ((i32(sector_f) % 6) + 6) % 6;
    let p = vf * (1.0 - sf);
    let q = vf * (1.0 - sf * hue);
    let t = vf * (1.0 - sf * (1.0 - hue));
    var rgb: vec3<f32>;
    switch sector {
        case 0: { rgb = vec3<f32>(vf, t, p); }
        case 1: { rgb = vec3<f32>(q, vf, p); }
        case 2: { rgb = vec3<f32>(p, vf, t); }
        case 3: { rgb = vec3<f32>(p, q, vf); }
        case 4: { rgb = vec3<f32>(t, p, vf); }
        default: { rgb = vec3<f32>(vf, p, q); }
    }
    return vec3<f32>(
        saturate_byte(rgb.x * 255.0),
        saturate_byte(rgb.y * 255.0),
        saturate_byte(rgb.z * 255.0),
    );
}

fn luma(r: f32, g: f32, b: f32) -> f32 {
    return 0.299 * r + 0.587 * g + 0.114 * b;
}

fn rgb_to_ycrcb(r: f32, g: f32, b: f32) -> vec3<f32> {
    let y = luma(r, g, b);
    let cr = (r - y) * 0.713 + 128.0;
    let cb = (b - y) * 0.564 + 128.0;
    return vec3<f32>(saturate_byte(y), saturate_byte(cr), saturate_byte(cb));
}

fn srgb_to_linear(c: f32) -> f32 {
    if (c <= 0.04045) {
        return c / 12.92;
    }
    return pow((c + 0.055) / 1.055, 2.4);
}

fn linear_to_srgb(c: f32) -> f32 {
    if (c <= 0.0031308) {
        return c * 12.92;
    }
    return 1.055 * pow(c, 1.0 / 2.4) - 0.055;
}

fn lab_f(t: f32) -> f32 {
    if (t > 0.008856) {
        return pow(t, 1.0 / 3.0);
    }
    return 7.787 * t + 16.0 / 116.0;
}

fn lab_f_inv(f: f32) -> f32 {
    if (f > 0.206893) {
        return f * f * f;
    }
    return (f - 16.0 / 116.0) / 7.787;
}

fn rgb_to_lab(r: f32, g: f32, b: f32) -> vec3<f32> {
    let lr = srgb_to_linear(r / 255.0);
    let lg = srgb_to_linear(g / 255.0);
    let lb = srgb_to_linear(b / 255.0);
    let x = (0.412453 * lr + 0.357580 * lg + 0.180423 * lb) / 0.950456;
    let y = 0.212671 * lr + 0.715160 * lg + 0.072169 * lb;
    let z = (0.019334 * lr + 0.119193 * lg + 0.950227 * lb) / 1.088754;
    let fx = lab_f(x);
    let fy = lab_f(y);
    let fz = lab_f(z);
    var l = 903.3 * y;
    if (y > 0.008856) {
        l = 116.0 * fy - 16.0;
    }
    return vec3<f32>(
        saturate_byte(l * 255.0 / 100.0),
        saturate_byte(500.0 * (fx - fy) + 128.0),
        saturate_byte(200.0 * (fy - fz) + 128.0),
    );
}

fn lab_to_rgb(l8: f32, a8: f32, b8: f32) -> vec3<f32> {
    let l = l8 * 100.0 / 255.0;
    let fy = (l + 16.0) / 116.0;
    let x = lab_f_inv(fy + (a8 - 128.0) / 500.0) * 0.950456;
    let y = lab_f_inv(fy);
    let z = lab_f_inv(fy - (b8 - 128.0) / 200.0) * 1.088754;
    let r = 3.240479 * x - 1.537150 * y - 0.498535 * z;
    let g = -0.969256 * x + 1.875991 * y + 0.041556 * z;
    let b = 0.055648 * x - 0.204043 * y + 1.057311 * z;
    return vec3<f32>(
        saturate_byte(linear_to_srgb(clamp(r, 0.0, 1.0)) * 255.0),
        saturate_byte(linear_to_srgb(clamp(g, 0.0, 1.0)) * 255.0),
        saturate_byte(linear_to_srgb(clamp(b, 0.0, 1.0)) * 255.0),
    );
}
"#;

pub const GRAYSCALE: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    let gray = saturate_byte(luma(src[3u * i], src[3u * i + 1u], src[3u * i + 2u]));
    var v = gray * params.values.x;
    if (params.flags.x == 1u) {
        v = saturate_byte(v);
    }
    dst[i] = v;
}
"#;

pub const AFFINE: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    var v = src[i] * params.values.x + params.values.y;
    if (params.flags.x == 1u) {
        v = saturate_byte(v);
    }
    dst[i] = v;
}
"#;

pub const BINARY: &str = r#"
@group(0) @binding(0) var<storage, read> lhs: array<f32>;
@group(0) @binding(1) var<storage, read> rhs: array<f32>;
@group(0) @binding(2) var<storage, read_write> dst: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    let a = lhs[i];
    let b = rhs[i];
    var v = 0.0;
    switch params.dims.w {
        case 0u: { v = a + b; }
        case 1u: { v = a - b; }
        case 2u: { v = a * b; }
        case 3u: {
            if (b != 0.0) {
                v = a / b;
            }
        }
        default: { v = max(a, b); }
    }
    if (params.flags.x == 1u) {
        v = saturate_byte(v);
    }
    dst[i] = v;
}
"#;

pub const THRESHOLD: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    var v = 0.0;
    if (src[i] > params.values.x) {
        v = params.values.y;
    }
    if (params.flags.x == 1u) {
        v = saturate_byte(v);
    }
    dst[i] = v;
}
"#;

pub const BOX_MEAN: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    let width = i32(params.dims.x);
    let height = i32(params.dims.y);
    let channels = params.dims.z;
    let radius = i32(params.dims.w);
    let c = i % channels;
    let p = i / channels;
    let x = i32(p % params.dims.x);
    let y = i32(p / params.dims.x);

    var sum = 0.0;
    var count = 0.0;
    if (params.flags.y == 0u) {
        let x0 = max(x - radius, 0);
        let x1 = min(x + radius, width - 1);
        for (var sx = x0; sx <= x1; sx = sx + 1) {
            sum = sum + src[u32(y * width + sx) * channels + c];
        }
        count = f32(x1 - x0 + 1);
    } else {
        let y0 = max(y - radius, 0);
        let y1 = min(y + radius, height - 1);
        for (var sy = y0; sy <= y1; sy = sy + 1) {
            sum = sum + src[u32(sy * width + x) * channels + c];
        }
        count = f32(y1 - y0 + 1);
    }
    var v = sum / count;
    if (params.flags.x == 1u) {
        v = saturate_byte(v);
    }
    dst[i] = v;
}
"#;

pub const GUIDED_COEFFICIENTS: &str = r#"
@group(0) @binding(0) var<storage, read> mean_guide: array<f32>;
@group(0) @binding(1) var<storage, read> mean_input: array<f32>;
@group(0) @binding(2) var<storage, read> corr_guide: array<f32>;
@group(0) @binding(3) var<storage, read> corr_cross: array<f32>;
@group(0) @binding(4) var<storage, read_write> out_a: array<f32>;
@group(0) @binding(5) var<storage, read_write> out_b: array<f32>;
@group(0) @binding(6) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    let mg = mean_guide[i];
    let mp = mean_input[i];
    let variance = corr_guide[i] - mg * mg;
    let covariance = corr_cross[i] - mg * mp;
    let a = covariance / (variance + params.values.x);
    out_a[i] = a;
    out_b[i] = mp - a * mg;
}
"#;

pub const GUIDED_OUTPUT: &str = r#"
@group(0) @binding(0) var<storage, read> mean_a: array<f32>;
@group(0) @binding(1) var<storage, read> mean_b: array<f32>;
@group(0) @binding(2) var<storage, read> guide: array<f32>;
@group(0) @binding(3) var<storage, read_write> dst: array<f32>;
@group(0) @binding(4) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    dst[i] = clamp(mean_a[i] * guide[i] + mean_b[i], 0.0, 1.0);
}
"#;

pub const MORPHOLOGY: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    let width = i32(params.dims.x);
    let height = i32(params.dims.y);
    let radius = i32(params.dims.w);
    let x = i32(i % params.dims.x);
    let y = i32(i / params.dims.x);

    var acc = src[i];
    for (var dy = -radius; dy <= radius; dy = dy + 1) {
        let sy = y + dy;
        if (sy < 0 || sy >= height) {
            continue;
        }
        let half_width = i32(floor(sqrt(f32(radius * radius - dy * dy)) + 0.5));
        let x0 = max(x - half_width, 0);
        let x1 = min(x + half_width, width - 1);
        for (var sx = x0; sx <= x1; sx = sx + 1) {
            let v = src[u32(sy * width + sx)];
            if (params.flags.y == 0u) {
                acc = min(acc, v);
            } else {
                acc = max(acc, v);
            }
        }
    }
    dst[i] = acc;
}
"#;

pub const GAUSSIAN: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read> weights: array<f32>;
@group(0) @binding(2) var<storage, read_write> dst: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    let width = i32(params.dims.x);
    let height = i32(params.dims.y);
    let channels = params.dims.z;
    let size = i32(params.dims.w);
    let radius = size / 2;
    let c = i % channels;
    let p = i / channels;
    let x = i32(p % params.dims.x);
    let y = i32(p / params.dims.x);

    var acc = 0.0;
    for (var k = 0; k < size; k = k + 1) {
        let offset = k - radius;
        var sx = x;
        var sy = y;
        if (params.flags.y == 0u) {
            sx = clamp(x + offset, 0, width - 1);
        } else {
            sy = clamp(y + offset, 0, height - 1);
        }
        acc = acc + weights[k] * src[u32(sy * width + sx) * channels + c];
    }
    if (params.flags.x == 1u) {
        acc = saturate_byte(acc);
    }
    dst[i] = acc;
}
"#;

pub const CHROMA_KEY: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    let r = src[3u * i];
    let g = src[3u * i + 1u];
    let b = src[3u * i + 2u];
    if (g - r > params.values.x && g - b > params.values.y) {
        dst[i] = 0.0;
    } else {
        dst[i] = 255.0;
    }
}
"#;

pub const ADAPTIVE_KEY: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read> key: array<f32>;
@group(0) @binding(2) var<storage, read_write> dst: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

fn in_hue(h: f32) -> bool {
    let d = abs(h - key[0]) % 180.0;
    return min(d, 180.0 - d) <= key[1];
}

fn dominant(r: f32, g: f32, b: f32) -> bool {
    let sum = max(r + g + b, 1.0);
    return (g - max(r, b)) >= key[11] && g / sum >= key[12];
}

fn color_distance(r: f32, g: f32, b: f32) -> f32 {
    let d = vec3<f32>(r - key[19], g - key[20], b - key[21]);
    let metric = u32(key[22]);
    if (metric == 1u) {
        let inv = vec3<f32>(key[16], key[17], key[18]);
        return sqrt(dot(d * d, inv));
    }
    if (metric == 2u) {
        let m = mat3x3<f32>(
            vec3<f32>(key[24], key[27], key[30]),
            vec3<f32>(key[25], key[28], key[31]),
            vec3<f32>(key[26], key[29], key[32]),
        );
        return sqrt(max(dot(d, m * d), 0.0));
    }
    return -1.0;
}

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    let r = src[3u * i];
    let g = src[3u * i + 1u];
    let b = src[3u * i + 2u];

    var backdrop = g - r > params.values.x && g - b > params.values.y;
    if (!backdrop) {
        let hsv = rgb_to_hsv(r, g, b);
        let ycc = rgb_to_ycrcb(r, g, b);
        let hue_ok = in_hue(hsv.x);
        let dom = dominant(r, g, b);

        let strict = hue_ok && hsv.y >= key[2] && hsv.z >= key[3];
        let relaxed = hue_ok && hsv.y >= key[4] && hsv.z >= key[5] && dom
            && ycc.z >= key[8] && ycc.z <= key[9] && ycc.y <= key[10];
        let dark = hue_ok && hsv.y >= key[6] && hsv.z <= key[7] && dom;

        let d = color_distance(r, g, b);
        let near = d >= 0.0 && ((d <= key[14] && hsv.z >= key[13]) || (d <= key[15] && dom));

        backdrop = strict || relaxed || dark || near;
    }

    if (backdrop) {
        dst[i] = 0.0;
    } else {
        dst[i] = 255.0;
    }
}
"#;

pub const SPILL_SUPPRESS: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read> mask: array<f32>;
@group(0) @binding(2) var<storage, read_write> dst: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    var rgb = vec3<f32>(src[3u * i], src[3u * i + 1u], src[3u * i + 2u]);
    if (mask[i] > 0.0) {
        let hsv = rgb_to_hsv(rgb.x, rgb.y, rgb.z);
        let hue_min = f32(params.flags.y);
        let hue_max = f32(params.flags.z);
        if (hsv.x > hue_min && hsv.x <= hue_max) {
            let s = saturate_byte(hsv.y * params.values.x);
            let back = hsv_to_rgb(hsv.x, s, hsv.z);
            rgb = vec3<f32>(
                saturate_byte(back.x * params.values.z),
                saturate_byte(back.y * params.values.y),
                saturate_byte(back.z * params.values.z),
            );
        }
    }
    dst[3u * i] = rgb.x;
    dst[3u * i + 1u] = rgb.y;
    dst[3u * i + 2u] = rgb.z;
}
"#;

/// `flags.y` selects RGB gains (0) or a Lab shift (1); `values.xyz` holds
/// the per-channel parameters.
pub const LIGHTING: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read> mask: array<f32>;
@group(0) @binding(2) var<storage, read_write> dst: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    var rgb = vec3<f32>(
        saturate_byte(src[3u * i]),
        saturate_byte(src[3u * i + 1u]),
        saturate_byte(src[3u * i + 2u]),
    );
    if (mask[i] > 0.0) {
        if (params.flags.y == 0u) {
            rgb = vec3<f32>(
                saturate_byte(rgb.x * params.values.x),
                saturate_byte(rgb.y * params.values.y),
                saturate_byte(rgb.z * params.values.z),
            );
        } else {
            let lab = rgb_to_lab(rgb.x, rgb.y, rgb.z);
            rgb = lab_to_rgb(
                saturate_byte(lab.x + params.values.x),
                saturate_byte(lab.y + params.values.y),
                saturate_byte(lab.z + params.values.z),
            );
        }
    }
    dst[3u * i] = rgb.x;
    dst[3u * i + 1u] = rgb.y;
    dst[3u * i + 2u] = rgb.z;
}
"#;

pub const MASKED_COPY: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read> mask: array<f32>;
@group(0) @binding(2) var<storage, read_write> dst: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    if (mask[i / params.dims.z] > 0.0) {
        dst[i] = src[i];
    }
}
"#;

pub const ADD_WEIGHTED: &str = r#"
@group(0) @binding(0) var<storage, read> lhs: array<f32>;
@group(0) @binding(1) var<storage, read> rhs: array<f32>;
@group(0) @binding(2) var<storage, read_write> dst: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    var v = lhs[i] * params.values.x + rhs[i] * params.values.y;
    if (params.flags.x == 1u) {
        v = saturate_byte(v);
    }
    dst[i] = v;
}
"#;

pub const UNMIX: &str = r#"
@group(0) @binding(0) var<storage, read> subject: array<f32>;
@group(0) @binding(1) var<storage, read> background: array<f32>;
@group(0) @binding(2) var<storage, read> alpha: array<f32>;
@group(0) @binding(3) var<storage, read> ring: array<f32>;
@group(0) @binding(4) var<storage, read_write> dst: array<f32>;
@group(0) @binding(5) var<uniform> params: Params;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = invocation(gid, nwg);
    if (i >= params.flags.w) {
        return;
    }
    if (ring[i] <= 0.0) {
        return;
    }
    let a = clamp(alpha[i] * params.values.x, 0.0, 1.0);
    let inv = 1.0 - a;
    for (var c = 0u; c < 3u; c = c + 1u) {
        let k = 3u * i + c;
        let f = clamp((subject[k] - inv * background[k]) / max(a, params.values.y), 0.0, 255.0);
        var v = f * a + background[k] * inv;
        if (params.flags.x == 1u) {
            v = saturate_byte(v);
        }
        dst[k] = v;
    }
}
"#;

/// `(kernel name, body, needs color helpers)` for every pipeline.
pub const ALL: &[(&str, &str, bool)] = &[
    ("grayscale", GRAYSCALE, true),
    ("affine", AFFINE, false),
    ("binary", BINARY, false),
    ("threshold", THRESHOLD, false),
    ("box_mean", BOX_MEAN, false),
    ("guided_coefficients", GUIDED_COEFFICIENTS, false),
    ("guided_output", GUIDED_OUTPUT, false),
    ("morphology", MORPHOLOGY, false),
    ("gaussian", GAUSSIAN, false),
    ("chroma_key", CHROMA_KEY, false),
    ("adaptive_key", ADAPTIVE_KEY, true),
    ("spill_suppress", SPILL_SUPPRESS, true),
    ("lighting", LIGHTING, true),
    ("masked_copy", MASKED_COPY, false),
    ("add_weighted", ADD_WEIGHTED, false),
    ("unmix", UNMIX, false),
];
