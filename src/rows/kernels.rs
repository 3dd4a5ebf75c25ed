//! Per-row numeric kernels. Each one touches a single row and never reads outside it.

use half::f16;

/// Replacement written over NaN samples.
pub const NAN_SENTINEL: f32 = 12.0;
/// Replacement written over `+inf` samples.
pub const POS_INF_SENTINEL: f32 = 123.0;
/// Replacement written over `-inf` samples.
pub const NEG_INF_SENTINEL: f32 = 0.0;

const EXP_MASK: u32 = 0x7f80_0000;
const MANTISSA_MASK: u32 = 0x007f_ffff;
const SIGN_MASK: u32 = 0x8000_0000;

/// `color *= alpha` wherever `alpha < 1`.
pub fn premultiply_row(color: &mut [f32], alpha: &[f32]) {
    for (c, &a) in color.iter_mut().zip(alpha) {
        if a < 1.0 {
            *c *= a;
        }
    }
}

/// `color /= alpha` wherever `0 < alpha < 1`.
pub fn unmult_row(color: &mut [f32], alpha: &[f32]) {
    for (c, &a) in color.iter_mut().zip(alpha) {
        if a > 0.0 && a < 1.0 {
            *c /= a;
        }
    }
}

pub fn alpha_clip_row(alpha: &mut [f32]) {
    for a in alpha.iter_mut() {
        if *a < 0.0 {
            *a = 0.0;
        } else if *a > 1.0 {
            *a = 1.0;
        }
    }
}

/// Bit-pattern test for non-finite samples; finite values pass through untouched.
pub fn kill_nan(v: f32) -> f32 {
    let bits = v.to_bits();
    if bits & EXP_MASK != EXP_MASK {
        return v;
    }
    if bits & MANTISSA_MASK != 0 {
        NAN_SENTINEL
    } else if bits & SIGN_MASK == 0 {
        POS_INF_SENTINEL
    } else {
        NEG_INF_SENTINEL
    }
}

pub fn kill_nan_row(row: &mut [f32]) {
    for v in row.iter_mut() {
        *v = kill_nan(*v);
    }
}

pub fn float_to_half_row(out: &mut [f16], input: &[f32]) {
    for (h, &v) in out.iter_mut().zip(input) {
        *h = f16::from_f32(v);
    }
}
