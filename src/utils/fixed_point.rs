//! Fixed-point helpers shared by the quantizer and the models
//!
//! Rounding is half away from zero. Conversions into unsigned register
//! widths saturate: negative and NaN inputs become 0, overly large inputs the
//! type maximum. Saturation mirrors the hardware and is never an error.

use crate::config::constants::{fixed_point, lut::LUT_SIZE, sampling::SAMPLERATE_SPS};

/// Round to nearest and saturate into u32
pub fn round_to_u32(value: f64) -> u32 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    let rounded = value.round();
    if rounded >= u32::MAX as f64 {
        u32::MAX
    } else {
        rounded as u32
    }
}

/// Round to nearest and saturate into u64
pub fn round_to_u64(value: f64) -> u64 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    let rounded = value.round();
    if rounded >= u64::MAX as f64 {
        u64::MAX
    } else {
        rounded as u64
    }
}

/// Clamp a wide intermediate into u32
pub fn saturate_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Clamp a wide intermediate into u64
pub fn saturate_u64(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// mV to µV, rounded and saturated
pub fn mv_to_uv(millivolts: f64) -> u32 {
    round_to_u32(millivolts * 1e3)
}

/// mA to nA, rounded and saturated
pub fn ma_to_na(milliamps: f64) -> u32 {
    round_to_u32(milliamps * 1e6)
}

/// µA to nA, rounded and saturated
pub fn ua_to_na(microamps: f64) -> u32 {
    round_to_u32(microamps * 1e3)
}

/// Milliseconds to firmware sample counts
pub fn ms_to_samples(milliseconds: f64) -> u32 {
    round_to_u32(milliseconds * SAMPLERATE_SPS as f64 * 1e-3)
}

/// Milliohm to kiloohm in Q22
pub fn mohm_to_kohm_n22(milliohm: f64) -> u32 {
    round_to_u32(milliohm * 1e-6 * (1u64 << fixed_point::RESISTANCE_SHIFT) as f64)
}

/// µV to mV
pub fn uv_to_mv(microvolts: u32) -> f64 {
    microvolts as f64 * 1e-3
}

/// nA to mA
pub fn na_to_ma(nanoamps: u32) -> f64 {
    nanoamps as f64 * 1e-6
}

/// Sample counts to milliseconds
pub fn samples_to_ms(samples: u32) -> f64 {
    samples as f64 * 1e3 / SAMPLERATE_SPS as f64
}

/// Q22 kiloohm to milliohm
pub fn kohm_n22_to_mohm(kohm_n22: u32) -> f64 {
    kohm_n22 as f64 / (1u64 << fixed_point::RESISTANCE_SHIFT) as f64 * 1e6
}

/// Index into a log2-bucketed table axis
///
/// `value >> min_log2` gives the bucket count; its integer log2 selects the
/// entry, zero maps to the first entry and everything beyond the table to
/// the last one.
pub fn log2_bucket(value: u64, min_log2: u32) -> usize {
    let scaled = value.checked_shr(min_log2).unwrap_or(0);
    if scaled == 0 {
        return 0;
    }
    (scaled.ilog2() as usize).min(LUT_SIZE - 1)
}

/// Index into a linear table axis with buckets of `2^min_log2`
pub fn linear_bucket(value: u64, min_log2: u32) -> usize {
    let scaled = value.checked_shr(min_log2).unwrap_or(0);
    usize::try_from(scaled).unwrap_or(usize::MAX).min(LUT_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_to_u32(0.5), 1);
        assert_eq!(round_to_u32(1.49), 1);
        assert_eq!(round_to_u32(2.5), 3);
    }

    #[test]
    fn test_saturation() {
        assert_eq!(round_to_u32(-3.0), 0);
        assert_eq!(round_to_u32(f64::NAN), 0);
        assert_eq!(round_to_u32(1e12), u32::MAX);
        assert_eq!(round_to_u64(f64::INFINITY), u64::MAX);
        assert_eq!(saturate_u32(u64::MAX), u32::MAX);
        assert_eq!(saturate_u64(u128::MAX), u64::MAX);
    }

    #[test]
    fn test_unit_scaling() {
        assert_eq!(mv_to_uv(2_400.0), 2_400_000);
        assert_eq!(ma_to_na(4_200.0), 4_200_000_000);
        assert_eq!(ms_to_samples(64.0), 6_400);
        assert_eq!(mohm_to_kohm_n22(1_000_000.0), 1 << 22);
        assert!((kohm_n22_to_mohm(1 << 22) - 1_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_log2_bucket() {
        assert_eq!(log2_bucket(0, 0), 0);
        assert_eq!(log2_bucket(1, 0), 0);
        assert_eq!(log2_bucket(3, 0), 1);
        assert_eq!(log2_bucket(1024, 0), 10);
        assert_eq!(log2_bucket(1024, 2), 8);
        assert_eq!(log2_bucket(u64::MAX, 0), LUT_SIZE - 1);
        assert_eq!(log2_bucket(100, 64), 0);
    }

    #[test]
    fn test_linear_bucket() {
        assert_eq!(linear_bucket(0, 0), 0);
        assert_eq!(linear_bucket(5, 0), 5);
        assert_eq!(linear_bucket(5_000_000, 19), 9);
        assert_eq!(linear_bucket(u64::MAX, 0), LUT_SIZE - 1);
    }
}
