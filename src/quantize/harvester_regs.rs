//! Harvester register struct

use serde::{Deserialize, Serialize};

use crate::config::constants::fixed_point::SETPOINT_SHIFT;
use crate::config::harvester::HarvesterConfig;
use crate::error::VsrcResult;
use crate::quantize::QuantizeOptions;
use crate::utils::fixed_point::{ms_to_samples, mv_to_uv, round_to_u32, ua_to_na};

/// Harvester runs inside the emulator
pub const HRV_MODE_EMULATION: u32 = 1 << 0;
/// Sweep direction is rising
pub const HRV_MODE_RISING: u32 = 1 << 1;
/// Interpolate curve crossings
pub const HRV_MODE_LINEAR_EXTRAPOLATION: u32 = 1 << 2;

/// Harvester configuration in firmware units (µV, nA, samples)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvesterRegisters {
    /// Algorithm number, ordered by capability
    pub algorithm: u32,
    /// Bitmask of the `HRV_MODE_*` flags
    pub hrv_mode: u32,
    /// Samples per curve window
    pub window_size: u32,
    /// Setpoint of cv, start point of mppt_po
    #[serde(rename = "voltage_uV")]
    pub voltage_uv: u32,
    /// Lower end of the sweep
    #[serde(rename = "voltage_min_uV")]
    pub voltage_min_uv: u32,
    /// Upper end of the sweep
    #[serde(rename = "voltage_max_uV")]
    pub voltage_max_uv: u32,
    /// Perturbation step
    #[serde(rename = "voltage_step_uV")]
    pub voltage_step_uv: u32,
    /// Open-circuit detection current
    #[serde(rename = "current_limit_nA")]
    pub current_limit_na: u32,
    /// Fraction of the open-circuit voltage, Q8
    pub setpoint_n8: u32,
    /// Samples between measurement starts
    pub interval_n: u32,
    /// Samples of one measurement
    pub duration_n: u32,
    /// Frontend settling cycles
    pub wait_cycles_n: u32,
}

impl HarvesterRegisters {
    /// Quantize a validated and post-adjusted harvester configuration
    pub fn from_config(cfg: &HarvesterConfig, options: &QuantizeOptions) -> VsrcResult<Self> {
        let algorithm = cfg.calc_algorithm_num(options.for_emulation)?;
        let window_size = cfg.calc_window_size(options.dtype_in, options.window_size, options.for_emulation)?;
        let (interval_ms, duration_ms) = cfg.calc_timings_ms(options.for_emulation);

        let setpoint_n8 = (cfg.setpoint_n * (1u32 << SETPOINT_SHIFT) as f64).min(255.0);

        Ok(Self {
            algorithm,
            hrv_mode: cfg.calc_hrv_mode(options.for_emulation),
            window_size,
            voltage_uv: mv_to_uv(cfg.voltage_mv),
            voltage_min_uv: mv_to_uv(cfg.voltage_min_mv),
            voltage_max_uv: mv_to_uv(cfg.voltage_max_mv),
            voltage_step_uv: mv_to_uv(cfg.calc_voltage_step_mv()),
            current_limit_na: ua_to_na(cfg.current_limit_ua),
            setpoint_n8: round_to_u32(setpoint_n8),
            interval_n: ms_to_samples(interval_ms),
            duration_n: ms_to_samples(duration_ms),
            wait_cycles_n: cfg.wait_cycles,
        })
    }

    /// Whether the registers target the emulator
    pub fn for_emulation(&self) -> bool {
        self.hrv_mode & HRV_MODE_EMULATION != 0
    }

    /// Rising sweep
    pub fn is_rising(&self) -> bool {
        self.hrv_mode & HRV_MODE_RISING != 0
    }

    /// Interpolated curve crossings
    pub fn linear_extrapolation(&self) -> bool {
        self.hrv_mode & HRV_MODE_LINEAR_EXTRAPOLATION != 0
    }
}
