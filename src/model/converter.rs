//! Converter model
//!
//! Integer emulation of a boost/buck energy-harvesting converter with a
//! storage capacitor. Per sample the caller runs, in order:
//! [`ConverterModel::calc_inp_power`], [`ConverterModel::calc_out_power`],
//! [`ConverterModel::update_cap_storage`] and
//! [`ConverterModel::update_states_and_output`].
//!
//! Powers are in fW (µV·nA), the storage voltage is kept in Q32 µV.
//! Arithmetic saturates instead of wrapping.

use crate::calibration::CalibrationEmulator;
use crate::config::constants::{
    cape::{RAW_MAX_ADC, RAW_MAX_DAC},
    fixed_point,
};
use crate::quantize::ConverterRegisters;
use crate::utils::fixed_point::{
    linear_bucket, log2_bucket, round_to_u32, round_to_u64, saturate_u32, saturate_u64,
};

/// Inverse output efficiency of an ideal buck (1.0 in Q4)
const UNITY_INV_EFFICIENCY_N4: u64 = 1 << fixed_point::OUTPUT_INV_EFFICIENCY_SHIFT;

/// Mutable state of one converter run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterState {
    /// Storage voltage in Q32 µV
    pub v_mid_uv_n32: u64,
    /// Input voltage after drop, clamps and boost threshold
    pub v_input_uv: u32,
    /// Last input power in fW
    pub p_inp_fw: u64,
    /// Last output power in fW
    pub p_out_fw: u64,
    /// Output voltage as the DAC can express it
    pub v_out_dac_uv: u32,
    /// DAC code, at most `RAW_MAX_DAC`
    pub v_out_dac_raw: u32,
    /// Output switch latch
    pub is_outputting: bool,
    /// Power-good latch
    pub power_good: bool,
    /// Samples left in the startup drain
    pub startup_drain_remaining: u32,
    /// Samples since the last threshold check
    pub threshold_check_count: u32,
    /// Output below the GPIO logging threshold
    pub skip_gpio_logging: bool,
}

/// Converter emulation driven by [`ConverterRegisters`]
#[derive(Debug, Clone)]
pub struct ConverterModel {
    regs: ConverterRegisters,
    calibration: CalibrationEmulator,
    /// Storage voltage needed to switch the output on and still cover `dV_enable`
    v_enable_threshold_uv: u32,
    state: ConverterState,
}

impl ConverterModel {
    /// Model starting from `V_intermediate_init`
    pub fn new(regs: ConverterRegisters, calibration: CalibrationEmulator) -> Self {
        let v_enable_threshold_uv = regs.v_enable_output_threshold_uv.max(regs.dv_enable_output_uv);
        let v_init_uv = regs.v_intermediate_init_uv.min(regs.v_intermediate_max_uv);
        let is_outputting = v_init_uv >= v_enable_threshold_uv;

        let state = ConverterState {
            v_mid_uv_n32: (v_init_uv as u64) << fixed_point::V_MID_SHIFT,
            v_input_uv: 0,
            p_inp_fw: 0,
            p_out_fw: 0,
            v_out_dac_uv: 0,
            v_out_dac_raw: 0,
            is_outputting,
            power_good: is_outputting && v_init_uv >= regs.v_pwr_good_enable_threshold_uv,
            startup_drain_remaining: regs.interval_startup_delay_drain_n,
            // first sample checks the thresholds
            threshold_check_count: u32::MAX,
            skip_gpio_logging: false,
        };

        let mut model = Self {
            regs,
            calibration,
            v_enable_threshold_uv,
            state,
        };
        if model.state.is_outputting || model.state.startup_drain_remaining > 0 {
            model.apply_output_voltage();
        }
        model
    }

    /// Registers the model runs on
    pub fn registers(&self) -> &ConverterRegisters {
        &self.regs
    }

    /// Current state
    pub fn state(&self) -> &ConverterState {
        &self.state
    }

    /// Storage voltage in µV
    pub fn v_mid_uv(&self) -> u32 {
        saturate_u32(self.state.v_mid_uv_n32 >> fixed_point::V_MID_SHIFT)
    }

    /// Output voltage in µV
    pub fn v_out_uv(&self) -> u32 {
        self.state.v_out_dac_uv
    }

    /// Whether the output switch is on
    pub fn is_outputting(&self) -> bool {
        self.state.is_outputting
    }

    /// Power-good signal
    pub fn power_good(&self) -> bool {
        self.state.power_good
    }

    /// Whether GPIO samples are dropped for the current output level
    pub fn skip_gpio_logging(&self) -> bool {
        self.state.skip_gpio_logging
    }

    /// Effective enable threshold including `dV_enable_output`
    pub fn v_enable_threshold_uv(&self) -> u32 {
        self.v_enable_threshold_uv
    }

    /// Power delivered into the storage node in fW
    ///
    /// Without storage the node follows the input and the power is still
    /// reported as V·I. The firmware zeroes the input voltage in that mode
    /// and therefore reports no input power.
    pub fn calc_inp_power(&mut self, input_voltage_uv: u32, input_current_na: u32) -> u64 {
        let regs = &self.regs;
        let mut voltage_uv = input_voltage_uv
            .saturating_sub(regs.v_input_drop_uv)
            .min(regs.v_input_max_uv);
        let mut current_na = input_current_na.min(regs.i_input_max_na);

        if regs.has_boost() {
            if voltage_uv < regs.v_input_boost_threshold_uv {
                voltage_uv = 0;
            }
        } else if regs.has_storage() {
            // diode and series resistor: current only flows above the storage voltage
            if regs.r_input_kohm_n22 > 0 {
                let v_diff_uv = voltage_uv.saturating_sub(self.v_mid_uv()) as u64;
                let i_max_na = (v_diff_uv << fixed_point::RESISTANCE_SHIFT) / regs.r_input_kohm_n22 as u64;
                current_na = current_na.min(saturate_u32(i_max_na));
            }
        } else {
            // direct connection, the node follows the input
            self.state.v_mid_uv_n32 = (voltage_uv as u64) << fixed_point::V_MID_SHIFT;
        }

        self.state.v_input_uv = voltage_uv;

        let power_fw = voltage_uv as u128 * current_na as u128;
        let power_fw = if self.regs.has_boost() {
            let row = linear_bucket(voltage_uv as u64, self.regs.lut_input_v_min_log2_uv);
            let col = log2_bucket(current_na as u64, self.regs.lut_input_i_min_log2_na);
            let eta_n8 = self.regs.lut_inp_efficiency_n8[row][col] as u128;
            (power_fw * eta_n8) >> fixed_point::INPUT_EFFICIENCY_SHIFT
        } else {
            power_fw
        };

        self.state.p_inp_fw = saturate_u64(power_fw);
        self.state.p_inp_fw
    }

    /// Power drawn from the storage node in fW, given the raw output current code
    pub fn calc_out_power(&mut self, current_adc_raw: u32) -> u64 {
        let raw = current_adc_raw.min(RAW_MAX_ADC);
        let current_na = round_to_u64(self.calibration.adc_c_a.raw_to_si(raw) * 1e9);

        let inv_efficiency_n4 = if self.regs.has_buck() {
            let idx = log2_bucket(current_na, self.regs.lut_output_i_min_log2_na);
            self.regs.lut_out_inv_efficiency_n4[idx] as u128
        } else {
            UNITY_INV_EFFICIENCY_N4 as u128
        };

        let p_load = (self.state.v_out_dac_uv as u128 * current_na as u128 * inv_efficiency_n4)
            >> fixed_point::OUTPUT_INV_EFFICIENCY_SHIFT;
        let p_leak = self.v_mid_uv() as u128 * self.regs.i_intermediate_leak_na as u128;
        let mut power_fw = saturate_u64(p_load + p_leak);

        if self.state.startup_drain_remaining > 0 {
            self.state.startup_drain_remaining -= 1;
            power_fw = 0;
        }

        self.state.p_out_fw = power_fw;
        power_fw
    }

    /// Integrate the power balance into the storage voltage, returns V_mid in µV
    pub fn update_cap_storage(&mut self) -> u32 {
        let shift = fixed_point::V_MID_SHIFT;

        if self.regs.has_storage() {
            let v_mid_uv = self.v_mid_uv().max(1) as i128;
            let p_delta = self.state.p_inp_fw as i128 - self.state.p_out_fw as i128;
            // (fW / µV) · (µs/nF in Q28) gives µV in Q28, shifted up by 4 into Q32
            let dv_uv_n32 = p_delta * self.regs.constant_us_per_nf_n28 as i128 * 16 / v_mid_uv;
            let v_next = (self.state.v_mid_uv_n32 as i128 + dv_uv_n32).clamp(0, u64::MAX as i128);
            self.state.v_mid_uv_n32 = v_next as u64;
        }

        let v_max_n32 = (self.regs.v_intermediate_max_uv as u64) << shift;
        self.state.v_mid_uv_n32 = self.state.v_mid_uv_n32.min(v_max_n32);

        if !self.regs.has_boost()
            && self.state.p_inp_fw > 0
            && self.v_mid_uv() > self.state.v_input_uv
        {
            // without boost the node cannot charge above the input
            self.state.v_mid_uv_n32 = (self.state.v_input_uv as u64) << shift;
        }

        self.v_mid_uv()
    }

    /// Run the output hysteresis and power-good logic, returns the DAC code
    pub fn update_states_and_output(&mut self) -> u32 {
        let regs = &self.regs;
        let state = &mut self.state;

        state.threshold_check_count = state.threshold_check_count.saturating_add(1);
        let check_thresholds = state.threshold_check_count >= regs.interval_check_thresholds_n;

        if check_thresholds {
            state.threshold_check_count = 0;
            let v_mid_uv = saturate_u32(state.v_mid_uv_n32 >> fixed_point::V_MID_SHIFT);

            if state.is_outputting {
                if v_mid_uv < regs.v_disable_output_threshold_uv {
                    state.is_outputting = false;
                }
            } else if v_mid_uv >= self.v_enable_threshold_uv {
                state.is_outputting = true;
                // charging the output capacitor
                let dv_n32 = (regs.dv_enable_output_uv as u64) << fixed_point::V_MID_SHIFT;
                state.v_mid_uv_n32 = state.v_mid_uv_n32.saturating_sub(dv_n32);
            }
        }

        if check_thresholds || regs.immediate_pwr_good_signal != 0 {
            let v_mid_uv = saturate_u32(state.v_mid_uv_n32 >> fixed_point::V_MID_SHIFT);
            if state.power_good {
                if v_mid_uv <= regs.v_pwr_good_disable_threshold_uv {
                    state.power_good = false;
                }
            } else if v_mid_uv >= regs.v_pwr_good_enable_threshold_uv {
                state.power_good = state.is_outputting;
            }
        }

        if self.state.is_outputting || self.state.startup_drain_remaining > 0 {
            self.apply_output_voltage();
        } else {
            self.state.v_out_dac_uv = 0;
            self.state.v_out_dac_raw = 0;
        }

        self.state.skip_gpio_logging = self.state.v_out_dac_uv < self.regs.v_output_log_gpio_threshold_uv;
        self.state.v_out_dac_raw
    }

    fn apply_output_voltage(&mut self) {
        let v_mid_uv = self.v_mid_uv();
        let regs = &self.regs;
        let regulated_above_uv = regs.v_output_uv.saturating_add(regs.v_buck_drop_uv);

        let v_out_uv = if regs.has_buck() && v_mid_uv > regulated_above_uv {
            regs.v_output_uv
        } else {
            v_mid_uv.saturating_sub(regs.v_buck_drop_uv)
        };

        let dac = &self.calibration.dac_v_a;
        let raw = dac.si_to_raw(v_out_uv as f64 * 1e-6);
        if raw > RAW_MAX_DAC {
            // the DAC saturates, the output follows its ceiling
            self.state.v_out_dac_raw = RAW_MAX_DAC;
            self.state.v_out_dac_uv = round_to_u32(dac.raw_to_si(RAW_MAX_DAC) * 1e6);
        } else {
            self.state.v_out_dac_raw = raw;
            self.state.v_out_dac_uv = v_out_uv;
        }
    }
}
