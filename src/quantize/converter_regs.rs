//! Converter register struct and the derived converter constants

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::constants::{fixed_point, lut, sampling::SAMPLERATE_SPS};
use crate::config::converter::{ConverterConfig, InputEfficiencyLut, OutputEfficiencyLut};
use crate::error::{VsrcErrorBuilder, VsrcResult};
use crate::quantize::QuantizeWarning;
use crate::utils::fixed_point::{ma_to_na, mohm_to_kohm_n22, ms_to_samples, mv_to_uv, round_to_u32};

/// Quantized input efficiency table (Q8)
pub type InputEfficiencyLutN8 = [[u8; lut::LUT_SIZE]; lut::LUT_SIZE];
/// Quantized output inverse efficiency table (Q4)
pub type OutputInvEfficiencyLutN4 = [u32; lut::LUT_SIZE];

/// Storage capacitor present
pub const MODE_STORAGE: u32 = 1 << 0;
/// Boost stage active, implies storage
pub const MODE_BOOST: u32 = 1 << 1;
/// Buck stage active
pub const MODE_BUCK: u32 = 1 << 2;
/// Log the storage node instead of the output
pub const MODE_LOG_INTERMEDIATE: u32 = 1 << 3;

/// Converter configuration in firmware units
///
/// Units: µV, nA, samples, fixed-point fractions. Field order follows the
/// firmware header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConverterRegisters {
    /// Bitmask of the `MODE_*` flags
    pub converter_mode: u32,
    /// Samples the output stays drained after start
    pub interval_startup_delay_drain_n: u32,

    /// Input voltage clamp
    #[serde(rename = "V_input_max_uV")]
    pub v_input_max_uv: u32,
    /// Input current clamp
    #[serde(rename = "I_input_max_nA")]
    pub i_input_max_na: u32,
    /// Input diode drop
    #[serde(rename = "V_input_drop_uV")]
    pub v_input_drop_uv: u32,
    /// Input resistance, kOhm in Q22
    #[serde(rename = "R_input_kOhm_n22")]
    pub r_input_kohm_n22: u32,

    /// Voltage step per nA and sample on the storage, Q28
    #[serde(rename = "Constant_us_per_nF_n28")]
    pub constant_us_per_nf_n28: u32,
    /// Storage voltage at start
    #[serde(rename = "V_intermediate_init_uV")]
    pub v_intermediate_init_uv: u32,
    /// Storage self-discharge
    #[serde(rename = "I_intermediate_leak_nA")]
    pub i_intermediate_leak_na: u32,

    /// Output switches on above
    #[serde(rename = "V_enable_output_threshold_uV")]
    pub v_enable_output_threshold_uv: u32,
    /// Output switches off below
    #[serde(rename = "V_disable_output_threshold_uV")]
    pub v_disable_output_threshold_uv: u32,
    /// Storage drop when the output capacitor charges
    #[serde(rename = "dV_enable_output_uV")]
    pub dv_enable_output_uv: u32,
    /// Samples between threshold checks, 0 checks every sample
    pub interval_check_thresholds_n: u32,

    /// Power-good rises above
    #[serde(rename = "V_pwr_good_enable_threshold_uV")]
    pub v_pwr_good_enable_threshold_uv: u32,
    /// Power-good falls below
    #[serde(rename = "V_pwr_good_disable_threshold_uV")]
    pub v_pwr_good_disable_threshold_uv: u32,
    /// 1 updates power-good on every sample
    pub immediate_pwr_good_signal: u32,

    /// GPIO changes are logged above this output voltage
    #[serde(rename = "V_output_log_gpio_threshold_uV")]
    pub v_output_log_gpio_threshold_uv: u32,

    /// Boost needs at least this input voltage
    #[serde(rename = "V_input_boost_threshold_uV")]
    pub v_input_boost_threshold_uv: u32,
    /// Boost stops charging above
    #[serde(rename = "V_intermediate_max_uV")]
    pub v_intermediate_max_uv: u32,

    /// Buck output voltage
    #[serde(rename = "V_output_uV")]
    pub v_output_uv: u32,
    /// Buck dropout
    #[serde(rename = "V_buck_drop_uV")]
    pub v_buck_drop_uv: u32,

    /// Voltage offset of the input table rows
    #[serde(rename = "LUT_input_V_min_log2_uV")]
    pub lut_input_v_min_log2_uv: u32,
    /// Current offset of the input table columns
    #[serde(rename = "LUT_input_I_min_log2_nA")]
    pub lut_input_i_min_log2_na: u32,
    /// Current offset of the output table
    #[serde(rename = "LUT_output_I_min_log2_nA")]
    pub lut_output_i_min_log2_na: u32,
    /// Boost efficiency, Q8
    #[serde(rename = "LUT_inp_efficiency_n8")]
    pub lut_inp_efficiency_n8: InputEfficiencyLutN8,
    /// Inverse buck efficiency, Q4
    #[serde(rename = "LUT_out_inv_efficiency_n4")]
    pub lut_out_inv_efficiency_n4: OutputInvEfficiencyLutN4,
}

/// Output hysteresis expressed on the intermediate node, in mV
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HysteresisThresholds {
    /// Output switches on above
    pub v_enable_output_threshold_mv: f64,
    /// Output switches off below
    pub v_disable_output_threshold_mv: f64,
    /// Voltage drop of the storage when the output capacitor gets charged
    pub dv_enable_output_mv: f64,
}

/// Derive the output hysteresis from charge transfer between the capacitors
///
/// Enabling the output charges `C_output` from the storage:
/// `C_store·V_new² = C_store·V_old² − C_out·V_out²`, so the storage drops by
/// `dV = V_old − sqrt(V_old² − (C_out/C_store)·V_out²)`. With a buck stage the
/// storage may sit below the pre-buck level, then
/// `dV = V_out·(1 − sqrt(1 − C_out/C_store))` applies.
pub fn calc_internal_states(
    cfg: &ConverterConfig,
    warnings: &mut Vec<QuantizeWarning>,
) -> HysteresisThresholds {
    let (mut dv_en_thrs_mv, mut dv_imed_low_mv) = (0.0, 0.0);
    if cfg.c_intermediate_uf > 0.0 && cfg.c_output_uf > 0.0 {
        let v_old = cfg.v_intermediate_enable_threshold_mv;
        let v_out = cfg.v_output_mv;
        let ratio = cfg.c_output_uf / cfg.c_intermediate_uf;
        dv_en_thrs_mv = v_old - (v_old * v_old - ratio * v_out * v_out).sqrt();
        dv_imed_low_mv = v_out * (1.0 - (1.0 - ratio).sqrt());
    }

    // negative radicands surface as NaN
    if !(dv_en_thrs_mv >= 0.0) {
        let warning = QuantizeWarning::EnableDeltaNotReal {
            v_enable_threshold_mv: cfg.v_intermediate_enable_threshold_mv,
            v_output_mv: cfg.v_output_mv,
        };
        warn!(%warning, "Resetting enable delta");
        warnings.push(warning);
        dv_en_thrs_mv = 0.0;
    }
    if !(dv_imed_low_mv >= 0.0) {
        let warning = QuantizeWarning::OutputCapacitanceExceedsStorage {
            c_output_uf: cfg.c_output_uf,
            c_intermediate_uf: cfg.c_intermediate_uf,
        };
        warn!(%warning, "Resetting low-side delta");
        warnings.push(warning);
        dv_imed_low_mv = 0.0;
    }

    if cfg.enable_buck {
        let v_pre_output_mv = cfg.v_output_mv + cfg.v_buck_drop_mv;

        let (v_enable, dv_enable) = if cfg.v_intermediate_enable_threshold_mv > v_pre_output_mv {
            (cfg.v_intermediate_enable_threshold_mv, dv_en_thrs_mv)
        } else {
            (v_pre_output_mv + dv_imed_low_mv, dv_imed_low_mv)
        };

        HysteresisThresholds {
            v_enable_output_threshold_mv: v_enable,
            v_disable_output_threshold_mv: cfg.v_intermediate_disable_threshold_mv.max(v_pre_output_mv),
            dv_enable_output_mv: dv_enable,
        }
    } else {
        HysteresisThresholds {
            v_enable_output_threshold_mv: cfg.v_intermediate_enable_threshold_mv,
            v_disable_output_threshold_mv: cfg.v_intermediate_disable_threshold_mv,
            dv_enable_output_mv: dv_en_thrs_mv,
        }
    }
}

/// Bit0 storage, bit1 boost (needs storage), bit2 buck, bit3 log intermediate node
pub fn calc_converter_mode(cfg: &ConverterConfig, log_intermediate_node: bool) -> u32 {
    converter_mode_bits(
        cfg.has_storage(),
        cfg.enable_boost,
        cfg.enable_buck,
        log_intermediate_node,
    )
}

/// Mode bitmask from the individual stage flags
pub fn converter_mode_bits(storage: bool, boost: bool, buck: bool, log_intermediate_node: bool) -> u32 {
    let mut mode = 0;
    if storage {
        mode |= MODE_STORAGE;
        if boost {
            mode |= MODE_BOOST;
        }
    }
    if buck {
        mode |= MODE_BUCK;
    }
    if log_intermediate_node {
        mode |= MODE_LOG_INTERMEDIATE;
    }
    mode
}

/// Constant that turns a capacitor current into a voltage step per sample
///
/// `dV[uV] = constant[us/nF] * current[nA]`, stored in Q28.
pub fn calc_cap_constant_us_per_nf_n28(c_intermediate_uf: f64) -> u32 {
    let c_uf = c_intermediate_uf.max(fixed_point::MIN_CAPACITANCE_UF);
    let scaled = 1e3 * (1u64 << fixed_point::CAP_CONSTANT_SHIFT) as f64 / (c_uf * SAMPLERATE_SPS as f64);
    if scaled >= u32::MAX as f64 {
        u32::MAX
    } else {
        scaled.floor() as u32
    }
}

/// Efficiency to Q8, 1.0 saturates at 255
pub fn quantize_input_lut(table: &InputEfficiencyLut) -> InputEfficiencyLutN8 {
    let mut quantized = [[0u8; lut::LUT_SIZE]; lut::LUT_SIZE];
    for (row_q, row) in quantized.iter_mut().zip(table.iter()) {
        for (entry_q, &eta) in row_q.iter_mut().zip(row.iter()) {
            let n8 = round_to_u32(eta * (1u32 << fixed_point::INPUT_EFFICIENCY_SHIFT) as f64)
                .min(lut::INPUT_EFFICIENCY_MAX_N8);
            *entry_q = n8 as u8;
        }
    }
    quantized
}

/// Efficiency to inverse efficiency in Q4, zero efficiency maps to the ceiling
pub fn quantize_output_lut(table: &OutputEfficiencyLut) -> OutputInvEfficiencyLutN4 {
    let mut quantized = [0u32; lut::LUT_SIZE];
    for (entry_q, &eta) in quantized.iter_mut().zip(table.iter()) {
        *entry_q = if eta > 0.0 {
            round_to_u32((1u32 << fixed_point::OUTPUT_INV_EFFICIENCY_SHIFT) as f64 / eta)
                .min(lut::OUTPUT_INV_EFFICIENCY_MAX_N4)
        } else {
            lut::OUTPUT_INV_EFFICIENCY_MAX_N4
        };
    }
    quantized
}

impl ConverterRegisters {
    /// Quantize a validated converter configuration
    pub fn from_config(
        cfg: &ConverterConfig,
        log_intermediate_node: bool,
        warnings: &mut Vec<QuantizeWarning>,
    ) -> VsrcResult<Self> {
        let states = calc_internal_states(cfg, warnings);

        let registers = Self {
            converter_mode: calc_converter_mode(cfg, log_intermediate_node),
            interval_startup_delay_drain_n: ms_to_samples(cfg.interval_startup_delay_drain_ms),
            v_input_max_uv: mv_to_uv(cfg.v_input_max_mv),
            i_input_max_na: ma_to_na(cfg.i_input_max_ma),
            v_input_drop_uv: mv_to_uv(cfg.v_input_drop_mv),
            r_input_kohm_n22: mohm_to_kohm_n22(cfg.r_input_mohm),
            constant_us_per_nf_n28: calc_cap_constant_us_per_nf_n28(cfg.c_intermediate_uf),
            v_intermediate_init_uv: mv_to_uv(cfg.v_intermediate_init_mv),
            i_intermediate_leak_na: round_to_u32(cfg.i_intermediate_leak_na),
            v_enable_output_threshold_uv: mv_to_uv(states.v_enable_output_threshold_mv),
            v_disable_output_threshold_uv: mv_to_uv(states.v_disable_output_threshold_mv),
            dv_enable_output_uv: mv_to_uv(states.dv_enable_output_mv),
            interval_check_thresholds_n: ms_to_samples(cfg.interval_check_thresholds_ms),
            v_pwr_good_enable_threshold_uv: mv_to_uv(cfg.v_pwr_good_enable_threshold_mv),
            v_pwr_good_disable_threshold_uv: mv_to_uv(cfg.v_pwr_good_disable_threshold_mv),
            immediate_pwr_good_signal: u32::from(cfg.immediate_pwr_good_signal),
            v_output_log_gpio_threshold_uv: mv_to_uv(cfg.v_output_log_gpio_threshold_mv),
            v_input_boost_threshold_uv: mv_to_uv(cfg.v_input_boost_threshold_mv),
            v_intermediate_max_uv: mv_to_uv(cfg.v_intermediate_max_mv),
            v_output_uv: mv_to_uv(cfg.v_output_mv),
            v_buck_drop_uv: mv_to_uv(cfg.v_buck_drop_mv),
            lut_input_v_min_log2_uv: cfg.lut_input_v_min_log2_uv,
            // the lookup applies its own log2 step
            lut_input_i_min_log2_na: cfg.lut_input_i_min_log2_na.saturating_sub(1),
            lut_output_i_min_log2_na: cfg.lut_output_i_min_log2_na.saturating_sub(1),
            lut_inp_efficiency_n8: quantize_input_lut(&cfg.lut_input_efficiency),
            lut_out_inv_efficiency_n4: quantize_output_lut(&cfg.lut_output_efficiency),
        };

        if registers.v_disable_output_threshold_uv > registers.v_enable_output_threshold_uv {
            return Err(VsrcErrorBuilder::new("converter", "quantize").invalid_field(
                "V_disable_output_threshold_uV",
                registers.v_disable_output_threshold_uv,
                &format!(
                    "exceeds V_enable_output_threshold_uV ({})",
                    registers.v_enable_output_threshold_uv
                ),
            ));
        }

        Ok(registers)
    }

    /// Storage capacitor present
    pub fn has_storage(&self) -> bool {
        self.converter_mode & MODE_STORAGE != 0
    }

    /// Boost stage active
    pub fn has_boost(&self) -> bool {
        self.converter_mode & MODE_BOOST != 0
    }

    /// Buck stage active
    pub fn has_buck(&self) -> bool {
        self.converter_mode & MODE_BUCK != 0
    }

    /// Storage node is logged instead of the output
    pub fn logs_intermediate_node(&self) -> bool {
        self.converter_mode & MODE_LOG_INTERMEDIATE != 0
    }
}
