//! Configuration quantizer
//!
//! Turns a human-facing [`ConverterConfig`] with its [`HarvesterConfig`] into
//! the integer register structs the firmware consumes. Every physical field
//! is scaled, rounded half away from zero and saturated into u32; derived
//! fields (mode bitmask, capacitor constant, hysteresis deltas) are computed.
//!
//! Invalid configurations fail fast. Degenerate derived values are replaced
//! by safe defaults and reported as [`QuantizeWarning`]s.

pub mod converter_regs;
pub mod harvester_regs;

pub use converter_regs::{
    calc_cap_constant_us_per_nf_n28, calc_converter_mode, calc_internal_states, converter_mode_bits,
    quantize_input_lut, quantize_output_lut, ConverterRegisters, HysteresisThresholds,
};
pub use harvester_regs::HarvesterRegisters;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::{ConverterConfig, EnergyDType, HarvesterConfig};
use crate::error::{VsrcErrorBuilder, VsrcResult};

/// Switches that are not part of the human-facing config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizeOptions {
    /// Record the intermediate node instead of the output
    pub log_intermediate_node: bool,
    /// Emulation consumes the harvester output directly, harvesting records it
    pub for_emulation: bool,
    /// Datatype of the energy environment fed into the harvester
    pub dtype_in: EnergyDType,
    /// Samples per curve sweep, required for ivcurve input
    pub window_size: Option<u32>,
}

impl Default for QuantizeOptions {
    fn default() -> Self {
        Self {
            log_intermediate_node: false,
            for_emulation: true,
            dtype_in: EnergyDType::Ivsample,
            window_size: None,
        }
    }
}

impl QuantizeOptions {
    /// Options for emulating from an input stream of the given datatype
    pub fn for_input(dtype_in: EnergyDType, window_size: Option<u32>) -> Self {
        Self {
            dtype_in,
            window_size,
            ..Self::default()
        }
    }
}

/// Recoverable degeneracy found while deriving register values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QuantizeWarning {
    /// `C_output > C_intermediate`: the low-side enable delta is not real
    OutputCapacitanceExceedsStorage {
        /// Output capacitor
        c_output_uf: f64,
        /// Storage capacitor
        c_intermediate_uf: f64,
    },
    /// The storage cannot charge the output capacitor from the enable threshold
    EnableDeltaNotReal {
        /// Enable threshold on the storage node
        v_enable_threshold_mv: f64,
        /// Output voltage to reach
        v_output_mv: f64,
    },
}

impl fmt::Display for QuantizeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantizeWarning::OutputCapacitanceExceedsStorage { c_output_uf, c_intermediate_uf } => write!(
                f,
                "C_output ({} uF) should not be larger than C_intermediate ({} uF)",
                c_output_uf, c_intermediate_uf
            ),
            QuantizeWarning::EnableDeltaNotReal { v_enable_threshold_mv, v_output_mv } => write!(
                f,
                "enable threshold {} mV cannot charge the output to {} mV",
                v_enable_threshold_mv, v_output_mv
            ),
        }
    }
}

/// Both register structs plus the warnings emitted while deriving them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedConfig {
    /// Converter registers
    pub converter: ConverterRegisters,
    /// Harvester registers, only valid for input of `dtype_in`
    pub harvester: HarvesterRegisters,
    /// Datatype of the energy environment the harvester was quantized for
    #[serde(default)]
    pub dtype_in: EnergyDType,
    /// Degeneracies resolved while deriving the registers
    pub warnings: Vec<QuantizeWarning>,
}

/// Quantize a converter and its harvester
///
/// `harvester_override` replaces the harvester embedded in `converter`.
pub fn quantize(
    converter: &ConverterConfig,
    harvester_override: Option<&HarvesterConfig>,
    options: &QuantizeOptions,
) -> VsrcResult<QuantizedConfig> {
    converter
        .validate()
        .map_err(|violations| VsrcErrorBuilder::new("converter", "quantize").validation(violations))?;

    let harvester_cfg = match harvester_override {
        Some(harvester) => {
            harvester.validate().map_err(|violations| {
                VsrcErrorBuilder::new("harvester", "quantize").validation(violations)
            })?;
            harvester
        }
        None => &converter.harvester,
    };

    let mut warnings = Vec::new();
    let converter_regs = ConverterRegisters::from_config(converter, options.log_intermediate_node, &mut warnings)?;
    let harvester_regs = quantize_harvester(harvester_cfg, options)?;

    debug!(
        converter_mode = converter_regs.converter_mode,
        algorithm = harvester_regs.algorithm,
        window_size = harvester_regs.window_size,
        warnings = warnings.len(),
        "Configuration quantized"
    );

    Ok(QuantizedConfig {
        converter: converter_regs,
        harvester: harvester_regs,
        dtype_in: options.dtype_in,
        warnings,
    })
}

/// Quantize a harvester on its own, e.g. for harvester-only simulation
pub fn quantize_harvester(harvester: &HarvesterConfig, options: &QuantizeOptions) -> VsrcResult<HarvesterRegisters> {
    let adjusted = harvester.clone().post_adjust()?;
    HarvesterRegisters::from_config(&adjusted, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarvestAlgorithm;
    use crate::error::VsrcError;

    #[test]
    fn test_default_config_quantizes() {
        let quantized = quantize(&ConverterConfig::default(), None, &QuantizeOptions::default()).unwrap();
        assert_eq!(quantized.converter.converter_mode, 0);
        assert_eq!(quantized.converter.v_output_uv, 2_400_000);
        assert_eq!(quantized.converter.i_input_max_na, 4_200_000_000);
        assert!(quantized.warnings.is_empty());
    }

    #[test]
    fn test_override_replaces_embedded_harvester() {
        let harvester = HarvesterConfig::for_algorithm(HarvestAlgorithm::MpptPo);
        let quantized = quantize(
            &ConverterConfig::default(),
            Some(&harvester),
            &QuantizeOptions::default(),
        )
        .unwrap();
        assert_eq!(quantized.harvester.algorithm, HarvestAlgorithm::MpptPo.number());
    }

    #[test]
    fn test_validation_errors_name_field() {
        let config = ConverterConfig {
            v_output_mv: 7_500.0,
            ..ConverterConfig::default()
        };
        match quantize(&config, None, &QuantizeOptions::default()) {
            Err(VsrcError::Validation { violations, .. }) => {
                assert_eq!(violations[0].field, "converter.V_output_mV");
                assert_eq!(violations[0].value, "7500");
            }
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_neutral_harvester_is_fatal() {
        let mut config = ConverterConfig::default();
        config.harvester = HarvesterConfig::for_algorithm(HarvestAlgorithm::Neutral);
        let err = quantize(&config, None, &QuantizeOptions::default()).unwrap_err();
        assert_eq!(err.field(), Some("algorithm"));
    }

    #[test]
    fn test_curve_input_without_window_is_fatal() {
        let options = QuantizeOptions::for_input(EnergyDType::Ivcurve, None);
        let err = quantize(&ConverterConfig::default(), None, &options).unwrap_err();
        assert_eq!(err.field(), Some("window_size"));
    }

    #[test]
    fn test_warning_display() {
        let warning = QuantizeWarning::OutputCapacitanceExceedsStorage {
            c_output_uf: 200.0,
            c_intermediate_uf: 100.0,
        };
        assert!(warning.to_string().contains("200 uF"));
    }
}
