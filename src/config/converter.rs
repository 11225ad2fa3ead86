// src/config/converter.rs
//! Human-facing converter configuration
//!
//! The converter stage is software defined: buck and boost combinations, a
//! diode plus resistor input and an intermediate storage capacitor. Units
//! follow the serialized field names (mV, mA, nA, µF, ms).

use serde::{Deserialize, Serialize};

use crate::config::constants::lut::LUT_SIZE;
use crate::config::harvester::HarvesterConfig;
use crate::config::schema_validator::{SchemaValidator, ValidationError};

/// Input efficiency table, rows indexed by voltage, columns by log2 current
pub type InputEfficiencyLut = [[f64; LUT_SIZE]; LUT_SIZE];
/// Output efficiency table indexed by log2 current
pub type OutputEfficiencyLut = [f64; LUT_SIZE];

/// Converter configuration including its harvester
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Without boost the intermediate node follows the input
    pub enable_boost: bool,
    /// Without buck the output follows the intermediate node
    pub enable_buck: bool,

    /// Output stays drained for this long after start
    pub interval_startup_delay_drain_ms: f64,

    /// Input voltage clamp
    #[serde(rename = "V_input_max_mV")]
    pub v_input_max_mv: f64,
    /// Input current clamp
    #[serde(rename = "I_input_max_mA")]
    pub i_input_max_ma: f64,
    /// Simulated input diode
    #[serde(rename = "V_input_drop_mV")]
    pub v_input_drop_mv: f64,
    /// Only active with disabled boost
    #[serde(rename = "R_input_mOhm")]
    pub r_input_mohm: f64,

    /// Storage capacitor, 0 disables storage
    #[serde(rename = "C_intermediate_uF")]
    pub c_intermediate_uf: f64,
    /// Storage voltage at start
    #[serde(rename = "V_intermediate_init_mV")]
    pub v_intermediate_init_mv: f64,
    /// Self-discharge of the storage
    #[serde(rename = "I_intermediate_leak_nA")]
    pub i_intermediate_leak_na: f64,

    /// Target gets connected
    #[serde(rename = "V_intermediate_enable_threshold_mV")]
    pub v_intermediate_enable_threshold_mv: f64,
    /// Target gets disconnected
    #[serde(rename = "V_intermediate_disable_threshold_mV")]
    pub v_intermediate_disable_threshold_mv: f64,
    /// Period of the threshold checks, 0 checks every sample
    pub interval_check_thresholds_ms: f64,

    /// Power-good rises above
    #[serde(rename = "V_pwr_good_enable_threshold_mV")]
    pub v_pwr_good_enable_threshold_mv: f64,
    /// Power-good falls below
    #[serde(rename = "V_pwr_good_disable_threshold_mV")]
    pub v_pwr_good_disable_threshold_mv: f64,
    /// Update power-good on every sample instead of at threshold checks
    pub immediate_pwr_good_signal: bool,

    /// Compensates current spikes when the target gets enabled
    #[serde(rename = "C_output_uF")]
    pub c_output_uf: f64,

    /// Minimal output voltage for recording gpio changes
    #[serde(rename = "V_output_log_gpio_threshold_mV")]
    pub v_output_log_gpio_threshold_mv: f64,

    /// Minimal input voltage for the boost converter to work
    #[serde(rename = "V_input_boost_threshold_mV")]
    pub v_input_boost_threshold_mv: f64,
    /// Boost converter shuts off above
    #[serde(rename = "V_intermediate_max_mV")]
    pub v_intermediate_max_mv: f64,

    /// Boost efficiency by input voltage and current
    #[serde(rename = "LUT_input_efficiency")]
    pub lut_input_efficiency: InputEfficiencyLut,
    /// Voltage offset of the input table rows
    #[serde(rename = "LUT_input_V_min_log2_uV")]
    pub lut_input_v_min_log2_uv: u32,
    /// Current offset of the input table columns
    #[serde(rename = "LUT_input_I_min_log2_nA")]
    pub lut_input_i_min_log2_na: u32,

    /// Buck output voltage
    #[serde(rename = "V_output_mV")]
    pub v_output_mv: f64,
    /// LDO differential or output diode
    #[serde(rename = "V_buck_drop_mV")]
    pub v_buck_drop_mv: f64,

    /// Buck efficiency by output current
    #[serde(rename = "LUT_output_efficiency")]
    pub lut_output_efficiency: OutputEfficiencyLut,
    /// Current offset of the output table
    #[serde(rename = "LUT_output_I_min_log2_nA")]
    pub lut_output_i_min_log2_na: u32,

    /// Harvester feeding this converter
    pub harvester: HarvesterConfig,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            enable_boost: false,
            enable_buck: false,
            interval_startup_delay_drain_ms: 0.0,
            v_input_max_mv: 10_000.0,
            i_input_max_ma: 4_200.0,
            v_input_drop_mv: 0.0,
            r_input_mohm: 0.0,
            c_intermediate_uf: 0.0,
            v_intermediate_init_mv: 3_000.0,
            i_intermediate_leak_na: 0.0,
            v_intermediate_enable_threshold_mv: 1.0,
            v_intermediate_disable_threshold_mv: 0.0,
            interval_check_thresholds_ms: 0.0,
            v_pwr_good_enable_threshold_mv: 2_800.0,
            v_pwr_good_disable_threshold_mv: 2_200.0,
            immediate_pwr_good_signal: true,
            c_output_uf: 1.0,
            v_output_log_gpio_threshold_mv: 1_400.0,
            v_input_boost_threshold_mv: 0.0,
            v_intermediate_max_mv: 10_000.0,
            lut_input_efficiency: [[1.0; LUT_SIZE]; LUT_SIZE],
            lut_input_v_min_log2_uv: 0,
            lut_input_i_min_log2_na: 1,
            v_output_mv: 2_400.0,
            v_buck_drop_mv: 0.0,
            lut_output_efficiency: [1.0; LUT_SIZE],
            lut_output_i_min_log2_na: 1,
            harvester: HarvesterConfig::default(),
        }
    }
}

impl ConverterConfig {
    /// Range-check every field, including the embedded harvester
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let value = toml::Value::try_from(self).map_err(|e| {
            vec![ValidationError::new("converter", format!("not serializable: {}", e), "-")]
        })?;

        let validator = SchemaValidator::new();
        let mut errors = match validator.validate_section("converter", &value) {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };

        let mut root = toml::value::Table::new();
        root.insert("converter".to_string(), value);
        if let Err(dependency_errors) = validator.validate_dependencies(&toml::Value::Table(root)) {
            errors.extend(dependency_errors);
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Storage is present when the intermediate capacitance is non-zero
    pub fn has_storage(&self) -> bool {
        self.c_intermediate_uf > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ConverterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_wire_names_survive_serialization() {
        let text = toml::to_string(&ConverterConfig::default()).unwrap();
        assert!(text.contains("V_intermediate_enable_threshold_mV"));
        assert!(text.contains("LUT_output_I_min_log2_nA"));
        assert!(text.contains("[harvester]"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ConverterConfig = toml::from_str(
            r#"
            enable_boost = true
            C_intermediate_uF = 47.0
            V_output_mV = 1800

            [harvester]
            algorithm = "mppt_po"
            "#,
        )
        .unwrap();

        assert!(config.enable_boost);
        assert_eq!(config.v_output_mv, 1_800.0);
        assert_eq!(config.v_intermediate_init_mv, 3_000.0);
        assert_eq!(config.harvester.samples_n, 8);
    }

    #[test]
    fn test_out_of_range_fields_collected() {
        let mut config = ConverterConfig::default();
        config.v_output_mv = 6_000.0;
        config.c_intermediate_uf = -1.0;
        config.lut_output_efficiency[0] = 1.5;

        let errors = config.validate().unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"converter.V_output_mV"));
        assert!(fields.contains(&"converter.C_intermediate_uF"));
        assert!(fields.contains(&"converter.LUT_output_efficiency[0]"));
    }

    #[test]
    fn test_inverted_hysteresis_rejected() {
        let config = ConverterConfig {
            v_intermediate_enable_threshold_mv: 2_000.0,
            v_intermediate_disable_threshold_mv: 2_500.0,
            ..ConverterConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.field == "converter.V_intermediate_disable_threshold_mV"));
    }

    #[test]
    fn test_harvester_violations_are_prefixed() {
        let mut config = ConverterConfig::default();
        config.harvester.samples_n = 4;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors[0].field, "converter.harvester.samples_n");
    }
}
