// src/config/schema_validator.rs
//! Configuration schema validation
//!
//! Range constraints are keyed by dotted paths (`converter.V_output_mV`) and
//! checked against a `toml::Value` tree, so files on disk and typed configs
//! run through the same rules.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use crate::config::constants::{limits, lut, sampling};

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Dotted path of the offending field
    pub field: String,
    /// Violated rule
    pub message: String,
    /// Offending value as text
    pub value: String,
}

impl ValidationError {
    /// Violation of `field` holding `value`
    pub fn new(field: &str, message: impl Into<String>, value: impl ToString) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
            value: value.to_string(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error for '{}': {} (value: {})", self.field, self.message, self.value)
    }
}

impl std::error::Error for ValidationError {}

/// Schema validator for configuration
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    constraints: BTreeMap<String, FieldConstraint>,
}

/// Field validation constraints
#[derive(Debug, Clone)]
pub enum FieldConstraint {
    /// Number within [min, max]
    Range {
        /// Inclusive lower bound
        min: f64,
        /// Inclusive upper bound
        max: f64,
    },
    /// Integer within [min, max]
    IntRange {
        /// Inclusive lower bound
        min: i64,
        /// Inclusive upper bound
        max: i64,
    },
    /// One of the listed strings
    OneOf(Vec<String>),
    /// String of at least this many characters
    MinLength(usize),
    /// Fixed-size list of numbers within [min, max]
    Vector {
        /// Required length
        len: usize,
        /// Inclusive lower bound of every entry
        min: f64,
        /// Inclusive upper bound of every entry
        max: f64,
    },
    /// Fixed-size list of fixed-size lists of numbers within [min, max]
    Matrix {
        /// Required number of rows
        rows: usize,
        /// Required length of every row
        cols: usize,
        /// Inclusive lower bound of every entry
        min: f64,
        /// Inclusive upper bound of every entry
        max: f64,
    },
}

impl SchemaValidator {
    /// Create new schema validator with default constraints
    pub fn new() -> Self {
        let mut validator = Self { constraints: BTreeMap::new() };
        validator.add_converter_constraints("converter");
        validator.add_harvester_constraints("converter.harvester");
        validator.add_replay_constraints("replay");
        validator
    }

    fn range(&mut self, path: String, min: f64, max: f64) {
        self.constraints.insert(path, FieldConstraint::Range { min, max });
    }

    fn int_range(&mut self, path: String, min: i64, max: i64) {
        self.constraints.insert(path, FieldConstraint::IntRange { min, max });
    }

    fn add_converter_constraints(&mut self, prefix: &str) {
        let p = |field: &str| format!("{}.{}", prefix, field);

        self.range(p("interval_startup_delay_drain_ms"), 0.0, limits::MAX_STARTUP_DELAY_MS);
        self.range(p("V_input_max_mV"), 0.0, limits::MAX_VOLTAGE_MV);
        self.range(p("I_input_max_mA"), 0.0, limits::MAX_INPUT_CURRENT_MA);
        self.range(p("V_input_drop_mV"), 0.0, limits::MAX_DROP_MV);
        self.range(p("R_input_mOhm"), 0.0, limits::MAX_RESISTANCE_MOHM);

        self.range(p("C_intermediate_uF"), 0.0, limits::MAX_INTERMEDIATE_CAPACITANCE_UF);
        self.range(p("V_intermediate_init_mV"), 0.0, limits::MAX_VOLTAGE_MV);
        self.range(p("I_intermediate_leak_nA"), 0.0, limits::MAX_LEAK_CURRENT_NA);

        self.range(p("V_intermediate_enable_threshold_mV"), 0.0, limits::MAX_VOLTAGE_MV);
        self.range(p("V_intermediate_disable_threshold_mV"), 0.0, limits::MAX_VOLTAGE_MV);
        self.range(p("interval_check_thresholds_ms"), 0.0, limits::MAX_CHECK_INTERVAL_MS);

        self.range(p("V_pwr_good_enable_threshold_mV"), 0.0, limits::MAX_VOLTAGE_MV);
        self.range(p("V_pwr_good_disable_threshold_mV"), 0.0, limits::MAX_VOLTAGE_MV);

        self.range(p("C_output_uF"), 0.0, limits::MAX_OUTPUT_CAPACITANCE_UF);
        self.range(p("V_output_log_gpio_threshold_mV"), 0.0, limits::MAX_GPIO_THRESHOLD_MV);

        self.range(p("V_input_boost_threshold_mV"), 0.0, limits::MAX_VOLTAGE_MV);
        self.range(p("V_intermediate_max_mV"), 0.0, limits::MAX_VOLTAGE_MV);

        self.constraints.insert(
            p("LUT_input_efficiency"),
            FieldConstraint::Matrix { rows: lut::LUT_SIZE, cols: lut::LUT_SIZE, min: 0.0, max: 1.0 },
        );
        self.int_range(p("LUT_input_V_min_log2_uV"), lut::MIN_LOG2_V as i64, lut::MAX_LOG2 as i64);
        self.int_range(p("LUT_input_I_min_log2_nA"), lut::MIN_LOG2_I as i64, lut::MAX_LOG2 as i64);

        self.range(p("V_output_mV"), 0.0, limits::MAX_OUTPUT_VOLTAGE_MV);
        self.range(p("V_buck_drop_mV"), 0.0, limits::MAX_OUTPUT_VOLTAGE_MV);

        self.constraints.insert(
            p("LUT_output_efficiency"),
            FieldConstraint::Vector { len: lut::LUT_SIZE, min: 0.0, max: 1.0 },
        );
        self.int_range(p("LUT_output_I_min_log2_nA"), lut::MIN_LOG2_I as i64, lut::MAX_LOG2 as i64);
    }

    fn add_harvester_constraints(&mut self, prefix: &str) {
        let p = |field: &str| format!("{}.{}", prefix, field);

        self.constraints.insert(p("name"), FieldConstraint::MinLength(4));
        self.constraints.insert(
            p("algorithm"),
            FieldConstraint::OneOf(
                ["neutral", "isc_voc", "ivcurve", "cv", "mppt_voc", "mppt_po", "mppt_opt"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
        );
        self.int_range(
            p("samples_n"),
            limits::MIN_WINDOW_SAMPLES as i64,
            limits::MAX_WINDOW_SAMPLES as i64,
        );
        self.range(p("voltage_mV"), 0.0, limits::MAX_HARVEST_VOLTAGE_MV);
        self.range(p("voltage_min_mV"), 0.0, limits::MAX_HARVEST_VOLTAGE_MV);
        self.range(p("voltage_max_mV"), 0.0, limits::MAX_HARVEST_VOLTAGE_MV);
        self.range(p("current_limit_uA"), limits::MIN_CURRENT_LIMIT_UA, limits::MAX_CURRENT_LIMIT_UA);
        self.range(p("voltage_step_mV"), limits::MIN_VOLTAGE_STEP_MV, limits::MAX_VOLTAGE_STEP_MV);
        self.range(p("setpoint_n"), 0.0, 1.0);
        self.range(p("interval_ms"), limits::MIN_INTERVAL_MS, limits::MAX_INTERVAL_MS);
        self.range(p("duration_ms"), limits::MIN_INTERVAL_MS, limits::MAX_INTERVAL_MS);
        self.int_range(p("wait_cycles"), 0, limits::MAX_WAIT_CYCLES as i64);
    }

    fn add_replay_constraints(&mut self, prefix: &str) {
        let p = |field: &str| format!("{}.{}", prefix, field);

        self.int_range(
            p("samples_per_buffer"),
            sampling::MIN_SAMPLES_PER_BUFFER as i64,
            sampling::MAX_SAMPLES_PER_BUFFER as i64,
        );
        self.int_range(p("prefetch_depth"), 0, sampling::MAX_PREFETCH_DEPTH as i64);
        self.int_range(p("max_buffers"), 1, i64::MAX);
    }

    /// Validate configuration value against schema
    pub fn validate_field(&self, field_path: &str, value: &toml::Value) -> Result<(), ValidationError> {
        if let Some(constraint) = self.constraints.get(field_path) {
            self.check_constraint(field_path, value, constraint)
        } else {
            Ok(()) // Unknown fields are allowed for extensibility
        }
    }

    /// Validate entire configuration
    pub fn validate_config(&self, config: &toml::Value) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        self.validate_recursive("", config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate one section of a configuration, e.g. a serialized `ConverterConfig`
    pub fn validate_section(&self, section: &str, value: &toml::Value) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        self.validate_recursive(section, value, &mut errors);
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Check cross-field dependencies
    pub fn validate_dependencies(&self, config: &toml::Value) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let (Some(v_min), Some(v_max)) = (
            self.get_number(config, "converter.harvester.voltage_min_mV"),
            self.get_number(config, "converter.harvester.voltage_max_mV"),
        ) {
            if v_min > v_max {
                errors.push(ValidationError::new(
                    "converter.harvester.voltage_min_mV",
                    "Minimum voltage must not exceed maximum voltage",
                    format!("min: {}, max: {}", v_min, v_max),
                ));
            }
        }

        if let (Some(v_en), Some(v_dis)) = (
            self.get_number(config, "converter.V_intermediate_enable_threshold_mV"),
            self.get_number(config, "converter.V_intermediate_disable_threshold_mV"),
        ) {
            if v_dis > v_en {
                errors.push(ValidationError::new(
                    "converter.V_intermediate_disable_threshold_mV",
                    "Disable threshold must not exceed enable threshold",
                    format!("enable: {}, disable: {}", v_en, v_dis),
                ));
            }
        }

        if let (Some(pg_en), Some(pg_dis)) = (
            self.get_number(config, "converter.V_pwr_good_enable_threshold_mV"),
            self.get_number(config, "converter.V_pwr_good_disable_threshold_mV"),
        ) {
            if pg_dis > pg_en {
                errors.push(ValidationError::new(
                    "converter.V_pwr_good_disable_threshold_mV",
                    "Power-good disable threshold must not exceed enable threshold",
                    format!("enable: {}, disable: {}", pg_en, pg_dis),
                ));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_recursive(&self, prefix: &str, value: &toml::Value, errors: &mut Vec<ValidationError>) {
        match value {
            toml::Value::Table(table) => {
                for (key, val) in table {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", prefix, key)
                    };

                    self.validate_recursive(&path, val, errors);
                }
            }
            _ => {
                if let Err(err) = self.validate_field(prefix, value) {
                    errors.push(err);
                }
            }
        }
    }

    fn check_constraint(&self, field: &str, value: &toml::Value, constraint: &FieldConstraint) -> Result<(), ValidationError> {
        match constraint {
            FieldConstraint::Range { min, max } => {
                if let Some(val) = as_number(value) {
                    if !val.is_finite() || val < *min || val > *max {
                        return Err(ValidationError::new(
                            field,
                            format!("Value must be between {} and {}", min, max),
                            val,
                        ));
                    }
                }
            }
            FieldConstraint::IntRange { min, max } => {
                if let Some(val) = value.as_integer() {
                    if val < *min || val > *max {
                        return Err(ValidationError::new(
                            field,
                            format!("Value must be between {} and {}", min, max),
                            val,
                        ));
                    }
                }
            }
            FieldConstraint::OneOf(options) => {
                if let Some(val) = value.as_str() {
                    let val_lower = val.to_lowercase();
                    if !options.iter().any(|opt| opt.to_lowercase() == val_lower) {
                        return Err(ValidationError::new(
                            field,
                            format!("Value must be one of: {}", options.join(", ")),
                            val,
                        ));
                    }
                }
            }
            FieldConstraint::MinLength(min_len) => {
                if let Some(val) = value.as_str() {
                    if val.trim().len() < *min_len {
                        return Err(ValidationError::new(
                            field,
                            format!("Minimum length is {}", min_len),
                            val,
                        ));
                    }
                }
            }
            FieldConstraint::Vector { len, min, max } => {
                check_vector(field, value, *len, *min, *max)?;
            }
            FieldConstraint::Matrix { rows, cols, min, max } => {
                let table = value.as_array().ok_or_else(|| {
                    ValidationError::new(field, "Expected a list of rows", value)
                })?;
                if table.len() != *rows {
                    return Err(ValidationError::new(
                        field,
                        format!("Expected {} rows", rows),
                        table.len(),
                    ));
                }
                for (idx, row) in table.iter().enumerate() {
                    check_vector(&format!("{}[{}]", field, idx), row, *cols, *min, *max)?;
                }
            }
        }
        Ok(())
    }

    fn get_number(&self, config: &toml::Value, path: &str) -> Option<f64> {
        self.get_nested_value(config, path).and_then(as_number)
    }

    fn get_nested_value<'a>(&self, config: &'a toml::Value, path: &str) -> Option<&'a toml::Value> {
        let mut current = config;

        for part in path.split('.') {
            current = current.as_table()?.get(part)?;
        }

        Some(current)
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn as_number(value: &toml::Value) -> Option<f64> {
    match value {
        toml::Value::Float(f) => Some(*f),
        toml::Value::Integer(i) => Some(*i as f64),
        _ => None,
    }
}

fn check_vector(field: &str, value: &toml::Value, len: usize, min: f64, max: f64) -> Result<(), ValidationError> {
    let items = value
        .as_array()
        .ok_or_else(|| ValidationError::new(field, "Expected a list", value))?;
    if items.len() != len {
        return Err(ValidationError::new(
            field,
            format!("Expected exactly {} entries", len),
            items.len(),
        ));
    }
    for (idx, item) in items.iter().enumerate() {
        match as_number(item) {
            Some(val) if val.is_finite() && val >= min && val <= max => {}
            _ => {
                return Err(ValidationError::new(
                    &format!("{}[{}]", field, idx),
                    format!("Value must be between {} and {}", min, max),
                    item,
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_validator_creation() {
        let validator = SchemaValidator::new();
        assert!(!validator.constraints.is_empty());
    }

    #[test]
    fn test_integer_accepted_for_float_range() {
        let validator = SchemaValidator::new();
        let value = toml::Value::Integer(2400);
        assert!(validator.validate_field("converter.V_output_mV", &value).is_ok());
    }

    #[test]
    fn test_out_of_range_voltage() {
        let validator = SchemaValidator::new();
        let value = toml::Value::Float(12_000.0);
        let err = validator
            .validate_field("converter.V_intermediate_max_mV", &value)
            .unwrap_err();
        assert_eq!(err.field, "converter.V_intermediate_max_mV");
        assert_eq!(err.value, "12000");
    }

    #[test]
    fn test_lut_dimension_check() {
        let validator = SchemaValidator::new();
        let short_row = toml::Value::Array(vec![toml::Value::Float(1.0); 11]);
        let lut = toml::Value::Array(vec![short_row; 12]);
        let err = validator
            .validate_field("converter.LUT_input_efficiency", &lut)
            .unwrap_err();
        assert!(err.field.starts_with("converter.LUT_input_efficiency[0]"));
    }

    #[test]
    fn test_lut_entry_above_one() {
        let validator = SchemaValidator::new();
        let mut entries = vec![toml::Value::Float(0.5); 12];
        entries[3] = toml::Value::Float(1.2);
        let err = validator
            .validate_field("converter.LUT_output_efficiency", &toml::Value::Array(entries))
            .unwrap_err();
        assert_eq!(err.field, "converter.LUT_output_efficiency[3]");
    }

    #[test]
    fn test_algorithm_validation() {
        let validator = SchemaValidator::new();
        let valid = toml::Value::String("mppt_po".to_string());
        assert!(validator.validate_field("converter.harvester.algorithm", &valid).is_ok());

        let invalid = toml::Value::String("mppt_magic".to_string());
        assert!(validator.validate_field("converter.harvester.algorithm", &invalid).is_err());
    }

    #[test]
    fn test_dependency_hysteresis_order() {
        let validator = SchemaValidator::new();
        let config: toml::Value = toml::from_str(
            r#"
            [converter]
            V_intermediate_enable_threshold_mV = 2000.0
            V_intermediate_disable_threshold_mV = 2500.0
            "#,
        )
        .unwrap();

        let errors = validator.validate_dependencies(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "converter.V_intermediate_disable_threshold_mV");
    }
}
