// src/config/loader.rs
//! Configuration loader: defaults, layered TOML files and environment overrides

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{constants::paths, schema_validator::SchemaValidator, SimulationConfig};
use crate::error::{VsrcError, VsrcErrorBuilder, VsrcResult};

/// Prefix of environment variables that override configuration keys
pub const ENV_PREFIX: &str = "VSRC_";
/// Separator between nested keys inside one environment variable name
pub const ENV_SEPARATOR: &str = "__";

/// Configuration loader
///
/// Files are merged in order on top of [`SimulationConfig::default`], later
/// files win. `VSRC_CONVERTER__V_OUTPUT_MV=1800` overrides
/// `converter.V_output_mV`; key segments match case-insensitively.
pub struct ConfigLoader {
    config_paths: Vec<PathBuf>,
    schema_validator: SchemaValidator,
    current_config: SimulationConfig,
}

impl ConfigLoader {
    /// Create new configuration loader
    pub fn new() -> Self {
        Self::with_paths(Self::discover_config_paths())
    }

    /// Create loader with custom paths
    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            config_paths: paths,
            schema_validator: SchemaValidator::new(),
            current_config: SimulationConfig::default(),
        }
    }

    /// Load simulation configuration with validation
    pub fn load_simulation_config(&mut self) -> VsrcResult<SimulationConfig> {
        let config = self.load_and_merge_configs(true)?;
        self.current_config = config.clone();
        Ok(config)
    }

    /// Same as [`Self::load_simulation_config`] without `VSRC_*` overrides
    pub fn load_without_environment(&mut self) -> VsrcResult<SimulationConfig> {
        let config = self.load_and_merge_configs(false)?;
        self.current_config = config.clone();
        Ok(config)
    }

    /// Get current configuration
    pub fn current_config(&self) -> &SimulationConfig {
        &self.current_config
    }

    /// Validate configuration without loading
    pub fn validate_config_file<P: AsRef<Path>>(&self, path: P) -> VsrcResult<()> {
        let toml_value = self.load_config_file(path)?;
        self.validate_value(&toml_value)
    }

    /// Export current configuration to file
    pub fn export_config<P: AsRef<Path>>(&self, path: P) -> VsrcResult<()> {
        let toml_content = toml::to_string_pretty(&self.current_config)?;
        std::fs::write(path.as_ref(), toml_content).map_err(|e| VsrcError::Io {
            operation: format!("write {}", path.as_ref().display()),
            reason: e.to_string(),
        })
    }

    fn validate_value(&self, value: &toml::Value) -> VsrcResult<()> {
        self.schema_validator
            .validate_config(value)
            .map_err(|errors| VsrcErrorBuilder::new("config_loader", "validate").validation(errors))?;

        self.schema_validator
            .validate_dependencies(value)
            .map_err(|errors| VsrcErrorBuilder::new("config_loader", "validate").validation(errors))
    }

    fn load_and_merge_configs(&self, with_environment: bool) -> VsrcResult<SimulationConfig> {
        let mut merged_config = toml::Value::try_from(SimulationConfig::default())?;

        for config_path in &self.config_paths {
            if !config_path.exists() {
                continue; // optional layer
            }
            let file_config = self.load_config_file(config_path)?;
            debug!(path = %config_path.display(), "Merging configuration file");
            merge_toml_values(&mut merged_config, file_config);
        }

        if with_environment {
            let overrides: Vec<(String, String)> = std::env::vars()
                .filter(|(key, _)| key.starts_with(ENV_PREFIX))
                .collect();
            apply_environment_overrides(&mut merged_config, &overrides);
        }

        self.validate_value(&merged_config)?;

        let config: SimulationConfig = merged_config.try_into()?;
        config
            .validate_consistency()
            .map_err(|errors| VsrcErrorBuilder::new("config_loader", "load").validation(errors))?;

        info!(
            files = self.config_paths.len(),
            harvester = %config.converter.harvester.algorithm,
            "Simulation configuration loaded"
        );
        Ok(config)
    }

    fn load_config_file<P: AsRef<Path>>(&self, path: P) -> VsrcResult<toml::Value> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| VsrcError::Io {
            operation: format!("read {}", path.display()),
            reason: e.to_string(),
        })?;
        Ok(toml::from_str(&content)?)
    }

    fn discover_config_paths() -> Vec<PathBuf> {
        vec![
            PathBuf::from(paths::DEFAULT_CONFIG_FILE),
            PathBuf::from(paths::LOCAL_CONFIG_FILE),
        ]
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_toml_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                if let Some(base_value) = base_table.get_mut(&key) {
                    merge_toml_values(base_value, value);
                } else {
                    base_table.insert(key, value);
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value;
        }
    }
}

fn apply_environment_overrides(config: &mut toml::Value, vars: &[(String, String)]) {
    for (key, value) in vars {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<&str> = stripped.split(ENV_SEPARATOR).collect();
        if set_nested_value(config, &path, parse_env_value(value)) {
            debug!(variable = %key, "Applied environment override");
        }
    }
}

fn parse_env_value(value: &str) -> toml::Value {
    if let Ok(int_val) = value.parse::<i64>() {
        toml::Value::Integer(int_val)
    } else if let Ok(float_val) = value.parse::<f64>() {
        toml::Value::Float(float_val)
    } else if let Ok(bool_val) = value.parse::<bool>() {
        toml::Value::Boolean(bool_val)
    } else {
        toml::Value::String(value.to_string())
    }
}

/// Replace an existing key; unknown paths are ignored
fn set_nested_value(config: &mut toml::Value, path: &[&str], value: toml::Value) -> bool {
    let Some((last, parents)) = path.split_last() else {
        return false;
    };

    let mut current = config;
    for part in parents {
        let Some(table) = current.as_table_mut() else {
            return false;
        };
        let Some(key) = find_key(table, part) else {
            return false;
        };
        let Some(next) = table.get_mut(&key) else {
            return false;
        };
        current = next;
    }

    let Some(table) = current.as_table_mut() else {
        return false;
    };
    let Some(key) = find_key(table, last) else {
        return false;
    };
    let value = match (table.get(&key), value) {
        // integer strings for float fields stay floats
        (Some(toml::Value::Float(_)), toml::Value::Integer(i)) => toml::Value::Float(i as f64),
        (_, value) => value,
    };
    table.insert(key, value);
    true
}

fn find_key(table: &toml::value::Table, name: &str) -> Option<String> {
    table.keys().find(|k| k.eq_ignore_ascii_case(name)).cloned()
}
