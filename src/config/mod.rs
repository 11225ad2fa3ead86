// src/config/mod.rs
//! Configuration management: human-facing configs, constants, schema and loader

pub mod constants;
pub mod schema_validator;
pub mod loader;
pub mod converter;
pub mod harvester;

pub use constants::*;
pub use schema_validator::{SchemaValidator, ValidationError};
pub use loader::ConfigLoader;
pub use converter::{ConverterConfig, InputEfficiencyLut, OutputEfficiencyLut};
pub use harvester::{EnergyDType, HarvestAlgorithm, HarvesterConfig};

use serde::{Deserialize, Serialize};

/// Complete simulation configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct SimulationConfig {
    /// Buffering of the replay run
    #[serde(default)]
    pub replay: ReplaySettings,
    /// Converter and its harvester
    #[serde(default)]
    pub converter: ConverterConfig,
}

/// Buffering behavior of a replay run
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ReplaySettings {
    /// Samples per buffer written to the output sink
    #[serde(default = "defaults::samples_per_buffer")]
    pub samples_per_buffer: usize,

    /// Buffers read ahead by a background thread, 0 reads inline
    #[serde(default = "defaults::prefetch_depth")]
    pub prefetch_depth: usize,

    /// Stop after this many input buffers
    #[serde(default)]
    pub max_buffers: Option<usize>,
}

/// Default value providers using constants
mod defaults {
    use crate::config::constants::*;

    pub fn samples_per_buffer() -> usize { sampling::SAMPLES_PER_BUFFER }
    pub fn prefetch_depth() -> usize { sampling::DEFAULT_PREFETCH_DEPTH }
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            samples_per_buffer: defaults::samples_per_buffer(),
            prefetch_depth: defaults::prefetch_depth(),
            max_buffers: None,
        }
    }
}

impl ReplaySettings {
    /// Settings that read every buffer inline, without a prefetch thread
    pub fn inline() -> Self {
        Self {
            prefetch_depth: 0,
            ..Self::default()
        }
    }

    /// Stop after `max_buffers` input buffers
    pub fn with_max_buffers(mut self, max_buffers: usize) -> Self {
        self.max_buffers = Some(max_buffers);
        self
    }
}

impl SimulationConfig {
    /// Validate configuration consistency
    pub fn validate_consistency(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = match self.converter.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };

        let replay = &self.replay;
        if replay.samples_per_buffer < sampling::MIN_SAMPLES_PER_BUFFER
            || replay.samples_per_buffer > sampling::MAX_SAMPLES_PER_BUFFER
        {
            errors.push(ValidationError::new(
                "replay.samples_per_buffer",
                format!(
                    "Value must be between {} and {}",
                    sampling::MIN_SAMPLES_PER_BUFFER,
                    sampling::MAX_SAMPLES_PER_BUFFER
                ),
                replay.samples_per_buffer,
            ));
        }
        if replay.prefetch_depth > sampling::MAX_PREFETCH_DEPTH {
            errors.push(ValidationError::new(
                "replay.prefetch_depth",
                format!("Value must not exceed {}", sampling::MAX_PREFETCH_DEPTH),
                replay.prefetch_depth,
            ));
        }
        if replay.max_buffers == Some(0) {
            errors.push(ValidationError::new(
                "replay.max_buffers",
                "Limit must allow at least one buffer",
                0,
            ));
        }
        if self.converter.harvester.algorithm == HarvestAlgorithm::Neutral {
            errors.push(ValidationError::new(
                "converter.harvester.algorithm",
                "A resolved harvester cannot be neutral",
                HarvestAlgorithm::Neutral,
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = SimulationConfig::default();
        assert_eq!(config.replay.samples_per_buffer, sampling::SAMPLES_PER_BUFFER);
        assert_eq!(config.converter.harvester.algorithm, HarvestAlgorithm::MpptOpt);
        assert!(config.validate_consistency().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = SimulationConfig {
            replay: ReplaySettings::inline().with_max_buffers(3),
            ..SimulationConfig::default()
        };
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: SimulationConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_config_validation() {
        let mut config = SimulationConfig::default();
        config.replay.samples_per_buffer = 0;
        config.replay.max_buffers = Some(0);

        let errors = config.validate_consistency().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_neutral_harvester_rejected() {
        let mut config = SimulationConfig::default();
        config.converter.harvester = HarvesterConfig::for_algorithm(HarvestAlgorithm::Neutral);
        assert!(config.validate_consistency().is_err());
    }
}
