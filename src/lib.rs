//! vsrc-core: virtual energy-harvesting source simulation
//!
//! This library turns human-facing descriptions of an energy harvester and a
//! power converter into the integer register sets used by the emulation
//! firmware, and replays recorded energy environments through bit-faithful
//! models of both. It features:
//!
//! - Configuration quantizer with validation and derived converter constants
//! - Harvester model (constant voltage, open-circuit, perturb & observe, optimal tracking)
//! - Converter model with storage capacitor, output hysteresis and efficiency tables
//! - Calibration mapping between raw ADC/DAC codes and SI units
//! - Replay driver with background prefetch and parallel batch runs
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use vsrc_core::calibration::{CalibrationEmulator, CalibrationSeries};
//! use vsrc_core::config::{ConverterConfig, EnergyDType, ReplaySettings};
//! use vsrc_core::quantize::{quantize, QuantizeOptions};
//! use vsrc_core::replay::{MemorySource, OutputLoad, ReplayDriver};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let quantized = quantize(&ConverterConfig::default(), None, &QuantizeOptions::default())?;
//!     let source = MemorySource::from_si(
//!         CalibrationSeries::default(),
//!         EnergyDType::Ivsample,
//!         None,
//!         &[3.0; 1_000],
//!         &[1e-3; 1_000],
//!         100,
//!     )?;
//!
//!     let driver = ReplayDriver::new(quantized, CalibrationEmulator::default(), ReplaySettings::default());
//!     let report = driver.run(source, OutputLoad::Resistor { ohm: 1_000.0 }, None)?;
//!     println!("harvested {} Ws", report.energy_in_ws);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod calibration;
pub mod config;
pub mod error;
pub mod model;
pub mod quantize;
pub mod replay;
pub mod utils;

// Re-export commonly used types for convenience
pub use calibration::{CalibrationEmulator, CalibrationHarvester, CalibrationPair, CalibrationSeries};
pub use config::{ConverterConfig, EnergyDType, HarvestAlgorithm, HarvesterConfig, ReplaySettings, SimulationConfig};
pub use error::{VsrcError, VsrcResult};
pub use model::{ConverterModel, HarvesterModel, VirtualSource};
pub use quantize::{quantize, ConverterRegisters, HarvesterRegisters, QuantizeOptions, QuantizedConfig};
pub use replay::{OutputLoad, ReplayDriver, ReplayReport, SampleBuffer, SampleSink, SampleSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: "Virtual energy-harvesting source simulation".to_string(),
        features: vec![
            "Configuration quantizer".to_string(),
            "Harvester model".to_string(),
            "Converter model".to_string(),
            "Calibration mapping".to_string(),
            "Replay driver".to_string(),
        ],
    }
}

/// Library version information
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Library name
    pub name: String,
    /// Version string
    pub version: String,
    /// Description
    pub description: String,
    /// List of features
    pub features: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        let info = version_info();
        assert_eq!(info.name, NAME);
        assert_eq!(info.version, VERSION);
        assert_eq!(info.features.len(), 5);
    }

    #[test]
    fn test_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "vsrc-core");
    }
}
