// src/config/harvester.rs
//! Human-facing harvester configuration
//!
//! A harvester selects the operating point on a recorded energy environment.
//! The values here are in mV, µA and ms; [`crate::quantize`] turns them into
//! the firmware registers.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::constants::{tracking::TIMING_RATIO_TOLERANCE, sampling::SAMPLERATE_SPS};
use crate::config::schema_validator::{SchemaValidator, ValidationError};
use crate::error::{VsrcErrorBuilder, VsrcResult};

/// Datatype of an energy environment (input) or of a harvester's output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyDType {
    /// One operating point per timestep
    #[default]
    Ivsample,
    /// A voltage sweep per window of samples
    Ivcurve,
    /// Open-circuit voltage and short-circuit current per timestep
    IscVoc,
}

impl EnergyDType {
    /// Name used in configs and file metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            EnergyDType::Ivsample => "ivsample",
            EnergyDType::Ivcurve => "ivcurve",
            EnergyDType::IscVoc => "isc_voc",
        }
    }
}

impl fmt::Display for EnergyDType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracking algorithm of the virtual harvester
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestAlgorithm {
    /// Placeholder without behavior, never valid for a resolved config
    Neutral,
    /// Pass-through for isc_voc environments
    IscVoc,
    /// Curve tracker that reduces ivcurves to ivsamples
    Ivcurve,
    /// Constant voltage
    Cv,
    /// Fractional open-circuit voltage
    MpptVoc,
    /// Perturb and observe
    MpptPo,
    /// Ideal maximum-power tracking
    MpptOpt,
}

impl HarvestAlgorithm {
    /// Bit position consumed by the firmware
    pub fn number(&self) -> u32 {
        match self {
            HarvestAlgorithm::Neutral => 0,
            HarvestAlgorithm::IscVoc => 1 << 0,
            HarvestAlgorithm::Ivcurve => 1 << 4,
            HarvestAlgorithm::Cv => 1 << 8,
            HarvestAlgorithm::MpptVoc => 1 << 12,
            HarvestAlgorithm::MpptPo => 1 << 13,
            HarvestAlgorithm::MpptOpt => 1 << 14,
        }
    }

    /// Datatype the algorithm produces
    pub fn output_dtype(&self) -> EnergyDType {
        match self {
            HarvestAlgorithm::IscVoc => EnergyDType::IscVoc,
            HarvestAlgorithm::Ivcurve => EnergyDType::Ivcurve,
            _ => EnergyDType::Ivsample,
        }
    }

    /// Name used in configs
    pub fn as_str(&self) -> &'static str {
        match self {
            HarvestAlgorithm::Neutral => "neutral",
            HarvestAlgorithm::IscVoc => "isc_voc",
            HarvestAlgorithm::Ivcurve => "ivcurve",
            HarvestAlgorithm::Cv => "cv",
            HarvestAlgorithm::MpptVoc => "mppt_voc",
            HarvestAlgorithm::MpptPo => "mppt_po",
            HarvestAlgorithm::MpptOpt => "mppt_opt",
        }
    }
}

impl fmt::Display for HarvestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Harvester configuration as written by users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvesterConfig {
    /// Fixture name, free text
    pub name: String,
    /// Tracking algorithm
    pub algorithm: HarvestAlgorithm,

    /// Samples per curve window
    pub samples_n: u32,

    /// Starting point for some algorithms (mppt_po) and setpoint for cv
    #[serde(rename = "voltage_mV")]
    pub voltage_mv: f64,
    /// Lower end of the sweep
    #[serde(rename = "voltage_min_mV")]
    pub voltage_min_mv: f64,
    /// Upper end of the sweep
    #[serde(rename = "voltage_max_mV")]
    pub voltage_max_mv: f64,
    /// Boundary for open-circuit detection and trajectory limiting
    #[serde(rename = "current_limit_uA")]
    pub current_limit_ua: f64,
    /// Perturbation step of mppt_po
    #[serde(rename = "voltage_step_mV")]
    pub voltage_step_mv: f64,

    /// Fraction of the open-circuit voltage used by mppt_voc
    pub setpoint_n: f64,
    /// Between start of measurements
    pub interval_ms: f64,
    /// Of one measurement
    pub duration_ms: f64,
    /// Direction of the sawtooth
    pub rising: bool,
    /// Interpolate the crossing instead of taking the nearer curve point
    pub enable_linear_extrapolation: bool,

    /// First cycle samples, further cycles wait for the analog frontend
    pub wait_cycles: u32,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            name: "mppt_opt".to_string(),
            algorithm: HarvestAlgorithm::MpptOpt,
            samples_n: 8,
            voltage_mv: 2_500.0,
            voltage_min_mv: 0.0,
            voltage_max_mv: 5_000.0,
            current_limit_ua: 50_000.0,
            voltage_step_mv: 1.0,
            setpoint_n: 0.70,
            interval_ms: 100.0,
            duration_ms: 0.1,
            rising: true,
            enable_linear_extrapolation: true,
            wait_cycles: 1,
        }
    }
}

impl HarvesterConfig {
    /// Config for one algorithm with every other field at its default
    pub fn for_algorithm(algorithm: HarvestAlgorithm) -> Self {
        Self {
            name: algorithm.as_str().to_string(),
            algorithm,
            ..Self::default()
        }
    }

    /// Range-check every field
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let value = toml::Value::try_from(self).map_err(|e| {
            vec![ValidationError::new("harvester", format!("not serializable: {}", e), &self.name)]
        })?;

        let validator = SchemaValidator::new();
        let mut errors = match validator.validate_section("converter.harvester", &value) {
            Ok(()) => Vec::new(),
            Err(errors) => errors,
        };

        if self.voltage_min_mv > self.voltage_max_mv {
            errors.push(ValidationError::new(
                "converter.harvester.voltage_min_mV",
                "Minimum voltage must not exceed maximum voltage",
                format!("min: {}, max: {}", self.voltage_min_mv, self.voltage_max_mv),
            ));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Widen the voltage bounds so that the starting voltage lies inside them
    pub fn post_adjust(mut self) -> VsrcResult<Self> {
        if self.voltage_min_mv > self.voltage_max_mv {
            return Err(VsrcErrorBuilder::new("harvester", "post_adjust").invalid_field(
                "voltage_min_mV",
                self.voltage_min_mv,
                &format!("exceeds voltage_max_mV ({})", self.voltage_max_mv),
            ));
        }
        if self.voltage_mv > self.voltage_max_mv {
            debug!(
                harvester = %self.name,
                voltage_mV = self.voltage_mv,
                "Raising voltage_max_mV to starting voltage"
            );
            self.voltage_max_mv = self.voltage_mv;
        }
        if self.voltage_mv < self.voltage_min_mv {
            debug!(
                harvester = %self.name,
                voltage_mV = self.voltage_mv,
                "Lowering voltage_min_mV to starting voltage"
            );
            self.voltage_min_mv = self.voltage_mv;
        }
        Ok(self)
    }

    /// Samples covered by one window including wait cycles
    pub fn window_length(&self) -> u32 {
        self.samples_n.saturating_mul(1 + self.wait_cycles)
    }

    /// Interval and duration after applying the model-internal timing constraints
    pub fn calc_timings_ms(&self, for_emulation: bool) -> (f64, f64) {
        let sps = SAMPLERATE_SPS as f64;
        let mut time_min_ms = (1 + self.wait_cycles) as f64 * 1_000.0 / sps;
        if for_emulation {
            let window_ms = self.window_length() as f64 * 1_000.0 / sps;
            time_min_ms = time_min_ms.max(window_ms);
        }

        let interval_ms = self.interval_ms.max(time_min_ms).min(1_000_000.0);
        let duration_ms = self.duration_ms.max(time_min_ms).min(interval_ms);

        let ratio = (duration_ms / interval_ms) / (self.duration_ms / self.interval_ms);
        if (ratio - 1.0) > TIMING_RATIO_TOLERANCE {
            debug!(
                harvester = %self.name,
                ratio,
                "Ratio between interval and duration changed due to timing constraints"
            );
        }
        (interval_ms, duration_ms)
    }

    /// Window size the firmware should use for the given input datatype
    pub fn calc_window_size(
        &self,
        dtype_in: EnergyDType,
        window_size: Option<u32>,
        for_emulation: bool,
    ) -> VsrcResult<u32> {
        if !for_emulation {
            return Ok(self.window_length());
        }
        match dtype_in {
            EnergyDType::Ivsample => Ok(0),
            EnergyDType::Ivcurve => window_size.ok_or_else(|| {
                VsrcErrorBuilder::new("harvester", "calc_window_size").invalid_field(
                    "window_size",
                    "none",
                    "ivcurve input requires the samples per curve sweep",
                )
            }),
            EnergyDType::IscVoc => Ok(self.samples_n),
        }
    }

    /// Bit0 emulation, bit1 rising sweep, bit2 linear extrapolation
    pub fn calc_hrv_mode(&self, for_emulation: bool) -> u32 {
        u32::from(for_emulation)
            | (u32::from(self.rising) << 1)
            | (u32::from(self.enable_linear_extrapolation) << 2)
    }

    /// Algorithm number, rejecting combinations the firmware cannot run
    pub fn calc_algorithm_num(&self, for_emulation: bool) -> VsrcResult<u32> {
        if self.algorithm == HarvestAlgorithm::Neutral {
            return Err(VsrcErrorBuilder::new("harvester", "calc_algorithm_num").invalid_field(
                "algorithm",
                self.algorithm,
                "a resolved harvester cannot be neutral",
            ));
        }
        if for_emulation && self.algorithm.output_dtype() != EnergyDType::Ivsample {
            return Err(VsrcErrorBuilder::new("harvester", "calc_algorithm_num").invalid_field(
                "algorithm",
                self.algorithm,
                &format!(
                    "emulation needs ivsample output, algorithm produces {}",
                    self.algorithm.output_dtype()
                ),
            ));
        }
        Ok(self.algorithm.number())
    }

    /// Step size of the sweep; curve recorders spread the window over [min, max]
    pub fn calc_voltage_step_mv(&self) -> f64 {
        if self.algorithm == HarvestAlgorithm::Ivcurve && self.samples_n > 1 {
            (self.voltage_max_mv - self.voltage_min_mv) / (self.samples_n - 1) as f64
        } else {
            self.voltage_step_mv
        }
    }
}
