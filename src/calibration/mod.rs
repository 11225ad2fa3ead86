//! Calibration mapping between raw ADC/DAC codes and SI units
//!
//! Every channel is described by a [`CalibrationPair`] with
//! `si = raw * gain + offset`. Conversions never fail: results below zero
//! clamp to zero and raw codes saturate at the u32 range.
//!
//! Hardware defaults are derived from the analog front-end of the observer
//! cape, see [`crate::config::constants::cape`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::constants::{cape, trace};
use crate::error::{VsrcErrorBuilder, VsrcResult};
use crate::utils::fixed_point::round_to_u32;

/// Linear mapping of one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPair {
    /// SI units per raw code
    pub gain: f64,
    /// SI value of raw code 0
    #[serde(default)]
    pub offset: f64,
}

impl CalibrationPair {
    /// Pair from gain and offset
    pub const fn new(gain: f64, offset: f64) -> Self {
        Self { gain, offset }
    }

    /// Raw code to SI value, negative results clamp to zero
    pub fn raw_to_si(&self, raw: u32) -> f64 {
        let value = raw as f64 * self.gain + self.offset;
        if value < 0.0 { 0.0 } else { value }
    }

    /// SI value to the nearest raw code, saturating into u32
    pub fn si_to_raw(&self, si: f64) -> u32 {
        round_to_u32((si - self.offset) / self.gain)
    }

    /// [`CalibrationPair::raw_to_si`] over a column
    pub fn raw_to_si_slice(&self, raw: &[u32]) -> Vec<f64> {
        raw.iter().map(|&r| self.raw_to_si(r)).collect()
    }

    /// [`CalibrationPair::si_to_raw`] over a column
    pub fn si_to_raw_slice(&self, si: &[f64]) -> Vec<u32> {
        si.iter().map(|&v| self.si_to_raw(v)).collect()
    }

    /// Least-squares fit over `(raw, reference_si)` measurements
    ///
    /// Needs at least two points with a correlation coefficient of at least
    /// [`trace::MIN_CALIBRATION_RVALUE`].
    pub fn from_measurements(points: &[MeasurementPoint], component: &str) -> VsrcResult<Self> {
        if points.len() < 2 {
            return Err(VsrcErrorBuilder::new(component, "from_measurements").calibration(
                &format!("need at least 2 measurement points, got {}", points.len()),
            ));
        }

        let n = points.len() as f64;
        let mean_x = points.iter().map(|p| p.raw).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.reference_si).sum::<f64>() / n;

        let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
        for p in points {
            let dx = p.raw - mean_x;
            let dy = p.reference_si - mean_y;
            sxx += dx * dx;
            sxy += dx * dy;
            syy += dy * dy;
        }

        let rvalue = if sxx > 0.0 && syy > 0.0 {
            sxy / (sxx * syy).sqrt()
        } else {
            0.0
        };
        if !(rvalue >= trace::MIN_CALIBRATION_RVALUE) {
            return Err(VsrcErrorBuilder::new(component, "from_measurements").calibration(
                &format!(
                    "correlation coefficient {:.6} is below {} for '{}'",
                    rvalue,
                    trace::MIN_CALIBRATION_RVALUE,
                    component
                ),
            ));
        }

        let gain = sxy / sxx;
        let offset = mean_y - gain * mean_x;
        debug!(component, gain, offset, rvalue, "Calibration fitted");
        Ok(Self { gain, offset })
    }
}

/// One reference measurement of a channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPoint {
    /// Code read or written by the frontend
    pub raw: f64,
    /// Value measured with the reference instrument
    #[serde(default)]
    pub reference_si: f64,
}

impl MeasurementPoint {
    /// Point from a raw code and its reference value
    pub const fn new(raw: f64, reference_si: f64) -> Self {
        Self { raw, reference_si }
    }
}

/// Calibration of a stored trace: voltage, current and time channels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSeries {
    /// Voltage channel, V
    pub voltage: CalibrationPair,
    /// Current channel, A
    pub current: CalibrationPair,
    /// Timestamps, s
    pub time: CalibrationPair,
}

impl Default for CalibrationSeries {
    fn default() -> Self {
        Self {
            voltage: CalibrationPair::new(trace::VOLTAGE_GAIN, 0.0),
            current: CalibrationPair::new(trace::CURRENT_GAIN, 0.0),
            time: CalibrationPair::new(trace::TIME_GAIN, 0.0),
        }
    }
}

/// Gain of the current ADC channels, shunt and instrumentation amplifier included
pub fn adc_current_gain() -> f64 {
    cape::G_ADC_I * cape::V_REF_ADC
        / ((1u64 << cape::M_ADC_BITS) as f64 * cape::R_SHUNT_OHM * cape::G_INST_AMP)
}

/// Gain of the voltage ADC channels
pub fn adc_voltage_gain() -> f64 {
    cape::G_ADC_V * cape::V_REF_ADC / (1u64 << cape::M_ADC_BITS) as f64
}

/// Gain of the DAC channels
pub fn dac_voltage_gain() -> f64 {
    cape::V_REF_DAC * cape::G_DAC / (1u64 << cape::M_DAC_BITS) as f64
}

/// Harvester side of the cape
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationHarvester {
    /// DAC setting the harvesting voltage
    #[serde(rename = "dac_V_Hrv")]
    pub dac_v_hrv: CalibrationPair,
    /// DAC of the simulated source
    #[serde(rename = "dac_V_Sim")]
    pub dac_v_sim: CalibrationPair,
    /// ADC sensing the harvesting voltage
    #[serde(rename = "adc_V_Sense")]
    pub adc_v_sense: CalibrationPair,
    /// ADC sensing the harvesting current
    #[serde(rename = "adc_C_Hrv")]
    pub adc_c_hrv: CalibrationPair,
}

impl Default for CalibrationHarvester {
    fn default() -> Self {
        let dac = CalibrationPair::new(dac_voltage_gain(), 0.0);
        Self {
            dac_v_hrv: dac,
            dac_v_sim: dac,
            adc_v_sense: CalibrationPair::new(adc_voltage_gain(), 0.0),
            adc_c_hrv: CalibrationPair::new(adc_current_gain(), 0.0),
        }
    }
}

impl CalibrationHarvester {
    /// Calibration of a recording made by the harvester frontend
    pub fn series(&self) -> CalibrationSeries {
        CalibrationSeries {
            voltage: self.adc_v_sense,
            current: self.adc_c_hrv,
            ..CalibrationSeries::default()
        }
    }
}

/// Emulator side of the cape
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEmulator {
    /// DAC of output channel A
    #[serde(rename = "dac_V_A")]
    pub dac_v_a: CalibrationPair,
    /// DAC of output channel B
    #[serde(rename = "dac_V_B")]
    pub dac_v_b: CalibrationPair,
    /// ADC sensing the current of channel A
    #[serde(rename = "adc_C_A")]
    pub adc_c_a: CalibrationPair,
    /// ADC sensing the current of channel B
    #[serde(rename = "adc_C_B")]
    pub adc_c_b: CalibrationPair,
}

impl Default for CalibrationEmulator {
    fn default() -> Self {
        let dac = CalibrationPair::new(dac_voltage_gain(), 0.0);
        let adc = CalibrationPair::new(adc_current_gain(), 0.0);
        Self {
            dac_v_a: dac,
            dac_v_b: dac,
            adc_c_a: adc,
            adc_c_b: adc,
        }
    }
}

impl CalibrationEmulator {
    /// Calibration of a recording made on emulator channel A
    pub fn series(&self) -> CalibrationSeries {
        CalibrationSeries {
            voltage: self.dac_v_a,
            current: self.adc_c_a,
            ..CalibrationSeries::default()
        }
    }
}

/// Both sides of one cape
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationCape {
    /// Harvester side
    pub harvester: CalibrationHarvester,
    /// Emulator side
    pub emulator: CalibrationEmulator,
}

/// Reference measurements of the harvester channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvesterMeasurement {
    /// Reference points for the DAC setting the harvesting voltage
    #[serde(rename = "dac_V_Hrv")]
    pub dac_v_hrv: Vec<MeasurementPoint>,
    /// Reference points for the DAC of the simulated source
    #[serde(rename = "dac_V_Sim")]
    pub dac_v_sim: Vec<MeasurementPoint>,
    /// Reference points for the ADC sensing the harvesting voltage
    #[serde(rename = "adc_V_Sense")]
    pub adc_v_sense: Vec<MeasurementPoint>,
    /// Reference points for the ADC sensing the harvesting current
    #[serde(rename = "adc_C_Hrv")]
    pub adc_c_hrv: Vec<MeasurementPoint>,
}

impl HarvesterMeasurement {
    /// Fit every harvester channel
    pub fn to_calibration(&self) -> VsrcResult<CalibrationHarvester> {
        Ok(CalibrationHarvester {
            dac_v_hrv: CalibrationPair::from_measurements(&self.dac_v_hrv, "hrv_dac_V_Hrv")?,
            dac_v_sim: CalibrationPair::from_measurements(&self.dac_v_sim, "hrv_dac_V_Sim")?,
            adc_v_sense: CalibrationPair::from_measurements(&self.adc_v_sense, "hrv_adc_V_Sense")?,
            adc_c_hrv: CalibrationPair::from_measurements(&self.adc_c_hrv, "hrv_adc_C_Hrv")?,
        })
    }
}

/// Reference measurements of the emulator channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmulatorMeasurement {
    /// Reference points for the DAC of output channel A
    #[serde(rename = "dac_V_A")]
    pub dac_v_a: Vec<MeasurementPoint>,
    /// Reference points for the DAC of output channel B
    #[serde(rename = "dac_V_B")]
    pub dac_v_b: Vec<MeasurementPoint>,
    /// Reference points for the ADC sensing the current of channel A
    #[serde(rename = "adc_C_A")]
    pub adc_c_a: Vec<MeasurementPoint>,
    /// Reference points for the ADC sensing the current of channel B
    #[serde(rename = "adc_C_B")]
    pub adc_c_b: Vec<MeasurementPoint>,
}

impl EmulatorMeasurement {
    /// Fit every emulator channel
    pub fn to_calibration(&self) -> VsrcResult<CalibrationEmulator> {
        Ok(CalibrationEmulator {
            dac_v_a: CalibrationPair::from_measurements(&self.dac_v_a, "emu_dac_V_A")?,
            dac_v_b: CalibrationPair::from_measurements(&self.dac_v_b, "emu_dac_V_B")?,
            adc_c_a: CalibrationPair::from_measurements(&self.adc_c_a, "emu_adc_C_A")?,
            adc_c_b: CalibrationPair::from_measurements(&self.adc_c_b, "emu_adc_C_B")?,
        })
    }
}

/// Measurements of a cape; missing sides keep the hardware defaults
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CapeMeasurement {
    /// Harvester side, if measured
    pub harvester: Option<HarvesterMeasurement>,
    /// Emulator side, if measured
    pub emulator: Option<EmulatorMeasurement>,
}

impl CapeMeasurement {
    /// Fit the measured sides
    pub fn to_calibration(&self) -> VsrcResult<CalibrationCape> {
        let mut cal = CalibrationCape::default();
        if let Some(harvester) = &self.harvester {
            cal.harvester = harvester.to_calibration()?;
        }
        if let Some(emulator) = &self.emulator {
            cal.emulator = emulator.to_calibration()?;
        }
        Ok(cal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VsrcError;

    fn linear_points(gain: f64, offset: f64) -> Vec<MeasurementPoint> {
        (1..=5)
            .map(|i| {
                let raw = i as f64 * 1_000.0;
                MeasurementPoint::new(raw, raw * gain + offset)
            })
            .collect()
    }

    #[test]
    fn test_raw_to_si_clamps_negative() {
        let pair = CalibrationPair::new(1e-6, -0.5);
        assert_eq!(pair.raw_to_si(100), 0.0);
        assert!((pair.raw_to_si(1_000_000) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_si_to_raw_saturates() {
        let pair = CalibrationPair::new(1e-9, 0.0);
        assert_eq!(pair.si_to_raw(-1.0), 0);
        assert_eq!(pair.si_to_raw(100.0), u32::MAX);
        assert_eq!(pair.si_to_raw(2.5e-6), 2_500);
    }

    #[test]
    fn test_slice_conversion() {
        let series = CalibrationSeries::default();
        let raw = [0u32, 1_000_000_000];
        let volts = series.voltage.raw_to_si_slice(&raw);
        assert!((volts[1] - 3.0).abs() < 1e-9);
        assert_eq!(series.voltage.si_to_raw_slice(&volts), raw.to_vec());
    }

    #[test]
    fn test_cape_defaults() {
        let emu = CalibrationEmulator::default();
        // full-scale DAC code covers 5 V
        let full_scale = emu.dac_v_a.raw_to_si(cape::RAW_MAX_DAC + 1);
        assert!((full_scale - 5.0).abs() < 1e-12);
        // 1 mA through the 2 Ohm shunt and the 48x amplifier
        let raw = emu.adc_c_a.si_to_raw(1e-3);
        assert_eq!(raw, 4_915);
    }

    #[test]
    fn test_regression_recovers_gain() {
        let pair = CalibrationPair::from_measurements(&linear_points(2e-6, 0.01), "test").unwrap();
        assert!((pair.gain - 2e-6).abs() < 1e-15);
        assert!((pair.offset - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_regression_needs_two_points() {
        let points = [MeasurementPoint::new(1.0, 1.0)];
        match CalibrationPair::from_measurements(&points, "emu_adc_C_A") {
            Err(VsrcError::Calibration { component, .. }) => assert_eq!(component, "emu_adc_C_A"),
            other => panic!("Expected calibration error, got {:?}", other),
        }
    }

    #[test]
    fn test_regression_rejects_poor_correlation() {
        let points = [
            MeasurementPoint::new(1.0, 1.0),
            MeasurementPoint::new(2.0, 5.0),
            MeasurementPoint::new(3.0, 0.5),
        ];
        assert!(CalibrationPair::from_measurements(&points, "noisy").is_err());
    }

    #[test]
    fn test_cape_measurement_keeps_defaults() {
        let meas = CapeMeasurement {
            harvester: None,
            emulator: Some(EmulatorMeasurement {
                dac_v_a: linear_points(7.6e-5, 0.0),
                dac_v_b: linear_points(7.6e-5, 0.0),
                adc_c_a: linear_points(3.3e-8, 1e-6),
                adc_c_b: linear_points(3.3e-8, 1e-6),
            }),
        };
        let cal = meas.to_calibration().unwrap();
        assert_eq!(cal.harvester, CalibrationHarvester::default());
        assert!((cal.emulator.dac_v_a.gain - 7.6e-5).abs() < 1e-12);
    }
}
