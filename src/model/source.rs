//! Virtual source: harvester and converter run back to back on every sample

use crate::calibration::CalibrationEmulator;
use crate::config::constants::sampling::SAMPLE_INTERVAL_S;
use crate::config::harvester::EnergyDType;
use crate::model::converter::ConverterModel;
use crate::model::harvester::HarvesterModel;
use crate::quantize::QuantizedConfig;
use crate::utils::fixed_point::round_to_u32;

/// Everything one simulated sample produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStep {
    /// Operating point chosen by the harvester
    pub v_harvest_uv: u32,
    /// Current drawn at that operating point
    pub i_harvest_na: u32,
    /// Storage node voltage
    pub v_mid_uv: u32,
    /// Output voltage after the DAC round trip
    pub v_out_uv: u32,
    /// DAC code for the output voltage
    pub v_out_dac_raw: u32,
    /// Power into the storage node in fW
    pub p_inp_fw: u64,
    /// Power drawn from the storage node in fW
    pub p_out_fw: u64,
}

/// Harvester plus converter with running energy totals
#[derive(Debug, Clone)]
pub struct VirtualSource {
    harvester: HarvesterModel,
    converter: ConverterModel,
    calibration: CalibrationEmulator,
    log_intermediate_node: bool,
    energy_inp_fws: u128,
    energy_out_fws: u128,
    samples: u64,
}

impl VirtualSource {
    /// Source for the input datatype the config was quantized for
    pub fn new(config: &QuantizedConfig, calibration: CalibrationEmulator) -> Self {
        Self::for_input(config, config.dtype_in, calibration)
    }

    /// Source for input of `dtype_in`, overriding the quantized datatype
    pub fn for_input(config: &QuantizedConfig, dtype_in: EnergyDType, calibration: CalibrationEmulator) -> Self {
        Self {
            harvester: HarvesterModel::new(config.harvester, dtype_in),
            converter: ConverterModel::new(config.converter.clone(), calibration),
            calibration,
            log_intermediate_node: config.converter.logs_intermediate_node(),
            energy_inp_fws: 0,
            energy_out_fws: 0,
            samples: 0,
        }
    }

    /// Run one sample and report every intermediate value
    pub fn step(&mut self, input_voltage_uv: u32, input_current_na: u32, output_current_na: u32) -> SourceStep {
        let (v_harvest_uv, i_harvest_na) = self.harvester.sample(input_voltage_uv, input_current_na);
        let p_inp_fw = self.converter.calc_inp_power(v_harvest_uv, i_harvest_na);

        let current_raw = self.calibration.adc_c_a.si_to_raw(output_current_na as f64 * 1e-9);
        let p_out_fw = self.converter.calc_out_power(current_raw);

        let v_mid_uv = self.converter.update_cap_storage();
        let v_out_dac_raw = self.converter.update_states_and_output();
        let v_out_uv = round_to_u32(self.calibration.dac_v_a.raw_to_si(v_out_dac_raw) * 1e6);

        self.energy_inp_fws += p_inp_fw as u128;
        self.energy_out_fws += p_out_fw as u128;
        self.samples += 1;

        SourceStep {
            v_harvest_uv,
            i_harvest_na,
            v_mid_uv,
            v_out_uv,
            v_out_dac_raw,
            p_inp_fw,
            p_out_fw,
        }
    }

    /// One sample, returns the logged voltage (output or intermediate node) in µV
    pub fn iterate_sampling(&mut self, input_voltage_uv: u32, input_current_na: u32, output_current_na: u32) -> u32 {
        let step = self.step(input_voltage_uv, input_current_na, output_current_na);
        if self.log_intermediate_node {
            step.v_mid_uv
        } else {
            step.v_out_uv
        }
    }

    /// Harvester half of the source
    pub fn harvester(&self) -> &HarvesterModel {
        &self.harvester
    }

    /// Converter half of the source
    pub fn converter(&self) -> &ConverterModel {
        &self.converter
    }

    /// Samples stepped so far
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Sum of input power over all samples (fW·sample)
    pub fn energy_input_fws(&self) -> u128 {
        self.energy_inp_fws
    }

    /// Sum of output power over all samples (fW·sample)
    pub fn energy_output_fws(&self) -> u128 {
        self.energy_out_fws
    }

    /// Harvested energy so far in Ws at the nominal sample rate
    pub fn energy_input_ws(&self) -> f64 {
        self.energy_inp_fws as f64 * 1e-15 * SAMPLE_INTERVAL_S
    }

    /// Energy drawn from storage so far in Ws
    pub fn energy_output_ws(&self) -> f64 {
        self.energy_out_fws as f64 * 1e-15 * SAMPLE_INTERVAL_S
    }
}
