//! Harvester model
//!
//! Picks the operating point on an energy environment. Depending on the
//! input datatype the model either passes samples through (ivsample), tracks
//! a point on a swept IV curve (ivcurve) or derives it from an open-circuit
//! voltage / short-circuit current pair (isc_voc).
//!
//! Algorithms are selected by the quantized algorithm number, highest bit
//! wins: `mppt_opt`, `mppt_po`, `mppt_voc`, `cv`, otherwise pass-through.

use crate::config::constants::fixed_point::SETPOINT_SHIFT;
use crate::config::harvester::{EnergyDType, HarvestAlgorithm};
use crate::quantize::HarvesterRegisters;

/// Fractional bits of the normalized operating voltage in the isc_voc falloff
const ISC_VOC_SHIFT: u32 = 16;

/// Mutable tracking state of one harvester run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvesterState {
    /// Voltage the harvester currently asks for
    pub voltage_set_uv: u32,
    /// Direction of the current curve sweep
    pub is_rising: bool,
    /// Samples into the current tracking interval
    pub interval_step: u32,
    /// Position inside the current curve window
    pub window_position: u32,

    // curve crossing
    /// Previous curve voltage
    pub voltage_last_uv: u32,
    /// Previous curve current
    pub current_last_na: u32,
    /// Whether the previous point was below the setpoint
    pub compare_last: bool,
    /// Voltage of the held operating point
    pub voltage_hold_uv: u32,
    /// Current of the held operating point
    pub current_hold_na: u32,

    // open-circuit search
    /// Age of the open-circuit voltage in use
    pub age_now: u32,
    /// Open-circuit voltage in use
    pub voc_now_uv: u32,
    /// Age of the candidate for the next window
    pub age_nxt: u32,
    /// Candidate open-circuit voltage for the next window
    pub voc_nxt_uv: u32,

    // perturb & observe
    /// Power at the previous step
    pub power_last_fw: u64,

    // reference tracker
    /// Best power of the finished window
    pub power_now_fw: u64,
    /// Voltage of that point
    pub voltage_now_uv: u32,
    /// Current of that point
    pub current_now_na: u32,
    /// Best power of the running window
    pub power_nxt_fw: u64,
    /// Voltage of that point
    pub voltage_nxt_uv: u32,
    /// Current of that point
    pub current_nxt_na: u32,
}

impl HarvesterState {
    fn new(regs: &HarvesterRegisters) -> Self {
        Self {
            voltage_set_uv: regs.voltage_uv,
            is_rising: regs.is_rising(),
            // first sample starts a new interval
            interval_step: 1 << 30,
            window_position: 0,
            voltage_last_uv: 0,
            current_last_na: 0,
            compare_last: false,
            voltage_hold_uv: 0,
            current_hold_na: 0,
            age_now: 0,
            voc_now_uv: regs.voltage_max_uv,
            age_nxt: 0,
            voc_nxt_uv: regs.voltage_max_uv,
            power_last_fw: 0,
            power_now_fw: 0,
            voltage_now_uv: 0,
            current_now_na: 0,
            power_nxt_fw: 0,
            voltage_nxt_uv: 0,
            current_nxt_na: 0,
        }
    }
}

/// Operating-point tracker driven by [`HarvesterRegisters`]
#[derive(Debug, Clone)]
pub struct HarvesterModel {
    regs: HarvesterRegisters,
    dtype_in: EnergyDType,
    state: HarvesterState,
}

impl HarvesterModel {
    /// Model for input of `dtype_in`, which must match the datatype the
    /// registers were quantized for
    pub fn new(regs: HarvesterRegisters, dtype_in: EnergyDType) -> Self {
        Self {
            state: HarvesterState::new(&regs),
            regs,
            dtype_in,
        }
    }

    /// Registers the model runs on
    pub fn registers(&self) -> &HarvesterRegisters {
        &self.regs
    }

    /// Current tracking state
    pub fn state(&self) -> &HarvesterState {
        &self.state
    }

    /// Process one input sample, returns the operating point `(µV, nA)`
    ///
    /// For isc_voc input the sample is interpreted as `(voc, isc)`.
    pub fn sample(&mut self, voltage_uv: u32, current_na: u32) -> (u32, u32) {
        if self.dtype_in == EnergyDType::IscVoc {
            return self.sample_isc_voc(voltage_uv, current_na);
        }
        if self.regs.window_size <= 1 {
            return (voltage_uv, current_na);
        }

        let algorithm = self.regs.algorithm;
        if algorithm >= HarvestAlgorithm::MpptOpt.number() {
            self.track_optimum(voltage_uv, current_na)
        } else if algorithm >= HarvestAlgorithm::MpptPo.number() {
            self.track_perturb_observe(voltage_uv, current_na)
        } else if algorithm >= HarvestAlgorithm::MpptVoc.number() {
            self.track_open_circuit(voltage_uv, current_na)
        } else if algorithm >= HarvestAlgorithm::Cv.number() {
            self.track_constant_voltage(voltage_uv, current_na)
        } else {
            (voltage_uv, current_na)
        }
    }

    /// Operating point of a PV cell given its open-circuit voltage and short-circuit current
    ///
    /// `I = isc · (1 − (V/voc)^8)` evaluated in Q16.
    pub fn sample_isc_voc(&mut self, voc_uv: u32, isc_na: u32) -> (u32, u32) {
        let algorithm = self.regs.algorithm;
        if algorithm < HarvestAlgorithm::Cv.number() {
            return (voc_uv, isc_na);
        }
        if voc_uv == 0 {
            return (0, 0);
        }

        let voltage_uv = if algorithm >= HarvestAlgorithm::MpptVoc.number() {
            ((voc_uv as u64 * self.regs.setpoint_n8 as u64) >> SETPOINT_SHIFT) as u32
        } else {
            self.state.voltage_set_uv.min(voc_uv)
        };

        let one = 1u64 << ISC_VOC_SHIFT;
        let ratio = ((voltage_uv as u64) << ISC_VOC_SHIFT) / voc_uv as u64;
        let mut falloff = ratio.min(one);
        for _ in 0..3 {
            // ratio^2, ^4, ^8
            falloff = (falloff * falloff) >> ISC_VOC_SHIFT;
        }
        let loss = (isc_na as u64 * falloff) >> ISC_VOC_SHIFT;
        let current_na = (isc_na as u64).saturating_sub(loss) as u32;
        (voltage_uv, current_na)
    }

    fn advance_window(&mut self) -> bool {
        let starts_sweep = self.state.window_position == 0;
        self.state.window_position += 1;
        if self.state.window_position >= self.regs.window_size {
            self.state.window_position = 0;
        }
        starts_sweep
    }

    fn track_constant_voltage(&mut self, voltage_uv: u32, current_na: u32) -> (u32, u32) {
        let starts_sweep = self.advance_window();
        let state = &mut self.state;
        let compare_now = voltage_uv < state.voltage_set_uv;

        // the jump back to the sweep start is not a crossing
        if !starts_sweep && compare_now != state.compare_last {
            let distance_now = voltage_uv.abs_diff(state.voltage_set_uv);
            let distance_last = state.voltage_last_uv.abs_diff(state.voltage_set_uv);

            if self.regs.linear_extrapolation() && voltage_uv != state.voltage_last_uv {
                let span = voltage_uv as i64 - state.voltage_last_uv as i64;
                let offset = state.voltage_set_uv as i64 - state.voltage_last_uv as i64;
                let delta = current_na as i64 - state.current_last_na as i64;
                let current = state.current_last_na as i64 + delta * offset / span;
                state.voltage_hold_uv = state.voltage_set_uv;
                state.current_hold_na = current.clamp(0, u32::MAX as i64) as u32;
            } else if distance_now <= distance_last {
                state.voltage_hold_uv = voltage_uv;
                state.current_hold_na = current_na;
            } else {
                state.voltage_hold_uv = state.voltage_last_uv;
                state.current_hold_na = state.current_last_na;
            }
        }

        state.voltage_last_uv = voltage_uv;
        state.current_last_na = current_na;
        state.compare_last = compare_now;
        (state.voltage_hold_uv, state.current_hold_na)
    }

    fn step_interval(&mut self) {
        let state = &mut self.state;
        state.interval_step = if state.interval_step >= self.regs.interval_n {
            0
        } else {
            state.interval_step + 1
        };
    }

    fn track_open_circuit(&mut self, voltage_uv: u32, current_na: u32) -> (u32, u32) {
        self.step_interval();
        let regs = self.regs;
        let state = &mut self.state;

        state.age_nxt = state.age_nxt.saturating_add(1);
        state.age_now = state.age_now.saturating_add(1);

        if current_na < regs.current_limit_na
            && voltage_uv < state.voc_nxt_uv
            && voltage_uv >= regs.voltage_min_uv
            && voltage_uv <= regs.voltage_max_uv
        {
            state.voc_nxt_uv = voltage_uv;
            state.age_nxt = 0;
        }

        if state.age_now > regs.window_size || state.voc_nxt_uv <= state.voc_now_uv {
            state.age_now = state.age_nxt;
            state.voc_now_uv = state.voc_nxt_uv;
            state.age_nxt = 0;
            state.voc_nxt_uv = regs.voltage_max_uv;
        }

        let (voltage_hold, current_hold) = self.track_constant_voltage(voltage_uv, current_na);
        let state = &mut self.state;

        if state.interval_step < regs.duration_n {
            // open circuit while measuring
            return (voltage_hold, 0);
        }
        if state.interval_step == regs.duration_n {
            let setpoint = (state.voc_now_uv as u64 * regs.setpoint_n8 as u64) >> SETPOINT_SHIFT;
            state.voltage_set_uv = setpoint as u32;
        }
        (voltage_hold, current_hold)
    }

    fn track_perturb_observe(&mut self, voltage_uv: u32, current_na: u32) -> (u32, u32) {
        self.step_interval();
        let (voltage_hold, current_hold) = self.track_constant_voltage(voltage_uv, current_na);
        let regs = self.regs;
        let state = &mut self.state;

        if state.interval_step == 0 {
            let power_now = voltage_hold as u64 * current_hold as u64;
            if power_now <= state.power_last_fw {
                state.is_rising = !state.is_rising;
            }
            let stepped = if state.is_rising {
                state.voltage_set_uv.saturating_add(regs.voltage_step_uv)
            } else {
                state.voltage_set_uv.saturating_sub(regs.voltage_step_uv)
            };
            state.voltage_set_uv = stepped.clamp(regs.voltage_min_uv, regs.voltage_max_uv.max(regs.voltage_min_uv));
            state.power_last_fw = power_now;
        }
        (voltage_hold, current_hold)
    }

    fn track_optimum(&mut self, voltage_uv: u32, current_na: u32) -> (u32, u32) {
        let regs = self.regs;
        let state = &mut self.state;

        state.age_nxt = state.age_nxt.saturating_add(1);
        state.age_now = state.age_now.saturating_add(1);

        let power_fw = voltage_uv as u64 * current_na as u64;
        if power_fw > state.power_nxt_fw
            && voltage_uv >= regs.voltage_min_uv
            && voltage_uv <= regs.voltage_max_uv
            && current_na <= regs.current_limit_na
        {
            state.age_nxt = 0;
            state.power_nxt_fw = power_fw;
            state.voltage_nxt_uv = voltage_uv;
            state.current_nxt_na = current_na;
        }

        if state.age_now > regs.window_size || state.power_nxt_fw >= state.power_now_fw {
            state.age_now = state.age_nxt;
            state.power_now_fw = state.power_nxt_fw;
            state.voltage_now_uv = state.voltage_nxt_uv;
            state.current_now_na = state.current_nxt_na;
            state.age_nxt = 0;
            state.power_nxt_fw = 0;
            state.voltage_nxt_uv = 0;
            state.current_nxt_na = 0;
        }
        (state.voltage_now_uv, state.current_now_na)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarvesterConfig;
    use crate::quantize::{quantize_harvester, QuantizeOptions};

    const WINDOW: u32 = 100;

    fn curve_regs(algorithm: HarvestAlgorithm, adjust: impl FnOnce(&mut HarvesterConfig)) -> HarvesterRegisters {
        let mut cfg = HarvesterConfig::for_algorithm(algorithm);
        adjust(&mut cfg);
        let options = QuantizeOptions::for_input(EnergyDType::Ivcurve, Some(WINDOW));
        quantize_harvester(&cfg, &options).unwrap()
    }

    /// Rising sweep 0..5 V of a source with voc = 4 V and isc = 1 mA
    fn sweep_point(index: u32) -> (u32, u32) {
        let voltage_uv = index * 50_000;
        let current_na = if voltage_uv >= 4_000_000 {
            0
        } else {
            1_000_000 - voltage_uv / 4
        };
        (voltage_uv, current_na)
    }

    fn run_sweeps(model: &mut HarvesterModel, sweeps: u32) -> (u32, u32) {
        let mut last = (0, 0);
        for _ in 0..sweeps {
            for index in 0..WINDOW {
                let (v, i) = sweep_point(index);
                last = model.sample(v, i);
            }
        }
        last
    }

    #[test]
    fn test_ivsample_passes_through() {
        let cfg = HarvesterConfig::for_algorithm(HarvestAlgorithm::MpptPo);
        let regs = quantize_harvester(&cfg, &QuantizeOptions::default()).unwrap();
        let mut model = HarvesterModel::new(regs, EnergyDType::Ivsample);
        assert_eq!(model.sample(1_234_000, 56_000), (1_234_000, 56_000));
    }

    #[test]
    fn test_cv_holds_crossing() {
        let regs = curve_regs(HarvestAlgorithm::Cv, |cfg| {
            cfg.voltage_mv = 2_010.0;
            cfg.enable_linear_extrapolation = false;
        });
        let mut model = HarvesterModel::new(regs, EnergyDType::Ivcurve);
        let (v, i) = run_sweeps(&mut model, 2);
        // 2.0 V is closer to the setpoint than 2.05 V
        assert_eq!(v, 2_000_000);
        assert_eq!(i, 500_000);
    }

    #[test]
    fn test_cv_linear_extrapolation() {
        let regs = curve_regs(HarvestAlgorithm::Cv, |cfg| {
            cfg.voltage_mv = 2_010.0;
            cfg.enable_linear_extrapolation = true;
        });
        let mut model = HarvesterModel::new(regs, EnergyDType::Ivcurve);
        let (v, i) = run_sweeps(&mut model, 2);
        assert_eq!(v, 2_010_000);
        assert_eq!(i, 497_500);
    }

    #[test]
    fn test_optimum_finds_max_power() {
        let regs = curve_regs(HarvestAlgorithm::MpptOpt, |_| {});
        let mut model = HarvesterModel::new(regs, EnergyDType::Ivcurve);
        let (v, i) = run_sweeps(&mut model, 3);
        // P = V·(1 mA − V/4 kΩ) peaks at 2 V
        assert_eq!(v, 2_000_000);
        assert_eq!(i, 500_000);
    }

    #[test]
    fn test_voc_sets_fraction_of_open_circuit() {
        let regs = curve_regs(HarvestAlgorithm::MpptVoc, |cfg| {
            cfg.current_limit_ua = 10.0;
            cfg.setpoint_n = 0.5;
            cfg.duration_ms = 2.0;
        });
        assert_eq!(regs.duration_n, 200);
        let mut model = HarvesterModel::new(regs, EnergyDType::Ivcurve);

        // open circuit during the measurement
        for index in 0..WINDOW {
            let (v, i) = sweep_point(index);
            assert_eq!(model.sample(v, i).1, 0);
        }

        run_sweeps(&mut model, 3);
        assert_eq!(model.state().voc_now_uv, 4_000_000);
        assert_eq!(model.state().voltage_set_uv, 2_000_000);
    }

    #[test]
    fn test_po_stays_within_bounds() {
        let regs = curve_regs(HarvestAlgorithm::MpptPo, |cfg| {
            cfg.voltage_min_mv = 1_000.0;
            cfg.voltage_max_mv = 3_000.0;
            cfg.voltage_step_mv = 200.0;
            cfg.interval_ms = 1.0;
        });
        let mut model = HarvesterModel::new(regs, EnergyDType::Ivcurve);
        for _ in 0..50 {
            run_sweeps(&mut model, 1);
            let set = model.state().voltage_set_uv;
            assert!((1_000_000..=3_000_000).contains(&set));
        }
    }

    #[test]
    fn test_isc_voc_operating_point() {
        let mut cfg = HarvesterConfig::for_algorithm(HarvestAlgorithm::MpptVoc);
        cfg.setpoint_n = 0.5;
        let options = QuantizeOptions::for_input(EnergyDType::IscVoc, None);
        let regs = quantize_harvester(&cfg, &options).unwrap();
        let mut model = HarvesterModel::new(regs, EnergyDType::IscVoc);

        let (v, i) = model.sample(4_000_000, 1_000_000);
        assert_eq!(v, 2_000_000);
        // (1/2)^8 = 1/256 of isc is lost
        assert_eq!(i, 1_000_000 - 3_906);
        assert_eq!(model.sample(0, 1_000_000), (0, 0));
    }
}
