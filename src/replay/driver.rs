//! Replay driver: runs a virtual source over a recorded energy environment

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, Span};

use crate::calibration::{CalibrationEmulator, CalibrationHarvester};
use crate::config::harvester::{EnergyDType, HarvesterConfig};
use crate::config::ReplaySettings;
use crate::error::{VsrcErrorBuilder, VsrcResult};
use crate::model::{HarvesterModel, VirtualSource};
use crate::quantize::{quantize_harvester, QuantizeOptions, QuantizedConfig};
use crate::replay::stream::{prefetch, SampleBuffer, SampleSink, SampleSource};
use crate::utils::fixed_point::round_to_u32;

/// Load attached to the virtual source output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputLoad {
    /// Open output
    #[default]
    None,
    /// Fixed current regardless of the output voltage
    ConstantCurrent {
        /// Load current in A
        current_a: f64,
    },
    /// Current follows the output voltage of the previous sample
    Resistor {
        /// Load resistance in Ohm, non-positive draws nothing
        ohm: f64,
    },
}

impl OutputLoad {
    /// Current drawn in nA given the last applied output voltage
    pub fn current_na(&self, v_out_uv: u32) -> u32 {
        match *self {
            OutputLoad::None => 0,
            OutputLoad::ConstantCurrent { current_a } => round_to_u32(current_a * 1e9),
            OutputLoad::Resistor { ohm } if ohm > 0.0 => round_to_u32(v_out_uv as f64 * 1e3 / ohm),
            OutputLoad::Resistor { .. } => 0,
        }
    }
}

/// Totals of one replay run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Energy harvested into the storage node
    pub energy_in_ws: f64,
    /// Energy drawn by the output stage
    pub energy_out_ws: f64,
    /// Samples replayed
    pub samples: u64,
    /// Input buffers consumed
    pub buffers: u64,
    /// Storage voltage after the last sample
    pub final_v_mid_uv: u32,
    /// `max_buffers` was reached before the source ran dry
    pub stopped_early: bool,
}

/// Streams buffers from a [`SampleSource`] through a fresh [`VirtualSource`]
pub struct ReplayDriver {
    config: QuantizedConfig,
    calibration: CalibrationEmulator,
    settings: ReplaySettings,
    span: Span,
}

impl ReplayDriver {
    /// Driver for one quantized configuration
    pub fn new(config: QuantizedConfig, calibration: CalibrationEmulator, settings: ReplaySettings) -> Self {
        let span = info_span!(
            "replay",
            converter_mode = config.converter.converter_mode,
            algorithm = config.harvester.algorithm,
        );
        Self {
            config,
            calibration,
            settings,
            span,
        }
    }

    /// Log the run inside a caller-provided span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Span the run is logged in
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Buffering settings
    pub fn settings(&self) -> &ReplaySettings {
        &self.settings
    }

    /// Replay `source`, reading ahead on a background thread if configured
    pub fn run<S>(&self, source: S, load: OutputLoad, sink: Option<&mut dyn SampleSink>) -> VsrcResult<ReplayReport>
    where
        S: SampleSource + Send + 'static,
    {
        if self.settings.prefetch_depth > 0 {
            let mut prefetched = prefetch(source, self.settings.prefetch_depth)?;
            self.run_inline(&mut prefetched, load, sink)
        } else {
            let mut source = source;
            self.run_inline(&mut source, load, sink)
        }
    }

    /// Replay a borrowed source on the calling thread
    pub fn run_inline<S>(
        &self,
        source: &mut S,
        load: OutputLoad,
        mut sink: Option<&mut dyn SampleSink>,
    ) -> VsrcResult<ReplayReport>
    where
        S: SampleSource + ?Sized,
    {
        let _entered = self.span.enter();
        self.check_source(source)?;

        let input_cal = source.calibration();
        let interval_ns = source.sample_interval_ns();
        let mut model = VirtualSource::for_input(&self.config, source.datatype(), self.calibration);
        let log_intermediate = self.config.converter.logs_intermediate_node();

        let samples_per_buffer = self.settings.samples_per_buffer.max(1);
        let mut pending = SampleBuffer::default();
        let mut v_out_prev_uv = 0u32;
        let mut buffers = 0u64;
        let mut stopped_early = false;

        info!(
            datatype = %source.datatype(),
            interval_ns,
            prefetch_depth = self.settings.prefetch_depth,
            "Replay started"
        );

        loop {
            if let Some(max_buffers) = self.settings.max_buffers {
                if buffers >= max_buffers as u64 {
                    stopped_early = true;
                    break;
                }
            }
            let Some(buffer) = source.next_buffer()? else {
                break;
            };
            buffer.validate()?;
            #[cfg(feature = "strict_checks")]
            buffer.check_monotonic()?;

            for k in 0..buffer.len() {
                let v_in_uv = round_to_u32(input_cal.voltage.raw_to_si(buffer.voltage[k]) * 1e6);
                let i_in_na = round_to_u32(input_cal.current.raw_to_si(buffer.current[k]) * 1e9);
                let i_out_na = load.current_na(v_out_prev_uv);

                let step = model.step(v_in_uv, i_in_na, i_out_na);
                v_out_prev_uv = step.v_out_uv;

                if let Some(sink) = sink.as_mut() {
                    let v_log_uv = if log_intermediate { step.v_mid_uv } else { step.v_out_uv };
                    let i_log_na = if step.v_out_uv > 0 { i_out_na } else { 0 };
                    pending.push(
                        buffer.timestamps_ns[k],
                        input_cal.voltage.si_to_raw(v_log_uv as f64 * 1e-6),
                        input_cal.current.si_to_raw(i_log_na as f64 * 1e-9),
                    );
                    if pending.len() >= samples_per_buffer {
                        sink.append(&pending)?;
                        pending.clear();
                    }
                }
            }

            buffers += 1;
            debug!(
                buffer = buffers,
                samples = buffer.len(),
                v_mid_uV = model.converter().v_mid_uv(),
                "Buffer replayed"
            );
        }

        if let Some(sink) = sink.as_mut() {
            if !pending.is_empty() {
                sink.append(&pending)?;
            }
        }

        let to_ws = 1e-15 * interval_ns as f64 * 1e-9;
        let report = ReplayReport {
            energy_in_ws: model.energy_input_fws() as f64 * to_ws,
            energy_out_ws: model.energy_output_fws() as f64 * to_ws,
            samples: model.samples(),
            buffers,
            final_v_mid_uv: model.converter().v_mid_uv(),
            stopped_early,
        };

        info!(
            samples = report.samples,
            buffers = report.buffers,
            energy_in_Ws = report.energy_in_ws,
            energy_out_Ws = report.energy_out_ws,
            stopped_early,
            "Replay finished"
        );
        Ok(report)
    }

    fn check_source<S: SampleSource + ?Sized>(&self, source: &S) -> VsrcResult<()> {
        if source.sample_interval_ns() == 0 {
            return Err(VsrcErrorBuilder::new("replay", "check_source").invalid_data(
                "sample interval",
                "must be larger than 0 ns",
            ));
        }

        let window_size = self.config.harvester.window_size;
        match source.datatype() {
            EnergyDType::Ivcurve if source.window_size() != Some(window_size) => {
                Err(VsrcErrorBuilder::new("replay", "check_source").invalid_field(
                    "window_size",
                    window_size,
                    &format!(
                        "registers do not match the curve source ({:?})",
                        source.window_size()
                    ),
                ))
            }
            EnergyDType::Ivsample if window_size > 1 => {
                Err(VsrcErrorBuilder::new("replay", "check_source").invalid_field(
                    "window_size",
                    window_size,
                    "registers were quantized for curve input but the source holds samples",
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Run the harvester alone on `source`, returns the harvested energy in Ws
///
/// The optional sink receives the operating points encoded with the default
/// harvester calibration.
pub fn simulate_harvester<S>(
    config: &HarvesterConfig,
    mut source: S,
    mut sink: Option<&mut dyn SampleSink>,
) -> VsrcResult<f64>
where
    S: SampleSource,
{
    let span = info_span!("simulate_harvester", harvester = %config.name);
    let _entered = span.enter();

    let options = QuantizeOptions {
        log_intermediate_node: false,
        for_emulation: true,
        dtype_in: source.datatype(),
        window_size: source.window_size(),
    };
    let regs = quantize_harvester(config, &options)?;
    let mut model = HarvesterModel::new(regs, source.datatype());

    let input_cal = source.calibration();
    let output_cal = CalibrationHarvester::default().series();
    let interval_ns = source.sample_interval_ns();
    let mut energy_fws: u128 = 0;

    while let Some(buffer) = source.next_buffer()? {
        buffer.validate()?;
        let mut output = SampleBuffer::with_capacity(if sink.is_some() { buffer.len() } else { 0 });

        for k in 0..buffer.len() {
            let v_uv = round_to_u32(input_cal.voltage.raw_to_si(buffer.voltage[k]) * 1e6);
            let i_na = round_to_u32(input_cal.current.raw_to_si(buffer.current[k]) * 1e9);
            let (v_hrv_uv, i_hrv_na) = model.sample(v_uv, i_na);
            energy_fws += v_hrv_uv as u128 * i_hrv_na as u128;

            if sink.is_some() {
                output.push(
                    buffer.timestamps_ns[k],
                    output_cal.voltage.si_to_raw(v_hrv_uv as f64 * 1e-6),
                    output_cal.current.si_to_raw(i_hrv_na as f64 * 1e-9),
                );
            }
        }

        if let Some(sink) = sink.as_mut() {
            sink.append(&output)?;
        }
    }

    let energy_ws = energy_fws as f64 * 1e-15 * interval_ns as f64 * 1e-9;
    info!(energy_Ws = energy_ws, "Harvester simulation finished");
    Ok(energy_ws)
}

/// One independent replay of a batch
pub struct ReplayJob<S> {
    /// Registers to replay with
    pub config: QuantizedConfig,
    /// Emulator calibration for the output DAC
    pub calibration: CalibrationEmulator,
    /// Buffering settings
    pub settings: ReplaySettings,
    /// Input environment
    pub source: S,
    /// Load on the output
    pub load: OutputLoad,
}

/// Replay independent jobs in parallel, results keep the job order
pub fn run_batch<S>(jobs: Vec<ReplayJob<S>>) -> Vec<VsrcResult<ReplayReport>>
where
    S: SampleSource + Send + 'static,
{
    jobs.into_par_iter()
        .map(|job| ReplayDriver::new(job.config, job.calibration, job.settings).run(job.source, job.load, None))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationSeries;
    use crate::config::{ConverterConfig, HarvestAlgorithm};
    use crate::error::VsrcError;
    use crate::quantize::quantize;
    use crate::replay::stream::{MemorySink, MemorySource};

    fn constant_source(samples: usize, per_buffer: usize) -> MemorySource {
        MemorySource::from_si(
            CalibrationSeries::default(),
            EnergyDType::Ivsample,
            None,
            &vec![3.0; samples],
            &vec![1e-3; samples],
            per_buffer,
        )
        .unwrap()
    }

    fn driver(settings: ReplaySettings) -> ReplayDriver {
        let quantized = quantize(&ConverterConfig::default(), None, &QuantizeOptions::default()).unwrap();
        ReplayDriver::new(quantized, CalibrationEmulator::default(), settings)
    }

    #[test]
    fn test_load_currents() {
        assert_eq!(OutputLoad::None.current_na(3_000_000), 0);
        assert_eq!(OutputLoad::ConstantCurrent { current_a: 1e-3 }.current_na(0), 1_000_000);
        assert_eq!(OutputLoad::Resistor { ohm: 1_000.0 }.current_na(3_000_000), 3_000_000);
        assert_eq!(OutputLoad::Resistor { ohm: 0.0 }.current_na(3_000_000), 0);
    }

    #[test]
    fn test_direct_replay_energy() {
        let report = driver(ReplaySettings::inline())
            .run(constant_source(1_000, 100), OutputLoad::None, None)
            .unwrap();
        assert_eq!(report.samples, 1_000);
        assert_eq!(report.buffers, 10);
        // 3 mW for 10 ms
        assert!((report.energy_in_ws - 30e-6).abs() < 1e-9);
        assert_eq!(report.energy_out_ws, 0.0);
        assert!(!report.stopped_early);
    }

    #[test]
    fn test_max_buffers_stops_early() {
        let settings = ReplaySettings::inline().with_max_buffers(3);
        let report = driver(settings)
            .run(constant_source(1_000, 100), OutputLoad::None, None)
            .unwrap();
        assert_eq!(report.buffers, 3);
        assert_eq!(report.samples, 300);
        assert!(report.stopped_early);
    }

    #[test]
    fn test_sink_receives_rechunked_output() {
        let settings = ReplaySettings {
            samples_per_buffer: 64,
            ..ReplaySettings::inline()
        };
        let mut sink = MemorySink::new();
        driver(settings)
            .run(
                constant_source(250, 100),
                OutputLoad::Resistor { ohm: 1_000.0 },
                Some(&mut sink),
            )
            .unwrap();

        assert_eq!(sink.samples(), 250);
        assert_eq!(sink.buffers.len(), 4);
        let joined = sink.concat();
        let cal = CalibrationSeries::default();
        let v_out = cal.voltage.raw_to_si(joined.voltage[10]);
        assert!((v_out - 3.0).abs() < 1e-3);
        // first sample sees no previous output voltage
        assert_eq!(joined.current[0], 0);
        assert!(cal.current.raw_to_si(joined.current[10]) > 2.9e-3);
    }

    #[test]
    fn test_curve_source_requires_matching_window() {
        let source = MemorySource::new(CalibrationSeries::default(), EnergyDType::Ivcurve, Some(100));
        let err = driver(ReplaySettings::inline())
            .run(source, OutputLoad::None, None)
            .unwrap_err();
        assert!(matches!(err, VsrcError::Configuration { .. }));
        assert_eq!(err.field(), Some("window_size"));
    }

    #[test]
    fn test_simulate_harvester_passthrough_energy() {
        let harvester = HarvesterConfig::for_algorithm(HarvestAlgorithm::MpptPo);
        let mut sink = MemorySink::new();
        let energy = simulate_harvester(&harvester, constant_source(1_000, 250), Some(&mut sink)).unwrap();
        assert!((energy - 30e-6).abs() < 1e-9);
        assert_eq!(sink.samples(), 1_000);
    }

    #[test]
    fn test_batch_keeps_order() {
        let quantized = quantize(&ConverterConfig::default(), None, &QuantizeOptions::default()).unwrap();
        let jobs = (1..=4)
            .map(|n| ReplayJob {
                config: quantized.clone(),
                calibration: CalibrationEmulator::default(),
                settings: ReplaySettings::inline(),
                source: constant_source(n * 100, 50),
                load: OutputLoad::None,
            })
            .collect();
        let reports = run_batch(jobs);
        for (n, report) in reports.into_iter().enumerate() {
            assert_eq!(report.unwrap().samples, (n as u64 + 1) * 100);
        }
    }
}
