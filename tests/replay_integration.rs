// tests/replay_integration.rs
//! End-to-end replay runs through quantizer, models and stream plumbing

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use vsrc_core::calibration::{CalibrationEmulator, CalibrationSeries};
use vsrc_core::config::{ConverterConfig, EnergyDType, ReplaySettings};
use vsrc_core::quantize::{quantize, QuantizeOptions};
use vsrc_core::replay::{MemorySink, MemorySource, OutputLoad, ReplayDriver, ReplayReport};

fn noisy_environment(seed: u64, samples: usize) -> (Vec<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let voltages = (0..samples).map(|_| rng.gen_range(0.5..4.5)).collect();
    let currents = (0..samples).map(|_| rng.gen_range(0.0..20e-3)).collect();
    (voltages, currents)
}

fn storage_boost_config() -> ConverterConfig {
    ConverterConfig {
        enable_boost: true,
        c_intermediate_uf: 10.0,
        c_output_uf: 0.1,
        v_intermediate_init_mv: 1_000.0,
        v_intermediate_enable_threshold_mv: 3_000.0,
        v_intermediate_disable_threshold_mv: 2_000.0,
        ..ConverterConfig::default()
    }
}

fn replay(
    config: &ConverterConfig,
    settings: ReplaySettings,
    voltages: &[f64],
    currents: &[f64],
    load: OutputLoad,
) -> (ReplayReport, MemorySink) {
    let quantized = quantize(config, None, &QuantizeOptions::default()).unwrap();
    let source = MemorySource::from_si(
        CalibrationSeries::default(),
        EnergyDType::Ivsample,
        None,
        voltages,
        currents,
        500,
    )
    .unwrap();
    let mut sink = MemorySink::new();
    let report = ReplayDriver::new(quantized, CalibrationEmulator::default(), settings)
        .run(source, load, Some(&mut sink))
        .unwrap();
    (report, sink)
}

#[test]
fn test_replay_is_deterministic() {
    let (voltages, currents) = noisy_environment(7, 5_000);
    let config = storage_boost_config();
    let load = OutputLoad::Resistor { ohm: 2_000.0 };

    let (report_a, sink_a) = replay(&config, ReplaySettings::inline(), &voltages, &currents, load);
    let (report_b, sink_b) = replay(&config, ReplaySettings::inline(), &voltages, &currents, load);

    assert_eq!(report_a, report_b);
    assert_eq!(sink_a.concat(), sink_b.concat());
}

#[test]
fn test_prefetch_matches_inline() {
    let (voltages, currents) = noisy_environment(11, 4_000);
    let config = storage_boost_config();
    let load = OutputLoad::ConstantCurrent { current_a: 500e-6 };

    let prefetched = ReplaySettings {
        prefetch_depth: 3,
        ..ReplaySettings::default()
    };
    let (report_inline, sink_inline) = replay(&config, ReplaySettings::inline(), &voltages, &currents, load);
    let (report_prefetch, sink_prefetch) = replay(&config, prefetched, &voltages, &currents, load);

    assert_eq!(report_inline, report_prefetch);
    assert_eq!(sink_inline.concat(), sink_prefetch.concat());
}

#[test]
fn test_storage_charges_until_output_enables() {
    // 10 mW charge the 10 µF storage from 1 V past the 3 V threshold in ~4 ms
    let voltages = vec![1.0; 2_000];
    let currents = vec![10e-3; 2_000];
    let (report, sink) = replay(
        &storage_boost_config(),
        ReplaySettings::inline(),
        &voltages,
        &currents,
        OutputLoad::None,
    );

    assert_eq!(report.samples, 2_000);
    assert!(report.final_v_mid_uv > 3_000_000);

    let output = sink.concat();
    let cal = CalibrationSeries::default();
    assert_eq!(output.voltage[0], cal.voltage.si_to_raw(0.0));
    let v_last = cal.voltage.raw_to_si(output.voltage[output.len() - 1]);
    assert!(v_last > 3.0);
}

#[test]
fn test_max_buffers_limits_replay() {
    let (voltages, currents) = noisy_environment(3, 3_000);
    let settings = ReplaySettings {
        max_buffers: Some(2),
        ..ReplaySettings::default()
    };
    let (report, sink) = replay(&ConverterConfig::default(), settings, &voltages, &currents, OutputLoad::None);

    assert!(report.stopped_early);
    assert_eq!(report.buffers, 2);
    assert_eq!(report.samples, 1_000);
    assert_eq!(sink.samples(), 1_000);
}

#[test]
fn test_load_drains_storage_without_input() {
    let config = ConverterConfig {
        c_intermediate_uf: 100.0,
        v_intermediate_init_mv: 3_000.0,
        v_intermediate_enable_threshold_mv: 2_500.0,
        v_intermediate_disable_threshold_mv: 2_000.0,
        ..ConverterConfig::default()
    };
    let voltages = vec![0.0; 5_000];
    let currents = vec![0.0; 5_000];
    let (report, _) = replay(
        &config,
        ReplaySettings::inline(),
        &voltages,
        &currents,
        OutputLoad::Resistor { ohm: 1_000.0 },
    );

    assert_eq!(report.energy_in_ws, 0.0);
    assert!(report.energy_out_ws > 0.0);
    assert!(report.final_v_mid_uv < 3_000_000);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_energy_is_never_negative(
        seed in any::<u64>(),
        ohm in 100.0f64..100_000.0,
        boost: bool,
    ) {
        let (voltages, currents) = noisy_environment(seed, 600);
        let config = ConverterConfig {
            enable_boost: boost,
            ..storage_boost_config()
        };
        let (report, sink) = replay(
            &config,
            ReplaySettings::inline(),
            &voltages,
            &currents,
            OutputLoad::Resistor { ohm },
        );

        prop_assert!(report.energy_in_ws >= 0.0);
        prop_assert!(report.energy_out_ws >= 0.0);
        prop_assert!(report.final_v_mid_uv <= 10_000_000);
        prop_assert_eq!(sink.samples(), 600);
    }
}
