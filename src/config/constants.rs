// src/config/constants.rs
//! System-wide configuration constants
//!
//! Everything the firmware treats as a compile-time constant lives here so the
//! quantizer and the models agree on sample rate, table sizes and Q-formats.

/// Sampling constants of the emulation core
pub mod sampling {
    /// Fixed sample rate of the firmware control loop
    pub const SAMPLERATE_SPS: u32 = 100_000;
    /// Time between samples
    pub const SAMPLE_INTERVAL_NS: u64 = 1_000_000_000 / SAMPLERATE_SPS as u64;
    /// Time between samples in seconds
    pub const SAMPLE_INTERVAL_S: f64 = 1.0 / SAMPLERATE_SPS as f64;

    /// Samples per buffer exchanged with the storage layer
    pub const SAMPLES_PER_BUFFER: usize = 10_000;
    /// Smallest accepted buffer
    pub const MIN_SAMPLES_PER_BUFFER: usize = 1;
    /// Largest accepted buffer
    pub const MAX_SAMPLES_PER_BUFFER: usize = 10_000_000;

    /// Buffers read ahead by default
    pub const DEFAULT_PREFETCH_DEPTH: usize = 2;
    /// Upper bound for the read-ahead
    pub const MAX_PREFETCH_DEPTH: usize = 64;
}

/// Efficiency lookup-table layout
pub mod lut {
    /// Both axes of the input table and the single axis of the output table
    pub const LUT_SIZE: usize = 12;

    /// Lowest voltage offset
    pub const MIN_LOG2_V: u32 = 0;
    /// Lowest current offset
    pub const MIN_LOG2_I: u32 = 1;
    /// Highest offset of either axis
    pub const MAX_LOG2: u32 = 20;

    /// Input efficiency entries are stored as u8 (Q8, 1.0 saturates to 255)
    pub const INPUT_EFFICIENCY_MAX_N8: u32 = 255;
    /// Output inverse efficiency ceiling (Q4), also used for zero efficiency
    pub const OUTPUT_INV_EFFICIENCY_MAX_N4: u32 = 1 << 14;
}

/// Binary-point positions used by firmware registers
pub mod fixed_point {
    /// Input efficiency, Q8
    pub const INPUT_EFFICIENCY_SHIFT: u32 = 8;
    /// Inverse output efficiency, Q4
    pub const OUTPUT_INV_EFFICIENCY_SHIFT: u32 = 4;
    /// Input resistance in kOhm, Q22
    pub const RESISTANCE_SHIFT: u32 = 22;
    /// Capacitor constant in us/nF, Q28
    pub const CAP_CONSTANT_SHIFT: u32 = 28;
    /// Harvester setpoint, Q8
    pub const SETPOINT_SHIFT: u32 = 8;
    /// Fractional bits of the intermediate node voltage state
    pub const V_MID_SHIFT: u32 = 32;

    /// Lower bound for the storage capacitance in the time-constant divisor
    pub const MIN_CAPACITANCE_UF: f64 = 0.001;
}

/// Physical envelope of the human-facing configuration
pub mod limits {
    /// Any converter voltage
    pub const MAX_VOLTAGE_MV: f64 = 10_000.0;
    /// Buck output and drop
    pub const MAX_OUTPUT_VOLTAGE_MV: f64 = 5_000.0;
    /// Input current clamp
    pub const MAX_INPUT_CURRENT_MA: f64 = 4.29e3;
    /// Input resistance
    pub const MAX_RESISTANCE_MOHM: f64 = 4.29e6;
    /// Input diode drop
    pub const MAX_DROP_MV: f64 = 4.29e6;
    /// Storage capacitor
    pub const MAX_INTERMEDIATE_CAPACITANCE_UF: f64 = 100_000.0;
    /// Output capacitor
    pub const MAX_OUTPUT_CAPACITANCE_UF: f64 = 4.29e6;
    /// Storage leakage
    pub const MAX_LEAK_CURRENT_NA: f64 = 4.29e9;
    /// Startup drain
    pub const MAX_STARTUP_DELAY_MS: f64 = 10_000.0;
    /// Threshold check period
    pub const MAX_CHECK_INTERVAL_MS: f64 = 4.29e3;
    /// GPIO logging threshold
    pub const MAX_GPIO_THRESHOLD_MV: f64 = 4.29e6;

    /// Harvester voltages
    pub const MAX_HARVEST_VOLTAGE_MV: f64 = 5_000.0;
    /// Open-circuit detection current, lower bound
    pub const MIN_CURRENT_LIMIT_UA: f64 = 1.0;
    /// Open-circuit detection current, upper bound
    pub const MAX_CURRENT_LIMIT_UA: f64 = 50_000.0;
    /// Perturbation step, lower bound
    pub const MIN_VOLTAGE_STEP_MV: f64 = 1.0;
    /// Perturbation step, upper bound
    pub const MAX_VOLTAGE_STEP_MV: f64 = 1_000_000.0;
    /// Harvester interval and duration, lower bound
    pub const MIN_INTERVAL_MS: f64 = 0.01;
    /// Harvester interval and duration, upper bound
    pub const MAX_INTERVAL_MS: f64 = 1_000_000.0;
    /// Curve window, lower bound
    pub const MIN_WINDOW_SAMPLES: u32 = 8;
    /// Curve window, upper bound
    pub const MAX_WINDOW_SAMPLES: u32 = 2_000;
    /// Frontend settling cycles
    pub const MAX_WAIT_CYCLES: u32 = 100;
}

/// Analog front-end of the observer cape (hardware revision 2.4c)
pub mod cape {
    /// Current shunt resistance [Ohm]
    pub const R_SHUNT_OHM: f64 = 2.0;
    /// Gain of the current instrumentation amplifier
    pub const G_INST_AMP: f64 = 48.0;
    /// ADC reference [V]
    pub const V_REF_ADC: f64 = 4.096;
    /// ADC input gain, current channel
    pub const G_ADC_I: f64 = 1.25;
    /// ADC input gain, voltage channel
    pub const G_ADC_V: f64 = 1.25;
    /// ADC resolution
    pub const M_ADC_BITS: u32 = 18;
    /// DAC reference [V]
    pub const V_REF_DAC: f64 = 2.5;
    /// DAC output gain
    pub const G_DAC: f64 = 2.0;
    /// DAC resolution
    pub const M_DAC_BITS: u32 = 16;

    /// Largest ADC code
    pub const RAW_MAX_ADC: u32 = (1 << M_ADC_BITS) - 1;
    /// Largest DAC code
    pub const RAW_MAX_DAC: u32 = (1 << M_DAC_BITS) - 1;
}

/// Generic calibration of stored traces
pub mod trace {
    /// 3 nV steps, allows 0 - 12 V
    pub const VOLTAGE_GAIN: f64 = 3e-9;
    /// 250 pA steps, allows 0 - 1 A
    pub const CURRENT_GAIN: f64 = 250e-12;
    /// 1 ns steps
    pub const TIME_GAIN: f64 = 1e-9;

    /// Minimal correlation for a calibration regression to be accepted
    pub const MIN_CALIBRATION_RVALUE: f64 = 0.999;
}

/// Tolerances for warnings about constrained timings
pub mod tracking {
    /// Relative change of the duration/interval ratio before it gets logged
    pub const TIMING_RATIO_TOLERANCE: f64 = 0.1;
}

/// Configuration file discovery
pub mod paths {
    /// Shared configuration
    pub const DEFAULT_CONFIG_FILE: &str = "vsrc.toml";
    /// Machine-local overrides
    pub const LOCAL_CONFIG_FILE: &str = "vsrc.local.toml";
}
