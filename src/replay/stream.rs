//! Sample buffers and the source/sink contract of the storage layer
//!
//! A [`SampleSource`] hands out buffers of raw ADC codes together with the
//! calibration needed to read them; a [`SampleSink`] accepts buffers in the
//! same layout. Reading, writing and file formats belong to the caller.

use crossbeam::channel::{bounded, Receiver, TryRecvError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use crate::calibration::CalibrationSeries;
use crate::config::constants::sampling::{MAX_PREFETCH_DEPTH, SAMPLE_INTERVAL_NS};
use crate::config::harvester::EnergyDType;
use crate::error::{IntoVsrcError, StreamStage, VsrcErrorBuilder, VsrcResult};

/// One chunk of equally long timestamp, voltage and current columns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleBuffer {
    /// Sample timestamps in ns
    pub timestamps_ns: Vec<u64>,
    /// Raw voltage codes
    pub voltage: Vec<u32>,
    /// Raw current codes
    pub current: Vec<u32>,
}

impl SampleBuffer {
    /// Buffer from columns, rejects differing lengths
    pub fn new(timestamps_ns: Vec<u64>, voltage: Vec<u32>, current: Vec<u32>) -> VsrcResult<Self> {
        let buffer = Self {
            timestamps_ns,
            voltage,
            current,
        };
        buffer.validate()?;
        Ok(buffer)
    }

    /// Empty buffer with room for `capacity` samples
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timestamps_ns: Vec::with_capacity(capacity),
            voltage: Vec::with_capacity(capacity),
            current: Vec::with_capacity(capacity),
        }
    }

    /// All three columns must have the same length
    pub fn validate(&self) -> VsrcResult<()> {
        let expected = self.timestamps_ns.len();
        for (name, actual) in [("voltage", self.voltage.len()), ("current", self.current.len())] {
            if actual != expected {
                return Err(VsrcErrorBuilder::new("sample_buffer", "validate").length_mismatch(
                    &format!("{} column", name),
                    expected,
                    actual,
                ));
            }
        }
        Ok(())
    }

    /// Timestamps must strictly increase
    pub fn check_monotonic(&self) -> VsrcResult<()> {
        match self.timestamps_ns.windows(2).position(|pair| pair[1] <= pair[0]) {
            Some(index) => Err(VsrcErrorBuilder::new("sample_buffer", "check_monotonic").invalid_data(
                "timestamps",
                &format!("not increasing at index {}", index + 1),
            )),
            None => Ok(()),
        }
    }

    /// Append one sample
    pub fn push(&mut self, timestamp_ns: u64, voltage: u32, current: u32) {
        self.timestamps_ns.push(timestamp_ns);
        self.voltage.push(voltage);
        self.current.push(current);
    }

    /// Samples in the buffer
    pub fn len(&self) -> usize {
        self.timestamps_ns.len()
    }

    /// Whether the buffer holds no samples
    pub fn is_empty(&self) -> bool {
        self.timestamps_ns.is_empty()
    }

    /// Drop all samples, keeping the allocation
    pub fn clear(&mut self) {
        self.timestamps_ns.clear();
        self.voltage.clear();
        self.current.clear();
    }

    /// Append all samples of `other`
    pub fn extend_from(&mut self, other: &SampleBuffer) {
        self.timestamps_ns.extend_from_slice(&other.timestamps_ns);
        self.voltage.extend_from_slice(&other.voltage);
        self.current.extend_from_slice(&other.current);
    }
}

/// Provider of recorded energy environment buffers
pub trait SampleSource {
    /// Mapping of the raw codes in every buffer
    fn calibration(&self) -> CalibrationSeries;

    /// Datatype of the recorded environment
    fn datatype(&self) -> EnergyDType;

    /// Samples per curve sweep, only meaningful for ivcurve data
    fn window_size(&self) -> Option<u32>;

    /// Nominal time between samples
    fn sample_interval_ns(&self) -> u64 {
        SAMPLE_INTERVAL_NS
    }

    /// Next buffer, `None` once the source is exhausted
    fn next_buffer(&mut self) -> VsrcResult<Option<SampleBuffer>>;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn calibration(&self) -> CalibrationSeries {
        (**self).calibration()
    }

    fn datatype(&self) -> EnergyDType {
        (**self).datatype()
    }

    fn window_size(&self) -> Option<u32> {
        (**self).window_size()
    }

    fn sample_interval_ns(&self) -> u64 {
        (**self).sample_interval_ns()
    }

    fn next_buffer(&mut self) -> VsrcResult<Option<SampleBuffer>> {
        (**self).next_buffer()
    }
}

/// Consumer of simulated output buffers
pub trait SampleSink {
    /// Store one buffer of output samples
    fn append(&mut self, buffer: &SampleBuffer) -> VsrcResult<()>;
}

/// Source backed by buffers held in memory
#[derive(Debug, Clone)]
pub struct MemorySource {
    calibration: CalibrationSeries,
    datatype: EnergyDType,
    window_size: Option<u32>,
    sample_interval_ns: u64,
    buffers: VecDeque<SampleBuffer>,
}

impl MemorySource {
    /// Empty source, fill it with [`MemorySource::push_buffer`]
    pub fn new(calibration: CalibrationSeries, datatype: EnergyDType, window_size: Option<u32>) -> Self {
        Self {
            calibration,
            datatype,
            window_size,
            sample_interval_ns: SAMPLE_INTERVAL_NS,
            buffers: VecDeque::new(),
        }
    }

    /// Source from SI columns (V, A), encoded with `calibration` and split into buffers
    pub fn from_si(
        calibration: CalibrationSeries,
        datatype: EnergyDType,
        window_size: Option<u32>,
        voltage_v: &[f64],
        current_a: &[f64],
        samples_per_buffer: usize,
    ) -> VsrcResult<Self> {
        if voltage_v.len() != current_a.len() {
            return Err(VsrcErrorBuilder::new("memory_source", "from_si").length_mismatch(
                "current column",
                voltage_v.len(),
                current_a.len(),
            ));
        }

        let mut source = Self::new(calibration, datatype, window_size);
        let chunk = samples_per_buffer.max(1);
        for (index, (v_chunk, i_chunk)) in voltage_v.chunks(chunk).zip(current_a.chunks(chunk)).enumerate() {
            let start = (index * chunk) as u64;
            let timestamps = (0..v_chunk.len() as u64)
                .map(|k| (start + k) * source.sample_interval_ns)
                .collect();
            source.push_buffer(SampleBuffer::new(
                timestamps,
                calibration.voltage.si_to_raw_slice(v_chunk),
                calibration.current.si_to_raw_slice(i_chunk),
            )?)?;
        }
        Ok(source)
    }

    /// Override the nominal sample interval
    pub fn with_sample_interval_ns(mut self, interval_ns: u64) -> Self {
        self.sample_interval_ns = interval_ns;
        self
    }

    /// Queue a buffer, rejects differing column lengths
    pub fn push_buffer(&mut self, buffer: SampleBuffer) -> VsrcResult<()> {
        buffer.validate()?;
        self.buffers.push_back(buffer);
        Ok(())
    }

    /// Buffers not yet handed out
    pub fn remaining_buffers(&self) -> usize {
        self.buffers.len()
    }
}

impl SampleSource for MemorySource {
    fn calibration(&self) -> CalibrationSeries {
        self.calibration
    }

    fn datatype(&self) -> EnergyDType {
        self.datatype
    }

    fn window_size(&self) -> Option<u32> {
        self.window_size
    }

    fn sample_interval_ns(&self) -> u64 {
        self.sample_interval_ns
    }

    fn next_buffer(&mut self) -> VsrcResult<Option<SampleBuffer>> {
        Ok(self.buffers.pop_front())
    }
}

/// Sink collecting every appended buffer
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    /// Appended buffers in order
    pub buffers: Vec<SampleBuffer>,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples over all buffers
    pub fn samples(&self) -> usize {
        self.buffers.iter().map(SampleBuffer::len).sum()
    }

    /// All buffers joined into one
    pub fn concat(&self) -> SampleBuffer {
        let mut joined = SampleBuffer::with_capacity(self.samples());
        for buffer in &self.buffers {
            joined.extend_from(buffer);
        }
        joined
    }
}

impl SampleSink for MemorySink {
    fn append(&mut self, buffer: &SampleBuffer) -> VsrcResult<()> {
        buffer.validate()?;
        self.buffers.push(buffer.clone());
        Ok(())
    }
}

/// Source whose buffers are read ahead on a background thread
///
/// Metadata is captured before the reader starts; buffers arrive through a
/// bounded channel so at most `depth` buffers wait in memory.
pub struct PrefetchSource {
    calibration: CalibrationSeries,
    datatype: EnergyDType,
    window_size: Option<u32>,
    sample_interval_ns: u64,
    rx: Option<Receiver<VsrcResult<SampleBuffer>>>,
    handle: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    finished: bool,
}

/// Read `source` ahead on a background thread
pub fn prefetch<S>(source: S, depth: usize) -> VsrcResult<PrefetchSource>
where
    S: SampleSource + Send + 'static,
{
    let depth = depth.clamp(1, MAX_PREFETCH_DEPTH);
    let (tx, rx) = bounded::<VsrcResult<SampleBuffer>>(depth);
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_reader = stop_flag.clone();

    let calibration = source.calibration();
    let datatype = source.datatype();
    let window_size = source.window_size();
    let sample_interval_ns = source.sample_interval_ns();

    let handle = thread::Builder::new()
        .name("vsrc-prefetch".to_string())
        .spawn(move || {
            let mut source = source;
            let mut buffers = 0u64;
            while !stop_flag_reader.load(Ordering::Relaxed) {
                let message = match source.next_buffer() {
                    Ok(Some(buffer)) => Ok(buffer),
                    Ok(None) => break,
                    Err(e) => Err(e),
                };
                let failed = message.is_err();
                if tx.send(message).is_err() || failed {
                    // receiver gone or source broken
                    break;
                }
                buffers += 1;
            }
            debug!(buffers, "Prefetch reader finished");
        })
        .vsrc_err(StreamStage::Prefetch, "prefetch", "spawn")?;

    Ok(PrefetchSource {
        calibration,
        datatype,
        window_size,
        sample_interval_ns,
        rx: Some(rx),
        handle: Some(handle),
        stop_flag,
        finished: false,
    })
}

impl PrefetchSource {
    /// Buffers already read ahead
    pub fn queued(&self) -> usize {
        self.rx.as_ref().map_or(0, Receiver::len)
    }

    /// Non-blocking variant of [`SampleSource::next_buffer`]
    pub fn try_next_buffer(&mut self) -> VsrcResult<Option<SampleBuffer>> {
        let Some(rx) = self.rx.as_ref() else {
            return Ok(None);
        };
        match rx.try_recv() {
            Ok(message) => message.map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    /// Whether the reader thread has delivered its last buffer
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl SampleSource for PrefetchSource {
    fn calibration(&self) -> CalibrationSeries {
        self.calibration
    }

    fn datatype(&self) -> EnergyDType {
        self.datatype
    }

    fn window_size(&self) -> Option<u32> {
        self.window_size
    }

    fn sample_interval_ns(&self) -> u64 {
        self.sample_interval_ns
    }

    fn next_buffer(&mut self) -> VsrcResult<Option<SampleBuffer>> {
        if self.finished {
            return Ok(None);
        }
        let Some(rx) = self.rx.as_ref() else {
            return Ok(None);
        };
        match rx.recv() {
            Ok(message) => message.map(Some),
            Err(_) => {
                // reader dropped its sender: source exhausted or thread died
                self.finished = true;
                match self.handle.take().map(JoinHandle::join) {
                    Some(Err(_)) => Err(VsrcErrorBuilder::new("prefetch", "next_buffer")
                        .stream(StreamStage::Prefetch, "reader thread panicked")),
                    _ => Ok(None),
                }
            }
        }
    }
}

impl Drop for PrefetchSource {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        // unblocks a reader waiting on a full channel
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Prefetch reader thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VsrcError;

    fn ramp_source(samples: usize, per_buffer: usize) -> MemorySource {
        let voltage: Vec<f64> = (0..samples).map(|k| 1.0 + k as f64 * 1e-3).collect();
        let current = vec![1e-3; samples];
        MemorySource::from_si(
            CalibrationSeries::default(),
            EnergyDType::Ivsample,
            None,
            &voltage,
            &current,
            per_buffer,
        )
        .unwrap()
    }

    #[test]
    fn test_buffer_length_mismatch() {
        let err = SampleBuffer::new(vec![0, 1], vec![1, 2], vec![1]).unwrap_err();
        assert!(matches!(err, VsrcError::InvalidData { .. }));
    }

    #[test]
    fn test_monotonic_timestamps() {
        let ok = SampleBuffer::new(vec![0, 10, 20], vec![1; 3], vec![1; 3]).unwrap();
        assert!(ok.check_monotonic().is_ok());
        let bad = SampleBuffer::new(vec![0, 10, 10], vec![1; 3], vec![1; 3]).unwrap();
        assert!(bad.check_monotonic().is_err());
    }

    #[test]
    fn test_from_si_chunks_and_timestamps() {
        let mut source = ramp_source(25, 10);
        assert_eq!(source.remaining_buffers(), 3);

        let first = source.next_buffer().unwrap().unwrap();
        assert_eq!(first.len(), 10);
        let second = source.next_buffer().unwrap().unwrap();
        assert_eq!(second.timestamps_ns[0], 10 * SAMPLE_INTERVAL_NS);
        let third = source.next_buffer().unwrap().unwrap();
        assert_eq!(third.len(), 5);
        assert!(source.next_buffer().unwrap().is_none());
    }

    #[test]
    fn test_from_si_rejects_uneven_columns() {
        let result = MemorySource::from_si(
            CalibrationSeries::default(),
            EnergyDType::Ivsample,
            None,
            &[1.0, 2.0],
            &[1e-3],
            10,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_prefetch_yields_same_buffers() {
        let mut direct = ramp_source(1_000, 64);
        let mut prefetched = prefetch(ramp_source(1_000, 64), 2).unwrap();
        assert_eq!(prefetched.datatype(), EnergyDType::Ivsample);

        loop {
            let a = direct.next_buffer().unwrap();
            let b = prefetched.next_buffer().unwrap();
            assert_eq!(a, b);
            if a.is_none() {
                break;
            }
        }
        assert!(prefetched.is_finished());
    }

    #[test]
    fn test_prefetch_drop_stops_reader() {
        let mut prefetched = prefetch(ramp_source(10_000, 10), 1).unwrap();
        assert!(prefetched.next_buffer().unwrap().is_some());
        // reader is blocked on the full channel here
        drop(prefetched);
    }

    struct BrokenSource;

    impl SampleSource for BrokenSource {
        fn calibration(&self) -> CalibrationSeries {
            CalibrationSeries::default()
        }

        fn datatype(&self) -> EnergyDType {
            EnergyDType::Ivsample
        }

        fn window_size(&self) -> Option<u32> {
            None
        }

        fn next_buffer(&mut self) -> VsrcResult<Option<SampleBuffer>> {
            panic!("trace file vanished");
        }
    }

    #[test]
    fn test_prefetch_reports_reader_panic() {
        let mut prefetched = prefetch(BrokenSource, 2).unwrap();
        match prefetched.next_buffer() {
            Err(VsrcError::Stream { stage, .. }) => assert_eq!(stage, StreamStage::Prefetch),
            other => panic!("Expected stream error, got {:?}", other),
        }
        assert!(prefetched.next_buffer().unwrap().is_none());
    }

    #[test]
    fn test_memory_sink_concat() {
        let mut sink = MemorySink::new();
        let mut source = ramp_source(30, 7);
        while let Some(buffer) = source.next_buffer().unwrap() {
            sink.append(&buffer).unwrap();
        }
        assert_eq!(sink.samples(), 30);
        assert_eq!(sink.concat().len(), 30);
    }
}
