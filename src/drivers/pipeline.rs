use std::sync::Arc;
use std::time::Instant;
use crate::drivers::acquire::OffsetPolicy;
use crate::drivers::fft::{SpectralAnalyzer, SpectrumResult};
use crate::drivers::source::{Sample, SampleSource, SignalRecord};
use crate::drivers::{SignalBuffer, StethoscopeError};
/// Pulls single readings from a source into a shared [`SignalBuffer`] and
/// exposes ready-to-plot snapshots.
pub struct LivePipeline<S: SampleSource> {
    source: S,
    source_id: String,
    buffer: Arc<SignalBuffer>,
    offset_volts: f64,
    started_at: Instant,
    analyzer: SpectralAnalyzer,
}
impl<S: SampleSource> LivePipeline<S> {
    pub fn new(source: S, retention_seconds: f64, policy: OffsetPolicy) -> Result<Self, StethoscopeError> {
        let buffer = Arc::new(SignalBuffer::with_retention(retention_seconds)?);
        Self::with_buffer(source, buffer, policy)
    }
    /// Live mode takes a fixed offset or none. A statistical offset has no
    /// finished batch to average over and is refused.
    pub fn with_buffer(source: S, buffer: Arc<SignalBuffer>, policy: OffsetPolicy) -> Result<Self, StethoscopeError> {
        let offset_volts = match policy {
            OffsetPolicy::Fixed { offset_volts } => offset_volts,
            OffsetPolicy::None => 0.0,
            OffsetPolicy::Statistical => {
                return Err(StethoscopeError::invalid_config(
                    "acquisition.offset",
                    "statistical offset needs a complete batch; live mode accepts fixed or none",
                ))
            }
        };
        Ok(Self {
            source_id: source.id(),
            source,
            buffer,
            offset_volts,
            started_at: Instant::now(),
            analyzer: SpectralAnalyzer::new(),
        })
    }
    pub fn buffer(&self) -> Arc<SignalBuffer> {
        Arc::clone(&self.buffer)
    }
    pub fn source_id(&self) -> &str {
        &self.source_id
    }
    /// One read, timestamped against the pipeline start. Nothing is pushed when the read fails.
    pub fn pump_once(&mut self) -> Result<Sample, StethoscopeError> {
        let voltage = self.source.read_voltage()? - self.offset_volts;
        let sample = Sample::new(self.started_at.elapsed().as_secs_f64(), voltage);
        self.buffer.push(sample);
        Ok(sample)
    }
    pub fn latest_frame(&self) -> SignalRecord {
        self.buffer.snapshot_record(&self.source_id)
    }
    pub fn latest_spectrum(&mut self) -> Result<SpectrumResult, StethoscopeError> {
        let frame = self.latest_frame();
        self.analyzer.analyze(&frame)
    }
}
