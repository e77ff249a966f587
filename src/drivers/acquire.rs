use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use serde::{Deserialize, Serialize};
use crate::drivers::{RecordState, Sample, SampleSource, SignalRecord, StethoscopeError};
/// How the DC bias of the front-end is removed. The two correcting policies are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OffsetPolicy {
    /// Subtract the known hardware bias from every reading.
    Fixed { offset_volts: f64 },
    /// Subtract the batch mean once the batch is complete.
    Statistical,
    /// Keep raw volts.
    None,
}
impl Default for OffsetPolicy {
    fn default() -> Self {
        OffsetPolicy::Fixed { offset_volts: 1.5 }
    }
}
/// Shared cancel flag; cloned into whoever is allowed to stop the session.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}
impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}
/// Where acquisition progress goes. Keeps the acquirer independent of any console or UI.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}
/// Forwards to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogCrateSink;
impl LogSink for LogCrateSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => log::debug!(target: "stethoscope::acquire", "{message}"),
            LogLevel::Info => log::info!(target: "stethoscope::acquire", "{message}"),
            LogLevel::Warn => log::warn!(target: "stethoscope::acquire", "{message}"),
        }
    }
}
/// Keeps messages in memory for later inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: parking_lot::Mutex<Vec<(LogLevel, String)>>,
}
impl MemorySink {
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().clone()
    }
}
impl LogSink for MemorySink {
    fn log(&self, level: LogLevel, message: &str) {
        self.lines.lock().push((level, message.to_string()));
    }
}
#[derive(Debug)]
pub struct AcquisitionReport {
    pub record: SignalRecord,
    pub requested: usize,
    pub elapsed_seconds: f64,
    /// `samples collected / elapsed seconds`.
    pub effective_rate_hz: f64,
    /// Batch mean before the statistical correction (after the fixed one).
    pub mean_before_correction: Option<f64>,
    pub error: Option<StethoscopeError>,
}
impl AcquisitionReport {
    pub fn is_complete(&self) -> bool {
        self.record.state == RecordState::Completed
    }
}
pub struct Acquirer {
    policy: OffsetPolicy,
    progress_every: usize,
    sink: Arc<dyn LogSink>,
    cancel: CancelToken,
}
impl Acquirer {
    pub fn new(policy: OffsetPolicy) -> Self {
        Self {
            policy,
            progress_every: 1000,
            sink: Arc::new(LogCrateSink),
            cancel: CancelToken::new(),
        }
    }
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every;
        self
    }
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
    pub fn policy(&self) -> OffsetPolicy {
        self.policy
    }
    /// Reads `sample_count` values as fast as the source allows.
    ///
    /// Cancellation and transport failures end the batch early; the samples
    /// collected so far are always returned, with the failure attached to the
    /// report rather than replacing it.
    pub fn acquire<S: SampleSource + ?Sized>(
        &self,
        source: &mut S,
        sample_count: usize,
    ) -> Result<AcquisitionReport, StethoscopeError> {
        if sample_count == 0 {
            return Err(StethoscopeError::invalid_config(
                "sample count",
                "0; at least one sample is required",
            ));
        }
        let fixed_offset = match self.policy {
            OffsetPolicy::Fixed { offset_volts } => offset_volts,
            _ => 0.0,
        };
        let mut record = SignalRecord::open(source.id(), source.nominal_rate_hz());
        record.samples.reserve(sample_count);
        self.sink.log(
            LogLevel::Info,
            &format!("starting acquisition of {sample_count} samples from {}", record.source_id),
        );
        let started = Instant::now();
        let mut error = None;
        for index in 0..sample_count {
            if self.cancel.is_cancelled() {
                self.sink.log(
                    LogLevel::Warn,
                    &format!("acquisition cancelled after {index} of {sample_count} samples"),
                );
                record.close(RecordState::Cancelled);
                break;
            }
            let voltage = match source.read_voltage() {
                Ok(v) => v - fixed_offset,
                Err(e) => {
                    self.sink.log(
                        LogLevel::Warn,
                        &format!("read {index} of {sample_count} failed: {e}"),
                    );
                    record.close(RecordState::Failed);
                    error = Some(StethoscopeError::Acquisition {
                        index,
                        requested: sample_count,
                        source: Box::new(e),
                    });
                    break;
                }
            };
            let timestamp = started.elapsed().as_secs_f64();
            record.push(Sample::new(timestamp, voltage));
            if self.progress_every > 0 && index % self.progress_every == 0 {
                self.sink.log(
                    LogLevel::Debug,
                    &format!("sample {index}/{sample_count}: {voltage:.4} V"),
                );
            }
        }
        if record.state == RecordState::Open {
            record.close(RecordState::Completed);
        }
        let elapsed_seconds = started.elapsed().as_secs_f64();
        let effective_rate_hz = if elapsed_seconds > 0.0 {
            record.len() as f64 / elapsed_seconds
        } else {
            0.0
        };
        let mean_before_correction = record.mean_voltage();
        if let (OffsetPolicy::Statistical, Some(mean)) = (self.policy, mean_before_correction) {
            for sample in &mut record.samples {
                sample.voltage -= mean;
            }
        }
        self.sink.log(
            LogLevel::Info,
            &format!(
                "collected {} samples in {elapsed_seconds:.2} s (~{effective_rate_hz:.2} Hz), mean {:.4} V",
                record.len(),
                mean_before_correction.unwrap_or(0.0)
            ),
        );
        Ok(AcquisitionReport {
            record,
            requested: sample_count,
            elapsed_seconds,
            effective_rate_hz,
            mean_before_correction,
            error,
        })
    }
}
