use std::collections::VecDeque;
use std::f64::consts::PI;
use std::time::Instant;
use rand::Rng;
use serde::Serialize;
use crate::drivers::StethoscopeError;
/// One voltage reading, timestamped relative to the start of its session.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: f64,
    pub voltage: f64,
}
impl Sample {
    pub fn new(timestamp: f64, voltage: f64) -> Self {
        Self { timestamp, voltage }
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Open,
    Completed,
    Cancelled,
    Failed,
    /// Live snapshot whose oldest samples were dropped by the retention window.
    Evicted,
}
/// Ordered samples of one channel plus the metadata needed to analyze them.
#[derive(Clone, Debug, Serialize)]
pub struct SignalRecord {
    pub source_id: String,
    pub nominal_rate_hz: Option<f64>,
    pub state: RecordState,
    pub samples: Vec<Sample>,
}
impl SignalRecord {
    pub fn open(source_id: impl Into<String>, nominal_rate_hz: Option<f64>) -> Self {
        Self {
            source_id: source_id.into(),
            nominal_rate_hz,
            state: RecordState::Open,
            samples: Vec::new(),
        }
    }
    pub fn from_samples(source_id: impl Into<String>, samples: Vec<Sample>) -> Self {
        Self {
            source_id: source_id.into(),
            nominal_rate_hz: None,
            state: RecordState::Completed,
            samples,
        }
    }
    /// Evenly spaced record built from bare voltages.
    pub fn uniform(source_id: impl Into<String>, sample_rate_hz: f64, voltages: &[f64]) -> Self {
        let samples = voltages
            .iter()
            .enumerate()
            .map(|(i, &v)| Sample::new(i as f64 / sample_rate_hz, v))
            .collect();
        Self {
            source_id: source_id.into(),
            nominal_rate_hz: Some(sample_rate_hz),
            state: RecordState::Completed,
            samples,
        }
    }
    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }
    pub fn close(&mut self, state: RecordState) {
        self.state = state;
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.timestamp).collect()
    }
    pub fn voltages(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.voltage).collect()
    }
    pub fn duration_seconds(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        }
    }
    pub fn mean_voltage(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().map(|s| s.voltage).sum::<f64>() / self.samples.len() as f64)
    }
    /// Sample rate implied by the timestamps: `(N-1) / (t[N-1] - t[0])`.
    pub fn effective_rate_hz(&self, operation: &'static str) -> Result<f64, StethoscopeError> {
        self.require(operation, 2)?;
        let duration = self.duration_seconds();
        if duration <= 0.0 || !duration.is_finite() {
            return Err(StethoscopeError::invalid_config(
                "timestamps",
                format!(
                    "{} spans {duration} s; cannot derive a sample rate",
                    self.source_id
                ),
            ));
        }
        Ok((self.samples.len() - 1) as f64 / duration)
    }
    pub fn require(&self, operation: &'static str, required: usize) -> Result<(), StethoscopeError> {
        if self.samples.len() < required {
            return Err(StethoscopeError::InsufficientData {
                operation,
                required,
                actual: self.samples.len(),
                source_id: self.source_id.clone(),
            });
        }
        Ok(())
    }
}
/// A physical or simulated ADC channel that yields one voltage per call.
pub trait SampleSource {
    fn read_voltage(&mut self) -> Result<f64, StethoscopeError>;
    fn id(&self) -> String;
    /// Rate the device is configured for, if it has one.
    fn nominal_rate_hz(&self) -> Option<f64> {
        None
    }
}
impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn read_voltage(&mut self) -> Result<f64, StethoscopeError> {
        (**self).read_voltage()
    }
    fn id(&self) -> String {
        (**self).id()
    }
    fn nominal_rate_hz(&self) -> Option<f64> {
        (**self).nominal_rate_hz()
    }
}
/// Sine + noise around the 1.5 V bias, used when no ADC is attached.
pub struct SimulatedSource {
    started_at: Instant,
    bias_volts: f64,
    amplitude_volts: f64,
    frequency_hz: f64,
    noise_volts: f64,
}
impl SimulatedSource {
    pub fn new(bias_volts: f64, amplitude_volts: f64, frequency_hz: f64, noise_volts: f64) -> Self {
        Self {
            started_at: Instant::now(),
            bias_volts,
            amplitude_volts,
            frequency_hz,
            noise_volts,
        }
    }
}
impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(1.5, 0.8, 0.5, 0.05)
    }
}
impl SampleSource for SimulatedSource {
    fn read_voltage(&mut self) -> Result<f64, StethoscopeError> {
        let t = self.started_at.elapsed().as_secs_f64();
        let noise = (rand::thread_rng().gen::<f64>() - 0.5) * self.noise_volts;
        Ok(self.bias_volts + self.amplitude_volts * (2.0 * PI * self.frequency_hz * t).sin() + noise)
    }
    fn id(&self) -> String {
        "simulated".into()
    }
}
/// Always returns the same reading.
pub struct ConstantSource {
    volts: f64,
}
impl ConstantSource {
    pub fn new(volts: f64) -> Self {
        Self { volts }
    }
}
impl SampleSource for ConstantSource {
    fn read_voltage(&mut self) -> Result<f64, StethoscopeError> {
        Ok(self.volts)
    }
    fn id(&self) -> String {
        format!("constant:{}", self.volts)
    }
}
/// Scripted readings for tests and deterministic playback; `None` entries fail as transport errors.
pub struct ManualSource {
    queue: VecDeque<Option<f64>>,
}
impl ManualSource {
    pub fn new(readings: impl IntoIterator<Item = f64>) -> Self {
        Self {
            queue: readings.into_iter().map(Some).collect(),
        }
    }
    pub fn scripted(readings: impl IntoIterator<Item = Option<f64>>) -> Self {
        Self {
            queue: readings.into_iter().collect(),
        }
    }
}
impl SampleSource for ManualSource {
    fn read_voltage(&mut self) -> Result<f64, StethoscopeError> {
        match self.queue.pop_front() {
            Some(Some(v)) => Ok(v),
            Some(None) => Err(StethoscopeError::transport("manual", "scripted bus failure")),
            None => Err(StethoscopeError::transport("manual", "script exhausted")),
        }
    }
    fn id(&self) -> String {
        "manual".into()
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn effective_rate_uses_first_and_last_timestamps() {
        let record = SignalRecord::uniform("t", 100.0, &[0.0; 11]);
        let rate = record.effective_rate_hz("test").unwrap();
        assert!((rate - 100.0).abs() < 1e-9);
    }
    #[test]
    fn single_sample_is_insufficient() {
        let record = SignalRecord::uniform("one.csv", 100.0, &[1.0]);
        let err = record.effective_rate_hz("spectrum").unwrap_err();
        assert!(err.to_string().contains("one.csv"));
    }
    #[test]
    fn manual_source_reports_scripted_failures() {
        let mut source = ManualSource::scripted([Some(1.0), None]);
        assert_eq!(source.read_voltage().unwrap(), 1.0);
        assert!(source.read_voltage().unwrap_err().is_recoverable());
    }
    #[test]
    fn simulated_source_stays_near_bias() {
        let mut source = SimulatedSource::default();
        for _ in 0..100 {
            let v = source.read_voltage().unwrap();
            assert!((0.6..=2.4).contains(&v));
        }
    }
}
