use std::f64::consts::PI;
use rustfft::{num_complex::Complex64, FftPlanner};
use serde::Serialize;
use crate::drivers::{SignalRecord, StethoscopeError};
/// Hilbert-derived views of a record.
///
/// `amplitude_envelope` and `instantaneous_phase` are index-aligned with the
/// input. `instantaneous_frequency[i]` is the rate between samples `i` and
/// `i + 1`, so it is one element shorter and belongs to `t[i]`.
#[derive(Clone, Debug, Serialize)]
pub struct EnvelopeResult {
    pub sample_rate_used: f64,
    pub amplitude_envelope: Vec<f64>,
    /// Wrapped to `[-π, π]`.
    pub instantaneous_phase: Vec<f64>,
    pub instantaneous_frequency: Vec<f64>,
}
pub struct EnvelopeAnalyzer {
    planner: FftPlanner<f64>,
}
impl Default for EnvelopeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
impl EnvelopeAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }
    pub fn analyze(&mut self, record: &SignalRecord) -> Result<EnvelopeResult, StethoscopeError> {
        record.require("hilbert envelope", 2)?;
        // 1 / mean(diff(t)) == (N-1) / (t[N-1] - t[0])
        let sample_rate = record.effective_rate_hz("hilbert envelope")?;
        let analytic = self.analytic_signal(&record.voltages());
        let amplitude_envelope = analytic.iter().map(|c| c.norm()).collect();
        let instantaneous_phase: Vec<f64> = analytic.iter().map(|c| c.im.atan2(c.re)).collect();
        let unwrapped = unwrap_phase(&instantaneous_phase);
        let instantaneous_frequency = unwrapped
            .windows(2)
            .map(|w| (w[1] - w[0]) * sample_rate / (2.0 * PI))
            .collect();
        Ok(EnvelopeResult {
            sample_rate_used: sample_rate,
            amplitude_envelope,
            instantaneous_phase,
            instantaneous_frequency,
        })
    }
    /// FFT, keep DC (and Nyquist for even N), double positive bins, zero negative ones, IFFT.
    pub fn analytic_signal(&mut self, signal: &[f64]) -> Vec<Complex64> {
        let n = signal.len();
        if n == 0 {
            return Vec::new();
        }
        let mut buffer: Vec<Complex64> = signal.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        self.planner.plan_fft_forward(n).process(&mut buffer);
        for (k, bin) in buffer.iter_mut().enumerate() {
            let weight = if k == 0 || (n % 2 == 0 && k == n / 2) {
                1.0
            } else if k < (n + 1) / 2 {
                2.0
            } else {
                0.0
            };
            *bin *= weight;
        }
        self.planner.plan_fft_inverse(n).process(&mut buffer);
        let scale = 1.0 / n as f64;
        buffer.into_iter().map(|c| c * scale).collect()
    }
}
/// Removes 2π jumps between consecutive phase values.
pub fn unwrap_phase(phase: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(phase.len());
    let mut correction = 0.0;
    for (i, &p) in phase.iter().enumerate() {
        if i > 0 {
            let delta = p - phase[i - 1];
            if delta > PI {
                correction -= 2.0 * PI * ((delta + PI) / (2.0 * PI)).floor();
            } else if delta < -PI {
                correction += 2.0 * PI * ((-delta + PI) / (2.0 * PI)).floor();
            }
        }
        out.push(p + correction);
    }
    out
}
#[cfg(test)]
mod tests {
    use super::*;
    fn tone(rate: f64, freq: f64, amplitude: f64, n: usize) -> SignalRecord {
        let voltages: Vec<f64> = (0..n)
            .map(|i| amplitude * (2.0 * PI * freq * i as f64 / rate).cos())
            .collect();
        SignalRecord::uniform("tone", rate, &voltages)
    }
    #[test]
    fn pure_tone_has_flat_envelope_and_constant_frequency() {
        let mut analyzer = EnvelopeAnalyzer::new();
        let result = analyzer.analyze(&tone(1000.0, 50.0, 0.8, 2000)).unwrap();
        assert_eq!(result.amplitude_envelope.len(), 2000);
        assert_eq!(result.instantaneous_phase.len(), 2000);
        assert_eq!(result.instantaneous_frequency.len(), 1999);
        for i in 200..1800 {
            assert!((result.amplitude_envelope[i] - 0.8).abs() < 0.02, "envelope at {i}");
            assert!((result.instantaneous_frequency[i] - 50.0).abs() < 0.5, "frequency at {i}");
        }
    }
    #[test]
    fn non_integer_cycle_counts_stay_close_in_the_middle() {
        let mut analyzer = EnvelopeAnalyzer::new();
        let result = analyzer.analyze(&tone(800.0, 37.3, 1.2, 1601)).unwrap();
        let mid = &result.amplitude_envelope[400..1200];
        assert!(mid.iter().all(|a| (a - 1.2).abs() < 0.06));
        let freq = &result.instantaneous_frequency[400..1200];
        let mean = freq.iter().sum::<f64>() / freq.len() as f64;
        assert!((mean - 37.3).abs() < 0.5);
    }
    #[test]
    fn phase_stays_wrapped() {
        let mut analyzer = EnvelopeAnalyzer::new();
        let result = analyzer.analyze(&tone(1000.0, 120.0, 1.0, 500)).unwrap();
        assert!(result
            .instantaneous_phase
            .iter()
            .all(|p| (-PI..=PI).contains(p)));
    }
    #[test]
    fn one_sample_is_insufficient() {
        let mut analyzer = EnvelopeAnalyzer::new();
        let err = analyzer
            .analyze(&SignalRecord::uniform("x", 10.0, &[1.0]))
            .unwrap_err();
        assert!(matches!(err, StethoscopeError::InsufficientData { required: 2, .. }));
    }
    #[test]
    fn unwrap_removes_jumps() {
        let wrapped = [3.0, -3.0, -2.5, 2.9, -3.1];
        let unwrapped = unwrap_phase(&wrapped);
        assert!(unwrapped.windows(2).all(|w| (w[1] - w[0]).abs() <= PI));
        assert_eq!(unwrapped[0], 3.0);
    }
}
