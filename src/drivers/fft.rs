use rustfft::{num_complex::Complex64, FftPlanner};
use serde::Serialize;
use crate::drivers::{SignalRecord, StethoscopeError};
/// One-sided magnitude spectrum of a record.
#[derive(Clone, Debug, Serialize)]
pub struct SpectrumResult {
    pub sample_rate_used: f64,
    pub frequencies_hz: Vec<f64>,
    pub magnitudes: Vec<f64>,
}
impl SpectrumResult {
    pub fn bin_width(&self) -> f64 {
        self.frequencies_hz.get(1).copied().unwrap_or(0.0)
    }
    /// Strongest non-DC bin as `(frequency_hz, magnitude)`.
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.frequencies_hz
            .iter()
            .copied()
            .zip(self.magnitudes.iter().copied())
            .skip(1)
            .fold(None, |best: Option<(f64, f64)>, (f, m)| match best {
                Some((_, best_m)) if best_m >= m => best,
                _ => Some((f, m)),
            })
    }
}
/// Computes FFT magnitude spectra of whole records.
pub struct SpectralAnalyzer {
    planner: FftPlanner<f64>,
}
impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
impl SpectralAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }
    /// First `N/2` bins of the DFT, each scaled by `2/N` so a sinusoid of peak
    /// amplitude `A` shows up as `A` at its frequency.
    pub fn analyze(&mut self, record: &SignalRecord) -> Result<SpectrumResult, StethoscopeError> {
        let sample_rate = record.effective_rate_hz("spectrum")?;
        let n = record.len();
        let fft = self.planner.plan_fft_forward(n);
        let mut buffer: Vec<Complex64> = record
            .samples
            .iter()
            .map(|s| Complex64::new(s.voltage, 0.0))
            .collect();
        fft.process(&mut buffer);
        let half = n / 2;
        let frequencies_hz = (0..half)
            .map(|k| k as f64 * sample_rate / n as f64)
            .collect();
        let magnitudes = buffer
            .iter()
            .take(half)
            .map(|c| c.norm() * 2.0 / n as f64)
            .collect();
        Ok(SpectrumResult {
            sample_rate_used: sample_rate,
            frequencies_hz,
            magnitudes,
        })
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;
    fn sine(rate: f64, freq: f64, amplitude: f64, n: usize) -> SignalRecord {
        let voltages: Vec<f64> = (0..n)
            .map(|i| amplitude * (2.0 * PI * freq * i as f64 / rate).sin())
            .collect();
        SignalRecord::uniform("sine", rate, &voltages)
    }
    #[test]
    fn peak_lands_within_one_bin_of_the_tone() {
        let mut analyzer = SpectralAnalyzer::new();
        for &(n, freq) in &[(1000usize, 50.0), (999, 123.0), (257, 10.0), (4096, 440.0)] {
            let spectrum = analyzer.analyze(&sine(1000.0, freq, 1.0, n)).unwrap();
            let (peak_hz, _) = spectrum.peak().unwrap();
            assert!(
                (peak_hz - freq).abs() <= spectrum.bin_width() + 1e-9,
                "n={n} freq={freq} peak={peak_hz}"
            );
        }
    }
    #[test]
    fn bin_centred_tone_reports_its_amplitude() {
        let mut analyzer = SpectralAnalyzer::new();
        // 64 cycles over 1024 samples, and (N-1)/duration == rate
        let spectrum = analyzer.analyze(&sine(1024.0, 64.0, 0.75, 1024)).unwrap();
        let (peak_hz, magnitude) = spectrum.peak().unwrap();
        assert!((peak_hz - 64.0).abs() < 1e-6);
        assert!((magnitude - 0.75).abs() < 1e-6);
        assert_eq!(spectrum.frequencies_hz.len(), 512);
    }
    #[test]
    fn too_short_records_are_rejected() {
        let mut analyzer = SpectralAnalyzer::new();
        let err = analyzer
            .analyze(&SignalRecord::uniform("short.csv", 10.0, &[1.0]))
            .unwrap_err();
        assert!(matches!(err, StethoscopeError::InsufficientData { actual: 1, .. }));
    }
    #[test]
    fn identical_input_gives_identical_output() {
        let record = sine(500.0, 30.0, 1.0, 300);
        let a = SpectralAnalyzer::new().analyze(&record).unwrap();
        let b = SpectralAnalyzer::new().analyze(&record).unwrap();
        assert_eq!(a.magnitudes, b.magnitudes);
        assert_eq!(a.frequencies_hz, b.frequencies_hz);
    }
}
