use std::f64::consts::PI;
use serde::{Deserialize, Serialize};
use crate::drivers::{SignalRecord, StethoscopeError};
#[derive(Clone, Copy, Debug)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}
impl BiquadCoeffs {
    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }
}
#[derive(Clone, Copy, Debug, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}
#[derive(Clone, Copy, Debug)]
struct BiquadFilter {
    coeffs: BiquadCoeffs,
    state: BiquadState,
}
impl BiquadFilter {
    fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            state: BiquadState::default(),
        }
    }
    fn process(&mut self, input: f64) -> f64 {
        // Transposed direct form II
        let y = self.coeffs.b0 * input + self.state.z1;
        self.state.z1 = self.coeffs.b1 * input - self.coeffs.a1 * y + self.state.z2;
        self.state.z2 = self.coeffs.b2 * input - self.coeffs.a2 * y;
        y
    }
    /// Loads the state a constant input `x` would settle to; returns the settled output.
    fn prime(&mut self, x: f64) -> f64 {
        let c = self.coeffs;
        let y = c.dc_gain() * x;
        self.state.z2 = c.b2 * x - c.a2 * y;
        self.state.z1 = c.b1 * x - c.a1 * y + self.state.z2;
        y
    }
}
#[derive(Clone, Debug, Default)]
pub struct FilterChain {
    sections: Vec<BiquadFilter>,
}
impl FilterChain {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.state = BiquadState::default();
        }
    }
    pub fn process_sample(&mut self, mut value: f64) -> f64 {
        for section in &mut self.sections {
            value = section.process(value);
        }
        value
    }
    fn prime(&mut self, mut value: f64) {
        for section in &mut self.sections {
            value = section.prime(value);
        }
    }
    /// Runs the chain over `signal` starting from the steady state of its first value.
    fn run(&mut self, signal: &[f64]) -> Vec<f64> {
        self.reset();
        if let Some(&first) = signal.first() {
            self.prime(first);
        }
        signal.iter().map(|&v| self.process_sample(v)).collect()
    }
}
/// Butterworth band-pass: high-pass at `low_hz` cascaded with low-pass at `high_hz`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandpassFilter {
    pub low_hz: f64,
    pub high_hz: f64,
    /// Order of each skirt; even, 2 to 8.
    pub order: usize,
}
impl Default for BandpassFilter {
    fn default() -> Self {
        Self {
            low_hz: 100.0,
            high_hz: 1200.0,
            order: 4,
        }
    }
}
impl BandpassFilter {
    pub fn new(low_hz: f64, high_hz: f64, order: usize) -> Self {
        Self {
            low_hz,
            high_hz,
            order,
        }
    }
    pub fn validate(&self, sample_rate_hz: f64) -> Result<(), StethoscopeError> {
        if self.order < 2 || self.order > 8 || self.order % 2 != 0 {
            return Err(StethoscopeError::invalid_config(
                "filter order",
                format!("{}; must be even and between 2 and 8", self.order),
            ));
        }
        let nyquist = sample_rate_hz / 2.0;
        if !(self.low_hz > 0.0 && self.low_hz < self.high_hz && self.high_hz < nyquist) {
            return Err(StethoscopeError::invalid_config(
                "filter band",
                format!(
                    "{}-{} Hz; need 0 < low < high < {nyquist} Hz (Nyquist)",
                    self.low_hz, self.high_hz
                ),
            ));
        }
        Ok(())
    }
    pub fn design(&self, sample_rate_hz: f64) -> Result<FilterChain, StethoscopeError> {
        self.validate(sample_rate_hz)?;
        let mut sections = Vec::with_capacity(self.order);
        for q in butterworth_qs(self.order) {
            sections.push(BiquadFilter::new(highpass(self.low_hz, sample_rate_hz, q)));
        }
        for q in butterworth_qs(self.order) {
            sections.push(BiquadFilter::new(lowpass(self.high_hz, sample_rate_hz, q)));
        }
        Ok(FilterChain { sections })
    }
    /// Zero-phase filtering: forward pass, backward pass, odd-reflection padding at both ends.
    pub fn apply(&self, record: &SignalRecord) -> Result<SignalRecord, StethoscopeError> {
        record.require("band-pass filter", 2)?;
        let sample_rate = record.effective_rate_hz("band-pass filter")?;
        let mut chain = self.design(sample_rate)?;
        let signal = record.voltages();
        let n = signal.len();
        let pad = (3 * (2 * self.order + 1)).min(n - 1);
        let mut extended = Vec::with_capacity(n + 2 * pad);
        let (first, last) = (signal[0], signal[n - 1]);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
        extended.extend_from_slice(&signal);
        extended.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));
        let mut forward = chain.run(&extended);
        forward.reverse();
        let mut backward = chain.run(&forward);
        backward.reverse();
        let mut filtered = record.clone();
        for (sample, value) in filtered.samples.iter_mut().zip(&backward[pad..pad + n]) {
            sample.voltage = *value;
        }
        filtered.source_id = format!("{} [{}-{} Hz]", record.source_id, self.low_hz, self.high_hz);
        Ok(filtered)
    }
}
/// Per-section Q of an even-order Butterworth prototype.
fn butterworth_qs(order: usize) -> Vec<f64> {
    (0..order / 2)
        .map(|k| {
            let theta = (2 * k + 1) as f64 * PI / (2 * order) as f64;
            1.0 / (2.0 * theta.cos())
        })
        .collect()
}
fn lowpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 - cos_w0) * 0.5;
    let b1 = 1.0 - cos_w0;
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}
fn highpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 + cos_w0) * 0.5;
    let b1 = -(1.0 + cos_w0);
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}
fn normalize(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> BiquadCoeffs {
    let a0_inv = 1.0 / a0;
    BiquadCoeffs {
        b0: b0 * a0_inv,
        b1: b1 * a0_inv,
        b2: b2 * a0_inv,
        a1: a1 * a0_inv,
        a2: a2 * a0_inv,
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    const RATE: f64 = 6400.0;
    fn tone(freq: f64) -> SignalRecord {
        let voltages: Vec<f64> = (0..6400)
            .map(|i| (2.0 * PI * freq * i as f64 / RATE).sin())
            .collect();
        SignalRecord::uniform("tone", RATE, &voltages)
    }
    fn middle_rms(record: &SignalRecord) -> f64 {
        let mid = &record.samples[1600..4800];
        (mid.iter().map(|s| s.voltage * s.voltage).sum::<f64>() / mid.len() as f64).sqrt()
    }
    #[test]
    fn passes_the_band_and_rejects_the_skirts() {
        let filter = BandpassFilter::default();
        let reference = middle_rms(&tone(400.0));
        let in_band = middle_rms(&filter.apply(&tone(400.0)).unwrap());
        let below = middle_rms(&filter.apply(&tone(20.0)).unwrap());
        let above = middle_rms(&filter.apply(&tone(2800.0)).unwrap());
        assert!(in_band / reference > 0.95, "in band {in_band}");
        assert!(below / reference < 0.01, "below {below}");
        assert!(above / reference < 0.01, "above {above}");
    }
    #[test]
    fn keeps_length_and_timestamps() {
        let record = tone(300.0);
        let filtered = BandpassFilter::default().apply(&record).unwrap();
        assert_eq!(filtered.len(), record.len());
        assert_eq!(filtered.times(), record.times());
    }
    #[test]
    fn zero_phase_keeps_peaks_in_place() {
        let record = tone(500.0);
        let filtered = BandpassFilter::default().apply(&record).unwrap();
        // 500 Hz at 6400 Hz: peaks every 12.8 samples; compare a peak in the middle
        let i = (3200.0f64 + 3.2).round() as usize;
        assert!((filtered.samples[i].voltage - record.samples[i].voltage).abs() < 0.05);
    }
    #[test]
    fn band_above_nyquist_is_rejected() {
        let filter = BandpassFilter::new(100.0, 4000.0, 4);
        let err = filter.apply(&tone(400.0)).unwrap_err();
        assert!(err.to_string().contains("filter band"));
    }
    #[test]
    fn odd_orders_are_rejected() {
        assert!(BandpassFilter::new(100.0, 1200.0, 3).validate(RATE).is_err());
    }
    #[test]
    fn butterworth_fourth_order_qs() {
        let qs = butterworth_qs(4);
        assert!((qs[0] - 0.5412).abs() < 1e-4);
        assert!((qs[1] - 1.3066).abs() < 1e-4);
    }
}
