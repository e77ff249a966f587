use std::fmt;
use std::str::FromStr;
use serde::Serialize;
use crate::drivers::{SignalRecord, StethoscopeError};
/// Orthogonal wavelets available for the single-level decomposition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Wavelet {
    Haar,
    Db2,
    Db3,
    Db4,
    #[default]
    Db6,
    Sym4,
    Coif1,
}
impl Wavelet {
    pub const ALL: [Wavelet; 7] = [
        Wavelet::Haar,
        Wavelet::Db2,
        Wavelet::Db3,
        Wavelet::Db4,
        Wavelet::Db6,
        Wavelet::Sym4,
        Wavelet::Coif1,
    ];
    pub fn name(self) -> &'static str {
        match self {
            Wavelet::Haar => "haar",
            Wavelet::Db2 => "db2",
            Wavelet::Db3 => "db3",
            Wavelet::Db4 => "db4",
            Wavelet::Db6 => "db6",
            Wavelet::Sym4 => "sym4",
            Wavelet::Coif1 => "coif1",
        }
    }
    /// Reconstruction low-pass (scaling) filter.
    fn rec_lo(self) -> &'static [f64] {
        match self {
            Wavelet::Haar => &[0.7071067811865476, 0.7071067811865476],
            Wavelet::Db2 => &[
                0.48296291314469025,
                0.836516303737469,
                0.22414386804185735,
                -0.12940952255092145,
            ],
            Wavelet::Db3 => &[
                0.3326705529509569,
                0.8068915093133388,
                0.4598775021193313,
                -0.13501102001039084,
                -0.08544127388224149,
                0.035226291882100656,
            ],
            Wavelet::Db4 => &[
                0.23037781330885523,
                0.7148465705525415,
                0.6308807679295904,
                -0.02798376941698385,
                -0.18703481171888114,
                0.030841381835986965,
                0.032883011666982945,
                -0.010597401784997278,
            ],
            Wavelet::Db6 => &[
                0.11154074335008017,
                0.4946238903983854,
                0.7511339080215775,
                0.3152503517092432,
                -0.22626469396516913,
                -0.12976686756709563,
                0.09750160558707936,
                0.02752286553001629,
                -0.031582039318031156,
                0.0005538422009938016,
                0.004777257511010651,
                -0.00107730108499558,
            ],
            Wavelet::Sym4 => &[
                0.032223100604042702,
                -0.012603967262037833,
                -0.099219543576847216,
                0.29785779560527736,
                0.80373875180591614,
                0.49761866763201545,
                -0.02963552764599851,
                -0.075765714789273325,
            ],
            Wavelet::Coif1 => &[
                -0.0727326195128539,
                0.3378976624578092,
                0.8525720202122554,
                0.38486484686420286,
                -0.0727326195128539,
                -0.01565572813546454,
            ],
        }
    }
    fn filters(self) -> FilterBank {
        let rec_lo = self.rec_lo().to_vec();
        let len = rec_lo.len();
        let rec_hi: Vec<f64> = (0..len)
            .map(|k| {
                let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                sign * rec_lo[len - 1 - k]
            })
            .collect();
        let dec_lo = rec_lo.iter().rev().copied().collect();
        let dec_hi = rec_hi.iter().rev().copied().collect();
        FilterBank {
            dec_lo,
            dec_hi,
            rec_lo,
            rec_hi,
        }
    }
}
impl fmt::Display for Wavelet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
impl FromStr for Wavelet {
    type Err = StethoscopeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        if lowered == "db1" {
            return Ok(Wavelet::Haar);
        }
        Wavelet::ALL
            .into_iter()
            .find(|w| w.name() == lowered)
            .ok_or_else(|| StethoscopeError::InvalidWavelet { name: s.to_string() })
    }
}
struct FilterBank {
    dec_lo: Vec<f64>,
    dec_hi: Vec<f64>,
    rec_lo: Vec<f64>,
    rec_hi: Vec<f64>,
}
/// Approximation and detail components reconstructed to the input length.
#[derive(Clone, Debug, Serialize)]
pub struct WaveletResult {
    pub wavelet_name: String,
    pub approximation: Vec<f64>,
    pub detail: Vec<f64>,
}
pub struct WaveletAnalyzer;
impl WaveletAnalyzer {
    /// Single-level DWT with half-sample symmetric extension; each component is
    /// reconstructed on its own (the other zeroed) and cut or padded to `N`.
    pub fn decompose(
        record: &SignalRecord,
        wavelet: &str,
        level: usize,
    ) -> Result<WaveletResult, StethoscopeError> {
        let wavelet: Wavelet = wavelet.parse()?;
        if level != 1 {
            return Err(StethoscopeError::invalid_config(
                "wavelet level",
                format!("{level}; only single-level decomposition is supported"),
            ));
        }
        record.require("wavelet decomposition", 1)?;
        let bank = wavelet.filters();
        let signal = record.voltages();
        let n = signal.len();
        let approx_coeffs = downsample_convolve(&signal, &bank.dec_lo);
        let detail_coeffs = downsample_convolve(&signal, &bank.dec_hi);
        let mut approximation = upsample_convolve(&approx_coeffs, &bank.rec_lo);
        let mut detail = upsample_convolve(&detail_coeffs, &bank.rec_hi);
        // odd N reconstructs to N + 1
        approximation.resize(n, 0.0);
        detail.resize(n, 0.0);
        Ok(WaveletResult {
            wavelet_name: wavelet.name().to_string(),
            approximation,
            detail,
        })
    }
}
/// Half-sample symmetric extension: `x[-1] = x[0]`, `x[n] = x[n-1]`.
fn symmetric_at(signal: &[f64], index: isize) -> f64 {
    let n = signal.len() as isize;
    let mut i = index;
    while i < 0 || i >= n {
        if i < 0 {
            i = -i - 1;
        }
        if i >= n {
            i = 2 * n - 1 - i;
        }
    }
    signal[i as usize]
}
fn downsample_convolve(signal: &[f64], filter: &[f64]) -> Vec<f64> {
    let out_len = (signal.len() + filter.len() - 1) / 2;
    (0..out_len)
        .map(|o| {
            let centre = (2 * o + 1) as isize;
            filter
                .iter()
                .enumerate()
                .map(|(j, f)| f * symmetric_at(signal, centre - j as isize))
                .sum()
        })
        .collect()
}
fn upsample_convolve(coeffs: &[f64], filter: &[f64]) -> Vec<f64> {
    let taps = filter.len();
    let upsampled_len = 2 * coeffs.len();
    let out_len = (upsampled_len + 2).saturating_sub(taps);
    (0..out_len)
        .map(|o| {
            let position = o + taps - 2;
            filter
                .iter()
                .enumerate()
                .filter(|(j, _)| *j <= position && position - j < upsampled_len)
                .filter(|(j, _)| (position - j) % 2 == 0)
                .map(|(j, f)| f * coeffs[(position - j) / 2])
                .sum()
        })
        .collect()
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;
    fn ramp_noise(n: usize) -> SignalRecord {
        let voltages: Vec<f64> = (0..n)
            .map(|i| (i as f64 * 0.37).sin() + 0.01 * i as f64)
            .collect();
        SignalRecord::uniform("ramp", 100.0, &voltages)
    }
    #[test]
    fn output_length_matches_input_for_odd_and_prime_lengths() {
        for n in [1usize, 2, 3, 7, 13, 64, 97, 1000, 1009] {
            for wavelet in Wavelet::ALL {
                let result = WaveletAnalyzer::decompose(&ramp_noise(n), wavelet.name(), 1).unwrap();
                assert_eq!(result.approximation.len(), n, "{wavelet} n={n}");
                assert_eq!(result.detail.len(), n, "{wavelet} n={n}");
            }
        }
    }
    #[test]
    fn components_sum_back_to_the_signal() {
        for n in [5usize, 11, 64, 101] {
            let record = ramp_noise(n);
            for wavelet in Wavelet::ALL {
                let result = WaveletAnalyzer::decompose(&record, wavelet.name(), 1).unwrap();
                for (i, s) in record.samples.iter().enumerate() {
                    let sum = result.approximation[i] + result.detail[i];
                    assert!((sum - s.voltage).abs() < 1e-9, "{wavelet} n={n} i={i}");
                }
            }
        }
    }
    #[test]
    fn haar_splits_pairs_into_mean_and_difference() {
        let record = SignalRecord::uniform("pairs", 4.0, &[1.0, 3.0, 5.0, 5.0]);
        let result = WaveletAnalyzer::decompose(&record, "haar", 1).unwrap();
        let expected_a = [2.0, 2.0, 5.0, 5.0];
        let expected_d = [-1.0, 1.0, 0.0, 0.0];
        for i in 0..4 {
            assert!((result.approximation[i] - expected_a[i]).abs() < 1e-12);
            assert!((result.detail[i] - expected_d[i]).abs() < 1e-12);
        }
    }
    #[test]
    fn slow_tone_lives_in_the_approximation() {
        let voltages: Vec<f64> = (0..512)
            .map(|i| (2.0 * PI * 2.0 * i as f64 / 512.0).sin())
            .collect();
        let record = SignalRecord::uniform("slow", 512.0, &voltages);
        let result = WaveletAnalyzer::decompose(&record, "db6", 1).unwrap();
        let energy = |v: &[f64]| v.iter().map(|x| x * x).sum::<f64>();
        assert!(energy(&result.detail) < 1e-3 * energy(&result.approximation));
    }
    #[test]
    fn unknown_wavelet_is_named_in_the_error() {
        let err = WaveletAnalyzer::decompose(&ramp_noise(8), "morlet", 1).unwrap_err();
        assert!(matches!(err, StethoscopeError::InvalidWavelet { .. }));
        assert!(err.to_string().contains("morlet"));
    }
    #[test]
    fn multi_level_requests_are_rejected() {
        let err = WaveletAnalyzer::decompose(&ramp_noise(8), "db4", 3).unwrap_err();
        assert!(err.to_string().contains("wavelet level"));
    }
    #[test]
    fn parses_aliases_case_insensitively() {
        assert_eq!("DB1".parse::<Wavelet>().unwrap(), Wavelet::Haar);
        assert_eq!(" Sym4 ".parse::<Wavelet>().unwrap(), Wavelet::Sym4);
    }
}
