// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::drivers::audio::{DEFAULT_HEADROOM, DEFAULT_PLAYBACK_RATE};
use crate::drivers::buffer::DEFAULT_RETENTION_SECONDS;
use crate::drivers::hardware::ADS1115_DEFAULT_ADDRESS;
use crate::drivers::{BandpassFilter, OffsetPolicy, StethoscopeError, Wavelet};

// 采集前端
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AdcKind {
    #[default]
    Simulated,
    Constant,
    Ads1115,
    Mcp3202,
    Serial,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdcConfig {
    pub kind: AdcKind,
    pub channel: u8,
    pub i2c_bus: u8,
    pub i2c_address: u16,
    pub spi_bus: u8,
    pub spi_device: u8,
    /// MCP3202 reference voltage.
    pub vref_volts: f64,
    pub serial_port: String,
    pub baud_rate: u32,
    /// Reading returned by the `constant` source.
    pub constant_volts: f64,
    /// Where per-bus lock files live; the system temp dir when unset.
    pub lock_dir: Option<PathBuf>,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            kind: AdcKind::Simulated,
            channel: 0,
            i2c_bus: 1,
            i2c_address: ADS1115_DEFAULT_ADDRESS,
            spi_bus: 0,
            spi_device: 0,
            vref_volts: 3.3,
            serial_port: "/dev/ttyUSB0".into(),
            baud_rate: 115_200,
            constant_volts: 1.5,
            lock_dir: None,
        }
    }
}

impl AdcConfig {
    /// Bus name used for exclusive ownership, e.g. `i2c-1` or `spi-0.0`.
    /// Virtual sources own no bus.
    pub fn bus_name(&self) -> Option<String> {
        match self.kind {
            AdcKind::Ads1115 => Some(format!("i2c-{}", self.i2c_bus)),
            AdcKind::Mcp3202 => Some(format!("spi-{}.{}", self.spi_bus, self.spi_device)),
            AdcKind::Serial => Some(format!("serial-{}", self.serial_port)),
            AdcKind::Simulated | AdcKind::Constant => None,
        }
    }
    pub fn lock_dir(&self) -> PathBuf {
        self.lock_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("stethoscope-locks"))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub sample_count: usize,
    pub offset: OffsetPolicy,
    pub progress_every: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_count: 5000,
            offset: OffsetPolicy::default(),
            progress_every: 1000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub sample_interval_ms: u64,
    pub retention_seconds: f64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 50,
            retention_seconds: DEFAULT_RETENTION_SECONDS,
        }
    }
}

impl LiveConfig {
    /// Rendering runs slower than sampling: `max(100, 4 * interval)` ms.
    pub fn render_interval_ms(&self) -> u64 {
        (4 * self.sample_interval_ms).max(100)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub playback_rate_hz: u32,
    pub headroom: f64,
    pub players: Vec<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            playback_rate_hz: DEFAULT_PLAYBACK_RATE,
            headroom: DEFAULT_HEADROOM,
            players: vec!["aplay".into(), "omxplayer".into()],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub wavelet: String,
    pub wavelet_level: usize,
    /// Upper frequency shown on spectrum plots.
    pub spectrum_max_hz: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            wavelet: Wavelet::default().name().into(),
            wavelet_level: 1,
            spectrum_max_hz: 1200.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/linear_svm.json"),
        }
    }
}

/// Everything tunable, with the bench defaults baked in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StethoscopeConfig {
    pub adc: AdcConfig,
    pub acquisition: AcquisitionConfig,
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub filter: BandpassFilter,
    pub analysis: AnalysisConfig,
    pub model: ModelConfig,
}

impl StethoscopeConfig {
    /// Missing keys fall back to defaults; unknown wavelet names and bad numbers fail `validate`.
    pub fn load(path: &Path) -> Result<Self, StethoscopeError> {
        let text = fs::read_to_string(path).map_err(|e| StethoscopeError::io(path, e))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            StethoscopeError::invalid_config("config file", format!("{}: {e}", path.display()))
        })?;
        config.validate()?;
        log::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StethoscopeError> {
        if self.acquisition.sample_count == 0 {
            return Err(StethoscopeError::invalid_config(
                "acquisition.sample_count",
                "0; at least one sample is required",
            ));
        }
        if let OffsetPolicy::Fixed { offset_volts } = self.acquisition.offset {
            if !offset_volts.is_finite() {
                return Err(StethoscopeError::invalid_config(
                    "acquisition.offset.offset_volts",
                    format!("{offset_volts}; must be finite"),
                ));
            }
        }
        if self.live.sample_interval_ms == 0 {
            return Err(StethoscopeError::invalid_config(
                "live.sample_interval_ms",
                "0; must be at least 1 ms",
            ));
        }
        if !self.live.retention_seconds.is_finite() || self.live.retention_seconds <= 0.0 {
            return Err(StethoscopeError::invalid_config(
                "live.retention_seconds",
                format!("{}; must be positive", self.live.retention_seconds),
            ));
        }
        if self.audio.playback_rate_hz == 0 {
            return Err(StethoscopeError::invalid_config(
                "audio.playback_rate_hz",
                "0 Hz; must be positive",
            ));
        }
        if !(self.audio.headroom > 0.0 && self.audio.headroom <= i16::MAX as f64) {
            return Err(StethoscopeError::invalid_config(
                "audio.headroom",
                format!("{}; must be in (0, {}]", self.audio.headroom, i16::MAX),
            ));
        }
        if self.adc.vref_volts <= 0.0 || !self.adc.vref_volts.is_finite() {
            return Err(StethoscopeError::invalid_config(
                "adc.vref_volts",
                format!("{}; must be positive", self.adc.vref_volts),
            ));
        }
        if self.adc.channel > 3 {
            return Err(StethoscopeError::invalid_config(
                "adc.channel",
                format!("{}; must be 0-3", self.adc.channel),
            ));
        }
        self.analysis.wavelet.parse::<Wavelet>()?;
        if self.analysis.wavelet_level != 1 {
            return Err(StethoscopeError::invalid_config(
                "analysis.wavelet_level",
                format!("{}; only single-level decomposition is supported", self.analysis.wavelet_level),
            ));
        }
        if self.analysis.spectrum_max_hz <= 0.0 {
            return Err(StethoscopeError::invalid_config(
                "analysis.spectrum_max_hz",
                format!("{}; must be positive", self.analysis.spectrum_max_hz),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = StethoscopeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.live.render_interval_ms(), 200);
        assert_eq!(config.audio.playback_rate_hz, 6800);
        assert_eq!(config.analysis.wavelet, "db6");
        assert_eq!(config.acquisition.offset, OffsetPolicy::Fixed { offset_volts: 1.5 });
    }

    #[test]
    fn render_interval_has_a_floor() {
        let live = LiveConfig { sample_interval_ms: 10, ..LiveConfig::default() };
        assert_eq!(live.render_interval_ms(), 100);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"adc": {"kind": "mcp3202", "spi_device": 1}, "acquisition": {"offset": {"kind": "statistical"}}}"#,
        )
        .unwrap();
        let config = StethoscopeConfig::load(&path).unwrap();
        assert_eq!(config.adc.kind, AdcKind::Mcp3202);
        assert_eq!(config.adc.bus_name().as_deref(), Some("spi-0.1"));
        assert_eq!(AdcConfig::default().bus_name(), None);
        assert_eq!(config.acquisition.offset, OffsetPolicy::Statistical);
        assert_eq!(config.acquisition.sample_count, 5000);
    }

    #[test]
    fn bad_values_name_the_parameter() {
        let mut config = StethoscopeConfig::default();
        config.analysis.wavelet = "mexh".into();
        assert!(config.validate().unwrap_err().to_string().contains("mexh"));
        let mut config = StethoscopeConfig::default();
        config.live.sample_interval_ms = 0;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("live.sample_interval_ms"));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            StethoscopeConfig::load(&path),
            Err(StethoscopeError::InvalidConfig { .. })
        ));
    }
}
