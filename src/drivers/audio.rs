use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use hound::{SampleFormat, WavSpec, WavWriter};
use crate::drivers::{SignalRecord, StethoscopeError};
/// Peak level the loudest sample is scaled to; well inside i16 to leave headroom.
pub const DEFAULT_HEADROOM: f64 = 4096.0;
/// Playback rate used for auscultation clips.
pub const DEFAULT_PLAYBACK_RATE: u32 = 6800;
#[derive(Clone, Debug, PartialEq)]
pub struct Pcm16Buffer {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}
impl Pcm16Buffer {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}
/// Turns voltages into a mono PCM16 clip.
///
/// The playback rate is a re-interpretation of the sample sequence for
/// listening, not a resampling of the acquisition rate.
pub struct AudioRenderer {
    headroom: f64,
}
impl Default for AudioRenderer {
    fn default() -> Self {
        Self {
            headroom: DEFAULT_HEADROOM,
        }
    }
}
impl AudioRenderer {
    pub fn with_headroom(headroom: f64) -> Result<Self, StethoscopeError> {
        if !(headroom > 0.0 && headroom <= i16::MAX as f64) {
            return Err(StethoscopeError::invalid_config(
                "audio headroom",
                format!("{headroom}; must be in (0, {}]", i16::MAX),
            ));
        }
        Ok(Self { headroom })
    }
    pub fn render(
        &self,
        record: &SignalRecord,
        target_sample_rate: u32,
    ) -> Result<Pcm16Buffer, StethoscopeError> {
        if target_sample_rate == 0 {
            return Err(StethoscopeError::invalid_config(
                "playback sample rate",
                "0 Hz; must be positive",
            ));
        }
        record.require("audio render", 1)?;
        let first = record.samples[0].voltage;
        let max_abs = record
            .samples
            .iter()
            .fold(0.0f64, |acc, s| acc.max(s.voltage.abs()));
        let constant = record.samples.iter().all(|s| s.voltage == first);
        if max_abs == 0.0 || constant {
            return Err(StethoscopeError::FlatSignal {
                source_id: record.source_id.clone(),
            });
        }
        let scale = self.headroom / max_abs;
        let samples = record
            .samples
            .iter()
            .map(|s| (s.voltage * scale).clamp(i16::MIN as f64, i16::MAX as f64) as i16)
            .collect();
        Ok(Pcm16Buffer {
            sample_rate: target_sample_rate,
            samples,
        })
    }
}
/// `recordings/session.csv` -> `recordings/session.wav`.
pub fn wav_path_for(csv_path: &Path) -> PathBuf {
    csv_path.with_extension("wav")
}
pub fn write_wav(path: &Path, pcm: &Pcm16Buffer) -> Result<(), StethoscopeError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: pcm.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let wav_err = |e: hound::Error| match e {
        hound::Error::IoError(source) => StethoscopeError::io(path, source),
        other => StethoscopeError::Wav {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    };
    let mut writer = WavWriter::create(path, spec).map_err(wav_err)?;
    for &sample in &pcm.samples {
        writer.write_sample(sample).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    log::info!(
        "wrote {} samples ({:.2} s at {} Hz) to {}",
        pcm.samples.len(),
        pcm.duration_seconds(),
        pcm.sample_rate,
        path.display()
    );
    Ok(())
}
/// Starts the first available player in the background.
pub fn spawn_player(path: &Path, players: &[String]) -> Result<Child, StethoscopeError> {
    if !path.exists() {
        return Err(StethoscopeError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "wav file does not exist"),
        ));
    }
    for player in players {
        match Command::new(player)
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                log::info!("playing {} with {player}", path.display());
                return Ok(child);
            }
            Err(e) => log::debug!("player {player} unavailable: {e}"),
        }
    }
    Err(StethoscopeError::Player {
        tried: players.to_vec(),
    })
}
#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;
    #[test]
    fn loudest_sample_maps_to_headroom_with_sign() {
        let record = SignalRecord::uniform("clip", 100.0, &[0.5, -1.0, 0.25, 0.0]);
        let pcm = AudioRenderer::default().render(&record, 6800).unwrap();
        assert_eq!(pcm.samples, vec![2048, -4096, 1024, 0]);
        assert_eq!(pcm.sample_rate, 6800);
    }
    #[test]
    fn output_stays_in_i16_range() {
        let voltages: Vec<f64> = (0..1000).map(|i| ((i * 37 % 101) as f64 - 50.0) * 1e6).collect();
        let record = SignalRecord::uniform("wild", 1000.0, &voltages);
        let renderer = AudioRenderer::with_headroom(i16::MAX as f64).unwrap();
        let pcm = renderer.render(&record, 8000).unwrap();
        assert_eq!(pcm.samples.len(), 1000);
        assert!(pcm.samples.iter().any(|&s| s == i16::MAX || s == -i16::MAX));
    }
    #[test]
    fn flat_signals_are_rejected() {
        for level in [0.0, 1.5] {
            let record = SignalRecord::uniform("flat.csv", 100.0, &[level; 64]);
            let err = AudioRenderer::default().render(&record, 6800).unwrap_err();
            assert!(matches!(err, StethoscopeError::FlatSignal { .. }));
            assert!(err.to_string().contains("flat.csv"));
        }
    }
    #[test]
    fn zero_playback_rate_is_rejected() {
        let record = SignalRecord::uniform("x", 100.0, &[0.0, 1.0]);
        assert!(AudioRenderer::default().render(&record, 0).is_err());
    }
    #[test]
    fn wav_file_is_mono_pcm16() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("session.csv");
        let wav = wav_path_for(&csv);
        assert_eq!(wav.file_name().unwrap(), "session.wav");
        let pcm = Pcm16Buffer {
            sample_rate: 6800,
            samples: vec![0, 100, -100, 4096],
        };
        write_wav(&wav, &pcm).unwrap();
        let mut reader = WavReader::open(&wav).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_rate, 6800);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, pcm.samples);
    }
    #[test]
    fn missing_players_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("clip.wav");
        write_wav(&wav, &Pcm16Buffer { sample_rate: 8000, samples: vec![1, 2] }).unwrap();
        let players = vec!["definitely-not-a-player-xyz".to_string()];
        match spawn_player(&wav, &players) {
            Err(StethoscopeError::Player { tried }) => assert_eq!(tried, players),
            other => panic!("unexpected {other:?}"),
        }
    }
}
