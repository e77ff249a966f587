use std::path::PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use crate::config::AdcKind;

#[derive(Parser)]
#[command(
    name = "stethoscope",
    version,
    about = "Digital stethoscope acquisition and signal analysis",
    long_about = "Acquire heart and lung sounds from an ADS1115, MCP3202, serial bridge or simulated \
                  source, store them as CSV and derive spectra, wavelet components, envelopes, \
                  filtered signals, WAV clips and plots."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file (defaults are used for missing keys)
    #[arg(long, env = "STETHOSCOPE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false, global = true)]
    pub compact: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Record a fixed number of samples to CSV
    Acquire(AcquireArgs),
    /// Sample continuously and report live frames
    Live(LiveArgs),
    /// FFT magnitude spectrum of a CSV record
    Spectrum(SpectrumArgs),
    /// Single-level wavelet decomposition of a CSV record
    Wavelet(WaveletArgs),
    /// Hilbert envelope, phase and instantaneous frequency
    Envelope(EnvelopeArgs),
    /// Zero-phase Butterworth band-pass filter
    Filter(FilterArgs),
    /// Convert a CSV record to a 16-bit WAV clip
    Audio(AudioArgs),
    /// Render a PNG view of a CSV record
    Plot(PlotArgs),
    /// Check whether the configured ADC answers on its bus
    Probe(SourceArgs),
    /// Classify 13 MFCC means as Healthy or COPD
    Predict(PredictArgs),
    /// Store a patient and attach signal files
    Register(RegisterArgs),
    /// Show a patient and their signal files
    Lookup(LookupArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OffsetArg {
    Fixed,
    Statistical,
    None,
}

#[derive(Args, Default)]
pub struct SourceArgs {
    /// ADC front-end
    #[arg(long, value_enum)]
    pub adc: Option<AdcKind>,

    /// ADC input channel
    #[arg(long)]
    pub channel: Option<u8>,

    /// Reading returned by the constant source
    #[arg(long)]
    pub constant_volts: Option<f64>,

    /// Serial device of the ADC bridge
    #[arg(long)]
    pub serial_port: Option<String>,
}

#[derive(Args)]
pub struct AcquireArgs {
    /// Output CSV path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Number of samples to read
    #[arg(short = 'n', long)]
    pub samples: Option<usize>,

    /// DC offset removal
    #[arg(long, value_enum)]
    pub offset: Option<OffsetArg>,

    /// Bias subtracted by the fixed offset policy
    #[arg(long)]
    pub offset_volts: Option<f64>,

    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Args)]
pub struct LiveArgs {
    /// How long to run
    #[arg(long, default_value_t = 5.0)]
    pub seconds: f64,

    /// Milliseconds between samples
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Also write every sample to this CSV file
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Write the waveform of the last frame as PNG
    #[arg(long)]
    pub plot: Option<PathBuf>,

    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Args)]
pub struct SpectrumArgs {
    /// Input CSV record
    pub csv: PathBuf,

    /// Write a PNG of the spectrum
    #[arg(long)]
    pub plot: Option<PathBuf>,

    /// Highest frequency shown on the plot
    #[arg(long)]
    pub max_hz: Option<f64>,

    /// Print every bin instead of a summary
    #[arg(long, default_value_t = false)]
    pub full: bool,
}

#[derive(Args)]
pub struct WaveletArgs {
    /// Input CSV record
    pub csv: PathBuf,

    /// Wavelet name (haar, db1, db2, db3, db4, db6, sym4, coif1)
    #[arg(short, long)]
    pub wavelet: Option<String>,

    /// Decomposition level
    #[arg(long)]
    pub level: Option<usize>,

    /// Write a PNG of both components
    #[arg(long)]
    pub plot: Option<PathBuf>,

    /// Print both components instead of a summary
    #[arg(long, default_value_t = false)]
    pub full: bool,
}

#[derive(Args)]
pub struct EnvelopeArgs {
    /// Input CSV record
    pub csv: PathBuf,

    /// Write a PNG of envelope, phase and frequency
    #[arg(long)]
    pub plot: Option<PathBuf>,

    /// Print every value instead of a summary
    #[arg(long, default_value_t = false)]
    pub full: bool,
}

#[derive(Args)]
pub struct FilterArgs {
    /// Input CSV record
    pub csv: PathBuf,

    /// Output CSV path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Lower band edge in Hz
    #[arg(long)]
    pub low: Option<f64>,

    /// Upper band edge in Hz
    #[arg(long)]
    pub high: Option<f64>,

    /// Filter order of each band edge
    #[arg(long)]
    pub order: Option<usize>,
}

#[derive(Args)]
pub struct AudioArgs {
    /// Input CSV record
    pub csv: PathBuf,

    /// Output WAV path (default: next to the CSV)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Playback sample rate in Hz
    #[arg(long)]
    pub rate: Option<u32>,

    /// Start an external player once the file is written
    #[arg(long, default_value_t = false)]
    pub play: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PlotView {
    Waveform,
    Spectrum,
    Wavelet,
    Envelope,
}

#[derive(Args)]
pub struct PlotArgs {
    /// Input CSV record
    pub csv: PathBuf,

    /// Output PNG path
    #[arg(short, long)]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value_t = PlotView::Waveform)]
    pub view: PlotView,

    /// Image width in pixels
    #[arg(long, default_value_t = 900)]
    pub width: u32,

    /// Height of each panel in pixels
    #[arg(long, default_value_t = 400)]
    pub height: u32,
}

#[derive(Args)]
pub struct PredictArgs {
    /// Comma-separated MFCC means
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub features: Vec<f64>,

    /// Model artifact (JSON)
    #[arg(long)]
    pub model: Option<PathBuf>,
}

#[derive(Args)]
pub struct RegisterArgs {
    /// Patient identifier (NIT)
    #[arg(long)]
    pub id: String,

    #[arg(long)]
    pub first_name: String,

    #[arg(long)]
    pub last_name: String,

    #[arg(long)]
    pub age: u32,

    #[arg(long)]
    pub email: String,

    /// Signal files to attach
    #[arg(long = "signal", num_args = 1..)]
    pub signals: Vec<PathBuf>,

    /// Registry file
    #[arg(long, env = "STETHOSCOPE_REGISTRY", default_value = "patients.json")]
    pub registry: PathBuf,
}

#[derive(Args)]
pub struct LookupArgs {
    /// Patient identifier (NIT)
    pub id: String,

    /// Registry file
    #[arg(long, env = "STETHOSCOPE_REGISTRY", default_value = "patients.json")]
    pub registry: PathBuf,
}
