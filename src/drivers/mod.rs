// src/drivers/mod.rs
// 采集、分析、渲染的底层模块
pub mod acquire;
pub mod audio;
pub mod buffer;
pub mod bus;
pub mod envelope;
pub mod error;
pub mod fft;
pub mod filter;
pub mod hardware;
pub mod pipeline;
pub mod plot;
pub mod source;
pub mod wavelet;
// 公开导出常用类型，方便外部调用
pub use acquire::{Acquirer, AcquisitionReport, CancelToken, LogCrateSink, LogLevel, LogSink, MemorySink, OffsetPolicy};
pub use audio::{AudioRenderer, Pcm16Buffer};
pub use buffer::SignalBuffer;
pub use bus::{BusArbiter, BusClaim, ProbeStatus};
pub use envelope::{EnvelopeAnalyzer, EnvelopeResult};
pub use error::StethoscopeError;
pub use fft::{SpectralAnalyzer, SpectrumResult};
pub use filter::BandpassFilter;
pub use pipeline::LivePipeline;
pub use plot::{render_envelope_png, render_spectrum_png, render_waveform_png, render_wavelet_png, PlotStyle};
pub use source::{ConstantSource, ManualSource, RecordState, Sample, SampleSource, SignalRecord, SimulatedSource};
pub use wavelet::{Wavelet, WaveletAnalyzer, WaveletResult};
