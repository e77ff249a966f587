use std::path::PathBuf;
use thiserror::Error;
#[derive(Debug, Error)]
pub enum StethoscopeError {
    /// Bus unreachable or device not answering. The next read may succeed.
    #[error("transport error on {device}: {reason}")]
    Transport { device: String, reason: String },
    #[error("{operation} needs at least {required} samples, got {actual} (source: {source_id})")]
    InsufficientData {
        operation: &'static str,
        required: usize,
        actual: usize,
        source_id: String,
    },
    #[error("unsupported wavelet '{name}' (supported: haar, db1, db2, db3, db4, db6, sym4, coif1)")]
    InvalidWavelet { name: String },
    #[error("invalid {parameter}: {reason}")]
    InvalidConfig { parameter: String, reason: String },
    #[error("signal from {source_id} is flat; cannot derive an audio scale factor")]
    FlatSignal { source_id: String },
    #[error("acquisition stopped at sample {index} of {requested}: {source}")]
    Acquisition {
        index: usize,
        requested: usize,
        #[source]
        source: Box<StethoscopeError>,
    },
    #[error("i/o error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed csv '{}' at line {line}: {reason}", path.display())]
    Csv {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("failed to write wav '{}': {reason}", path.display())]
    Wav { path: PathBuf, reason: String },
    #[error("failed to render plot: {0}")]
    Plot(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("registry error: {0}")]
    Registry(String),
    #[error("no audio player could be started (tried: {})", tried.join(", "))]
    Player { tried: Vec<String> },
}
impl StethoscopeError {
    pub fn invalid_config(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        StethoscopeError::InvalidConfig {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }
    pub fn transport(device: impl Into<String>, reason: impl ToString) -> Self {
        StethoscopeError::Transport {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StethoscopeError::Io {
            path: path.into(),
            source,
        }
    }
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StethoscopeError::Transport { .. })
    }
}
