// src/model.rs
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use crate::drivers::StethoscopeError;

/// Number of MFCC means the classifier takes.
pub const FEATURE_COUNT: usize = 13;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Diagnosis {
    Healthy,
    #[serde(rename = "COPD")]
    Copd,
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Diagnosis::Healthy => "Healthy",
            Diagnosis::Copd => "COPD",
        })
    }
}

/// Opaque classifier behind the prediction screen.
pub trait ModelService {
    fn predict(&self, features: &[f64; FEATURE_COUNT]) -> Result<Diagnosis, StethoscopeError>;
}

pub fn features_from_slice(values: &[f64]) -> Result<[f64; FEATURE_COUNT], StethoscopeError> {
    <[f64; FEATURE_COUNT]>::try_from(values).map_err(|_| {
        StethoscopeError::invalid_config(
            "features",
            format!("got {} values, the model takes {FEATURE_COUNT}", values.len()),
        )
    })
}

/// Standard scaler followed by a linear SVM, exported as JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearSvmModel {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LinearSvmModel {
    pub fn from_json(text: &str) -> Result<Self, StethoscopeError> {
        let model: Self = serde_json::from_str(text)
            .map_err(|e| StethoscopeError::Model(format!("malformed model artifact: {e}")))?;
        model.check()?;
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self, StethoscopeError> {
        let text = fs::read_to_string(path).map_err(|e| StethoscopeError::io(path, e))?;
        let model = Self::from_json(&text)
            .map_err(|e| StethoscopeError::Model(format!("{}: {e}", path.display())))?;
        log::info!("loaded classifier from {}", path.display());
        Ok(model)
    }

    fn check(&self) -> Result<(), StethoscopeError> {
        for (name, values) in [("mean", &self.mean), ("scale", &self.scale), ("weights", &self.weights)] {
            if values.len() != FEATURE_COUNT {
                return Err(StethoscopeError::Model(format!(
                    "{name} has {} entries, expected {FEATURE_COUNT}",
                    values.len()
                )));
            }
        }
        if self.scale.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(StethoscopeError::Model("scale entries must be finite and non-zero".into()));
        }
        Ok(())
    }

    /// Signed distance to the separating hyperplane; positive means COPD.
    pub fn decision(&self, features: &[f64; FEATURE_COUNT]) -> f64 {
        features
            .iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .zip(&self.weights)
            .map(|(((x, m), s), w)| w * (x - m) / s)
            .sum::<f64>()
            + self.bias
    }
}

impl ModelService for LinearSvmModel {
    fn predict(&self, features: &[f64; FEATURE_COUNT]) -> Result<Diagnosis, StethoscopeError> {
        if features.iter().any(|f| !f.is_finite()) {
            return Err(StethoscopeError::invalid_config("features", "all values must be finite"));
        }
        Ok(if self.decision(features) > 0.0 {
            Diagnosis::Copd
        } else {
            Diagnosis::Healthy
        })
    }
}

/// Loads the artifact on first use and keeps it for the rest of the process.
pub struct LazyModel {
    path: PathBuf,
    model: OnceCell<LinearSvmModel>,
}

impl LazyModel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            model: OnceCell::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    fn get(&self) -> Result<&LinearSvmModel, StethoscopeError> {
        self.model.get_or_try_init(|| LinearSvmModel::load(&self.path))
    }
}

impl ModelService for LazyModel {
    fn predict(&self, features: &[f64; FEATURE_COUNT]) -> Result<Diagnosis, StethoscopeError> {
        self.get()?.predict(features)
    }
}
