// src/registry.rs
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use crate::drivers::StethoscopeError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
    pub age: u32,
    pub email: String,
}

impl PatientRecord {
    fn validate(&self, signals: &[PathBuf]) -> Result<(), StethoscopeError> {
        for (name, value) in [
            ("patient_id", &self.patient_id),
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("email", &self.email),
        ] {
            if value.trim().is_empty() {
                return Err(StethoscopeError::invalid_config(name, "must not be empty"));
            }
        }
        if self.age == 0 {
            return Err(StethoscopeError::invalid_config("age", "must be a positive number of years"));
        }
        if signals.is_empty() {
            return Err(StethoscopeError::invalid_config("signals", "select at least one signal file"));
        }
        Ok(())
    }
}

/// Storage for patients and the signal files attached to them.
///
/// Saving a patient that already exists keeps the stored details and appends
/// the new signal paths.
pub trait PatientRegistry {
    fn save(&self, patient: &PatientRecord, signals: &[PathBuf]) -> Result<(), StethoscopeError>;
    fn find(&self, patient_id: &str) -> Result<Option<(PatientRecord, Vec<PathBuf>)>, StethoscopeError>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry {
    patient: PatientRecord,
    signals: Vec<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    patients: BTreeMap<String, Entry>,
}

impl Document {
    fn save(&mut self, patient: &PatientRecord, signals: &[PathBuf]) -> Result<(), StethoscopeError> {
        patient.validate(signals)?;
        let entry = self
            .patients
            .entry(patient.patient_id.clone())
            .or_insert_with(|| Entry {
                patient: patient.clone(),
                signals: Vec::new(),
            });
        entry.signals.extend(signals.iter().cloned());
        Ok(())
    }

    fn find(&self, patient_id: &str) -> Option<(PatientRecord, Vec<PathBuf>)> {
        let entry = self.patients.get(patient_id)?;
        Some((entry.patient.clone(), entry.signals.clone()))
    }
}

#[derive(Default)]
pub struct MemoryRegistry {
    document: Mutex<Document>,
}

impl PatientRegistry for MemoryRegistry {
    fn save(&self, patient: &PatientRecord, signals: &[PathBuf]) -> Result<(), StethoscopeError> {
        self.document.lock().save(patient, signals)
    }

    fn find(&self, patient_id: &str) -> Result<Option<(PatientRecord, Vec<PathBuf>)>, StethoscopeError> {
        Ok(self.document.lock().find(patient_id))
    }
}

/// One JSON document on disk, rewritten through a temp file and a rename.
pub struct JsonFileRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Document, StethoscopeError> {
        if !self.path.exists() {
            return Ok(Document::default());
        }
        let text = fs::read_to_string(&self.path).map_err(|e| StethoscopeError::io(&self.path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| StethoscopeError::Registry(format!("{} is not a registry: {e}", self.path.display())))
    }

    fn write(&self, document: &Document) -> Result<(), StethoscopeError> {
        let json = serde_json::to_vec_pretty(document)
            .map_err(|e| StethoscopeError::Registry(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| StethoscopeError::io(&tmp, e))?;
        file.write_all(&json).map_err(|e| StethoscopeError::io(&tmp, e))?;
        file.sync_all().map_err(|e| StethoscopeError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| StethoscopeError::io(&self.path, e))
    }
}

impl PatientRegistry for JsonFileRegistry {
    fn save(&self, patient: &PatientRecord, signals: &[PathBuf]) -> Result<(), StethoscopeError> {
        let _guard = self.lock.lock();
        let mut document = self.read()?;
        document.save(patient, signals)?;
        self.write(&document)?;
        log::info!(
            "saved {} signal(s) for patient {} to {}",
            signals.len(),
            patient.patient_id,
            self.path.display()
        );
        Ok(())
    }

    fn find(&self, patient_id: &str) -> Result<Option<(PatientRecord, Vec<PathBuf>)>, StethoscopeError> {
        let _guard = self.lock.lock();
        Ok(self.read()?.find(patient_id))
    }
}
