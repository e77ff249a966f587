// src/recorder.rs
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use crate::drivers::{Sample, SignalRecord, StethoscopeError};

/// The only header the reader accepts.
pub const CSV_HEADER: &str = "\"time_seconds\",\"voltage\"";

/// Streams samples to a two-column CSV file as they arrive.
pub struct CsvRecorder {
    writer: BufWriter<File>,
    path: PathBuf,
    rows: usize,
}

impl CsvRecorder {
    pub fn create(path: &Path) -> Result<Self, StethoscopeError> {
        let file = File::create(path).map_err(|e| StethoscopeError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{CSV_HEADER}").map_err(|e| StethoscopeError::io(path, e))?;
        Ok(Self { writer, path: path.to_path_buf(), rows: 0 })
    }

    pub fn write_sample(&mut self, sample: &Sample) -> Result<(), StethoscopeError> {
        // Display on f64 is the shortest text that parses back to the same value
        writeln!(self.writer, "{},{}", sample.timestamp, sample.voltage)
            .map_err(|e| StethoscopeError::io(&self.path, e))?;
        self.rows += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<usize, StethoscopeError> {
        self.writer.flush().map_err(|e| StethoscopeError::io(&self.path, e))?;
        log::info!("saved {} samples to {}", self.rows, self.path.display());
        Ok(self.rows)
    }
}

pub fn write_csv(path: &Path, record: &SignalRecord) -> Result<(), StethoscopeError> {
    let mut recorder = CsvRecorder::create(path)?;
    for sample in &record.samples {
        recorder.write_sample(sample)?;
    }
    recorder.finish()?;
    Ok(())
}

/// Reads a canonical CSV. The record's source id is the path.
pub fn read_csv(path: &Path) -> Result<SignalRecord, StethoscopeError> {
    let file = File::open(path).map_err(|e| StethoscopeError::io(path, e))?;
    let csv_error = |line: usize, reason: String| StethoscopeError::Csv {
        path: path.to_path_buf(),
        line,
        reason,
    };
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        lines.push(line.map_err(|e| StethoscopeError::io(path, e))?);
    }
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let header = lines
        .first()
        .ok_or_else(|| csv_error(1, format!("empty file; expected header {CSV_HEADER}")))?;
    if header.trim_start_matches('\u{feff}').trim() != CSV_HEADER {
        return Err(csv_error(1, format!("found header {:?}, expected {CSV_HEADER}", header.trim())));
    }
    let mut samples = Vec::with_capacity(lines.len().saturating_sub(1));
    for (i, line) in lines.iter().enumerate().skip(1) {
        let line_no = i + 1;
        let mut fields = line.trim().split(',');
        let (Some(t), Some(v), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(csv_error(line_no, format!("expected 2 fields in {line:?}")));
        };
        let parse = |field: &str, name: &str| -> Result<f64, StethoscopeError> {
            let value: f64 = field
                .trim()
                .parse()
                .map_err(|_| csv_error(line_no, format!("{name} {field:?} is not a number")))?;
            if !value.is_finite() {
                return Err(csv_error(line_no, format!("{name} {field:?} is not finite")));
            }
            Ok(value)
        };
        let sample = Sample::new(parse(t, "time_seconds")?, parse(v, "voltage")?);
        if let Some(previous) = samples.last().map(|s: &Sample| s.timestamp) {
            if sample.timestamp < previous {
                return Err(csv_error(
                    line_no,
                    format!("time {} goes backwards from {previous}", sample.timestamp),
                ));
            }
        }
        samples.push(sample);
    }
    log::debug!("read {} samples from {}", samples.len(), path.display());
    Ok(SignalRecord::from_samples(path.display().to_string(), samples))
}
