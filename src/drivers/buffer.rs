use std::collections::VecDeque;
use parking_lot::RwLock;
use crate::drivers::{RecordState, Sample, SignalRecord, StethoscopeError};
pub const DEFAULT_RETENTION_SECONDS: f64 = 12.0;
struct Inner {
    samples: VecDeque<Sample>,
    evicted: u64,
}
/// Time-windowed store for live sampling.
///
/// One sampling thread pushes, any number of render threads take snapshots.
/// Every push drops samples older than `retention_seconds` relative to the
/// newest timestamp, which bounds memory for sessions of any length.
pub struct SignalBuffer {
    inner: RwLock<Inner>,
    retention_seconds: f64,
}
impl SignalBuffer {
    pub fn with_retention(retention_seconds: f64) -> Result<Self, StethoscopeError> {
        if !retention_seconds.is_finite() || retention_seconds <= 0.0 {
            return Err(StethoscopeError::invalid_config(
                "retention_seconds",
                format!("{retention_seconds}; must be a positive number of seconds"),
            ));
        }
        Ok(Self {
            inner: RwLock::new(Inner {
                samples: VecDeque::new(),
                evicted: 0,
            }),
            retention_seconds,
        })
    }
    pub fn retention_seconds(&self) -> f64 {
        self.retention_seconds
    }
    pub fn push(&self, sample: Sample) {
        let mut inner = self.inner.write();
        inner.samples.push_back(sample);
        let threshold = sample.timestamp - self.retention_seconds;
        while let Some(front) = inner.samples.front() {
            if front.timestamp < threshold {
                inner.samples.pop_front();
                inner.evicted += 1;
            } else {
                break;
            }
        }
    }
    /// Point-in-time copy in insertion order.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.inner.read().samples.iter().copied().collect()
    }
    /// Snapshot wrapped as a record; marked `Evicted` once the window has started dropping samples.
    pub fn snapshot_record(&self, source_id: &str) -> SignalRecord {
        let inner = self.inner.read();
        let mut record = SignalRecord::open(source_id, None);
        record.samples = inner.samples.iter().copied().collect();
        record.close(if inner.evicted > 0 {
            RecordState::Evicted
        } else {
            RecordState::Open
        });
        record
    }
    pub fn latest(&self) -> Option<Sample> {
        self.inner.read().samples.back().copied()
    }
    pub fn len(&self) -> usize {
        self.inner.read().samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.inner.read().samples.is_empty()
    }
    pub fn evicted(&self) -> u64 {
        self.inner.read().evicted
    }
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.samples.clear();
        inner.evicted = 0;
    }
}
