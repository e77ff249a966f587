use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::Serialize;
use crate::drivers::StethoscopeError;
/// Tracks which hardware buses are owned by a running session.
///
/// Claims never block: a second session (or a liveness probe) asking for a bus
/// that is already owned gets `None` back and decides for itself what to do.
/// With a lock directory the claim also takes an advisory `flock` on
/// `<dir>/<bus>.lock`, so sessions in other processes see it too.
#[derive(Clone, Default)]
pub struct BusArbiter {
    owned: Arc<Mutex<HashSet<String>>>,
    lock_dir: Option<PathBuf>,
}
impl BusArbiter {
    /// Claims visible to this process only.
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_lock_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            owned: Arc::default(),
            lock_dir: Some(dir.into()),
        }
    }
    /// `Ok(None)` when another session owns the bus. Errors only come from the lock file itself.
    pub fn try_claim(&self, bus: &str) -> Result<Option<BusClaim>, StethoscopeError> {
        if !self.owned.lock().insert(bus.to_string()) {
            return Ok(None);
        }
        let release = |owned: &Mutex<HashSet<String>>| owned.lock().remove(bus);
        let lock = match &self.lock_dir {
            Some(dir) => match lock_bus_file(dir, bus) {
                Ok(Some(file)) => Some(file),
                Ok(None) => {
                    release(&self.owned);
                    return Ok(None);
                }
                Err(e) => {
                    release(&self.owned);
                    return Err(e);
                }
            },
            None => None,
        };
        Ok(Some(BusClaim {
            bus: bus.to_string(),
            owned: Arc::clone(&self.owned),
            _lock: lock,
        }))
    }
    pub fn is_claimed(&self, bus: &str) -> bool {
        self.owned.lock().contains(bus)
    }
}
/// Lock file for a bus; path separators and the like become `_`.
pub fn lock_file_path(dir: &Path, bus: &str) -> PathBuf {
    let name: String = bus
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    dir.join(format!("{name}.lock"))
}
fn lock_bus_file(dir: &Path, bus: &str) -> Result<Option<File>, StethoscopeError> {
    fs::create_dir_all(dir).map_err(|e| StethoscopeError::io(dir, e))?;
    let path = lock_file_path(dir, bus);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|e| StethoscopeError::io(&path, e))?;
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(Some(file)),
        Err(e) if e.kind() == ErrorKind::WouldBlock || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            log::debug!("{} is locked by another process", path.display());
            Ok(None)
        }
        Err(e) => Err(StethoscopeError::io(&path, e)),
    }
}
/// Exclusive ownership of one bus; released on drop.
#[derive(Debug)]
pub struct BusClaim {
    bus: String,
    owned: Arc<Mutex<HashSet<String>>>,
    // 文件关闭即释放 flock
    _lock: Option<File>,
}
impl BusClaim {
    pub fn bus(&self) -> &str {
        &self.bus
    }
}
impl Drop for BusClaim {
    fn drop(&mut self) {
        self.owned.lock().remove(&self.bus);
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Present,
    Absent,
    /// A session owns the bus; the probe was skipped.
    Busy,
}
/// Runs `check` only if the bus is free, holding the claim for the duration of the check.
pub fn probe_with<F>(arbiter: &BusArbiter, bus: &str, check: F) -> Result<ProbeStatus, StethoscopeError>
where
    F: FnOnce() -> bool,
{
    let Some(_claim) = arbiter.try_claim(bus)? else {
        log::debug!("probe of {bus} skipped: bus is owned by an active session");
        return Ok(ProbeStatus::Busy);
    };
    Ok(if check() { ProbeStatus::Present } else { ProbeStatus::Absent })
}
