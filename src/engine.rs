// src/engine.rs
use crate::config::LiveConfig;
use crate::drivers::{BusClaim, CancelToken, LivePipeline, OffsetPolicy, SampleSource, SignalBuffer, SpectralAnalyzer, StethoscopeError};
use crate::recorder::CsvRecorder;
use crate::types::*;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// 睡眠切片，保证 stop() 能及时返回
const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// A running live session: one sampling thread feeding the buffer, one
/// rendering thread turning snapshots into frames. The caller only receives
/// [`SessionEvent`]s.
pub struct LiveSession {
    cancel: CancelToken,
    commands: Sender<SessionCommand>,
    events: Receiver<SessionEvent>,
    sampler: Option<JoinHandle<u64>>,
    renderer: Option<JoinHandle<()>>,
}

impl LiveSession {
    /// `claim` is held by the sampling thread until it exits.
    pub fn spawn<S>(
        source: S,
        config: &LiveConfig,
        policy: OffsetPolicy,
        claim: Option<BusClaim>,
    ) -> Result<Self, StethoscopeError>
    where
        S: SampleSource + Send + 'static,
    {
        let buffer = Arc::new(SignalBuffer::with_retention(config.retention_seconds)?);
        let pipeline = LivePipeline::with_buffer(source, Arc::clone(&buffer), policy)?;
        let source_id = pipeline.source_id().to_string();
        let cancel = CancelToken::new();
        let (tx, events) = mpsc::channel();
        let (commands, rx_cmd) = mpsc::channel();
        let sample_interval = Duration::from_millis(config.sample_interval_ms);
        let render_interval = Duration::from_millis(config.render_interval_ms());

        let sampler = {
            let cancel = cancel.clone();
            let tx = tx.clone();
            thread::Builder::new()
                .name("live-sampler".into())
                .spawn(move || sampling_loop(pipeline, claim, sample_interval, cancel, tx, rx_cmd))
                .map_err(|e| StethoscopeError::transport("live-sampler", e))?
        };
        let renderer = {
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("live-renderer".into())
                .spawn(move || render_loop(buffer, source_id, render_interval, cancel, tx))
                .map_err(|e| StethoscopeError::transport("live-renderer", e))?
        };
        log::info!(
            "live session started: sampling every {} ms, rendering every {} ms",
            config.sample_interval_ms,
            config.render_interval_ms()
        );
        Ok(Self {
            cancel,
            commands,
            events,
            sampler: Some(sampler),
            renderer: Some(renderer),
        })
    }

    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// False once the sampling thread has gone away.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Cancels both threads and waits for them. Returns the number of samples read.
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        self.cancel.cancel();
        if let Some(renderer) = self.renderer.take() {
            if renderer.join().is_err() {
                log::error!("live renderer panicked");
            }
        }
        match self.sampler.take().map(JoinHandle::join) {
            Some(Ok(samples)) => samples,
            Some(Err(_)) => {
                log::error!("live sampler panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sampling_loop<S: SampleSource>(
    mut pipeline: LivePipeline<S>,
    claim: Option<BusClaim>,
    interval: Duration,
    cancel: CancelToken,
    tx: Sender<SessionEvent>,
    rx_cmd: Receiver<SessionCommand>,
) -> u64 {
    if let Some(claim) = &claim {
        tx.send(SessionEvent::Log(format!("holding bus {}", claim.bus()))).ok();
    }
    let mut recorder: Option<CsvRecorder> = None;
    let mut samples_read = 0u64;
    while !cancel.is_cancelled() {
        let tick = Instant::now();
        // 1. 处理命令
        while let Ok(cmd) = rx_cmd.try_recv() {
            match cmd {
                SessionCommand::StartRecording(path) => match CsvRecorder::create(&path) {
                    Ok(r) => {
                        finish_recording(recorder.replace(r), &tx);
                        tx.send(SessionEvent::Log(format!("recording to {}", path.display()))).ok();
                        tx.send(SessionEvent::RecordingStatus(true)).ok();
                    }
                    Err(e) => {
                        tx.send(SessionEvent::Error(e.to_string())).ok();
                    }
                },
                SessionCommand::StopRecording => {
                    finish_recording(recorder.take(), &tx);
                    tx.send(SessionEvent::RecordingStatus(false)).ok();
                }
            }
        }
        // 2. 采样
        match pipeline.pump_once() {
            Ok(sample) => {
                samples_read += 1;
                if let Some(r) = &mut recorder {
                    if let Err(e) = r.write_sample(&sample) {
                        tx.send(SessionEvent::Error(e.to_string())).ok();
                        recorder = None;
                        tx.send(SessionEvent::RecordingStatus(false)).ok();
                    }
                }
            }
            Err(e) if e.is_recoverable() => {
                log::warn!("live read failed: {e}");
                tx.send(SessionEvent::Error(e.to_string())).ok();
            }
            Err(e) => {
                log::error!("live sampling stopped: {e}");
                tx.send(SessionEvent::Error(e.to_string())).ok();
                break;
            }
        }
        sleep_unless_cancelled(&cancel, interval.saturating_sub(tick.elapsed()));
    }
    finish_recording(recorder.take(), &tx);
    drop(claim);
    tx.send(SessionEvent::Stopped { samples_read }).ok();
    samples_read
}

fn finish_recording(recorder: Option<CsvRecorder>, tx: &Sender<SessionEvent>) {
    if let Some(r) = recorder {
        match r.finish() {
            Ok(rows) => tx.send(SessionEvent::Log(format!("recording saved ({rows} samples)"))).ok(),
            Err(e) => tx.send(SessionEvent::Error(e.to_string())).ok(),
        };
    }
}

fn render_loop(
    buffer: Arc<SignalBuffer>,
    source_id: String,
    interval: Duration,
    cancel: CancelToken,
    tx: Sender<SessionEvent>,
) {
    let mut analyzer = SpectralAnalyzer::new();
    // 同一错误只上报一次，恢复后清除
    let mut last_error: Option<String> = None;
    while !cancel.is_cancelled() {
        sleep_unless_cancelled(&cancel, interval);
        if cancel.is_cancelled() {
            break;
        }
        let record = buffer.snapshot_record(&source_id);
        let spectrum = match analyzer.analyze(&record) {
            Ok(spectrum) => {
                last_error = None;
                Some(spectrum)
            }
            // 预热阶段样本不足，不算错误
            Err(StethoscopeError::InsufficientData { .. }) => None,
            Err(e) => {
                let message = e.to_string();
                if last_error.as_deref() != Some(message.as_str()) {
                    log::warn!("live spectrum failed: {message}");
                    if tx.send(SessionEvent::Error(message.clone())).is_err() {
                        break;
                    }
                    last_error = Some(message);
                }
                None
            }
        };
        let latest = record.samples.last().copied();
        let frame = LiveFrame {
            record,
            spectrum,
            latest,
        };
        if tx.send(SessionEvent::Frame(frame)).is_err() {
            break;
        }
    }
}

fn sleep_unless_cancelled(cancel: &CancelToken, duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if cancel.is_cancelled() || now >= deadline {
            return;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{BusArbiter, ConstantSource, ManualSource, Sample};
    use crate::recorder::read_csv;

    fn fast() -> LiveConfig {
        LiveConfig {
            sample_interval_ms: 1,
            retention_seconds: 12.0,
        }
    }

    fn wait_for<F: FnMut(&SessionEvent) -> bool>(session: &LiveSession, mut pred: F) -> SessionEvent {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(event) = session.events().recv_timeout(Duration::from_millis(50)) {
                if pred(&event) {
                    return event;
                }
            }
        }
        panic!("expected event did not arrive");
    }

    #[test]
    fn frames_carry_snapshots_and_spectra() {
        let session = LiveSession::spawn(ConstantSource::new(2.0), &fast(), OffsetPolicy::default(), None).unwrap();
        let event = wait_for(&session, |e| {
            matches!(e, SessionEvent::Frame(f) if f.record.len() >= 2 && f.spectrum.is_some())
        });
        let SessionEvent::Frame(frame) = event else { unreachable!() };
        assert!(frame.record.voltages().iter().all(|&v| (v - 0.5).abs() < 1e-12));
        assert!(session.stop() >= 2);
    }

    #[test]
    fn bus_claim_is_released_on_stop() {
        let arbiter = BusArbiter::new();
        let claim = arbiter.try_claim("i2c-1").unwrap();
        let session = LiveSession::spawn(ConstantSource::new(0.0), &fast(), OffsetPolicy::None, claim).unwrap();
        assert!(arbiter.is_claimed("i2c-1"));
        session.stop();
        assert!(!arbiter.is_claimed("i2c-1"));
    }

    #[test]
    fn transport_errors_are_reported_and_sampling_continues() {
        let source = ManualSource::scripted([Some(0.1), None, Some(0.2), Some(0.3)]);
        let session = LiveSession::spawn(source, &fast(), OffsetPolicy::None, None).unwrap();
        wait_for(&session, |e| matches!(e, SessionEvent::Error(msg) if msg.contains("scripted bus failure")));
        // the script runs dry afterwards; every later read keeps failing without ending the session
        wait_for(&session, |e| matches!(e, SessionEvent::Error(msg) if msg.contains("script exhausted")));
        assert_eq!(session.stop(), 3);
    }

    #[test]
    fn statistical_offset_fails_before_threads_start() {
        let result = LiveSession::spawn(ConstantSource::new(1.5), &fast(), OffsetPolicy::Statistical, None);
        assert!(matches!(result, Err(StethoscopeError::InvalidConfig { .. })));
    }

    #[test]
    fn spectrum_failures_surface_as_errors() {
        let buffer = Arc::new(SignalBuffer::with_retention(12.0).unwrap());
        // two readings stamped with the same instant span zero seconds
        buffer.push(Sample::new(0.5, 0.1));
        buffer.push(Sample::new(0.5, 0.2));
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        let renderer = {
            let cancel = cancel.clone();
            thread::spawn(move || render_loop(buffer, "frozen".into(), Duration::from_millis(1), cancel, tx))
        };
        let mut errors = Vec::new();
        let mut frames = 0;
        while frames < 3 {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                SessionEvent::Error(message) => errors.push(message),
                SessionEvent::Frame(frame) => {
                    assert!(frame.spectrum.is_none());
                    frames += 1;
                }
                _ => {}
            }
        }
        cancel.cancel();
        renderer.join().unwrap();
        assert_eq!(errors.len(), 1, "repeated failure reported once: {errors:?}");
        assert!(errors[0].contains("timestamps"));
    }

    #[test]
    fn warm_up_is_not_an_error() {
        let buffer = Arc::new(SignalBuffer::with_retention(12.0).unwrap());
        buffer.push(Sample::new(0.0, 0.1));
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        let renderer = {
            let cancel = cancel.clone();
            thread::spawn(move || render_loop(buffer, "warm".into(), Duration::from_millis(1), cancel, tx))
        };
        for _ in 0..3 {
            let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(matches!(event, SessionEvent::Frame(ref f) if f.spectrum.is_none()));
        }
        cancel.cancel();
        renderer.join().unwrap();
    }

    #[test]
    fn recording_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.csv");
        let session = LiveSession::spawn(ConstantSource::new(1.0), &fast(), OffsetPolicy::None, None).unwrap();
        assert!(session.send(SessionCommand::StartRecording(path.clone())));
        wait_for(&session, |e| matches!(e, SessionEvent::RecordingStatus(true)));
        thread::sleep(Duration::from_millis(30));
        session.send(SessionCommand::StopRecording);
        wait_for(&session, |e| matches!(e, SessionEvent::RecordingStatus(false)));
        session.stop();
        let record = read_csv(&path).unwrap();
        assert!(!record.is_empty());
        assert!(record.voltages().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn stop_returns_promptly_with_slow_intervals() {
        let config = LiveConfig {
            sample_interval_ms: 2000,
            retention_seconds: 12.0,
        };
        let session = LiveSession::spawn(ConstantSource::new(0.0), &config, OffsetPolicy::None, None).unwrap();
        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        session.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
