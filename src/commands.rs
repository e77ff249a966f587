// src/commands.rs
use std::fs;
use std::path::Path;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::json;
use crate::cli::*;
use crate::config::{AdcConfig, AdcKind, StethoscopeConfig};
use crate::drivers::audio::{spawn_player, wav_path_for, write_wav};
use crate::drivers::bus::probe_with;
use crate::drivers::hardware::{probe_i2c, probe_spi, SerialSource};
use crate::drivers::*;
use crate::engine::LiveSession;
use crate::model::{features_from_slice, LazyModel, ModelService};
use crate::recorder::{read_csv, write_csv};
use crate::registry::{JsonFileRegistry, PatientRecord, PatientRegistry};
use crate::types::{SessionCommand, SessionEvent};

pub struct AppContext {
    pub config: StethoscopeConfig,
    pub compact: bool,
    /// Shared with other processes through lock files in `adc.lock_dir`.
    pub arbiter: BusArbiter,
}

impl AppContext {
    fn emit<T: Serialize>(&self, value: &T) -> Result<()> {
        let text = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        println!("{text}");
        Ok(())
    }
}

pub fn execute(command: Command, ctx: &mut AppContext) -> Result<()> {
    match command {
        Command::Acquire(args) => acquire(args, ctx),
        Command::Live(args) => live(args, ctx),
        Command::Spectrum(args) => spectrum(args, ctx),
        Command::Wavelet(args) => wavelet(args, ctx),
        Command::Envelope(args) => envelope(args, ctx),
        Command::Filter(args) => filter(args, ctx),
        Command::Audio(args) => audio(args, ctx),
        Command::Plot(args) => plot(args, ctx),
        Command::Probe(args) => probe(args, ctx),
        Command::Predict(args) => predict(args, ctx),
        Command::Register(args) => register(args),
        Command::Lookup(args) => lookup(args, ctx),
    }
}

fn apply_source_args(adc: &mut AdcConfig, args: &SourceArgs) {
    if let Some(kind) = args.adc {
        adc.kind = kind;
    }
    if let Some(channel) = args.channel {
        adc.channel = channel;
    }
    if let Some(volts) = args.constant_volts {
        adc.constant_volts = volts;
    }
    if let Some(port) = &args.serial_port {
        adc.serial_port = port.clone();
    }
}

/// Opens the configured front-end. Hardware bring-up errors keep the device path.
pub fn open_source(adc: &AdcConfig) -> Result<Box<dyn SampleSource + Send>> {
    let source: Box<dyn SampleSource + Send> = match adc.kind {
        AdcKind::Simulated => Box::new(SimulatedSource::default()),
        AdcKind::Constant => Box::new(ConstantSource::new(adc.constant_volts)),
        AdcKind::Serial => Box::new(
            SerialSource::open(&adc.serial_port, adc.baud_rate)
                .with_context(|| format!("failed to open serial ADC bridge {}", adc.serial_port))?,
        ),
        #[cfg(target_os = "linux")]
        AdcKind::Ads1115 => Box::new(
            crate::drivers::hardware::Ads1115Source::open(adc.i2c_bus, adc.i2c_address, adc.channel)
                .context("failed to open ADS1115 (is i2c enabled?)")?,
        ),
        #[cfg(target_os = "linux")]
        AdcKind::Mcp3202 => {
            if adc.channel > 1 {
                bail!("MCP3202 has channels 0 and 1, got {}", adc.channel);
            }
            Box::new(
                crate::drivers::hardware::Mcp3202Source::open(
                    adc.spi_bus,
                    adc.spi_device,
                    adc.channel,
                    adc.vref_volts,
                )
                .context("failed to open MCP3202 (is spi enabled?)")?,
            )
        }
        #[cfg(not(target_os = "linux"))]
        AdcKind::Ads1115 | AdcKind::Mcp3202 => {
            bail!("{:?} needs Linux i2c/spi device nodes", adc.kind)
        }
    };
    log::info!("using source {}", source.id());
    Ok(source)
}

/// Claims the configured bus for a session. Virtual sources own none.
fn claim_bus(arbiter: &BusArbiter, adc: &AdcConfig) -> Result<Option<BusClaim>> {
    let Some(bus) = adc.bus_name() else {
        return Ok(None);
    };
    let claim = arbiter
        .try_claim(&bus)?
        .with_context(|| format!("bus {bus} is owned by another session"))?;
    Ok(Some(claim))
}

/// `--offset fixed` without volts keeps a configured fixed bias, else the default one.
fn resolve_offset(current: OffsetPolicy, kind: Option<OffsetArg>, volts: Option<f64>) -> OffsetPolicy {
    match (kind, volts) {
        (Some(OffsetArg::Statistical), _) => OffsetPolicy::Statistical,
        (Some(OffsetArg::None), _) => OffsetPolicy::None,
        (Some(OffsetArg::Fixed) | None, Some(offset_volts)) => OffsetPolicy::Fixed { offset_volts },
        (Some(OffsetArg::Fixed), None) => match current {
            OffsetPolicy::Fixed { .. } => current,
            OffsetPolicy::Statistical | OffsetPolicy::None => OffsetPolicy::default(),
        },
        (None, None) => current,
    }
}

fn acquire(args: AcquireArgs, ctx: &mut AppContext) -> Result<()> {
    let config = &mut ctx.config;
    apply_source_args(&mut config.adc, &args.source);
    if let Some(samples) = args.samples {
        config.acquisition.sample_count = samples;
    }
    config.acquisition.offset = resolve_offset(config.acquisition.offset, args.offset, args.offset_volts);
    config.validate()?;

    let _claim = claim_bus(&ctx.arbiter, &config.adc)?;
    let mut source = open_source(&config.adc)?;
    let acquirer = Acquirer::new(config.acquisition.offset)
        .with_progress_every(config.acquisition.progress_every);
    let report = acquirer.acquire(source.as_mut(), config.acquisition.sample_count)?;
    let offset = config.acquisition.offset;
    write_csv(&args.output, &report.record)?;

    ctx.emit(&json!({
        "output": args.output,
        "source": report.record.source_id,
        "state": report.record.state,
        "samples": report.record.len(),
        "requested": report.requested,
        "elapsed_seconds": report.elapsed_seconds,
        "effective_rate_hz": report.effective_rate_hz,
        "mean_before_correction": report.mean_before_correction,
        "offset": offset,
    }))?;
    if let Some(error) = report.error {
        return Err(anyhow::Error::new(error).context(format!(
            "acquisition ended early; {} samples saved to {}",
            report.record.len(),
            args.output.display()
        )));
    }
    Ok(())
}

fn live(args: LiveArgs, ctx: &mut AppContext) -> Result<()> {
    let config = &mut ctx.config;
    apply_source_args(&mut config.adc, &args.source);
    if let Some(ms) = args.interval_ms {
        config.live.sample_interval_ms = ms;
    }
    config.validate()?;
    if !args.seconds.is_finite() || args.seconds < 0.0 {
        bail!("--seconds must be a non-negative number, got {}", args.seconds);
    }

    let claim = claim_bus(&ctx.arbiter, &config.adc)?;
    let source = open_source(&config.adc)?;
    let session = LiveSession::spawn(source, &config.live, config.acquisition.offset, claim)?;
    if let Some(path) = &args.record {
        session.send(SessionCommand::StartRecording(path.clone()));
    }

    let deadline = Instant::now() + Duration::from_secs_f64(args.seconds);
    let (mut frames, mut errors) = (0usize, 0usize);
    let mut last_frame = None;
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let wait = (deadline - now).min(Duration::from_millis(100));
        match session.events().recv_timeout(wait) {
            Ok(SessionEvent::Frame(frame)) => {
                frames += 1;
                if let Some(latest) = frame.latest {
                    log::info!("t={:.3}s v={:.4} V ({} samples)", latest.timestamp, latest.voltage, frame.record.len());
                }
                last_frame = Some(frame);
            }
            Ok(SessionEvent::Log(message)) => log::info!("{message}"),
            Ok(SessionEvent::Error(message)) => {
                errors += 1;
                log::warn!("{message}");
            }
            Ok(SessionEvent::RecordingStatus(on)) => log::info!("recording {}", if on { "on" } else { "off" }),
            Ok(SessionEvent::Stopped { .. }) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    let samples_read = session.stop();

    if let (Some(path), Some(frame)) = (&args.plot, &last_frame) {
        let png = render_waveform_png(&frame.record, &PlotStyle::default())?;
        fs::write(path, png).with_context(|| format!("failed to write {}", path.display()))?;
    }
    let peak = last_frame
        .as_ref()
        .and_then(|f| f.spectrum.as_ref())
        .and_then(|s| s.peak());
    ctx.emit(&json!({
        "samples_read": samples_read,
        "frames": frames,
        "errors": errors,
        "window_samples": last_frame.as_ref().map(|f| f.record.len()),
        "window_state": last_frame.as_ref().map(|f| f.record.state),
        "peak_hz": peak.map(|p| p.0),
        "recorded_to": args.record,
    }))
}

fn load(path: &Path) -> Result<SignalRecord> {
    read_csv(path).with_context(|| format!("failed to load signal {}", path.display()))
}

fn write_png(path: &Path, png: &[u8]) -> Result<()> {
    fs::write(path, png).with_context(|| format!("failed to write {}", path.display()))?;
    log::info!("plot saved to {}", path.display());
    Ok(())
}

fn energy(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum()
}

fn spectrum(args: SpectrumArgs, ctx: &mut AppContext) -> Result<()> {
    let record = load(&args.csv)?;
    let spectrum = SpectralAnalyzer::new().analyze(&record)?;
    if let Some(path) = &args.plot {
        let max_hz = args.max_hz.unwrap_or(ctx.config.analysis.spectrum_max_hz);
        write_png(path, &render_spectrum_png(&spectrum, Some(max_hz), &PlotStyle::default())?)?;
    }
    if args.full {
        return ctx.emit(&spectrum);
    }
    let peak = spectrum.peak();
    ctx.emit(&json!({
        "source": record.source_id,
        "samples": record.len(),
        "sample_rate_used": spectrum.sample_rate_used,
        "bins": spectrum.frequencies_hz.len(),
        "bin_width_hz": spectrum.bin_width(),
        "peak_hz": peak.map(|p| p.0),
        "peak_magnitude": peak.map(|p| p.1),
    }))
}

fn wavelet(args: WaveletArgs, ctx: &mut AppContext) -> Result<()> {
    let record = load(&args.csv)?;
    let name = args.wavelet.unwrap_or_else(|| ctx.config.analysis.wavelet.clone());
    let level = args.level.unwrap_or(ctx.config.analysis.wavelet_level);
    let result = WaveletAnalyzer::decompose(&record, &name, level)?;
    if let Some(path) = &args.plot {
        write_png(path, &render_wavelet_png(&record, &result, &PlotStyle::default())?)?;
    }
    if args.full {
        return ctx.emit(&result);
    }
    ctx.emit(&json!({
        "source": record.source_id,
        "wavelet": result.wavelet_name,
        "samples": result.approximation.len(),
        "approximation_energy": energy(&result.approximation),
        "detail_energy": energy(&result.detail),
    }))
}

fn envelope(args: EnvelopeArgs, ctx: &mut AppContext) -> Result<()> {
    let record = load(&args.csv)?;
    let result = EnvelopeAnalyzer::new().analyze(&record)?;
    if let Some(path) = &args.plot {
        write_png(path, &render_envelope_png(&record, &result, &PlotStyle::default())?)?;
    }
    if args.full {
        return ctx.emit(&result);
    }
    let n = result.amplitude_envelope.len() as f64;
    let freq = &result.instantaneous_frequency;
    ctx.emit(&json!({
        "source": record.source_id,
        "samples": record.len(),
        "sample_rate_used": result.sample_rate_used,
        "mean_envelope": result.amplitude_envelope.iter().sum::<f64>() / n,
        "max_envelope": result.amplitude_envelope.iter().copied().fold(0.0f64, f64::max),
        "mean_frequency_hz": freq.iter().sum::<f64>() / freq.len() as f64,
    }))
}

fn filter(args: FilterArgs, ctx: &mut AppContext) -> Result<()> {
    let record = load(&args.csv)?;
    let mut band = ctx.config.filter;
    band.low_hz = args.low.unwrap_or(band.low_hz);
    band.high_hz = args.high.unwrap_or(band.high_hz);
    band.order = args.order.unwrap_or(band.order);
    let filtered = band.apply(&record)?;
    write_csv(&args.output, &filtered)?;
    ctx.emit(&json!({
        "source": record.source_id,
        "output": args.output,
        "samples": filtered.len(),
        "filter": band,
    }))
}

fn audio(args: AudioArgs, ctx: &mut AppContext) -> Result<()> {
    let record = load(&args.csv)?;
    let rate = args.rate.unwrap_or(ctx.config.audio.playback_rate_hz);
    let renderer = AudioRenderer::with_headroom(ctx.config.audio.headroom)?;
    let pcm = renderer.render(&record, rate)?;
    let output = args.output.unwrap_or_else(|| wav_path_for(&args.csv));
    write_wav(&output, &pcm)?;
    let player_pid = if args.play {
        Some(spawn_player(&output, &ctx.config.audio.players)?.id())
    } else {
        None
    };
    ctx.emit(&json!({
        "source": record.source_id,
        "output": output,
        "samples": pcm.samples.len(),
        "sample_rate": pcm.sample_rate,
        "duration_seconds": pcm.duration_seconds(),
        "player_pid": player_pid,
    }))
}

fn plot(args: PlotArgs, ctx: &mut AppContext) -> Result<()> {
    let record = load(&args.csv)?;
    let style = PlotStyle {
        width: args.width,
        height: args.height,
        ..PlotStyle::default()
    };
    let png = match args.view {
        PlotView::Waveform => render_waveform_png(&record, &style)?,
        PlotView::Spectrum => {
            let spectrum = SpectralAnalyzer::new().analyze(&record)?;
            render_spectrum_png(&spectrum, Some(ctx.config.analysis.spectrum_max_hz), &style)?
        }
        PlotView::Wavelet => {
            let analysis = &ctx.config.analysis;
            let result = WaveletAnalyzer::decompose(&record, &analysis.wavelet, analysis.wavelet_level)?;
            render_wavelet_png(&record, &result, &style)?
        }
        PlotView::Envelope => {
            let result = EnvelopeAnalyzer::new().analyze(&record)?;
            render_envelope_png(&record, &result, &style)?
        }
    };
    write_png(&args.output, &png)?;
    ctx.emit(&json!({
        "source": record.source_id,
        "output": args.output,
        "bytes": png.len(),
    }))
}

fn probe(args: SourceArgs, ctx: &mut AppContext) -> Result<()> {
    let adc = &mut ctx.config.adc;
    apply_source_args(adc, &args);
    let bus = adc.bus_name();
    let kind = adc.kind;
    let status = match &bus {
        // 虚拟信号源总是可用
        None => ProbeStatus::Present,
        Some(bus) => probe_with(&ctx.arbiter, bus, || match kind {
            AdcKind::Ads1115 => probe_i2c(adc.i2c_bus, adc.i2c_address),
            AdcKind::Mcp3202 => probe_spi(adc.spi_bus, adc.spi_device),
            AdcKind::Serial | AdcKind::Simulated | AdcKind::Constant => Path::new(&adc.serial_port).exists(),
        })?,
    };
    ctx.emit(&json!({
        "adc": kind,
        "bus": bus,
        "status": status,
    }))
}

fn predict(args: PredictArgs, ctx: &mut AppContext) -> Result<()> {
    let features = features_from_slice(&args.features)?;
    let path = args.model.unwrap_or_else(|| ctx.config.model.path.clone());
    let model = LazyModel::new(&path);
    let diagnosis = model
        .predict(&features)
        .with_context(|| format!("prediction with {} failed", path.display()))?;
    ctx.emit(&json!({ "diagnosis": diagnosis }))
}

fn register(args: RegisterArgs) -> Result<()> {
    let patient = PatientRecord {
        patient_id: args.id,
        first_name: args.first_name,
        last_name: args.last_name,
        age: args.age,
        email: args.email,
    };
    for signal in &args.signals {
        if !signal.exists() {
            bail!("signal file {} does not exist", signal.display());
        }
    }
    let registry = JsonFileRegistry::new(&args.registry);
    registry.save(&patient, &args.signals)?;
    println!("saved patient {} ({} signal(s))", patient.patient_id, args.signals.len());
    Ok(())
}

fn lookup(args: LookupArgs, ctx: &mut AppContext) -> Result<()> {
    let registry = JsonFileRegistry::new(&args.registry);
    let Some((patient, signals)) = registry.find(&args.id)? else {
        bail!("patient {} not found in {}", args.id, registry.path().display());
    };
    ctx.emit(&json!({
        "patient": patient,
        "signals": signals,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_fixed_offset_falls_back_to_the_default_bias() {
        assert_eq!(
            resolve_offset(OffsetPolicy::Statistical, Some(OffsetArg::Fixed), None),
            OffsetPolicy::default()
        );
        let configured = OffsetPolicy::Fixed { offset_volts: 1.2 };
        assert_eq!(resolve_offset(configured, Some(OffsetArg::Fixed), None), configured);
        assert_eq!(
            resolve_offset(OffsetPolicy::None, None, Some(0.4)),
            OffsetPolicy::Fixed { offset_volts: 0.4 }
        );
        assert_eq!(resolve_offset(configured, None, None), configured);
        assert_eq!(resolve_offset(configured, Some(OffsetArg::None), None), OffsetPolicy::None);
    }

    #[test]
    fn virtual_sources_claim_nothing() {
        let arbiter = BusArbiter::new();
        assert!(claim_bus(&arbiter, &AdcConfig::default()).unwrap().is_none());
    }

    #[test]
    fn owned_bus_refuses_a_second_session() {
        let dir = tempfile::tempdir().unwrap();
        let adc = AdcConfig {
            kind: AdcKind::Serial,
            serial_port: "ttyBRIDGE".into(),
            ..AdcConfig::default()
        };
        let running = BusArbiter::with_lock_dir(dir.path());
        let _session = claim_bus(&running, &adc).unwrap().unwrap();
        let err = claim_bus(&BusArbiter::with_lock_dir(dir.path()), &adc).unwrap_err();
        assert!(err.to_string().contains("serial-ttyBRIDGE"));
    }
}
