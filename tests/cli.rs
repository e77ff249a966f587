use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn stethoscope() -> Command {
    let mut cmd = Command::cargo_bin("stethoscope").unwrap();
    cmd.env_remove("STETHOSCOPE_CONFIG").env_remove("STETHOSCOPE_REGISTRY");
    cmd
}

/// 2 s of a 200 Hz tone at 4 kHz in the canonical CSV layout.
fn write_tone(path: &Path) {
    let mut text = String::from("\"time_seconds\",\"voltage\"\n");
    for i in 0..8000 {
        let t = i as f64 / 4000.0;
        let v = 0.3 * (2.0 * std::f64::consts::PI * 200.0 * t).sin();
        text.push_str(&format!("{t},{v}\n"));
    }
    fs::write(path, text).unwrap();
}

// =============================================================================
// GENERAL
// =============================================================================

#[test]
fn no_args_shows_help() {
    stethoscope()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn help_lists_subcommands() {
    stethoscope()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("acquire"))
        .stdout(predicate::str::contains("spectrum"))
        .stdout(predicate::str::contains("wavelet"));
}

// =============================================================================
// ACQUISITION
// =============================================================================

#[test]
fn acquire_constant_source_writes_debiased_csv() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("session.csv");
    stethoscope()
        .args(["acquire", "--adc", "constant", "--constant-volts", "2.0", "-n", "50", "-o"])
        .arg(&csv)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"samples\": 50"))
        .stdout(predicate::str::contains("\"completed\""));
    let text = fs::read_to_string(&csv).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("\"time_seconds\",\"voltage\""));
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 50);
    assert!(rows.iter().all(|r| r.ends_with(",0.5")));
}

#[test]
fn acquire_rejects_zero_samples() {
    let dir = tempfile::tempdir().unwrap();
    stethoscope()
        .args(["acquire", "--adc", "constant", "-n", "0", "-o"])
        .arg(dir.path().join("x.csv"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("sample_count"));
}

#[test]
fn config_file_selects_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.json");
    fs::write(
        &config,
        r#"{"adc": {"kind": "constant", "constant_volts": 1.0}, "acquisition": {"sample_count": 10, "offset": {"kind": "none"}}}"#,
    )
    .unwrap();
    let csv = dir.path().join("out.csv");
    stethoscope()
        .arg("--config")
        .arg(&config)
        .args(["acquire", "-o"])
        .arg(&csv)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"samples\": 10"));
    assert!(fs::read_to_string(&csv).unwrap().lines().skip(1).all(|r| r.ends_with(",1")));
}

// =============================================================================
// ANALYSIS
// =============================================================================

#[test]
fn spectrum_finds_the_tone() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("tone.csv");
    write_tone(&csv);
    let output = stethoscope()
        .args(["--compact", "spectrum"])
        .arg(&csv)
        .output()
        .unwrap();
    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let peak = summary["peak_hz"].as_f64().unwrap();
    assert!((peak - 200.0).abs() < 1.0, "peak at {peak}");
    assert_eq!(summary["bins"].as_u64(), Some(4000));
}

#[test]
fn spectrum_of_a_missing_file_names_it() {
    stethoscope()
        .args(["spectrum", "/nonexistent/tone.csv"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("/nonexistent/tone.csv"));
}

#[test]
fn wavelet_rejects_unknown_names() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("tone.csv");
    write_tone(&csv);
    stethoscope()
        .args(["wavelet", "--wavelet", "morlet"])
        .arg(&csv)
        .assert()
        .failure()
        .stderr(predicate::str::contains("morlet"));
}

#[test]
fn wavelet_and_envelope_summaries() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("tone.csv");
    write_tone(&csv);
    stethoscope()
        .args(["wavelet", "--wavelet", "db4"])
        .arg(&csv)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"wavelet\": \"db4\""));
    stethoscope()
        .arg("envelope")
        .arg(&csv)
        .assert()
        .success()
        .stdout(predicate::str::contains("mean_frequency_hz"));
}

#[test]
fn filter_writes_a_csv_of_the_same_length() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("tone.csv");
    let out = dir.path().join("filtered.csv");
    write_tone(&csv);
    stethoscope()
        .args(["filter", "--low", "100", "--high", "1200"])
        .arg(&csv)
        .arg("-o")
        .arg(&out)
        .assert()
        .success();
    assert_eq!(fs::read_to_string(&out).unwrap().lines().count(), 8001);
}

// =============================================================================
// AUDIO AND PLOTS
// =============================================================================

#[test]
fn audio_writes_wav_next_to_the_csv() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("tone.csv");
    write_tone(&csv);
    stethoscope()
        .arg("audio")
        .arg(&csv)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"sample_rate\": 6800"));
    let wav = fs::read(dir.path().join("tone.wav")).unwrap();
    assert_eq!(&wav[..4], b"RIFF");
}

#[test]
fn audio_rejects_flat_signals() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("flat.csv");
    fs::write(&csv, "\"time_seconds\",\"voltage\"\n0,0\n0.1,0\n0.2,0\n").unwrap();
    stethoscope()
        .arg("audio")
        .arg(&csv)
        .assert()
        .failure()
        .stderr(predicate::str::contains("flat"));
}

#[test]
fn plot_writes_png() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("tone.csv");
    let png = dir.path().join("envelope.png");
    write_tone(&csv);
    stethoscope()
        .args(["plot", "--view", "envelope", "--width", "320", "--height", "120"])
        .arg(&csv)
        .arg("-o")
        .arg(&png)
        .assert()
        .success();
    assert_eq!(&fs::read(&png).unwrap()[1..4], b"PNG");
}

// =============================================================================
// MODEL AND REGISTRY
// =============================================================================

#[test]
fn predict_uses_the_model_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("model.json");
    let mut weights = vec![0.0; 13];
    weights[0] = 1.0;
    let artifact = serde_json::json!({
        "mean": vec![0.0; 13],
        "scale": vec![1.0; 13],
        "weights": weights,
        "bias": 0.0,
    });
    fs::write(&model, artifact.to_string()).unwrap();
    let features = |first: &str| format!("{first},0,0,0,0,0,0,0,0,0,0,0,0");
    stethoscope()
        .args(["predict", "--features", &features("2.5"), "--model"])
        .arg(&model)
        .assert()
        .success()
        .stdout(predicate::str::contains("COPD"));
    stethoscope()
        .args(["predict", "--features", &features("-2.5"), "--model"])
        .arg(&model)
        .assert()
        .success()
        .stdout(predicate::str::contains("Healthy"));
    stethoscope()
        .args(["predict", "--features", "1,2,3", "--model"])
        .arg(&model)
        .assert()
        .failure()
        .stderr(predicate::str::contains("13"));
}

#[test]
fn register_then_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let registry = dir.path().join("patients.json");
    let csv = dir.path().join("tone.csv");
    write_tone(&csv);
    stethoscope()
        .args([
            "register", "--id", "1020", "--first-name", "Ana", "--last-name", "Rojas", "--age", "61",
            "--email", "ana@example.org", "--signal",
        ])
        .arg(&csv)
        .arg("--registry")
        .arg(&registry)
        .assert()
        .success();
    stethoscope()
        .args(["lookup", "1020", "--registry"])
        .arg(&registry)
        .assert()
        .success()
        .stdout(predicate::str::contains("Rojas"))
        .stdout(predicate::str::contains("tone.csv"));
    stethoscope()
        .args(["lookup", "9999", "--registry"])
        .arg(&registry)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn probe_reports_virtual_sources_present() {
    stethoscope()
        .args(["probe", "--adc", "simulated"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"present\""));
}

#[test]
fn probe_reports_busy_while_another_process_holds_the_bus() {
    use fs2::FileExt;

    let dir = tempfile::tempdir().unwrap();
    let locks = dir.path().join("locks");
    let config = dir.path().join("config.json");
    let settings = serde_json::json!({
        "adc": {"kind": "serial", "serial_port": "ttyBRIDGE", "lock_dir": locks},
    });
    fs::write(&config, settings.to_string()).unwrap();
    let probe = || {
        let mut cmd = stethoscope();
        cmd.arg("--config").arg(&config).arg("probe");
        cmd
    };

    // free bus: the probe runs and finds no such port
    probe().assert().success().stdout(predicate::str::contains("\"absent\""));

    fs::create_dir_all(&locks).unwrap();
    let held = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(locks.join("serial-ttyBRIDGE.lock"))
        .unwrap();
    held.try_lock_exclusive().unwrap();
    probe().assert().success().stdout(predicate::str::contains("\"busy\""));
    drop(held);

    probe().assert().success().stdout(predicate::str::contains("\"absent\""));
}
