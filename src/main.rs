// src/main.rs
mod cli;
mod commands;
mod config;
mod drivers;
mod engine;
mod model;
mod recorder;
mod registry;
mod types;
use std::process::ExitCode;
use anyhow::Context;
use clap::Parser;
use cli::Cli;
use commands::AppContext;
use config::StethoscopeConfig;
use drivers::BusArbiter;
// 入口函数
fn main() -> ExitCode {
    let cli = Cli::parse();
    // -v 次数决定默认日志级别，RUST_LOG 仍然可以覆盖
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => StethoscopeConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => StethoscopeConfig::default(),
    };
    let arbiter = BusArbiter::with_lock_dir(config.adc.lock_dir());
    let mut ctx = AppContext {
        config,
        compact: cli.compact,
        arbiter,
    };
    commands::execute(cli.command, &mut ctx)
}
