//! Launcher: the only part of this crate with a typed `Result` boundary
//! (config loading, telemetry-file reading) — nothing inside the core
//! loops ever propagates an error this way.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use teddy_core::audio::SilentAudioSource;
use teddy_core::bt::StubBluetooth;
use teddy_core::pwm::SimulatedPwmSink;
use teddy_core::{Config, SystemClock, TeddyStateMachine};

#[derive(Parser)]
#[command(name = "teddy", about = "Animatronic teddy bear animation core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load config, construct the core, and run it until killed.
    Start {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Pretty-print the last published telemetry snapshot.
    Status {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Interactive servo calibration — not reimplemented here.
    Calibrate,
}

fn load_config(path: &PathBuf) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: Config = serde_json::from_str(&text)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    Ok(config.validated())
}

fn run_start(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let level = config.logging.level.clone();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    log::info!("starting teddy-core with config {}", config_path.display());
    let sm = TeddyStateMachine::new(
        config,
        Arc::new(SystemClock::new()),
        Arc::new(SilentAudioSource),
        Arc::new(SimulatedPwmSink),
        Arc::new(StubBluetooth),
    );
    sm.run();
    Ok(())
}

fn run_status(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let text = std::fs::read_to_string(&config.telemetry.status_path).with_context(|| {
        format!(
            "reading telemetry file {}",
            config.telemetry.status_path
        )
    })?;

    #[derive(serde::Deserialize, Default)]
    #[serde(default)]
    struct PartialStatus {
        state: String,
        bt_connected: bool,
        last_vocal_ts: f64,
        speech_confidence: f64,
        mouth_angle: i32,
        eyes_angle: i32,
        ts: f64,
    }

    let status: PartialStatus = serde_json::from_str(&text)
        .with_context(|| "parsing telemetry file as JSON")?;
    println!("state:             {}", status.state);
    println!("bluetooth:         {}", if status.bt_connected { "connected" } else { "disconnected" });
    println!("last vocal ts:     {:.3}", status.last_vocal_ts);
    println!("speech confidence: {:.3}", status.speech_confidence);
    println!("mouth angle:       {}", status.mouth_angle);
    println!("eyes angle:        {}", status.eyes_angle);
    println!("snapshot ts:       {:.3}", status.ts);
    Ok(())
}

fn run_calibrate() -> Result<()> {
    eprintln!("calibrate is an interactive tool outside this crate's scope.");
    eprintln!("Run the standalone calibration CLI against the same config.json instead.");
    std::process::exit(1);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Start { config } => run_start(config),
        Command::Status { config } => run_status(config),
        Command::Calibrate => run_calibrate(),
    }
}
