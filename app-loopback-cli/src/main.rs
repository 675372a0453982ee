//! `app-loopback`: capture the audio of one process tree to a WAV file
//! while playing it on the default output device.
//!
//! ```text
//! app-loopback 1234 includetree CapturedAudio.wav
//! app-loopback 1234 excludetree CapturedAudio.wav --duration 30
//! ```
//!
//! With no arguments, captures everything except this process into
//! `ExcludedAudio.wav`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};

use app_loopback_core::{CaptureConfiguration, LoopbackMode};

/// Process loopback capture.
#[derive(Parser, Debug)]
#[command(name = "app-loopback", version, about = "Capture the audio of one process tree to a WAV file")]
struct Cli {
    /// Process to capture or exclude from capture (default: this process).
    pid: Option<u32>,

    /// Whether the process tree is the only audio captured or the only audio left out.
    #[arg(value_enum, default_value = "excludetree")]
    mode: TreeMode,

    /// WAV file receiving the captured audio.
    #[arg(default_value = "ExcludedAudio.wav")]
    output: PathBuf,

    /// Seconds to capture.
    #[arg(long, default_value_t = 10)]
    duration: u64,

    /// Only record; do not play the captured audio.
    #[arg(long)]
    no_monitor: bool,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum TreeMode {
    /// Audio from the process and its children.
    Includetree,
    /// Audio from every process except the process and its children.
    Excludetree,
}

impl Cli {
    fn configuration(&self) -> CaptureConfiguration {
        let mut config = CaptureConfiguration::new(
            self.pid.unwrap_or_else(std::process::id),
            self.mode == TreeMode::Includetree,
            &self.output,
        );
        config.enable_monitoring = !self.no_monitor;
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.configuration();
    config.validate().map_err(|e| anyhow!("invalid configuration: {}", e))?;

    let verb = match config.loopback_mode {
        LoopbackMode::IncludeTargetProcessTree => "including",
        LoopbackMode::ExcludeTargetProcessTree => "excluding",
    };
    println!(
        "Capturing audio {} process tree {} for {} seconds...",
        verb, config.process_id, cli.duration
    );

    capture(config, Duration::from_secs(cli.duration))
}

#[cfg(target_os = "windows")]
fn capture(config: CaptureConfiguration, duration: Duration) -> Result<()> {
    use anyhow::Context;
    use app_loopback_core::LoopbackCapture;
    use app_loopback_windows::{ComApartment, ProcessLoopbackBackend};

    let _com = ComApartment::enter_mta().context("failed to initialize COM")?;

    let capture = LoopbackCapture::new(ProcessLoopbackBackend::new());
    capture.start_capture(config).context("failed to start capture")?;

    capture.run_for(duration).context("failed to stop capture")?;

    if let Some(e) = capture.last_error() {
        return Err(anyhow!(e).context("capture failed"));
    }

    let recording = capture
        .recording()
        .ok_or_else(|| anyhow!("capture produced no recording"))?;
    let stats = capture.stats();
    println!(
        "Finished. Audio saved to: {} ({} bytes, {:.2}s)",
        recording.file_path.display(),
        recording.data_bytes,
        recording.duration_secs
    );
    log::info!(
        "{} packets, {} frames monitored, {} dropped, sha256 {}",
        stats.packets_drained,
        stats.frames_monitored,
        stats.frames_dropped,
        recording.checksum
    );
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn capture(_config: CaptureConfiguration, _duration: Duration) -> Result<()> {
    Err(anyhow!("process loopback capture requires Windows"))
}
