//! smart_verifier - package verification appliance
//!
//! Usage: smart_verifier <label_to_match>
//!
//! Opens the camera, model, indicator and display, then loops forever:
//! capture a frame, classify it, light the indicator when the winning label
//! equals <label_to_match>, and show the frame plus a status line on screen.
//! SIGINT/SIGTERM finish the current iteration and release every device.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use smart_verifier::config::CONFIG_ENV;
use smart_verifier::progress::Ui;
use smart_verifier::{Verifier, VerifierConfig};

#[derive(Parser, Debug)]
#[command(
    name = "smart_verifier",
    about = "Classify camera frames and signal when the target package is in view"
)]
struct Args {
    /// Label to match (exact, case-sensitive)
    label_to_match: String,

    /// Path to a JSON config file
    #[arg(long, value_name = "PATH", env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Stop after this many loop iterations
    #[arg(long, value_name = "N")]
    iterations: Option<u64>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = VerifierConfig::load(args.config.as_deref())?;
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .context("install signal handler")?;
    }

    let mut verifier = Verifier::open(&config, &args.label_to_match, &ui)?;
    log::info!(
        "watching for {:?} every {}ms",
        args.label_to_match,
        config.frame_period.as_millis()
    );
    verifier.run(&shutdown, args.iterations)?;

    let stats = verifier.capture_stats();
    log::info!(
        "{}: {} frames captured, {} timeouts, {} stream restarts",
        stats.device,
        stats.frames_captured,
        stats.timeouts,
        stats.restarts
    );
    Ok(())
}
