//! `nova-compositor`: runs the compositor on the headless backend.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;

use nova_compositor::{init_compositor, logging, ConfigLoader};

#[derive(Parser, Debug)]
#[command(name = "nova-compositor", version, about = "Nova headless compositor")]
struct Cli {
    /// Configuration file. Defaults to $NOVA_COMPOSITOR_CONFIG, then the user
    /// configuration directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many milliseconds instead of waiting for SIGINT/SIGTERM.
    #[arg(long = "run-for", value_name = "MS")]
    run_for: Option<u64>,

    /// Override the configured log level.
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("nova-compositor: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match ConfigLoader::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            logging::init_minimal_logging();
            return Err(err).context("failed to load configuration");
        }
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(ms) = cli.run_for {
        config.run_for_ms = Some(ms);
    }
    logging::init_logging(&config.logging).context("failed to initialize logging")?;
    info!(
        outputs = config.headless.outputs.len(),
        policy = %config.render.mode_policy,
        "Configuration loaded"
    );

    let (mut compositor, _headless) =
        init_compositor(&config).context("failed to start compositor")?;
    compositor.stop_on_termination_signals()?;
    if let Some(ms) = config.run_for_ms.filter(|ms| *ms > 0) {
        compositor.stop_after(Duration::from_millis(ms))?;
    }

    let summaries = compositor.run().context("event loop failed")?;
    info!(outputs = summaries.len(), "Compositor exited cleanly");
    Ok(())
}
