//! `driftd`: the DRIFT daemon.

mod app;
mod config;
mod overlay;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "driftd", version, about = "Overlay file-sharing daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "driftd.toml")]
    config: PathBuf,

    /// Directory for databases and runtime state.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "driftd={default_level},drift_core={default_level},drift_index={default_level},\
             drift_agent={default_level},drift_store={default_level}"
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let snapshot = config::ConfigFile::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?
        .into_snapshot()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "driftd starting"
    );

    let app = app::App::build(snapshot, &args.data_dir)?;
    app.run().await
}
