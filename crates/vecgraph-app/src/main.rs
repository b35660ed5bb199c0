//! vecgraph binary - composition root.
//!
//! 1. Parse the command line
//! 2. Load configuration from TOML and the environment
//! 3. Initialize tracing
//! 4. Dispatch to the selected subcommand

mod cli;
mod commands;
mod report;

use clap::Parser;

use vecgraph_core::config::VecgraphConfig;

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing so its log level can seed the filter.
    let config_file = args.resolve_config_path();
    let (mut config, load_error) = if config_file.exists() {
        match VecgraphConfig::load(&config_file) {
            Ok(config) => (config, None),
            Err(e) => (VecgraphConfig::default(), Some(e)),
        }
    } else {
        (VecgraphConfig::default(), None)
    };
    config.apply_process_env()?;

    // Tracing. RUST_LOG wins over everything else.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.resolve_log_level(&config))),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Starting vecgraph v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = load_error {
        tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config, using defaults"
        );
    }

    let outcome = match args.command {
        Command::Serve(a) => commands::serve(config, a).await,
        Command::Index(a) => commands::index(config, a).await,
        Command::Query(a) => commands::query(config, a).await,
        Command::Clear(a) => commands::clear(config, a).await,
        Command::Bench(a) => commands::bench(config, a).await,
        Command::Results(a) => commands::results(config, a),
    };

    if let Err(e) = outcome {
        tracing::error!(error = %e, "Command failed");
        return Err(e.into());
    }
    Ok(())
}
