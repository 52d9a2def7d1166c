//! Vigil server binary.
//!
//! Runs the command surface over stdin/stdout, one JSON object per line.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults
//! vigil
//!
//! # Start from a config file, overriding one value from the environment
//! VIGIL__POLICY__MAX_BULK_IDS=100 vigil --config vigil.toml
//!
//! # Print the configuration schema or a full example
//! vigil config schema
//! vigil config example
//! ```

use clap::Parser;
use snafu::{ResultExt, Snafu};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use vigil_server::{
    api::Api,
    bootstrap::{self, BootstrapError},
    config::{self, Cli, CliCommand, Config, ConfigAction, ConfigLoadError},
    logging::init_logging,
    session::run_session,
    shutdown::cancel_on_signal,
};

/// Top-level error type for the server binary.
#[derive(Debug, Snafu)]
enum ServerError {
    #[snafu(display("configuration error: {source}"))]
    LoadConfig { source: ConfigLoadError },

    #[snafu(display("failed to render config schema: {source}"))]
    Schema { source: serde_json::Error },

    #[snafu(display("failed to render config example: {source}"))]
    Example { source: toml::ser::Error },

    #[snafu(display("bootstrap error: {source}"))]
    Bootstrap { source: BootstrapError },

    #[snafu(display("session I/O error: {source}"))]
    Session { source: std::io::Error },
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let cli = Cli::parse();

    if let Some(CliCommand::Config { action }) = cli.command {
        match action {
            ConfigAction::Schema => println!("{}", config::generate_config_schema().context(SchemaSnafu)?),
            ConfigAction::Example => print!("{}", config::generate_config_example().context(ExampleSnafu)?),
        }
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref()).context(LoadConfigSnafu)?;
    if let Some(log_format) = cli.log_format {
        config.log_format = log_format;
    }
    init_logging(config.log_format);

    tracing::info!(
        config_file = ?cli.config,
        merge_policy = ?config.resolver.merge_policy,
        "Starting Vigil"
    );

    let services = bootstrap::bootstrap(&config).context(BootstrapSnafu)?;

    let shutdown = CancellationToken::new();
    let listener = cancel_on_signal(shutdown.clone());

    tracing::info!("Ready, reading commands from stdin");
    let result = run_session(
        Api::new(services),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown.clone(),
    )
    .await;

    shutdown.cancel();
    let _ = listener.await;
    result.context(SessionSnafu)?;

    tracing::info!("Shutdown complete");
    Ok(())
}
