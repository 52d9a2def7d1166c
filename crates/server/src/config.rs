//! Server configuration.
//!
//! Configuration is layered: an optional TOML file, then `VIGIL__`-prefixed
//! environment variables (`__` separates nested keys, e.g.
//! `VIGIL__NOTIFIER__RECONNECT_DELAY=5s`), then command-line flags.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use vigil_types::config::{
    AuditConfig, ConfigError, GatewayConfig, NotifierConfig, PolicyConfig, ResolverConfig,
    ValidationConfig,
};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "VIGIL";

/// Command-line interface.
#[derive(Debug, Parser)]
#[command(name = "vigil", version, about = "Visitor identity, access control and appeals")]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, short, env = "VIGIL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log output format. Overrides the configuration file.
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Subcommand. Without one the command loop runs on stdin/stdout.
    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

/// Subcommands handled before the server starts.
#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Inspect the configuration format.
    Config {
        /// What to print.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// `vigil config` actions.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Print the JSON schema of the configuration file.
    Schema,
    /// Print a TOML configuration with every default filled in.
    Example,
}

/// Log output format.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable text.
    Text,
    /// One JSON object per line.
    Json,
    /// JSON when stdout is not a terminal, text otherwise.
    #[default]
    Auto,
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// Log output format.
    pub log_format: LogFormat,
    /// Store gateway timeouts and retries.
    pub gateway: GatewayConfig,
    /// Identity merge policy.
    pub resolver: ResolverConfig,
    /// Escalation thresholds and bulk limits.
    pub policy: PolicyConfig,
    /// Input length limits.
    pub validation: ValidationConfig,
    /// Live status subscriptions.
    pub notifier: NotifierConfig,
    /// Administrator audit log.
    pub audit: AuditConfig,
}

/// Errors from loading configuration.
#[derive(Debug, Snafu)]
pub enum ConfigLoadError {
    /// A source could not be read or deserialized.
    #[snafu(display("failed to load config: {source}"))]
    Load {
        /// Underlying error.
        source: config::ConfigError,
    },
    /// The merged configuration is out of range.
    #[snafu(display("{source}"))]
    Invalid {
        /// Underlying error.
        source: ConfigError,
    },
}

impl Config {
    /// Loads configuration from `path` (if any) and the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigLoadError::Load`] if the file cannot be read or a value
    /// has the wrong shape, and [`ConfigLoadError::Invalid`] if the merged
    /// result fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        Self::load_with(path, environment())
    }

    fn load_with(
        path: Option<&Path>,
        env: config::Environment,
    ) -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config: Self = builder
            .add_source(env)
            .build()
            .context(LoadSnafu)?
            .try_deserialize()
            .context(LoadSnafu)?;
        config.validate().context(InvalidSnafu)?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first section that fails validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gateway.validate()?;
        self.policy.validate()?;
        self.validation.validate()?;
        self.notifier.validate()?;
        self.audit.validate()
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

/// JSON schema of the configuration file.
///
/// # Errors
///
/// Returns an error if the schema cannot be serialized.
pub fn generate_config_schema() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&schemars::schema_for!(Config))
}

/// TOML configuration with every default filled in.
///
/// # Errors
///
/// Returns an error if the defaults cannot be rendered as TOML.
pub fn generate_config_example() -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&Config::default())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use vigil_test_utils::TestDir;
    use vigil_types::config::MergePolicy;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        environment().source(Some(vars))
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = Config::load_with(None, env(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.log_format, LogFormat::Auto);
    }

    #[test]
    fn test_file_then_environment() {
        let dir = TestDir::new();
        let path = dir.write_file(
            "vigil.toml",
            r#"
log_format = "json"

[resolver]
merge_policy = "hash_and_client_signal"

[notifier]
reconnect_delay = "5s"
max_reconnect_attempts = 7
"#,
        );

        let config = Config::load_with(
            Some(&path),
            env(&[("VIGIL__NOTIFIER__MAX_RECONNECT_ATTEMPTS", "9")]),
        )
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.resolver.merge_policy, MergePolicy::HashAndClientSignal);
        assert_eq!(config.notifier.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.notifier.max_reconnect_attempts, 9);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TestDir::new();
        let path = dir.write_file("vigil.toml", "[notifier]\nban_notice_path = \"banned\"\n");

        let err = Config::load_with(Some(&path), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid { .. }), "{err}");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TestDir::new();
        let err = Config::load_with(Some(&dir.join("absent.toml")), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Load { .. }));
    }

    #[test]
    fn test_example_round_trips() {
        let example = generate_config_example().unwrap();
        let parsed: Config = toml::from_str(&example).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_schema_names_sections() {
        let schema = generate_config_schema().unwrap();
        for section in ["gateway", "resolver", "policy", "validation", "notifier", "audit"] {
            assert!(schema.contains(section), "schema is missing {section}");
        }
    }

    #[test]
    fn test_cli_parses_subcommand_and_flags() {
        let cli = Cli::try_parse_from(["vigil", "--log-format", "text", "config", "schema"])
            .unwrap();
        assert_eq!(cli.log_format, Some(LogFormat::Text));
        assert!(matches!(
            cli.command,
            Some(CliCommand::Config { action: ConfigAction::Schema })
        ));
    }
}
