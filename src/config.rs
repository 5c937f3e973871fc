use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Application configuration.
///
/// Loaded from `config/default` (optional), an environment-specific file
/// selected by `RUN_ENV`, and `STOREFRONT_*` environment variables, in that
/// order of precedence.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub db_min_connections: u32,
    /// Bound on how long a single statement may hold locks before the
    /// checkout path gives up, in seconds.
    #[serde(default = "default_statement_timeout")]
    pub db_statement_timeout_secs: u64,
    #[serde(default = "default_acquire_timeout")]
    pub db_acquire_timeout_secs: u64,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_statement_timeout() -> u64 {
    30
}

fn default_acquire_timeout() -> u64 {
    8
}

fn default_environment() -> String {
    "development".to_string()
}

impl AppConfig {
    /// Constructs a configuration directly; used by tests and embedders.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            db_max_connections: default_max_connections(),
            db_min_connections: default_min_connections(),
            db_statement_timeout_secs: default_statement_timeout(),
            db_acquire_timeout_secs: default_acquire_timeout(),
            environment: default_environment(),
        }
    }

    /// Loads layered configuration from files and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let run_env = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".to_string());

        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_env)).required(false))
            .add_source(Environment::with_prefix("STOREFRONT"))
            .build()?
            .try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
