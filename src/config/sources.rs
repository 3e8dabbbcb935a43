use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "PACKAGEBUG_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/packagebug.toml";
const ENV_PREFIX: &str = "PACKAGEBUG";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;

    apply_env_overrides(&mut config, |name| env::var(name).ok());

    Ok(config)
}

/// Load secrets and flat legacy variables into config.
/// Secrets are never stored in TOML files, only in environment.
pub fn apply_env_overrides<F>(config: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(client_id) = var("PACKAGEBUG_GITHUB_CLIENT_ID") {
        config.github.client_id = Some(client_id);
    }
    if let Some(client_secret) = var("PACKAGEBUG_GITHUB_CLIENT_SECRET") {
        config.github.client_secret = Some(client_secret);
    }

    // Flat names used by older deployments
    if let Some(root) = var("PACKAGEBUG_GITHUB_ROOT_ENDPOINT") {
        config.github.root_endpoint = root;
    }
    if let Some(endpoint) = var("PACKAGEBUG_SQS_ENDPOINT") {
        config.queue.endpoint = PathBuf::from(endpoint);
    }
    if let Some(region) = var("PACKAGEBUG_SQS_REGION") {
        config.queue.region = Some(region);
    }
    if let Some(database) = var("DATABASE_URL") {
        config.store.path = PathBuf::from(database);
    }
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // PACKAGEBUG__WORKER__MAX_CONCURRENCY -> worker.max_concurrency
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
