use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/1";

/// Where `Processing` work actually executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// In-process worker pool.
    Local,
    /// Serialized units handed to Redis and executed by `tailor-api worker`.
    Broker,
}

impl FromStr for DispatchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(DispatchMode::Local),
            "broker" => Ok(DispatchMode::Broker),
            other => anyhow::bail!("DISPATCH_MODE must be 'local' or 'broker', got '{other}'"),
        }
    }
}

/// Knobs for the optimization pipeline. Kept separate from `Config` so tests
/// can build one without touching the environment.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_workers: usize,
    pub unit_timeout: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub cache_ttl: Duration,
    pub unit_retention: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            unit_timeout: Duration::from_secs(300),
            max_attempts: 3,
            retry_base: Duration::from_millis(1000),
            retry_max: Duration::from_millis(60_000),
            cache_ttl: Duration::from_secs(604_800),
            unit_retention: Duration::from_secs(86_400),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub dispatch_mode: DispatchMode,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            max_workers: parse_env("MAX_WORKERS", defaults.max_workers)?.max(1),
            unit_timeout: Duration::from_secs(parse_env(
                "UNIT_TIMEOUT_SECS",
                defaults.unit_timeout.as_secs(),
            )?),
            max_attempts: parse_env("MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            retry_base: Duration::from_millis(parse_env(
                "RETRY_BASE_MS",
                defaults.retry_base.as_millis() as u64,
            )?),
            retry_max: Duration::from_millis(parse_env(
                "RETRY_MAX_MS",
                defaults.retry_max.as_millis() as u64,
            )?),
            cache_ttl: Duration::from_secs(parse_env(
                "CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )?),
            unit_retention: Duration::from_secs(parse_env(
                "UNIT_RETENTION_SECS",
                defaults.unit_retention.as_secs(),
            )?),
        };

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: parse_env("PORT", 8080u16).context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            dispatch_mode: std::env::var("DISPATCH_MODE")
                .unwrap_or_else(|_| "local".to_string())
                .parse()?,
            pipeline,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_mode_parses_case_insensitively() {
        assert_eq!("Local".parse::<DispatchMode>().unwrap(), DispatchMode::Local);
        assert_eq!(" broker ".parse::<DispatchMode>().unwrap(), DispatchMode::Broker);
    }

    #[test]
    fn test_dispatch_mode_rejects_unknown() {
        assert!("celery".parse::<DispatchMode>().is_err());
    }

    #[test]
    fn test_pipeline_defaults() {
        let p = PipelineConfig::default();
        assert_eq!(p.max_workers, 10);
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.cache_ttl, Duration::from_secs(7 * 24 * 3600));
    }
}
