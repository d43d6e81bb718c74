// Process configuration, read from the environment (and `.env` if present)

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_SANDBOX_URL: &str = "http://jobe:80/jobe/index.php/restapi";
pub const DEFAULT_RUN_PROFILES: &str = "config/run_profiles.json";

#[derive(Debug, Error)]
#[error("invalid value for {key}: {value:?}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub bind_addr: String,
    pub sandbox_url: String,
    pub sandbox_timeout: Duration,
    /// Trace/annotation service. Annotation is skipped when unset.
    pub trace_url: Option<String>,
    pub trace_timeout: Duration,
    pub background_workers: usize,
    pub background_queue: usize,
    pub run_profiles_path: PathBuf,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` is this over `std::env`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let number = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(key) {
                None => Ok(default),
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError { key, value }),
            }
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        let background_workers = number("BACKGROUND_WORKERS", 4)?;
        if background_workers == 0 {
            return Err(ConfigError {
                key: "BACKGROUND_WORKERS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            redis_url: string("REDIS_URL", DEFAULT_REDIS_URL),
            bind_addr: string("BIND_ADDR", DEFAULT_BIND_ADDR),
            sandbox_url: string("SANDBOX_URL", DEFAULT_SANDBOX_URL),
            sandbox_timeout: Duration::from_secs(number("SANDBOX_TIMEOUT_SECS", 10)?),
            trace_url: lookup("TRACE_URL").filter(|url| !url.trim().is_empty()),
            trace_timeout: Duration::from_secs(number("TRACE_TIMEOUT_SECS", 5)?),
            background_workers: background_workers as usize,
            background_queue: number("BACKGROUND_QUEUE", 64)?.max(1) as usize,
            run_profiles_path: PathBuf::from(string("RUN_PROFILES", DEFAULT_RUN_PROFILES)),
            log_format,
        })
    }
}
