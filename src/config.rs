//! Configuration module for the node health watcher.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::dispatch::RetryPolicy;

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Airflow DAG trigger settings.
#[derive(Debug, Clone)]
pub struct AirflowSettings {
    /// Base URL without trailing slash, e.g. `http://airflow:8080`
    pub base_url: String,
    pub dag_id: String,
    pub username: String,
    pub password: String,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl AirflowSettings {
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }
}

/// GitHub repository dispatch settings.
#[derive(Debug, Clone)]
pub struct GithubSettings {
    /// Full `.../repos/{owner}/{repo}/dispatches` URL
    pub dispatch_url: String,
    pub token: String,
    pub event_type: String,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl GithubSettings {
    pub fn is_configured(&self) -> bool {
        !self.dispatch_url.is_empty() && !self.token.is_empty()
    }
}

/// Watcher configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Cluster name carried in every event (default: "pi-k3s")
    pub cluster_name: String,
    /// Debounce window length (default: 5s)
    pub watch_debounce: Duration,
    pub airflow: AirflowSettings,
    pub github: GithubSettings,
    /// First retry delay (default: 1s)
    pub backoff_base: Duration,
    /// Retry delay cap (default: 30s)
    pub backoff_max: Duration,
    /// Incident log file (default: "/var/lib/node-health-watcher/incidents.ndjson")
    pub incident_log_path: PathBuf,
    /// HTTP port for the status server (default: 8080)
    pub http_port: u16,
    /// Log filter directive when `RUST_LOG` is unset (default: "info")
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            cluster_name: "pi-k3s".to_string(),
            watch_debounce: Duration::from_secs(5),
            airflow: AirflowSettings {
                base_url: String::new(),
                dag_id: "node_health_alert".to_string(),
                username: String::new(),
                password: String::new(),
                max_retries: 5,
                timeout: Duration::from_secs(10),
            },
            github: GithubSettings {
                dispatch_url: String::new(),
                token: String::new(),
                event_type: "k3s-node-alert".to_string(),
                max_retries: 3,
                timeout: Duration::from_secs(10),
            },
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            incident_log_path: PathBuf::from("/var/lib/node-health-watcher/incidents.ndjson"),
            http_port: 8080,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl WatcherConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CLUSTER_NAME`, `WATCH_DEBOUNCE_SECONDS`
    /// - `AIRFLOW_BASE_URL`, `AIRFLOW_DAG_ID`, `AIRFLOW_USERNAME`, `AIRFLOW_PASSWORD`,
    ///   `AIRFLOW_MAX_RETRIES`, `AIRFLOW_TIMEOUT_SECONDS`
    /// - `GHA_DISPATCH_URL`, `GHA_TOKEN`, `GHA_EVENT_TYPE`, `GHA_MAX_RETRIES`,
    ///   `GHA_TIMEOUT_SECONDS` (defaults to the Airflow timeout)
    /// - `DISPATCH_BACKOFF_BASE_SECONDS`, `DISPATCH_BACKOFF_MAX_SECONDS`
    /// - `INCIDENT_LOG_PATH`, `WATCHER_HTTP_PORT`, `LOG_LEVEL`, `LOG_FORMAT`
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(name) = get("CLUSTER_NAME") {
            cfg.cluster_name = name;
        }
        if let Some(v) = get("WATCH_DEBOUNCE_SECONDS") {
            cfg.watch_debounce = Duration::from_secs(parse("WATCH_DEBOUNCE_SECONDS", &v)?);
        }

        if let Some(url) = get("AIRFLOW_BASE_URL") {
            cfg.airflow.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(dag) = get("AIRFLOW_DAG_ID") {
            cfg.airflow.dag_id = dag;
        }
        if let Some(user) = get("AIRFLOW_USERNAME") {
            cfg.airflow.username = user;
        }
        if let Some(pass) = lookup("AIRFLOW_PASSWORD") {
            cfg.airflow.password = pass;
        }
        if let Some(v) = get("AIRFLOW_MAX_RETRIES") {
            cfg.airflow.max_retries = parse_positive("AIRFLOW_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("AIRFLOW_TIMEOUT_SECONDS") {
            cfg.airflow.timeout = Duration::from_secs(parse_positive("AIRFLOW_TIMEOUT_SECONDS", &v)?);
        }

        if let Some(url) = get("GHA_DISPATCH_URL") {
            cfg.github.dispatch_url = url;
        }
        if let Some(token) = get("GHA_TOKEN") {
            cfg.github.token = token;
        }
        if let Some(event_type) = get("GHA_EVENT_TYPE") {
            cfg.github.event_type = event_type;
        }
        if let Some(v) = get("GHA_MAX_RETRIES") {
            cfg.github.max_retries = parse_positive("GHA_MAX_RETRIES", &v)?;
        }
        cfg.github.timeout = match get("GHA_TIMEOUT_SECONDS") {
            Some(v) => Duration::from_secs(parse_positive("GHA_TIMEOUT_SECONDS", &v)?),
            None => cfg.airflow.timeout,
        };

        if let Some(v) = get("DISPATCH_BACKOFF_BASE_SECONDS") {
            cfg.backoff_base = Duration::from_secs(parse("DISPATCH_BACKOFF_BASE_SECONDS", &v)?);
        }
        if let Some(v) = get("DISPATCH_BACKOFF_MAX_SECONDS") {
            cfg.backoff_max = Duration::from_secs(parse("DISPATCH_BACKOFF_MAX_SECONDS", &v)?);
        }

        if let Some(path) = get("INCIDENT_LOG_PATH") {
            cfg.incident_log_path = PathBuf::from(path);
        }
        if let Some(v) = get("WATCHER_HTTP_PORT") {
            cfg.http_port = parse("WATCHER_HTTP_PORT", &v)?;
        }
        if let Some(level) = get("LOG_LEVEL") {
            cfg.log_level = level.to_lowercase();
        }
        if let Some(format) = get("LOG_FORMAT") {
            cfg.log_format = match format.to_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "LOG_FORMAT",
                        value: format,
                        reason: "expected \"text\" or \"json\"".to_string(),
                    })
                }
            };
        }

        Ok(cfg)
    }

    pub fn airflow_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.airflow.max_retries,
            base_delay: self.backoff_base,
            max_delay: self.backoff_max,
            attempt_timeout: self.airflow.timeout,
        }
    }

    pub fn github_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.github.max_retries,
            base_delay: self.backoff_base,
            max_delay: self.backoff_max,
            attempt_timeout: self.github.timeout,
        }
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_positive<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialOrd,
    T::Err: std::fmt::Display,
{
    let parsed: T = parse(key, value)?;
    if parsed <= T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(parsed)
}
