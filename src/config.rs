use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

/// Env var overriding `database.url`
pub const ENV_DATABASE_URI: &str = "DATABASE_URI";
/// Env var overriding `accrual.base_url`
pub const ENV_ACCRUAL_ADDRESS: &str = "ACCRUAL_SYSTEM_ADDRESS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub accrual: AccrualConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 50,
            acquire_timeout_ms: 5000,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Accrual provider endpoint
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AccrualConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl AccrualConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Reconciliation worker pool and retry settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub workers: usize,
    /// Job queue depth. 1 keeps producers in lock-step with free workers.
    pub queue_capacity: usize,
    pub poll_interval_ms: u64,
    /// Wall-clock bound on one job attempt, lock waits and remote call included
    pub job_timeout_ms: u64,
    pub retry_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            workers: parallelism * 2,
            queue_capacity: 1,
            poll_interval_ms: 5_000,
            job_timeout_ms: 30_000,
            retry_attempts: 3,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 2_000,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Values taken from the environment and the command line.
/// Command line wins over environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub database_uri: Option<String>,
    pub accrual_url: Option<String>,
}

impl Overrides {
    /// Collect overrides from the process environment and `args`
    pub fn from_process(args: &[String]) -> Self {
        Self::from_sources(|key| std::env::var(key).ok(), args)
    }

    pub fn from_sources(env: impl Fn(&str) -> Option<String>, args: &[String]) -> Self {
        let non_empty = |v: String| if v.is_empty() { None } else { Some(v) };
        Self {
            database_uri: cli_value(args, &["--database-uri", "-d"])
                .or_else(|| env(ENV_DATABASE_URI))
                .and_then(non_empty),
            accrual_url: cli_value(args, &["--accrual-url", "-r"])
                .or_else(|| env(ENV_ACCRUAL_ADDRESS))
                .and_then(non_empty),
        }
    }
}

/// Value following the first of `flags` in `args`
pub fn cli_value(args: &[String], flags: &[&str]) -> Option<String> {
    args.windows(2)
        .find(|pair| flags.contains(&pair[0].as_str()))
        .map(|pair| pair[1].clone())
}

/// Config environment name from `--env` / `-e`, `dev` by default
pub fn get_env(args: &[String]) -> String {
    cli_value(args, &["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

impl AppConfig {
    /// Read `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path,
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(url) = &overrides.database_uri {
            self.database.url = url.clone();
        }
        if let Some(url) = &overrides.accrual_url {
            self.accrual.base_url = url.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.database.url.trim().is_empty() {
            return invalid("database.url is empty (set it or DATABASE_URI)");
        }
        if self.accrual.base_url.trim().is_empty() {
            return invalid("accrual.base_url is empty (set it or ACCRUAL_SYSTEM_ADDRESS)");
        }
        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be > 0");
        }
        if self.sync.workers == 0 {
            return invalid("sync.workers must be > 0");
        }
        if self.sync.queue_capacity == 0 {
            return invalid("sync.queue_capacity must be > 0");
        }
        if self.sync.retry_attempts == 0 {
            return invalid("sync.retry_attempts must be > 0");
        }
        if self.sync.poll_interval_ms == 0 || self.sync.job_timeout_ms == 0 {
            return invalid("sync intervals must be > 0");
        }
        Ok(())
    }
}
