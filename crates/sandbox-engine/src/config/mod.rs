//! Sandbox configuration.
//!
//! Configuration is read once, when the engine is built. Every field has a
//! default, so an empty file (or no file) gives a working SQLite setup with a
//! `sandbox.db` file in the working directory. Environment variables
//! (`SANDBOX_*`) override file values through [`SandboxConfig::apply_env`].

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use sandbox_client::{BackendConfig, BackendKind, PoolConfig};
use sandbox_sql::{SessionToken, SplitOptions};

use crate::database::{SandboxError, SandboxResult, DEFAULT_MAX_ROWS};

/// Sandbox configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Backend kind.
    #[serde(default)]
    pub backend: BackendKind,

    /// SQLite file path or PostgreSQL URL.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Database host, when no URL is given.
    #[serde(default)]
    pub db_host: Option<String>,

    /// Database port.
    #[serde(default)]
    pub db_port: Option<u16>,

    /// Database user.
    #[serde(default)]
    pub db_user: Option<String>,

    /// Database password.
    #[serde(default)]
    pub db_password: Option<String>,

    /// Database name.
    #[serde(default)]
    pub db_name: Option<String>,

    /// How long SQLite waits on a locked database, in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Connections opened when the pool initializes.
    #[serde(default = "default_pool_min")]
    pub pool_min: usize,

    /// Upper bound on open connections.
    #[serde(default = "default_pool_max")]
    pub pool_max: usize,

    /// Connections opened each time the pool grows.
    #[serde(default = "default_pool_increment")]
    pub pool_increment: usize,

    /// How long `acquire` waits for a connection, in milliseconds.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,

    /// Idle connections older than this are closed, in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Connections older than this are closed, in seconds.
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,

    /// Maximum session token length.
    #[serde(default = "default_max_token_len")]
    pub max_token_len: usize,

    /// Row limit for query results.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    /// Line comment marker used when splitting.
    #[serde(default)]
    pub comment_marker: Option<String>,

    /// Block terminator line used when splitting.
    #[serde(default)]
    pub block_terminator: Option<String>,
}

fn default_busy_timeout() -> u64 {
    5_000
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_pool_min() -> usize {
    1
}

fn default_pool_max() -> usize {
    10
}

fn default_pool_increment() -> usize {
    1
}

fn default_acquire_timeout() -> u64 {
    30_000
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_max_lifetime() -> u64 {
    3600
}

fn default_max_token_len() -> usize {
    SessionToken::DEFAULT_MAX_LEN
}

fn default_max_rows() -> usize {
    DEFAULT_MAX_ROWS
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            database_url: None,
            db_host: None,
            db_port: None,
            db_user: None,
            db_password: None,
            db_name: None,
            busy_timeout_ms: default_busy_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            pool_min: default_pool_min(),
            pool_max: default_pool_max(),
            pool_increment: default_pool_increment(),
            acquire_timeout_ms: default_acquire_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            max_lifetime_secs: default_max_lifetime(),
            max_token_len: default_max_token_len(),
            max_rows: default_max_rows(),
            comment_marker: None,
            block_terminator: None,
        }
    }
}

impl SandboxConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Loads configuration from an optional file, then applies environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Converts configuration to TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Applies `SANDBOX_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Applies overrides from a variable lookup.
    pub fn apply_vars<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("SANDBOX_BACKEND") {
            self.backend = v.parse().context("SANDBOX_BACKEND")?;
        }
        if let Some(v) = var("SANDBOX_DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Some(v) = var("SANDBOX_DB_HOST") {
            self.db_host = Some(v);
        }
        if let Some(v) = var("SANDBOX_DB_PORT") {
            self.db_port = Some(parse_var("SANDBOX_DB_PORT", &v)?);
        }
        if let Some(v) = var("SANDBOX_DB_USER") {
            self.db_user = Some(v);
        }
        if let Some(v) = var("SANDBOX_DB_PASSWORD") {
            self.db_password = Some(v);
        }
        if let Some(v) = var("SANDBOX_DB_NAME") {
            self.db_name = Some(v);
        }
        if let Some(v) = var("SANDBOX_POOL_MIN") {
            self.pool_min = parse_var("SANDBOX_POOL_MIN", &v)?;
        }
        if let Some(v) = var("SANDBOX_POOL_MAX") {
            self.pool_max = parse_var("SANDBOX_POOL_MAX", &v)?;
        }
        if let Some(v) = var("SANDBOX_POOL_INCREMENT") {
            self.pool_increment = parse_var("SANDBOX_POOL_INCREMENT", &v)?;
        }
        if let Some(v) = var("SANDBOX_MAX_TOKEN_LEN") {
            self.max_token_len = parse_var("SANDBOX_MAX_TOKEN_LEN", &v)?;
        }
        if let Some(v) = var("SANDBOX_MAX_ROWS") {
            self.max_rows = parse_var("SANDBOX_MAX_ROWS", &v)?;
        }
        Ok(())
    }

    /// Returns the backend configuration.
    pub fn backend_config(&self) -> BackendConfig {
        let mut config = BackendConfig::new(self.backend)
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms));

        config.url = match (&self.database_url, self.backend) {
            (Some(url), _) => url.clone(),
            (None, BackendKind::Sqlite) => "sandbox.db".to_string(),
            (None, BackendKind::Postgres) => String::new(),
        };
        config.host = self.db_host.clone();
        config.port = self.db_port;
        config.username = self.db_user.clone();
        config.password = self.db_password.clone();
        config.database = self.db_name.clone();
        config
    }

    /// Returns the pool configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new()
            .min_connections(self.pool_min)
            .max_connections(self.pool_max)
            .increment(self.pool_increment)
            .acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(self.max_lifetime_secs))
    }

    /// Applies the splitting overrides to a backend's split options.
    pub fn split_options(&self, base: SplitOptions) -> SplitOptions {
        let mut options = base;
        if let Some(marker) = &self.comment_marker {
            options = options.comment_marker(marker.clone());
        }
        if let Some(terminator) = &self.block_terminator {
            options = options.block_terminator(terminator.clone());
        }
        options
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SandboxResult<()> {
        self.backend_config()
            .validate()
            .and_then(|_| self.pool_config().validate())
            .map_err(SandboxError::from)?;
        if self.max_token_len == 0 {
            return Err(SandboxError::Config(
                "max_token_len must be greater than 0".to_string(),
            ));
        }
        if matches!(&self.comment_marker, Some(m) if m.trim().is_empty()) {
            return Err(SandboxError::Config(
                "comment_marker must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates a builder for configuration.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::new()
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {}: '{}'", key, value))
}

/// Builder for sandbox configuration.
#[derive(Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the backend kind.
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.config.backend = kind;
        self
    }

    /// Sets the SQLite path or PostgreSQL URL.
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    /// Sets the pool bounds.
    pub fn pool_size(mut self, min: usize, max: usize) -> Self {
        self.config.pool_min = min;
        self.config.pool_max = max;
        self
    }

    /// Sets the pool growth increment.
    pub fn pool_increment(mut self, increment: usize) -> Self {
        self.config.pool_increment = increment;
        self
    }

    /// Sets the acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the maximum session token length.
    pub fn max_token_len(mut self, len: usize) -> Self {
        self.config.max_token_len = len;
        self
    }

    /// Sets the query row limit.
    pub fn max_rows(mut self, rows: usize) -> Self {
        self.config.max_rows = rows;
        self
    }

    /// Sets the line comment marker.
    pub fn comment_marker(mut self, marker: impl Into<String>) -> Self {
        self.config.comment_marker = Some(marker.into());
        self
    }

    /// Sets the block terminator line.
    pub fn block_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.config.block_terminator = Some(terminator.into());
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SandboxConfig {
        self.config
    }
}
