use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};
use crate::proxy::cache::EvictionPolicy;

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    16
}

fn default_max_object_size() -> u64 {
    102_400
}

fn default_cache_base_capacity() -> u64 {
    1_049_000
}

fn default_max_request_line() -> usize {
    8192
}

fn default_client_timeout() -> u64 {
    30
}

fn default_upstream_connect_timeout() -> u64 {
    5
}

fn default_upstream_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default)]
    pub policy: EvictionPolicy,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Largest response, in bytes, that is kept in the cache.
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,
    /// Cache capacity before per-worker slack is added.
    #[serde(default = "default_cache_base_capacity")]
    pub cache_base_capacity: u64,
    #[serde(default = "default_max_request_line")]
    pub max_request_line: usize,
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,
    #[serde(default = "default_upstream_connect_timeout")]
    pub upstream_connect_timeout: u64,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log: default_log_format(),
            policy: EvictionPolicy::default(),
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            max_object_size: default_max_object_size(),
            cache_base_capacity: default_cache_base_capacity(),
            max_request_line: default_max_request_line(),
            client_timeout: default_client_timeout(),
            upstream_connect_timeout: default_upstream_connect_timeout(),
            upstream_timeout: default_upstream_timeout(),
            metrics_listen: None,
        }
    }
}

impl Settings {
    /// Layers the optional config file, `PROXYCACHE__*` variables, and CLI overrides.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = resolve_config_path(cli) {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("PROXYCACHE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.apply_cli(cli);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(listen) = cli.listen {
            self.listen = listen;
        }
        if let Some(policy) = cli.policy {
            self.policy = policy;
        }
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.worker_count > 0,
            "worker_count must be at least 1 (got {})",
            self.worker_count
        );
        ensure!(
            self.queue_capacity > 0,
            "queue_capacity must be at least 1 (got {})",
            self.queue_capacity
        );
        ensure!(
            self.max_object_size > 0,
            "max_object_size must be greater than 0 (got {})",
            self.max_object_size
        );
        ensure!(
            self.cache_base_capacity > 0,
            "cache_base_capacity must be greater than 0 (got {})",
            self.cache_base_capacity
        );
        ensure!(
            self.max_request_line > 0,
            "max_request_line must be greater than 0 (got {})",
            self.max_request_line
        );
        ensure!(
            self.client_timeout > 0,
            "client_timeout must be greater than 0 seconds (got {})",
            self.client_timeout
        );
        ensure!(
            self.upstream_connect_timeout > 0,
            "upstream_connect_timeout must be greater than 0 seconds (got {})",
            self.upstream_connect_timeout
        );
        ensure!(
            self.upstream_timeout > 0,
            "upstream_timeout must be greater than 0 seconds (got {})",
            self.upstream_timeout
        );
        Ok(())
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// An explicit `--config` must exist; otherwise the first default location present wins.
fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = cli.config_path() {
        return Some(path.to_path_buf());
    }
    default_config_candidates()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn default_config_candidates() -> [PathBuf; 2] {
    [
        PathBuf::from("/etc/proxycache/proxycache.toml"),
        PathBuf::from("proxycache.toml"),
    ]
}
