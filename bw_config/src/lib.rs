//! ABOUTME: Configuration management with validation and environment loading
//! ABOUTME: Handles database, server, collector, and repository settings

use bw_core::{Error, Result};
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Main configuration struct
#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub collector: CollectorConfig,
    /// Repositories to collect, keyed by their natural name
    #[validate(nested, custom(function = "validate_unique_names"))]
    pub repositories: Vec<RepositoryConfig>,
}

/// HTTP server configuration for the read-only API
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DatabaseConfig {
    #[validate(length(min = 1))]
    pub path: String,
    #[validate(range(min = 1, max = 100))]
    pub pool_size: u32,
    pub sqlite_wal: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "borgwatch.db".to_string(),
            pool_size: 10,
            sqlite_wal: true,
        }
    }
}

/// How the backup tool is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvocationKind {
    /// Run borgmatic on the host
    Direct,
    /// Run borgmatic inside a running container
    #[default]
    Container,
}

/// Collection cycle configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CollectorConfig {
    /// Seconds between collection cycles
    #[validate(range(min = 10, max = 604800))]
    pub interval_seconds: u64,
    /// Upper bound for a single borgmatic invocation
    #[validate(range(min = 1, max = 86400))]
    pub source_timeout_seconds: u64,
    /// Upper bound for one repository's store transaction
    #[validate(range(min = 1, max = 3600))]
    pub store_timeout_seconds: u64,
    #[validate(range(min = 1, max = 64))]
    pub max_concurrent_repositories: usize,
    pub invocation: InvocationKind,
    #[validate(length(min = 1))]
    pub borgmatic_bin: String,
    /// Container name for container invocation
    #[validate(length(min = 1))]
    pub container: String,
    /// Container runtime binary (docker, podman)
    #[validate(length(min = 1))]
    pub container_runtime: String,
    /// borgmatic configuration file read for source directories and retention
    pub config_path: Option<String>,
    /// Whether to list database dumps in the latest archive
    pub collect_database_dumps: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
            source_timeout_seconds: 300,
            store_timeout_seconds: 30,
            max_concurrent_repositories: 4,
            invocation: InvocationKind::Container,
            borgmatic_bin: "borgmatic".to_string(),
            container: "borgmatic".to_string(),
            container_runtime: "docker".to_string(),
            config_path: Some("/etc/borgmatic.d/config.yaml".to_string()),
            collect_database_dumps: true,
        }
    }
}

impl CollectorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_seconds)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_seconds)
    }
}

/// A monitored repository
#[derive(Debug, Clone, Deserialize, Serialize, Validate, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// Natural key of the repository in the store
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    /// Path or URL borgmatic knows the repository by; absent means unmapped
    pub path: Option<String>,
}

fn validate_unique_names(
    repositories: &Vec<RepositoryConfig>,
) -> std::result::Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for repository in repositories {
        if !seen.insert(repository.name.as_str()) {
            return Err(ValidationError::new("duplicate_repository_name"));
        }
    }
    Ok(())
}

impl Config {
    /// Load configuration from defaults, `borgwatch.toml`, and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, reading an explicit file instead of `borgwatch.toml` when given
    ///
    /// Environment variables use the `BORGWATCH_` prefix and `__` between
    /// sections, e.g. `BORGWATCH_COLLECTOR__INTERVAL_SECONDS=900`.
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.path", "borgwatch.db")?
            .set_default("database.pool_size", 10)?
            .set_default("database.sqlite_wal", true)?
            .set_default("collector.interval_seconds", 3600)?
            .set_default("collector.source_timeout_seconds", 300)?
            .set_default("collector.store_timeout_seconds", 30)?
            .set_default("collector.max_concurrent_repositories", 4)?
            .set_default("collector.invocation", "container")?
            .set_default("collector.borgmatic_bin", "borgmatic")?
            .set_default("collector.container", "borgmatic")?
            .set_default("collector.container_runtime", "docker")?
            .set_default("collector.config_path", "/etc/borgmatic.d/config.yaml")?
            .set_default("collector.collect_database_dumps", true)?;

        builder = match path {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("borgwatch").required(false)),
        };

        // Environment variables win over everything else
        builder = builder.add_source(
            Environment::with_prefix("BORGWATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build config: {}", e)))?;

        let parsed: Config = config
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to deserialize config: {}", e)))?;

        parsed
            .validate()
            .map_err(|e| Error::Config(format!("Config validation failed: {}", e)))?;

        Ok(parsed)
    }
}
