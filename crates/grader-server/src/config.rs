//! Configuration (SPEC_FULL.md §A): a plain `serde`-deserialized struct
//! loaded in layers — built-in defaults, then an optional TOML file, then
//! a handful of environment variable overrides for the values operators
//! most often need to flip per-deployment without editing the file.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub amqp: AmqpConfig,
    pub cluster: ClusterSectionConfig,
    pub workspace: WorkspaceConfig,
    pub dispatch: DispatchConfig,
    pub upload: UploadConfig,
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            amqp: AmqpConfig::default(),
            cluster: ClusterSectionConfig::default(),
            workspace: WorkspaceConfig::default(),
            dispatch: DispatchConfig::default(),
            upload: UploadConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

/// `url: None` means "no broker configured" — `grader-server` falls back
/// to the in-process `InMemoryEventBus`, the single-node deployment shape
/// spec §4.E allows.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AmqpConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterSectionConfig {
    pub namespace: String,
    pub image_puller_base_url: String,
    pub constant_environment_node_selector: BTreeMap<String, String>,
    pub constant_environment_toleration_key: String,
    pub default_cpu_limit: String,
    pub default_memory_limit: String,
    pub default_memory_request: String,
    pub grader_name: String,
}

impl Default for ClusterSectionConfig {
    fn default() -> Self {
        Self {
            namespace: "grader".into(),
            image_puller_base_url: "https://fetch.example".into(),
            constant_environment_node_selector: BTreeMap::new(),
            constant_environment_toleration_key: "grader.aplus.io/dedicated".into(),
            default_cpu_limit: "1".into(),
            default_memory_limit: "1Gi".into(),
            default_memory_request: "128Mi".into(),
            grader_name: "aplus-manager".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: "/var/lib/grader/workspaces".into(),
        }
    }
}

/// Open Question 1 (SPEC_FULL.md §D.1): whether a dispatch failure is
/// auto-retried or surfaced immediately. Defaults to surfacing it.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DispatchConfig {
    pub auto_retry_on_failure: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub retry_ceiling: u32,
    /// Open Question 2 (SPEC_FULL.md §D.2): whether a callback that arrives
    /// after a synthetic default was already recorded overwrites it.
    /// Defaults to true — "callback wins".
    pub callback_overrides_synthetic_result: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            retry_ceiling: 8,
            callback_overrides_synthetic_result: true,
        }
    }
}

/// No shared secret lives here: a job's own id is its bearer token
/// (`crate::auth::bearer_job_id`). This section only controls the debug
/// `?token=` query-parameter fallback.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Allows the `?token=` query-parameter bearer-token fallback — never
    /// enable in production.
    pub allow_query_token_in_debug: bool,
    pub debug: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allow_query_token_in_debug: false,
            debug: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(String, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Parse(String, toml::de::Error),
}

impl Config {
    /// Layer built-in defaults, an optional TOML file, then environment
    /// overrides. `path` is typically sourced from `GRADER_CONFIG`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
                toml::from_str(&raw)
                    .map_err(|e| ConfigError::Parse(path.display().to_string(), e))?
            }
            None => Config::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GRADER_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Ok(v) = std::env::var("GRADER_DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("GRADER_AMQP_URL") {
            self.amqp.url = Some(v);
        }
        if let Ok(v) = std::env::var("GRADER_DEBUG") {
            self.auth.debug = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }
}
