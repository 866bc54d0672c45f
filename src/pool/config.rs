// ABOUTME: Configuration for the client pool and the servers it can spawn
//
// Defines PoolConfig with all tunable parameters for the registry:
// - Idle timeout and sweep cadence
// - Handshake and stop timeouts for process-backed clients
// - Extra transient directories for eager eviction
// - Server definitions (command, args, env) keyed by server id

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading pool configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for `PoolConfig`
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A server definition is unusable
    #[error("Invalid server definition '{id}': {reason}")]
    InvalidServer { id: String, reason: String },
}

/// One server binary the pool knows how to spawn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Identifier used in pool keys (e.g. "rust-analyzer")
    pub id: String,

    /// Executable name or path
    pub command: String,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ServerSpec {
    /// Create a server definition with no arguments or environment
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Builder-style helper to set arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Configuration for the client registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    // === Eviction ===
    /// Unreferenced clients idle longer than this are stopped
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,

    /// Period of the idle sweep
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,

    /// Additional directories treated as transient (besides the OS temp dir)
    pub temp_roots: Vec<PathBuf>,

    // === Process clients ===
    /// Maximum time to wait for an initialize response
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// Grace period between SIGTERM and SIGKILL when stopping a server
    #[serde(with = "duration_secs")]
    pub stop_timeout: Duration,

    /// Known servers
    pub servers: Vec<ServerSpec>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300), // 5 minutes
            sweep_interval: Duration::from_secs(60),
            temp_roots: vec![],

            handshake_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(2),

            servers: vec![],
        }
    }
}

impl PoolConfig {
    /// Default config location: `~/.client-pool/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".client-pool")
            .join("config.toml")
    }

    /// Load configuration from an explicit path, or from the default location
    ///
    /// A missing default file yields `PoolConfig::default()`; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !required && !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path, source },
            other => other,
        })
    }

    /// Parse configuration from TOML text and validate server definitions
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every server has an id, a command, and a unique id
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if server.id.trim().is_empty() {
                return Err(ConfigError::InvalidServer {
                    id: server.id.clone(),
                    reason: "id cannot be empty".to_string(),
                });
            }
            if server.command.trim().is_empty() {
                return Err(ConfigError::InvalidServer {
                    id: server.id.clone(),
                    reason: "command cannot be empty".to_string(),
                });
            }
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::InvalidServer {
                    id: server.id.clone(),
                    reason: "duplicate id".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Look up a server definition by id
    pub fn server(&self, id: &str) -> Option<&ServerSpec> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// All directories whose descendants count as transient workspaces
    pub fn temp_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![std::env::temp_dir()];
        dirs.extend(self.temp_roots.iter().cloned());

        // Symlinked temp dirs (macOS /var -> /private/var) need both spellings
        let canonical: Vec<PathBuf> = dirs
            .iter()
            .filter_map(|d| std::fs::canonicalize(d).ok())
            .collect();
        for dir in canonical {
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        dirs
    }

    /// Whether `path` lies under one of the transient directories
    pub fn is_temp_path(&self, path: &Path) -> bool {
        let temp_dirs = self.temp_dirs();
        if temp_dirs.iter().any(|d| path.starts_with(d)) {
            return true;
        }
        std::fs::canonicalize(path)
            .map(|p| temp_dirs.iter().any(|d| p.starts_with(d)))
            .unwrap_or(false)
    }
}

/// Serde helper for Duration as seconds (u64)
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
