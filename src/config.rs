use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from warden.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct WardenConfig {
    pub process: ProcessConfig,
    pub startup: StartupConfig,
    pub shutdown: ShutdownConfig,
    pub health: HealthConfig,
    pub secrets: SecretsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Name used in log lines forwarded from the child's stdout/stderr.
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Wait this long after spawn before declaring startup successful.
    /// Best-effort liveness window, not a readiness probe.
    pub grace_period_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait after SIGTERM before escalating to SIGKILL.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Config file the placeholders live in.
    pub config_path: PathBuf,
    /// Placeholder tokens to substitute, matched as exact substrings.
    pub placeholders: Vec<PlaceholderSpec>,
}

/// One placeholder token and the secret key that fills it.
///
/// The token must match the file content exactly, including any
/// `:-default` suffix the file carries.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceholderSpec {
    pub key: String,
    pub token: String,
    #[serde(default)]
    pub required: bool,
}

// --- Default implementations ---

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            command: "carv-verifier".to_string(),
            args: vec![
                "--config".to_string(),
                "/data/conf/config_docker.yaml".to_string(),
                "--data-dir".to_string(),
                "/data".to_string(),
                "--log-level".to_string(),
                "info".to_string(),
            ],
            working_dir: PathBuf::from("/data"),
            name: "verifier".to_string(),
        }
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 2000,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
        }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/data/conf/config_docker.yaml"),
            placeholders: vec![
                PlaceholderSpec {
                    key: "CARV_PRIVATE_KEY".to_string(),
                    token: "${CARV_PRIVATE_KEY}".to_string(),
                    required: true,
                },
                PlaceholderSpec {
                    key: "CARV_REWARD_CLAIMER_ADDR".to_string(),
                    token: "${CARV_REWARD_CLAIMER_ADDR:-0x0000000000000000000000000000000000000000}"
                        .to_string(),
                    required: false,
                },
            ],
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Config file is not valid TOML for WardenConfig.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load configuration from a TOML file. A missing file yields all defaults.
pub fn load_config(path: &Path) -> Result<WardenConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(WardenConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}
