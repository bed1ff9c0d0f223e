use crate::error::Result;
use crate::paths;
use crate::storage::atomic_write;
use podshell_launcher::command::parse_env_pairs;
use podshell_launcher::LaunchConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// `<data_dir>/config.yaml`. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Path or name of the workspace CLI; looked up on `PATH` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
    /// Pass `--debug` to lifecycle commands.
    #[serde(default)]
    pub debug: bool,
    /// Comma-separated `KEY=VALUE` pairs added to every spawned process.
    #[serde(default)]
    pub additional_env: String,
    /// Extra flags appended to `up`.
    #[serde(default)]
    pub additional_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<String>,
    #[serde(default = "default_retention_days")]
    pub action_log_retention_days: u32,
    #[serde(default = "default_skip_pro")]
    pub skip_pro: bool,
}

fn default_retention_days() -> u32 {
    30
}

fn default_skip_pro() -> bool {
    true
}

pub const DEFAULT_BINARY: &str = "devpod";

impl Default for Config {
    fn default() -> Self {
        Self {
            binary: None,
            debug: false,
            additional_env: String::new(),
            additional_flags: Vec::new(),
            http_proxy: None,
            https_proxy: None,
            no_proxy: None,
            action_log_retention_days: default_retention_days(),
            skip_pro: default_skip_pro(),
        }
    }
}

impl Config {
    /// Load from `data_dir`; a missing file yields the defaults.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = paths::config_path(data_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = paths::config_path(data_dir);
        let data = serde_yaml::to_string(self)?;
        atomic_write(&path, data.as_bytes())
    }

    pub fn log_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.action_log_retention_days) * 24 * 60 * 60)
    }

    /// Launcher settings for an already resolved `binary`.
    pub fn launch_config(&self, binary: PathBuf) -> LaunchConfig {
        let mut config = LaunchConfig::new(binary).with_additional_env(&self.additional_env);
        config.debug = self.debug;
        config.http_proxy = self.http_proxy.clone();
        config.https_proxy = self.https_proxy.clone();
        config.no_proxy = self.no_proxy.clone();
        config
    }

    /// The binary to resolve: an explicit override, the configured one, or
    /// the default name.
    pub fn binary_or<'a>(&'a self, explicit: Option<&'a Path>) -> &'a Path {
        explicit
            .or(self.binary.as_deref())
            .unwrap_or(Path::new(DEFAULT_BINARY))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let raw_pairs = self
            .additional_env
            .split(',')
            .filter(|p| !p.trim().is_empty())
            .count();
        if parse_env_pairs(&self.additional_env).len() != raw_pairs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "additional_env '{}' has entries that are not KEY=VALUE; they are ignored",
                    self.additional_env
                ),
            });
        }

        if self.action_log_retention_days == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "action_log_retention_days is 0: action logs are deleted on every start"
                    .to_string(),
            });
        }

        if let Some(binary) = &self.binary {
            if binary.components().count() > 1 && !binary.exists() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("binary '{}' does not exist", binary.display()),
                });
            }
        }

        warnings
    }
}
