// ABOUTME: Configuration for the gitkey CLI.
// ABOUTME: Loaded from TOML with sensible defaults; converted into the core's Toolchain.

use anyhow::{Context, Result};
use gitkey_ssh::{Timeouts, Toolchain, Tools};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default Git host for connection tests.
pub const DEFAULT_HOST: &str = "github.com";
/// Default SSH user on the Git host.
pub const DEFAULT_USER: &str = "git";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Key directory; `~` is expanded. Unset means `~/.ssh`.
    pub ssh_dir: Option<String>,

    /// Git host probed by `gitkey test`
    pub host: String,

    /// SSH user on the Git host
    pub user: String,

    pub tools: ToolsConfig,

    pub timeouts: TimeoutsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ssh_dir: None,
            host: DEFAULT_HOST.to_string(),
            user: DEFAULT_USER.to_string(),
            tools: ToolsConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

/// Binary names (or paths) of the OpenSSH tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub keygen: String,
    pub ssh: String,
    pub ssh_add: String,
    pub ssh_agent: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let tools = Tools::default();
        Self {
            keygen: tools.keygen,
            ssh: tools.ssh,
            ssh_add: tools.ssh_add,
            ssh_agent: tools.ssh_agent,
        }
    }
}

/// Timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub availability: u64,
    pub generation: u64,
    pub registration: u64,
    pub connection: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        let timeouts = Timeouts::default();
        Self {
            availability: timeouts.availability.as_secs(),
            generation: timeouts.generation.as_secs(),
            registration: timeouts.registration.as_secs(),
            connection: timeouts.connection.as_secs(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load from `path`, or defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Get the default config file path (~/.config/gitkey/config.toml)
    pub fn default_path() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("gitkey")
            .join("config.toml")
    }

    /// Key directory with `~` expanded.
    pub fn ssh_dir_expanded(&self) -> Result<PathBuf> {
        match &self.ssh_dir {
            Some(dir) => Ok(shellexpand::tilde(dir).into_owned().into()),
            None => gitkey_ssh::default_ssh_dir().context("Could not determine home directory"),
        }
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain {
            tools: Tools {
                keygen: self.tools.keygen.clone(),
                ssh: self.tools.ssh.clone(),
                ssh_add: self.tools.ssh_add.clone(),
                ssh_agent: self.tools.ssh_agent.clone(),
            },
            timeouts: Timeouts {
                availability: Duration::from_secs(self.timeouts.availability),
                generation: Duration::from_secs(self.timeouts.generation),
                registration: Duration::from_secs(self.timeouts.registration),
                connection: Duration::from_secs(self.timeouts.connection),
            },
        }
    }
}
