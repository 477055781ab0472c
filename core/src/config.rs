//! Configuration management (config.toml)
//!
//! Handles loading, saving, and providing defaults for the session settings.
//! Settings are stored in TOML format in the platform-specific config directory.

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Client configuration.
///
/// Contains all user-configurable settings organized into sections.
/// Serialized to/from TOML format for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Game behaviour settings
    #[serde(default)]
    pub game: GameConfig,
    /// Executable locations, keyed by featured mod
    #[serde(default)]
    pub installations: HashMap<String, Installation>,
    /// Process spawning settings
    #[serde(default)]
    pub process: ProcessConfig,
    /// Elevation-capable launch helper
    #[serde(default)]
    pub launch_server: LaunchServerConfig,
    /// Local port settings
    #[serde(default)]
    pub network: NetworkConfig,
    /// Launch helper keep-alive tuning
    #[serde(default)]
    pub keep_alive: KeepAliveConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Send the launch command once the joined game reaches the battleroom (default: true)
    #[serde(default = "default_true")]
    pub auto_launch: bool,
    /// Extra switches appended to every game command line; unknown switches are dropped
    #[serde(default)]
    pub additional_args: String,
}

/// Where a featured mod's game executable lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Installation {
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Defaults to the executable's directory
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Installation {
    pub fn with_executable(path: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(path.into()),
            working_dir: None,
        }
    }

    /// The configured executable, if it points at an existing file.
    pub fn installed_executable(&self) -> Option<&Path> {
        self.executable.as_deref().filter(|path| path.is_file())
    }

    pub fn resolved_working_dir(&self) -> Option<PathBuf> {
        self.working_dir.clone().or_else(|| {
            self.executable
                .as_deref()
                .and_then(Path::parent)
                .map(Path::to_path_buf)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Compatibility layer prepended to the game command (default: `wine` off Windows)
    #[serde(default = "default_compat_prefix")]
    pub compat_prefix: Vec<String>,
    /// Host the game console port listens on (default: 127.0.0.1)
    #[serde(default = "default_console_host")]
    pub console_host: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchServerConfig {
    /// Start the launch helper for online games (default: false)
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Run the helper with elevated privileges (default: false)
    #[serde(default)]
    pub elevate: bool,
    /// Command used to elevate the helper when `elevate` is set
    #[serde(default = "default_elevation_prefix")]
    pub elevation_prefix: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Well-known port the legacy game binds (default: 6112)
    #[serde(default = "default_game_port")]
    pub game_port: u16,
    /// Executables that may still hold `game_port` from a previous run
    #[serde(default = "default_blocking_executables")]
    pub blocking_executables: Vec<String>,
    /// Upper bound for the port-freeing commands (default: 5000)
    #[serde(default = "default_free_port_timeout_ms")]
    pub free_port_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    /// Probe period (default: 1000)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Connect timeout per probe (default: 300)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Consecutive failures tolerated after the first success (default: 10)
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

fn default_true() -> bool {
    true
}
fn default_compat_prefix() -> Vec<String> {
    if cfg!(windows) {
        Vec::new()
    } else {
        vec!["wine".to_string()]
    }
}
fn default_console_host() -> String {
    "127.0.0.1".to_string()
}
fn default_elevation_prefix() -> Vec<String> {
    if cfg!(windows) {
        Vec::new()
    } else {
        vec!["pkexec".to_string()]
    }
}
fn default_game_port() -> u16 {
    6112
}
fn default_blocking_executables() -> Vec<String> {
    vec![
        "ForgedAlliance.exe".to_string(),
        "SupremeCommander.exe".to_string(),
    ]
}
fn default_free_port_timeout_ms() -> u64 {
    5000
}
fn default_interval_ms() -> u64 {
    1000
}
fn default_probe_timeout_ms() -> u64 {
    300
}
fn default_retry_budget() -> u32 {
    10
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            auto_launch: default_true(),
            additional_args: String::new(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            compat_prefix: default_compat_prefix(),
            console_host: default_console_host(),
        }
    }
}

impl Default for LaunchServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            executable: None,
            elevate: false,
            elevation_prefix: default_elevation_prefix(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            game_port: default_game_port(),
            blocking_executables: default_blocking_executables(),
            free_port_timeout_ms: default_free_port_timeout_ms(),
        }
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            retry_budget: default_retry_budget(),
        }
    }
}

impl Config {
    /// Installation settings for a featured mod.
    pub fn installation(&self, featured_mod: &str) -> Option<&Installation> {
        self.installations.get(featured_mod)
    }
}

/// Config file errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the config directory")]
    NoConfigDir,
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\Skirmish\config`
/// On macOS: `~/Library/Application Support/org.skirmish.Skirmish`
/// On Linux: `~/.config/skirmish`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "skirmish", "Skirmish")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads the configuration from disk.
///
/// Reads `config.toml` from the platform's configuration directory.
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> Config {
    let Some(path) = config_dir().map(|dir| dir.join(CONFIG_FILE_NAME)) else {
        return Config::default();
    };
    if !path.exists() {
        return Config::default();
    }
    match load_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Using default config: {}", e);
            Config::default()
        }
    }
}

/// Loads a configuration file from an explicit path.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Saves the configuration to the platform's configuration directory.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let dir = config_dir().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &dir.join(CONFIG_FILE_NAME))
}

/// Saves the configuration to an explicit path, creating parent directories.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
