use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::window::WindowStrategy;

/// Top-level server config, loaded from TOML.
///
/// Every section is optional; a missing key takes the default that matches
/// a stock Xvfb + xterm + xdotool + ImageMagick installation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub display: DisplayConfig,
    pub terminal: TerminalConfig,
    pub timing: TimingConfig,
    pub window: WindowConfig,
    pub sessions: SessionsConfig,
}

/// Names or paths of the external programs a session drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Virtual display server.
    pub xvfb: String,
    /// Terminal emulator.
    pub xterm: String,
    /// Window query and input injection.
    pub xdotool: String,
    /// Screen capture (ImageMagick `import`).
    pub import: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            xvfb: "Xvfb".into(),
            xterm: "xterm".into(),
            xdotool: "xdotool".into(),
            import: "import".into(),
        }
    }
}

/// Virtual display allocation and geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// First display number probed by the allocator.
    pub first: u32,
    /// Number of display numbers probed before falling back.
    pub candidates: u32,
    /// Directory holding the X server sockets (`X<n>`).
    pub socket_dir: PathBuf,
    /// Directory holding the X server lock files (`.X<n>-lock`).
    pub lock_dir: PathBuf,
    pub color_depth: u8,
    pub dpi: u32,
    pub min_width: u32,
    pub min_height: u32,
    /// Approximate pixel width of one terminal cell.
    pub cell_width: u32,
    /// Approximate pixel height of one terminal cell.
    pub cell_height: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            first: 100,
            candidates: 100,
            socket_dir: PathBuf::from("/tmp/.X11-unix"),
            lock_dir: PathBuf::from("/tmp"),
            color_depth: 24,
            dpi: 100,
            min_width: 1024,
            min_height: 768,
            cell_width: 12,
            cell_height: 20,
        }
    }
}

/// Terminal emulator appearance and request defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub font: String,
    pub background: String,
    pub foreground: String,
    pub default_command: String,
    pub default_width: u16,
    pub default_height: u16,
    pub max_width: u16,
    pub max_height: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            font: "-*-fixed-medium-r-*-*-14-*-*-*-*-*-*-*".into(),
            background: "black".into(),
            foreground: "white".into(),
            default_command: "bash".into(),
            default_width: 80,
            default_height: 24,
            max_width: 1000,
            max_height: 1000,
        }
    }
}

/// Settle delays and timeouts, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Upper bound on waiting for the display server to become ready.
    pub display_settle: u64,
    /// Fixed wait after launching the terminal emulator.
    pub terminal_settle: u64,
    /// Pause between focusing a window and sending input to it.
    pub focus_settle: u64,
    /// Grace period between SIGTERM and SIGKILL during teardown.
    pub stop_timeout: u64,
    /// How often a starting child is checked for early exit or readiness.
    pub poll_interval: u64,
    /// Pause after stopping a display server so it can release its resources.
    pub post_cleanup: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            display_settle: 2000,
            terminal_settle: 3000,
            focus_settle: 200,
            stop_timeout: 5000,
            poll_interval: 100,
            post_cleanup: 500,
        }
    }
}

impl TimingConfig {
    pub fn display_settle(&self) -> Duration {
        Duration::from_millis(self.display_settle)
    }

    pub fn terminal_settle(&self) -> Duration {
        Duration::from_millis(self.terminal_settle)
    }

    pub fn focus_settle(&self) -> Duration {
        Duration::from_millis(self.focus_settle)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero interval would turn the readiness loop into a busy spin.
        Duration::from_millis(self.poll_interval.max(1))
    }

    pub fn post_cleanup(&self) -> Duration {
        Duration::from_millis(self.post_cleanup)
    }
}

/// Window lookup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Lookup strategies, tried in order; the first non-empty match wins.
    pub strategies: Vec<WindowStrategy>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            strategies: WindowStrategy::defaults(),
        }
    }
}

/// Registry limits and scratch storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Maximum number of live sessions. Each one costs an X server and a
    /// terminal emulator.
    pub max_sessions: usize,
    /// Parent directory for per-session scratch directories. Defaults to the
    /// OS temp dir.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: 32,
            scratch_dir: None,
        }
    }
}

impl Config {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate(path)?;
        Ok(Some(config))
    }

    /// Load from an explicit path, or from the default location, falling back
    /// to built-in defaults when no file exists.
    ///
    /// An explicitly named file that does not exist is an error; a missing
    /// default file is not.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => {
                Self::load(path)?.ok_or_else(|| ConfigError::Missing(path.to_path_buf()))
            }
            None => match default_config_path() {
                Some(path) => Ok(Self::load(&path)?.unwrap_or_default()),
                None => Ok(Self::default()),
            },
        }
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if self.window.strategies.is_empty() {
            return Err(ConfigError::Invalid(
                path.to_path_buf(),
                "window.strategies must not be empty".into(),
            ));
        }
        if self.display.candidates == 0 {
            return Err(ConfigError::Invalid(
                path.to_path_buf(),
                "display.candidates must be at least 1".into(),
            ));
        }
        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                path.to_path_buf(),
                "sessions.max_sessions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// `$XDG_CONFIG_HOME/termctl/config.toml` (or the platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("termctl").join("config.toml"))
}

/// Errors that can occur when loading config.
#[derive(Debug)]
pub enum ConfigError {
    Missing(PathBuf),
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
    Invalid(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(path) => write!(f, "Config file {} does not exist", path.display()),
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::Invalid(path, msg) => {
                write!(f, "Invalid config {}: {}", path.display(), msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
