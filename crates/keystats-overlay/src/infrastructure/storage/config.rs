//! TOML-based configuration for the overlay.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\KeyStats\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/keystats/config.toml` or `~/.config/keystats/config.toml`
//! - macOS:    `~/Library/Application Support/KeyStats/config.toml`
//!
//! Example:
//!
//! ```toml
//! [server]
//! port = 9876
//! bind_address = "0.0.0.0"
//!
//! [display]
//! key_active_color = "#0096FF"
//! ```
//!
//! Every field and every section has a serde default, so a partial file (or
//! an empty one) is valid.  On first run the defaults are written out so the
//! user has a file to edit.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use keystats_core::{DisplayMetrics, StatsConfig};

use crate::infrastructure::http::page::PageStyle;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stats: StatsSection,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Layout name, resolved to `layouts/<name>.json`.
    #[serde(default = "default_layout")]
    pub layout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// `"0.0.0.0"` serves the LAN; `"127.0.0.1"` keeps the feed local.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Event-stream push cadence.
    #[serde(default = "default_push_interval_ms")]
    pub push_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsSection {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_smoothing_alpha")]
    pub smoothing_alpha: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    #[serde(default = "default_unit")]
    pub unit_width: u32,
    #[serde(default = "default_unit")]
    pub unit_height: u32,
    #[serde(default = "default_key_spacing")]
    pub key_spacing: u32,
    #[serde(default = "default_background_color")]
    pub background_color: String,
    #[serde(default = "default_key_color")]
    pub key_color: String,
    #[serde(default = "default_key_active_color")]
    pub key_active_color: String,
    #[serde(default = "default_font_family")]
    pub font_family: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    #[serde(default = "default_true")]
    pub keyboard: bool,
    #[serde(default = "default_true")]
    pub mouse: bool,
    /// Capacity of the hook → engine queue.  Edges beyond it are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_layout() -> String {
    "104keys".to_string()
}
fn default_port() -> u16 {
    9876
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_push_interval_ms() -> u64 {
    16
}
fn default_tick_interval_ms() -> u64 {
    100
}
fn default_window_ms() -> u64 {
    100
}
fn default_smoothing_alpha() -> f64 {
    0.5
}
fn default_unit() -> u32 {
    40
}
fn default_key_spacing() -> u32 {
    4
}
fn default_background_color() -> String {
    "#282828".to_string()
}
fn default_key_color() -> String {
    "#444444".to_string()
}
fn default_key_active_color() -> String {
    "#0096FF".to_string()
}
fn default_font_family() -> String {
    "monospace".to_string()
}
fn default_true() -> bool {
    true
}
fn default_queue_capacity() -> usize {
    1024
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            layout: default_layout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            push_interval_ms: default_push_interval_ms(),
        }
    }
}

impl Default for StatsSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            window_ms: default_window_ms(),
            smoothing_alpha: default_smoothing_alpha(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            unit_width: default_unit(),
            unit_height: default_unit(),
            key_spacing: default_key_spacing(),
            background_color: default_background_color(),
            key_color: default_key_color(),
            key_active_color: default_key_active_color(),
            font_family: default_font_family(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            keyboard: default_true(),
            mouse: default_true(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

// ── Derived settings ──────────────────────────────────────────────────────────

impl AppConfig {
    /// Rejects values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let alpha = self.stats.smoothing_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "stats.smoothing_alpha must be in (0, 1], got {alpha}"
            )));
        }
        for (name, value) in [
            ("server.push_interval_ms", self.server.push_interval_ms),
            ("stats.tick_interval_ms", self.stats.tick_interval_ms),
            ("stats.window_ms", self.stats.window_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }
        if self.capture.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "capture.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.display.unit_width == 0 || self.display.unit_height == 0 {
            return Err(ConfigError::Invalid(
                "display unit sizes must be greater than 0".to_string(),
            ));
        }
        self.bind_addr().map(|_| ())
    }

    /// Socket address the HTTP server binds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `bind_address` is not an IP.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.server.bind_address.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "server.bind_address '{}' is not an IP address",
                self.server.bind_address
            ))
        })?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    pub fn stats_config(&self) -> StatsConfig {
        StatsConfig {
            window: Duration::from_millis(self.stats.window_ms),
            smoothing_alpha: self.stats.smoothing_alpha,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.stats.tick_interval_ms)
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.server.push_interval_ms)
    }

    pub fn display_metrics(&self) -> DisplayMetrics {
        DisplayMetrics {
            unit_width: self.display.unit_width,
            unit_height: self.display.unit_height,
            key_spacing: self.display.key_spacing,
        }
    }

    pub fn page_style(&self) -> PageStyle {
        PageStyle {
            background_color: self.display.background_color.clone(),
            key_color: self.display.key_color.clone(),
            key_active_color: self.display.key_active_color.clone(),
            font_family: self.display.font_family.clone(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for any file-system error (including "not
/// found") and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Loads `path`, or writes and returns the defaults if it does not exist.
///
/// Failure to write the default file is logged, not returned: the overlay
/// can run without a config file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_or_init(path: &Path) -> Result<AppConfig, ConfigError> {
    match load_config_from(path) {
        Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            let cfg = AppConfig::default();
            match save_config_to(path, &cfg) {
                Ok(()) => info!("wrote default config to {}", path.display()),
                Err(e) => warn!("could not write default config: {e}"),
            }
            Ok(cfg)
        }
        other => other,
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
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

/// Resolves the platform config directory including the `KeyStats` leaf.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("KeyStats"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("keystats"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("KeyStats")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
