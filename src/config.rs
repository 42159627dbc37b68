//! Run configuration.
//!
//! Layering, lowest first: built-in defaults, a JSON config file, environment
//! variables (after `.env` is loaded), command-line flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::locator::LocatorProfile;
use crate::types::{DEFAULT_BATCH_SIZE, ERROR_MESSAGE_MAX_CHARS, SUMMARY_MESSAGE_MAX_CHARS};

pub const LOCAL_CONFIG_FILE: &str = "toggle-sweep.json";
pub const ENV_BATCH_SIZE: &str = "TOGGLE_SWEEP_BATCH_SIZE";
pub const ENV_HEADLESS: &str = "TOGGLE_SWEEP_HEADLESS";
pub const ENV_CHROME: &str = "TOGGLE_SWEEP_CHROME";
pub const ENV_ATTACH: &str = "TOGGLE_SWEEP_ATTACH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("batch size must be at least 1")]
    ZeroBatchSize,
}

/// Every wait and settle window, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub navigation_timeout_ms: u64,
    pub network_idle_timeout_ms: u64,
    pub settle_ms: u64,
    pub toggle_wait_ms: u64,
    pub toggle_click_settle_ms: u64,
    pub save_idle_timeout_ms: u64,
    pub save_settle_ms: u64,
    pub focus_settle_ms: u64,
    pub batch_idle_timeout_ms: u64,
    pub login_pre_settle_ms: u64,
    pub login_idle_timeout_ms: u64,
    pub login_post_settle_ms: u64,
    pub overlay_click_settle_ms: u64,
    pub escape_settle_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 120_000,
            network_idle_timeout_ms: 30_000,
            settle_ms: 3_000,
            toggle_wait_ms: 20_000,
            toggle_click_settle_ms: 500,
            save_idle_timeout_ms: 10_000,
            save_settle_ms: 3_000,
            focus_settle_ms: 500,
            batch_idle_timeout_ms: 30_000,
            login_pre_settle_ms: 3_000,
            login_idle_timeout_ms: 30_000,
            login_post_settle_ms: 2_000,
            overlay_click_settle_ms: 500,
            escape_settle_ms: 300,
            poll_interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Chrome/Chromium executable; autodetected when unset.
    pub chrome_path: Option<PathBuf>,
    /// DevTools endpoint of an already running browser to attach to.
    pub attach_url: Option<String>,
    /// The driver kills a browser that sends no events for this long.
    pub idle_browser_timeout_ms: u64,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            attach_url: None,
            idle_browser_timeout_ms: 600_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub batch_size: usize,
    pub message_max_chars: usize,
    pub summary_message_max_chars: usize,
    pub timing: Timing,
    pub browser: BrowserOptions,
    pub locator: LocatorProfile,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            message_max_chars: ERROR_MESSAGE_MAX_CHARS,
            summary_message_max_chars: SUMMARY_MESSAGE_MAX_CHARS,
            timing: Timing::default(),
            browser: BrowserOptions::default(),
            locator: LocatorProfile::default(),
        }
    }
}

impl RunConfig {
    /// Reads the config file if one is found, defaults otherwise.
    ///
    /// An explicit path must exist. Without one, `./toggle-sweep.json` and then
    /// `<config dir>/toggle-sweep/config.json` are tried.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => discover_config_file(),
        };

        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: RunConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Applies `TOGGLE_SWEEP_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            self.batch_size = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_BATCH_SIZE.to_string(),
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup(ENV_HEADLESS) {
            self.browser.headless = parse_flag(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: ENV_HEADLESS.to_string(),
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup(ENV_CHROME).filter(|v| !v.trim().is_empty()) {
            self.browser.chrome_path = Some(PathBuf::from(raw.trim()));
        }
        if let Some(raw) = lookup(ENV_ATTACH).filter(|v| !v.trim().is_empty()) {
            self.browser.attach_url = Some(raw.trim().to_string());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(())
    }
}

fn discover_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    let user = dirs::config_dir()?.join("toggle-sweep").join("config.json");
    user.exists().then_some(user)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
