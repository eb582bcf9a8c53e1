//! Launcher configuration.
//!
//! Settings are layered: built-in defaults, then the JSON config file, then
//! command-line flags and environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::notify::DEFAULT_NOTIFICATION_TTL;
use crate::poller::DEFAULT_POLL_INTERVAL;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Base URL of the launcher backend.
    pub api_url: String,
    pub poll_interval: Duration,
    pub notification_ttl: Duration,
    /// Per-request timeout; requests wait indefinitely when unset.
    pub request_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            notification_ttl: DEFAULT_NOTIFICATION_TTL,
            request_timeout: None,
        }
    }
}

/// Shape of `config.json`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    api_url: Option<String>,
    poll_interval_secs: Option<u64>,
    notification_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// Values given on the command line or through the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

impl Settings {
    /// `<config dir>/ec2-launcher/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ec2-launcher").join("config.json"))
    }

    /// Load settings from `path` (or the default location) and apply overrides.
    ///
    /// An explicit path must exist; the default one may be absent.
    pub fn load(path: Option<&str>, overrides: Overrides) -> Result<Self> {
        let file = match path {
            Some(path) => {
                let expanded = PathBuf::from(shellexpand::tilde(path).into_owned());
                Some(read_file(&expanded)?)
            }
            None => match Self::default_path() {
                Some(default) if default.exists() => Some(read_file(&default)?),
                _ => None,
            },
        };

        let mut settings = Self::default();
        if let Some(file) = file {
            settings.merge(file);
        }
        settings.apply(overrides);
        settings.validate()?;
        Ok(settings)
    }

    fn merge(&mut self, file: FileSettings) {
        if let Some(url) = file.api_url {
            self.api_url = url;
        }
        if let Some(secs) = file.poll_interval_secs {
            self.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.notification_secs {
            self.notification_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Some(Duration::from_secs(secs));
        }
    }

    fn apply(&mut self, overrides: Overrides) {
        if let Some(url) = overrides.api_url {
            self.api_url = url;
        }
        if let Some(secs) = overrides.poll_interval_secs {
            self.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = overrides.request_timeout_secs {
            self.request_timeout = Some(Duration::from_secs(secs));
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.api_url.trim().is_empty(), "api_url cannot be empty");
        anyhow::ensure!(
            self.api_url.starts_with("http://") || self.api_url.starts_with("https://"),
            "api_url must start with http:// or https://, got: {}",
            self.api_url
        );
        anyhow::ensure!(
            !self.poll_interval.is_zero(),
            "poll interval must be at least 1 second"
        );
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<FileSettings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}
