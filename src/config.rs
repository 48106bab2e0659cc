//! Driver configuration.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Number of focuser channels the device family supports.
pub const MAX_CHANNELS: u8 = 2;

/// Connection and capability configuration.
///
/// The channel count is a configuration-time capability; sensor presence
/// is not configured because the device reports it in every status
/// snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Serial port path (e.g. `/dev/ttyUSB0`).
    pub port: String,

    /// Baud rate.
    #[serde(default = "default_baud")]
    pub baud: u32,

    /// Transport timeout per exchange [ms].
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Poll loop period [ms].
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of focuser channels (1 or 2).
    #[serde(default = "default_channels")]
    pub channels: u8,
}

fn default_baud() -> u32 {
    38_400
}

fn default_timeout_ms() -> u64 {
    3_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_channels() -> u8 {
    1
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0")
    }
}

impl DeviceConfig {
    /// Config for `port` with all defaults.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud: default_baud(),
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            channels: default_channels(),
        }
    }

    /// Parse and validate a TOML config string.
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw).context("invalid device config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    /// Check semantic constraints that parsing cannot.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            bail!(
                "channels must be 1..={MAX_CHANNELS}, got {}",
                self.channels
            );
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be non-zero");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be non-zero");
        }
        Ok(())
    }

    /// Transport timeout per exchange.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Poll loop period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
