// WireGuard Monitor - Configuration Module
// Paths of the external interfaces and the probe/retry timing knobs

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Monitor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// File mapping interface names to probe addresses and aliases,
    /// one `<name> <address> <alias words...>` entry per line
    #[serde(default = "default_ping_address_file")]
    pub ping_address_file: PathBuf,

    /// Privileged helper invoked as `sudo <helper> start|stop <interface>`
    #[serde(default = "default_helper_path")]
    pub helper_path: PathBuf,

    /// Echo requests sent per probe
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,

    /// Hard deadline for one whole probe, in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// How long to wait for a fresh link to receive its IP configuration
    /// before declaring it unusable, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Pause between probe cycles, in seconds
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

fn default_ping_address_file() -> PathBuf {
    PathBuf::from("/etc/wireguard-ping-address")
}

fn default_helper_path() -> PathBuf {
    PathBuf::from("/etc/manage-wg.sh")
}

fn default_probe_attempts() -> u32 {
    3
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_settle_delay_ms() -> u64 {
    100
}

fn default_retry_interval_secs() -> u64 {
    10
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ping_address_file: default_ping_address_file(),
            helper_path: default_helper_path(),
            probe_attempts: default_probe_attempts(),
            probe_timeout_secs: default_probe_timeout_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

impl MonitorConfig {
    /// Validate the monitor configuration
    pub fn validate(&self) -> Result<()> {
        if self.probe_attempts == 0 {
            return Err(Error::Config(
                "probe_attempts must be at least 1".to_string(),
            ));
        }
        if self.probe_timeout_secs == 0 {
            return Err(Error::Config(
                "probe_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.retry_interval_secs == 0 {
            return Err(Error::Config(
                "retry_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Load the configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load the configuration from a specific file, writing defaults there
    /// when the file does not exist yet
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No monitor configuration found, using defaults");
            info!("Configuration will be saved to: {}", path.display());
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        info!("Loaded monitor configuration from: {}", path.display());
        Ok(config)
    }

    /// Save the configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;

        // Keep the config private to the owning user (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        info!("Saved monitor configuration to: {}", path.display());
        Ok(())
    }

    /// Get the path to the monitor configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
        Ok(config_dir.join("wgmon").join("config.toml"))
    }
}
