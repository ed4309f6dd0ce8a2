//! Configuration file support for nwpd
//!
//! Loads and validates nwpd configuration from TOML files.
//! Default location: /etc/xia/nwpd.conf
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-6: Configuration Settings - Validated protocol timers

use crate::error::{NwpdError, Result};
use crate::principal::DEFAULT_PRINCIPALS_FILE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default configuration file location
pub const DEFAULT_CONFIG_FILE: &str = "/etc/xia/nwpd.conf";

/// Complete nwpd configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NwpdConfig {
    /// Hardware interface to listen on
    #[serde(default)]
    pub interface: String,

    /// Minimum log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Principal name map file
    #[serde(default = "default_principals_file")]
    pub principals_file: String,

    /// Period for trying to announce to the network
    #[serde(default = "default_try_announce_period")]
    pub try_announce_period_secs: u64,

    /// Period for pinging one random neighbor
    #[serde(default = "default_monitor_ping_period")]
    pub monitor_ping_period_secs: u64,

    /// Time to wait for an ack before investigating
    #[serde(default = "default_monitor_ack_timeout")]
    pub monitor_ack_timeout_secs: u64,

    /// Time to wait for an investigative ack before removing a neighbor
    #[serde(default = "default_monitor_investigative_ack_timeout")]
    pub monitor_investigative_ack_timeout_secs: u64,

    /// Number of neighbors asked to investigate on an ack timeout
    #[serde(default = "default_monitor_investigative_neigh_count")]
    pub monitor_investigative_neigh_count: usize,

    /// Address for the Prometheus endpoint; disabled when unset
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_principals_file() -> String {
    DEFAULT_PRINCIPALS_FILE.to_string()
}

fn default_try_announce_period() -> u64 {
    2
}

fn default_monitor_ping_period() -> u64 {
    5
}

fn default_monitor_ack_timeout() -> u64 {
    5
}

fn default_monitor_investigative_ack_timeout() -> u64 {
    5
}

fn default_monitor_investigative_neigh_count() -> usize {
    10
}

impl Default for NwpdConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            log_level: default_log_level(),
            principals_file: default_principals_file(),
            try_announce_period_secs: default_try_announce_period(),
            monitor_ping_period_secs: default_monitor_ping_period(),
            monitor_ack_timeout_secs: default_monitor_ack_timeout(),
            monitor_investigative_ack_timeout_secs: default_monitor_investigative_ack_timeout(),
            monitor_investigative_neigh_count: default_monitor_investigative_neigh_count(),
            metrics_listen: None,
        }
    }
}

impl NwpdConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                NwpdError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(NwpdError::Io(e)),
        }
    }

    pub fn try_announce_period(&self) -> Duration {
        Duration::from_secs(self.try_announce_period_secs)
    }

    pub fn monitor_ping_period(&self) -> Duration {
        Duration::from_secs(self.monitor_ping_period_secs)
    }

    pub fn monitor_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor_ack_timeout_secs)
    }

    pub fn monitor_investigative_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor_investigative_ack_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.interface.is_empty() {
            return Err(NwpdError::Config("interface not specified".to_string()));
        }

        let periods = [
            ("try_announce_period_secs", self.try_announce_period_secs),
            ("monitor_ping_period_secs", self.monitor_ping_period_secs),
            ("monitor_ack_timeout_secs", self.monitor_ack_timeout_secs),
            (
                "monitor_investigative_ack_timeout_secs",
                self.monitor_investigative_ack_timeout_secs,
            ),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(NwpdError::Config(format!("{} must be > 0", name)));
            }
        }

        Ok(())
    }
}
