use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use crate::models::LocalZone;
use crate::services::definitions_service::DefinitionSources;
use crate::services::{SyncTimings, SyncVariant};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Protocol every simulated peer runs
    #[serde(default)]
    pub sync_variant: SyncVariant,

    #[serde(default = "default_handoff_delay_ms")]
    pub handoff_delay_ms: u64,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_fill_interval_ms")]
    pub fill_interval_ms: u64,

    #[serde(default = "default_stagger_quantum_ms")]
    pub stagger_quantum_ms: u64,

    #[serde(default = "default_leave_coalesce_ms")]
    pub leave_coalesce_ms: u64,

    /// Timezone definitions file, replaces the embedded set
    pub tz_definitions_path: Option<String>,

    /// Timezone definitions URL, replaces file and embedded sets
    pub tz_definitions_url: Option<String>,

    /// Local timezone id, detected from the system clock when unset
    pub local_timezone: Option<String>,

    /// Correction applied to the local clock before rendering
    #[serde(default)]
    pub network_time_offset_ms: i64,

    /// Simulated peers as `Name=TimezoneId=OffsetMinutes`, comma separated
    #[serde(default = "default_sim_peers")]
    pub sim_peers: String,

    #[serde(default)]
    pub sim_publish_failures: u32,

    #[serde(default = "default_sim_duration_secs")]
    pub sim_duration_secs: u64,

    /// Peer that leaves half-way through the run
    pub sim_leave: Option<String>,
}

/// One peer to start in the simulated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimPeer {
    pub name: String,
    pub zone: LocalZone,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    pub fn timings(&self) -> SyncTimings {
        SyncTimings {
            handoff_delay: Duration::from_millis(self.handoff_delay_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            fill_interval: Duration::from_millis(self.fill_interval_ms),
            stagger_quantum: Duration::from_millis(self.stagger_quantum_ms),
            leave_coalesce: Duration::from_millis(self.leave_coalesce_ms),
        }
    }

    pub fn definition_sources(&self) -> DefinitionSources {
        DefinitionSources {
            path: self.tz_definitions_path.as_ref().map(PathBuf::from),
            url: self.tz_definitions_url.clone(),
        }
    }

    pub fn network_offset(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.network_time_offset_ms)
    }

    /// Parse `sim_peers`. A peer without a zone gets the detected local zone.
    pub fn sim_peers(&self) -> Result<Vec<SimPeer>, ConfigError> {
        self.sim_peers
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| self.parse_sim_peer(entry))
            .collect()
    }

    fn parse_sim_peer(&self, entry: &str) -> Result<SimPeer, ConfigError> {
        let mut parts = entry.splitn(3, '=');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(ConfigError::InvalidPeer(entry.to_string()));
        }
        let zone = match (parts.next(), parts.next()) {
            (None, _) => LocalZone::detect(self.local_timezone.as_deref()),
            (Some(id), offset) => {
                let offset_minutes = match offset {
                    Some(offset) => offset
                        .trim()
                        .parse::<i32>()
                        .map_err(|_| ConfigError::InvalidPeer(entry.to_string()))?,
                    None => 0,
                };
                LocalZone::new(id.trim(), offset_minutes)
            }
        };
        Ok(SimPeer {
            name: name.to_string(),
            zone,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            sync_variant: SyncVariant::default(),
            handoff_delay_ms: default_handoff_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            fill_interval_ms: default_fill_interval_ms(),
            stagger_quantum_ms: default_stagger_quantum_ms(),
            leave_coalesce_ms: default_leave_coalesce_ms(),
            tz_definitions_path: None,
            tz_definitions_url: None,
            local_timezone: None,
            network_time_offset_ms: 0,
            sim_peers: default_sim_peers(),
            sim_publish_failures: 0,
            sim_duration_secs: default_sim_duration_secs(),
            sim_leave: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
    InvalidPeer(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
            ConfigError::InvalidPeer(entry) => write!(f, "Invalid simulated peer: {}", entry),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_environment() -> String {
    "development".to_string()
}

fn default_handoff_delay_ms() -> u64 {
    1000
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_fill_interval_ms() -> u64 {
    1000
}

fn default_stagger_quantum_ms() -> u64 {
    100
}

fn default_leave_coalesce_ms() -> u64 {
    500
}

fn default_sim_peers() -> String {
    "Alice=Asia/Taipei=480,Bob=Europe/Paris=60,Carol=Asia/Taipei=480".to_string()
}

fn default_sim_duration_secs() -> u64 {
    10
}
