//! Configuration management for TrustPlane.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::service_type::ServiceType;

/// Default key rotation interval: 7 days.
pub const DEFAULT_KEY_UPDATE_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Default transport timeout for peer calls.
pub const DEFAULT_TRANSPORT_TIMEOUT_SECS: u64 = 30;

/// Default lease TTL for critical sections.
pub const DEFAULT_LEASE_TTL_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustplaneConfig {
    pub service: ServiceConfig,
    pub transport: TransportConfig,
    pub lease: LeaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service_type: ServiceType,
    pub url: String,
    #[serde(default = "default_key_update_interval")]
    pub key_update_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    #[serde(default = "default_lease_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_lease_max_wait")]
    pub max_wait_secs: u64,
}

fn default_key_update_interval() -> u64 {
    DEFAULT_KEY_UPDATE_INTERVAL_SECS
}

fn default_transport_timeout() -> u64 {
    DEFAULT_TRANSPORT_TIMEOUT_SECS
}

fn default_lease_ttl() -> u64 {
    DEFAULT_LEASE_TTL_SECS
}

fn default_lease_max_wait() -> u64 {
    30
}

impl TrustplaneConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_config(service_type: ServiceType, url: impl Into<String>) -> Self {
        Self {
            service: ServiceConfig {
                service_type,
                url: url.into(),
                key_update_interval_secs: DEFAULT_KEY_UPDATE_INTERVAL_SECS,
            },
            transport: TransportConfig {
                timeout_secs: DEFAULT_TRANSPORT_TIMEOUT_SECS,
            },
            lease: LeaseConfig {
                ttl_secs: DEFAULT_LEASE_TTL_SECS,
                max_wait_secs: 30,
            },
        }
    }
}
