//! Service typing and canonical URL derivation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The role a service plays in the federation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Identity,
    Access,
    Compute,
    Storage,
    Accounting,
    Registry,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Identity => "identity",
            ServiceType::Access => "access",
            ServiceType::Compute => "compute",
            ServiceType::Storage => "storage",
            ServiceType::Accounting => "accounting",
            ServiceType::Registry => "registry",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" => Ok(ServiceType::Identity),
            "access" => Ok(ServiceType::Access),
            "compute" => Ok(ServiceType::Compute),
            "storage" => Ok(ServiceType::Storage),
            "accounting" => Ok(ServiceType::Accounting),
            "registry" => Ok(ServiceType::Registry),
            other => Err(format!("Unknown service type '{other}'")),
        }
    }
}

/// Derive the canonical URL for a service from a raw URL.
///
/// The derivation is deterministic: surrounding whitespace and trailing
/// slashes are stripped, and when a service type is given it is appended as
/// a single path segment. Two callers supplying equivalent inputs always
/// agree on the canonical form, which is what identity records and envelope
/// routing key on.
pub fn canonical_service_url(raw: &str, service_type: Option<ServiceType>) -> String {
    let base = raw.trim().trim_end_matches('/');
    match service_type {
        Some(st) => format!("{base}/{st}"),
        None => base.to_string(),
    }
}
