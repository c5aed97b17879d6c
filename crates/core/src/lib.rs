//! Core functionality for the TrustPlane distributed-trust layer.
//!
//! This crate provides the fundamental types, traits, and utilities used
//! across the TrustPlane ecosystem: the object-store and lease-mutex seams,
//! the process-wide context that replaces implicit global state, service
//! typing and canonical URL derivation, configuration, and logging.

pub mod config;
pub mod context;
pub mod error;
pub mod lease;
pub mod logging;
pub mod service_type;
pub mod store;
pub mod time;

pub use config::{LeaseConfig, ServiceConfig, TransportConfig, TrustplaneConfig};
pub use context::ProcessContext;
pub use error::{LeaseError, StoreError};
pub use lease::{LeaseGuard, LeaseProvider, MemoryLeases};
pub use service_type::{canonical_service_url, ServiceType};
pub use store::{MemoryStore, ObjectStore};
pub use time::{now_secs, synctime};
