//! Integration tests for TrustPlane
//!
//! This test suite validates:
//! - Bootstrap of a registry node and joining services through it
//! - Trust-on-first-use peer fetch, then encrypted and signed calls
//! - Key rotation with uninterrupted service for stale callers
//! - Typed fault transport across service boundaries
//! - Lease-serialized admin registration under contention

pub mod test_utils;

#[cfg(test)]
mod federation_tests;

#[cfg(test)]
mod rotation_tests;

#[cfg(test)]
mod concurrency_tests;
