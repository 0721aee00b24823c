//! Types and utilities shared by the node core crates.

// Deny suspicious match names that are probably non-existent variants.
#![deny(non_snake_case)]

/// API-facing types: the node error taxonomy.
pub mod api;
/// Exponential backoff.
pub mod backoff;
/// Lightning domain primitives.
pub mod ln;
/// serde helpers.
pub mod serde_helpers;
/// SHA-256 hashing via `ring`.
pub mod sha256;
/// A named, `#[must_use]` wrapper around tokio tasks.
pub mod task;
/// Millisecond timestamps.
pub mod time;

/// Utilities for use in tests and property tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
