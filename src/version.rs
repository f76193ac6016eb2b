//! Karst compiler version information.
//!
//! The version is taken from Cargo metadata (`CARGO_PKG_VERSION`) at
//! compile time; prefer this constant over repeating the `env!` lookup.

/// The Karst compiler version string (for example, `0.1.0`).
pub const KARST_VERSION: &str = env!("CARGO_PKG_VERSION");
