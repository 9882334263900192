//! Common utilities and shared functionality
//!
//! Types and interfaces shared across the seed registry, ledger, lobby and
//! verification components.

pub mod types;
pub mod config;
pub mod traits;
