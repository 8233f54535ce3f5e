//! Maildrop Common - Shared types and utilities
//!
//! Configuration, the error type and identifier aliases shared by the
//! store, the protocol engine and the server binary.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
