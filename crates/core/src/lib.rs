//! Core domain types for larder.
//!
//! This crate defines the pieces shared by every backend:
//! - Store configuration (backend, lease lock, deadlines)
//! - Key validation and prefix listing rules
//! - Key metadata projected from stored records

pub mod config;
pub mod error;
pub mod key;
pub mod key_info;

pub use config::{BackendConfig, ClockSource, LockConfig, PgSslMode, StoreConfig};
pub use error::{Error, Result};
pub use key::{SEPARATOR, is_listed, validate_key};
pub use key_info::KeyInfo;
