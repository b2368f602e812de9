//! Base types and error handling.
//!
//! Foundational types shared by every layer:
//! - [`NetError`]: flat network error codes with diagnostic numbers
//! - [`ConnectionSettings`]: the full configuration surface
//!
//! [`NetError`]: neterror::NetError
//! [`ConnectionSettings`]: config::ConnectionSettings

pub mod config;
pub mod neterror;
