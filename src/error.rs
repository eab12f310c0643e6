//! Custom error types for the library.
//!
//! This module defines the primary error type, `InstrumentError`, used by every
//! layer between a resource string and a category facade. Using the `thiserror`
//! crate, it provides one place that names every failure a setup call or an
//! instrument operation can report.
//!
//! ## Error Hierarchy
//!
//! - **Connection lifecycle**: `UnsupportedConnectionType`, `ConnectionRefused`,
//!   `IdentificationFailed`, `NotConnected`, `NotIdentified`. These are terminal
//!   for the connection that raised them; a fresh connection is required to retry.
//! - **Resolution**: `UnknownDevice` is the single error reported for hardware with
//!   no registered driver. `DuplicateRegistration` guards the registry.
//! - **Call site**: `InvalidChannel`, `InvalidArgument`, `OperationTimeout`,
//!   `MalformedResponse`, `Communication`. Raised immediately, never swallowed.
//! - **Missing capability**: `NotImplemented` is the soft variant reported for
//!   telemetry, `CriticalNotImplemented` the hard one for control. See
//!   [`InstrumentError::is_critical`].
//! - **Configuration**: `Config` wraps figment loading errors, `Configuration`
//!   covers semantic problems such as a mismatched registration.

use crate::config::ConfigError;
use crate::instrument::{Channel, DeviceType};
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, InstrumentError>;

#[derive(Error, Debug)]
pub enum InstrumentError {
    #[error("Unsupported connection type: {0}")]
    UnsupportedConnectionType(String),

    #[error("Connection refused for '{resource}': {reason}")]
    ConnectionRefused { resource: String, reason: String },

    #[error("Failed to identify device at '{resource}': {reason}")]
    IdentificationFailed { resource: String, reason: String },

    #[error("Connection is not ready (state: {0})")]
    NotConnected(String),

    #[error("Device has not been identified yet")]
    NotIdentified,

    #[error("No {device_type} driver registered for {manufacturer} {model}")]
    UnknownDevice {
        device_type: DeviceType,
        manufacturer: String,
        model: String,
    },

    #[error("Channel {channel} does not exist on {model}")]
    InvalidChannel { channel: Channel, model: String },

    #[error("Operation '{operation}' timed out after {timeout:?}")]
    OperationTimeout { operation: String, timeout: Duration },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Malformed response '{response}': {reason}")]
    MalformedResponse { response: String, reason: String },

    #[error("'{operation}' is not implemented for {device}")]
    NotImplemented { operation: String, device: String },

    #[error("Critical method '{operation}' is not implemented for {device}")]
    CriticalNotImplemented { operation: String, device: String },

    #[error("Driver already registered for {device_type} {manufacturer} {model}")]
    DuplicateRegistration {
        device_type: DeviceType,
        manufacturer: String,
        model: String,
    },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl InstrumentError {
    /// True for failures that must stop a script, false for soft ones.
    ///
    /// Only [`InstrumentError::NotImplemented`] is soft: a driver that cannot
    /// report telemetry degrades gracefully, everything else is a real failure.
    pub fn is_critical(&self) -> bool {
        !matches!(self, InstrumentError::NotImplemented { .. })
    }

    pub(crate) fn malformed(response: &str, reason: impl Into<String>) -> Self {
        InstrumentError::MalformedResponse {
            response: response.to_string(),
            reason: reason.into(),
        }
    }
}
