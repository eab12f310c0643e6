//! Transport adapter implementations
//!
//! This module contains the [`Transport`] trait and its implementations,
//! providing low-level, blocking I/O for different backends. A [`TransportOpener`]
//! turns a resolved address string into a live transport and also answers
//! resource enumeration, which is a pass-through to the backend library.
//!
//! Adapters report failures with `anyhow`; the connection layer maps them onto
//! [`crate::error::InstrumentError`].

pub mod mock;
pub mod simulated;
pub mod visa_adapter;

pub use mock::{MockOpener, MockTransport};
pub use simulated::{Exchange, ExchangeKind, SimulatedTransport, TransportLog};
pub use visa_adapter::{VisaAdapter, VisaOpener};

use anyhow::Result;
use std::time::Duration;

/// A blocking, message-based link to one instrument.
///
/// Implementations own the underlying session exclusively. Callers serialize
/// access through `&mut self`; there is no internal locking.
pub trait Transport: Send {
    /// Send a command without reading a response.
    fn write(&mut self, command: &str) -> Result<()>;

    /// Send a command and read one response line.
    fn query(&mut self, command: &str) -> Result<String>;

    /// Current read/write timeout.
    fn timeout(&self) -> Duration;

    /// Change the read/write timeout for subsequent operations.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Release the session. Must be idempotent.
    fn close(&mut self) -> Result<()>;

    /// True when nothing reaches real hardware.
    fn is_simulated(&self) -> bool {
        false
    }

    /// Exchange log, for transports that keep one.
    fn log(&self) -> Option<TransportLog> {
        None
    }

    /// Short backend name ("visa", "simulated", "mock").
    fn adapter_type(&self) -> &str;

    /// Human readable description for log lines.
    fn info(&self) -> String;
}

/// Opens transports for resolved address strings.
pub trait TransportOpener: Send + Sync {
    /// Open a session against `address` using `timeout` for I/O.
    fn open(&self, address: &str, timeout: Duration) -> Result<Box<dyn Transport>>;

    /// Resource descriptors the backend can currently see.
    fn list_resources(&self) -> Result<Vec<String>>;
}

/// The opener used by the setup entry points when none is injected.
///
/// This is the VISA opener when built with `instrument_visa`; otherwise every
/// open fails with a message naming the missing feature.
pub fn default_opener() -> Box<dyn TransportOpener> {
    Box::new(VisaOpener::new())
}
