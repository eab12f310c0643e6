//! Simulated transport.
//!
//! Stands in for hardware when a connection is simulated or when the real
//! transport could not be opened and auto-simulation is enabled. Nothing is
//! transmitted: writes are recorded, queries are recorded and answered.
//!
//! Answers, in order of preference:
//! - a response registered with [`SimulatedTransport::with_response`]
//! - `1` for `*OPC?` and `0` for `*STB?`
//! - the simulated identity for `*IDN?`-style queries, if one was set
//! - a random reading in `[0, 1)`

use super::Transport;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::trace;

/// Direction of a recorded exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Fire-and-forget command
    Write,
    /// Command followed by a read
    Query,
}

/// One recorded command exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    /// When the exchange happened
    pub timestamp: DateTime<Utc>,
    /// Write or query
    pub kind: ExchangeKind,
    /// Command text without terminator
    pub command: String,
    /// Response for queries
    pub response: Option<String>,
}

/// Shared, append-only record of exchanges.
///
/// Cloning yields another handle to the same record, so a test can keep one
/// while the connection owns the transport.
#[derive(Debug, Clone, Default)]
pub struct TransportLog {
    entries: Arc<Mutex<Vec<Exchange>>>,
}

impl TransportLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Exchange>> {
        // Poison is ignored: entries are only ever pushed whole.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an exchange.
    pub fn record(&self, kind: ExchangeKind, command: &str, response: Option<&str>) {
        self.lock().push(Exchange {
            timestamp: Utc::now(),
            kind,
            command: command.to_string(),
            response: response.map(str::to_string),
        });
    }

    /// Snapshot of every exchange so far.
    pub fn entries(&self) -> Vec<Exchange> {
        self.lock().clone()
    }

    /// Commands sent as writes, in order.
    pub fn writes(&self) -> Vec<String> {
        self.commands_of(ExchangeKind::Write)
    }

    /// Commands sent as queries, in order.
    pub fn queries(&self) -> Vec<String> {
        self.commands_of(ExchangeKind::Query)
    }

    fn commands_of(&self, kind: ExchangeKind) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.command.clone())
            .collect()
    }

    /// Number of recorded exchanges.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every recorded exchange.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Transport that never touches hardware.
pub struct SimulatedTransport {
    address: String,
    identity: Option<String>,
    responses: HashMap<String, String>,
    log: TransportLog,
    timeout: Duration,
    closed: bool,
}

impl SimulatedTransport {
    /// Create a simulated link for `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            identity: None,
            responses: HashMap::new(),
            log: TransportLog::new(),
            timeout: Duration::from_secs(5),
            closed: false,
        }
    }

    /// Answer identification queries with `identity`.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Answer the exact query `command` with `response`.
    pub fn with_response(mut self, command: &str, response: &str) -> Self {
        self.responses
            .insert(command.trim().to_string(), response.to_string());
        self
    }

    fn answer(&self, command: &str) -> String {
        let key = command.trim();
        if let Some(response) = self.responses.get(key) {
            return response.clone();
        }
        match key.to_uppercase().as_str() {
            "*OPC?" => "1".to_string(),
            "*STB?" => "0".to_string(),
            upper if upper.starts_with("*IDN?") || upper.starts_with("ID?") => self
                .identity
                .clone()
                .unwrap_or_else(random_reading),
            _ => random_reading(),
        }
    }
}

fn random_reading() -> String {
    let value: f64 = rand::thread_rng().gen_range(0.0..1.0);
    format!("{:.6}", value)
}

impl Transport for SimulatedTransport {
    fn write(&mut self, command: &str) -> Result<()> {
        if self.closed {
            return Err(anyhow!("simulated link to '{}' is closed", self.address));
        }
        trace!(address = %self.address, command, "simulated write");
        self.log.record(ExchangeKind::Write, command, None);
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String> {
        if self.closed {
            return Err(anyhow!("simulated link to '{}' is closed", self.address));
        }
        let response = self.answer(command);
        trace!(address = %self.address, command, response = %response, "simulated query");
        self.log
            .record(ExchangeKind::Query, command, Some(response.as_str()));
        Ok(response)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn log(&self) -> Option<TransportLog> {
        Some(self.log.clone())
    }

    fn adapter_type(&self) -> &str {
        "simulated"
    }

    fn info(&self) -> String {
        format!("SimulatedTransport({})", self.address)
    }
}
