//! Scripted transport for tests.
//!
//! `MockTransport` answers the queries it was scripted with, plus `*OPC?` (`1`)
//! and `*STB?` (`0`) like an idle instrument. Anything else behaves like a
//! silent instrument and fails the way a read timeout would.
//! `MockOpener` hands out a prepared transport, or refuses every open.

use super::{Transport, TransportLog};
use crate::adapters::ExchangeKind;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Transport with canned responses and an exchange log.
pub struct MockTransport {
    responses: HashMap<String, String>,
    log: TransportLog,
    timeout: Duration,
    refuse_timeouts: bool,
    closed: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a transport that answers nothing.
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            log: TransportLog::new(),
            timeout: Duration::from_secs(1),
            refuse_timeouts: false,
            closed: false,
        }
    }

    /// Answer the exact query `command` with `response`.
    pub fn with_response(mut self, command: &str, response: &str) -> Self {
        self.responses
            .insert(command.trim().to_string(), response.to_string());
        self
    }

    /// Fail every `set_timeout` call, like a driver rejecting the attribute.
    pub fn refusing_timeouts(mut self) -> Self {
        self.refuse_timeouts = true;
        self
    }

    /// Handle to the exchange log.
    pub fn exchange_log(&self) -> TransportLog {
        self.log.clone()
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Transport for MockTransport {
    fn write(&mut self, command: &str) -> Result<()> {
        if self.closed {
            return Err(anyhow!("mock transport closed"));
        }
        self.log.record(ExchangeKind::Write, command, None);
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String> {
        if self.closed {
            return Err(anyhow!("mock transport closed"));
        }
        let key = command.trim();
        let scripted = self.responses.get(key).cloned().or_else(|| match key {
            "*OPC?" => Some("1".to_string()),
            "*STB?" => Some("0".to_string()),
            _ => None,
        });
        match scripted {
            Some(response) => {
                self.log
                    .record(ExchangeKind::Query, command, Some(response.as_str()));
                Ok(response)
            }
            None => {
                self.log.record(ExchangeKind::Query, command, None);
                Err(anyhow!(
                    "timeout after {}ms waiting for response to '{}'",
                    self.timeout.as_millis(),
                    command
                ))
            }
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if self.refuse_timeouts {
            return Err(anyhow!("timeout of {}ms rejected", timeout.as_millis()));
        }
        self.timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn log(&self) -> Option<TransportLog> {
        Some(self.log.clone())
    }

    fn adapter_type(&self) -> &str {
        "mock"
    }

    fn info(&self) -> String {
        format!("MockTransport({} scripted responses)", self.responses.len())
    }
}

/// Opener that yields one prepared [`MockTransport`].
pub struct MockOpener {
    transport: Mutex<Option<MockTransport>>,
    resources: Vec<String>,
    opens: AtomicUsize,
}

impl MockOpener {
    /// Hand out `transport` on the first open; later opens fail.
    pub fn once(transport: MockTransport) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
            resources: Vec::new(),
            opens: AtomicUsize::new(0),
        }
    }

    /// Refuse every open, like an unreachable instrument.
    pub fn refusing() -> Self {
        Self {
            transport: Mutex::new(None),
            resources: Vec::new(),
            opens: AtomicUsize::new(0),
        }
    }

    /// Report `resources` from `list_resources`.
    pub fn with_resources(mut self, resources: &[&str]) -> Self {
        self.resources = resources.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Number of open attempts seen.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl super::TransportOpener for MockOpener {
    fn open(&self, address: &str, timeout: Duration) -> Result<Box<dyn Transport>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let taken = self
            .transport
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match taken {
            Some(mut transport) => {
                transport.timeout = timeout;
                Ok(Box::new(transport))
            }
            None => Err(anyhow!("resource '{}' is unreachable", address)),
        }
    }

    fn list_resources(&self) -> Result<Vec<String>> {
        Ok(self.resources.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::TransportOpener;

    #[test]
    fn test_unscripted_query_times_out() {
        let mut transport = MockTransport::new().with_response("*IDN?", "B&K,9141,1,2");
        assert_eq!(transport.query("*IDN?").unwrap(), "B&K,9141,1,2");
        assert!(transport.query("ID?").is_err());
        assert_eq!(transport.query("*OPC?").unwrap(), "1");
        assert_eq!(transport.exchange_log().queries().len(), 3);
    }

    #[test]
    fn test_opener_hands_out_once() {
        let opener = MockOpener::once(MockTransport::new());
        assert!(opener.open("GPIB0::5::INSTR", Duration::from_millis(200)).is_ok());
        assert!(opener.open("GPIB0::5::INSTR", Duration::from_millis(200)).is_err());
        assert_eq!(opener.opens(), 2);
    }
}
