//! Generic device facade.
//!
//! [`GenericDevice`] is what every category facade is built on: an identified
//! [`Connection`] paired with the registered [`DeviceInfo`] of the model behind
//! it. It provides the command plumbing drivers use, the channel guard, the
//! operation-complete barrier and the handling of missing capabilities.

use crate::connection::Connection;
use crate::error::{AppResult, InstrumentError};
use crate::instrument::{Channel, DeviceInfo, ReadWrite};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// How a missing driver operation is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Telemetry and optional features. A miss is logged as a warning and
    /// returned as the soft [`InstrumentError::NotImplemented`].
    Advisory,
    /// Control operations. A miss is logged as an error and returned as
    /// [`InstrumentError::CriticalNotImplemented`].
    Mandatory,
}

/// Operation-complete query and the test applied to its answer.
#[derive(Debug, Clone, Copy)]
pub struct OpcCheck {
    /// Query to send
    pub command: &'static str,
    /// True when the answer means the device is idle
    pub complete: fn(&str) -> bool,
}

impl Default for OpcCheck {
    fn default() -> Self {
        Self {
            command: "*OPC?",
            complete: |response| matches!(response.trim(), "1" | "+1"),
        }
    }
}

const OPC_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An identified device with its registered description.
#[derive(Debug)]
pub struct GenericDevice {
    connection: Connection,
    info: Arc<DeviceInfo>,
    opc: OpcCheck,
    opc_timeout: Duration,
}

impl GenericDevice {
    /// Pair a ready connection with the registered description of its model.
    pub fn new(connection: Connection, info: Arc<DeviceInfo>) -> Self {
        let opc_timeout = connection.options().opc_timeout;
        Self {
            connection,
            info,
            opc: OpcCheck::default(),
            opc_timeout,
        }
    }

    /// Use `check` for [`GenericDevice::operation_wait`].
    pub fn with_opc_check(mut self, check: OpcCheck) -> Self {
        self.opc = check;
        self
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// `manufacturer model` of the registered device.
    pub fn name(&self) -> String {
        self.info.display_name()
    }

    /// Wait for pending operations, then send `command`.
    ///
    /// Every command goes through the operation-complete barrier first; use
    /// [`GenericDevice::send_command_no_wait`] to skip it.
    pub fn send_command(&mut self, command: &str, mode: ReadWrite) -> AppResult<Option<String>> {
        self.operation_wait(None)?;
        self.connection.send_command(command, mode)
    }

    /// Send `command` without waiting for earlier operations to finish.
    pub fn send_command_no_wait(&mut self, command: &str, mode: ReadWrite) -> AppResult<Option<String>> {
        self.connection.send_command(command, mode)
    }

    pub fn write(&mut self, command: &str) -> AppResult<()> {
        self.send_command(command, ReadWrite::Write).map(|_| ())
    }

    pub fn query(&mut self, command: &str) -> AppResult<String> {
        self.send_command(command, ReadWrite::Read)
            .map(Option::unwrap_or_default)
    }

    /// Query and parse a single number.
    pub fn query_f64(&mut self, command: &str) -> AppResult<f64> {
        let response = self.query(command)?;
        first_numeric(&response)
    }

    /// Raw identification string.
    pub fn get_id(&mut self) -> AppResult<String> {
        let command = self.info.id_command.clone();
        self.query(&command)
    }

    /// Fail with `InvalidChannel` unless `channel` exists on this model.
    pub fn check_channel_exists(&self, channel: Channel) -> AppResult<()> {
        if self.info.available_channels.contains(&channel) {
            Ok(())
        } else {
            Err(InstrumentError::InvalidChannel {
                channel,
                model: self.info.model.clone(),
            })
        }
    }

    pub fn check_channels(&self, channels: &[Channel]) -> AppResult<()> {
        channels
            .iter()
            .try_for_each(|channel| self.check_channel_exists(*channel))
    }

    /// Block until the device reports that pending operations finished.
    ///
    /// Polls the operation-complete check until it passes or `timeout`
    /// (default: the connection's `opc_timeout`) runs out.
    pub fn operation_wait(&mut self, timeout: Option<Duration>) -> AppResult<()> {
        let timeout = timeout.unwrap_or(self.opc_timeout);
        let deadline = Instant::now() + timeout;
        let check = self.opc;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.connection.query_with_timeout(check.command, remaining) {
                Ok(response) if (check.complete)(&response) => return Ok(()),
                Ok(response) => debug!(
                    device = self.name().as_str(),
                    response = response.as_str(),
                    "Operation still pending"
                ),
                Err(InstrumentError::OperationTimeout { .. }) => break,
                Err(e) => return Err(e),
            }
            thread::sleep(OPC_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }

        Err(InstrumentError::OperationTimeout {
            operation: check.command.to_string(),
            timeout,
        })
    }

    /// Report that this device does not support `operation`.
    pub fn unimplemented<T>(&self, operation: &str, capability: Capability) -> AppResult<T> {
        let device = self.name();
        match capability {
            Capability::Advisory => {
                warn!(device = device.as_str(), operation, "Operation not supported by driver");
                Err(InstrumentError::NotImplemented {
                    operation: operation.to_string(),
                    device,
                })
            }
            Capability::Mandatory => {
                error!(device = device.as_str(), operation, "Critical operation not supported by driver");
                Err(InstrumentError::CriticalNotImplemented {
                    operation: operation.to_string(),
                    device,
                })
            }
        }
    }

    pub fn close(&mut self) {
        self.connection.close();
    }
}

/// Split a response on commas and whitespace into numbers.
///
/// Every field must parse; an empty response is malformed too.
pub fn parse_numeric_response(raw: &str) -> AppResult<Vec<f64>> {
    let fields: Vec<&str> = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|f| !f.is_empty())
        .collect();
    if fields.is_empty() {
        return Err(InstrumentError::malformed(raw, "empty response"));
    }
    fields
        .into_iter()
        .map(|field| {
            field
                .parse::<f64>()
                .map_err(|_| InstrumentError::malformed(raw, format!("'{}' is not a number", field)))
        })
        .collect()
}

/// First number of a response.
pub fn first_numeric(raw: &str) -> AppResult<f64> {
    parse_numeric_response(raw).map(|values| values[0])
}

/// Run `result`, logging and swallowing the soft `NotImplemented` miss.
pub(crate) fn tolerate_advisory(result: AppResult<()>) -> AppResult<()> {
    match result {
        Err(e) if !e.is_critical() => Ok(()),
        other => other,
    }
}
