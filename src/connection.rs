//! Connection lifecycle.
//!
//! A [`Connection`] owns one transport to one instrument and walks it through
//! a fixed sequence of states:
//!
//! ```text
//! Unconnected -> PortResolved -> Linked -> Identified -> Ready
//!                      \            \           \
//!                       +------------+-----------+--> Failed
//! ```
//!
//! Only a `Ready` connection carries commands. `Failed` is terminal; retrying
//! means building a new connection. Closing (explicitly or on drop) releases
//! the transport and is safe to repeat.

use crate::adapters::{SimulatedTransport, Transport, TransportLog, TransportOpener};
use crate::config::ConnectionSettings;
use crate::error::{AppResult, InstrumentError};
use crate::identification;
use crate::instrument::{ConnectionInfo, ConnectionType, ReadWrite};
use crate::registry::{parse_forced_driver, DeviceRegistry};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Built, nothing resolved yet
    Unconnected,
    /// Resource turned into a transport address
    PortResolved,
    /// Transport open
    Linked,
    /// Manufacturer and model known
    Identified,
    /// Accepting commands
    Ready,
    /// A lifecycle step failed; the connection is unusable
    Failed,
    /// Transport released
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Knobs for building a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    /// Log every exchange at INFO instead of TRACE
    pub debug: bool,
    /// Never open a real transport
    pub simulated: bool,
    /// Skip identification and use this driver, e.g. `Siglent_SPD1168X`
    pub forced_driver: Option<String>,
    /// Identity to assume for a simulated link without a forced driver
    pub identity: Option<(String, String)>,
    /// Fall back to a simulated link when the transport refuses to open
    pub auto_simulate: bool,
    /// Read/write timeout for ordinary commands
    pub timeout: Duration,
    /// Timeout for each identification query
    pub id_timeout: Duration,
    /// Tries per identification command on a short answer
    pub id_attempts: u32,
    /// Default bound for the operation-complete barrier
    pub opc_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from(&ConnectionSettings::default())
    }
}

impl From<&ConnectionSettings> for ConnectionOptions {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            debug: settings.debug,
            simulated: false,
            forced_driver: None,
            identity: None,
            auto_simulate: settings.auto_simulate,
            timeout: Duration::from_millis(settings.timeout_ms),
            id_timeout: Duration::from_millis(settings.id_timeout_ms),
            id_attempts: settings.id_attempts,
            opc_timeout: Duration::from_millis(settings.opc_timeout_ms),
        }
    }
}

impl ConnectionOptions {
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_simulated(mut self, simulated: bool) -> Self {
        self.simulated = simulated;
        self
    }

    pub fn with_forced_driver(mut self, driver: impl Into<String>) -> Self {
        self.forced_driver = Some(driver.into());
        self
    }

    pub fn with_identity(mut self, manufacturer: &str, model: &str) -> Self {
        self.identity = Some((manufacturer.to_lowercase(), model.to_lowercase()));
        self
    }

    pub fn with_auto_simulate(mut self, auto_simulate: bool) -> Self {
        self.auto_simulate = auto_simulate;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_id_timeout(mut self, timeout: Duration) -> Self {
        self.id_timeout = timeout;
        self
    }

    pub fn with_id_attempts(mut self, attempts: u32) -> Self {
        self.id_attempts = attempts;
        self
    }

    pub fn with_opc_timeout(mut self, timeout: Duration) -> Self {
        self.opc_timeout = timeout;
        self
    }
}

/// One link to one instrument.
pub struct Connection {
    requested: String,
    info: ConnectionInfo,
    options: ConnectionOptions,
    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("requested", &self.requested)
            .field("info", &self.info)
            .field("state", &self.state)
            .field(
                "transport",
                &self.transport.as_ref().map(|t| t.info()),
            )
            .finish()
    }
}

impl Connection {
    /// Build an unconnected connection for `resource`.
    pub fn new(
        resource: impl Into<String>,
        connection_type: ConnectionType,
        options: ConnectionOptions,
    ) -> Self {
        let requested = resource.into();
        Self {
            info: ConnectionInfo {
                resource: requested.clone(),
                connection_type,
                manf_model: None,
                debug_enabled: options.debug,
                simulated: options.simulated,
                forced_driver: options.forced_driver.clone(),
            },
            requested,
            options,
            state: ConnectionState::Unconnected,
            transport: None,
        }
    }

    /// Build a connection and take it all the way to `Ready`.
    pub fn open(
        resource: impl Into<String>,
        connection_type: ConnectionType,
        options: ConnectionOptions,
        registry: &DeviceRegistry,
        opener: &dyn TransportOpener,
    ) -> AppResult<Self> {
        let mut connection = Self::new(resource, connection_type, options);
        connection.establish(registry, opener)?;
        Ok(connection)
    }

    /// Resolve, link and identify.
    pub fn establish(
        &mut self,
        registry: &DeviceRegistry,
        opener: &dyn TransportOpener,
    ) -> AppResult<()> {
        self.resolve_port()?;
        self.link(opener)?;
        self.identify(registry)
    }

    /// Turn the requested resource into a transport address.
    pub fn resolve_port(&mut self) -> AppResult<()> {
        self.expect_state(ConnectionState::Unconnected)?;
        let address = match self.info.connection_type {
            ConnectionType::Ethernet => format!("TCPIP::{}::INSTR", self.requested.trim()),
            ConnectionType::Raw => self.requested.clone(),
            ConnectionType::Undefined => {
                self.state = ConnectionState::Failed;
                return Err(InstrumentError::UnsupportedConnectionType(format!(
                    "{:?} for resource '{}'",
                    self.info.connection_type, self.requested
                )));
            }
        };
        debug!(resource = self.requested.as_str(), address = address.as_str(), "Port resolved");
        self.info.resource = address;
        self.state = ConnectionState::PortResolved;
        Ok(())
    }

    /// Open the transport, or a simulated stand-in.
    pub fn link(&mut self, opener: &dyn TransportOpener) -> AppResult<()> {
        self.expect_state(ConnectionState::PortResolved)?;
        let address = self.info.resource.clone();

        let transport: Box<dyn Transport> = if self.options.simulated {
            Box::new(self.simulated_transport())
        } else {
            match opener.open(&address, self.options.timeout) {
                Ok(transport) => transport,
                Err(e) if self.options.auto_simulate => {
                    warn!(
                        resource = address.as_str(),
                        "Failed to open transport ({:#}); falling back to simulation", e
                    );
                    self.info.simulated = true;
                    Box::new(self.simulated_transport())
                }
                Err(e) => {
                    self.state = ConnectionState::Failed;
                    return Err(InstrumentError::ConnectionRefused {
                        resource: address,
                        reason: format!("{:#}", e),
                    });
                }
            }
        };

        debug!(resource = address.as_str(), transport = transport.info().as_str(), "Linked");
        self.transport = Some(transport);
        self.state = ConnectionState::Linked;
        Ok(())
    }

    /// Work out which device is behind the link.
    ///
    /// On failure the transport is released and the connection stays `Failed`.
    pub fn identify(&mut self, registry: &DeviceRegistry) -> AppResult<()> {
        self.expect_state(ConnectionState::Linked)?;
        let pair = match self.identify_inner(registry) {
            Ok(pair) => pair,
            Err(e) => return Err(self.fail(e)),
        };
        self.info.manf_model = Some(pair);
        self.state = ConnectionState::Identified;
        if let Err(e) = self.make_ready() {
            self.info.manf_model = None;
            return Err(self.fail(e));
        }
        if let Some((manufacturer, model)) = &self.info.manf_model {
            info!(
                resource = self.info.resource.as_str(),
                manufacturer = manufacturer.as_str(),
                model = model.as_str(),
                simulated = self.is_simulated(),
                "Connection ready"
            );
        }
        Ok(())
    }

    fn fail(&mut self, error: InstrumentError) -> InstrumentError {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                warn!(resource = self.info.resource.as_str(), "Failed to close transport: {:#}", e);
            }
        }
        self.state = ConnectionState::Failed;
        error
    }

    fn identify_inner(&mut self, registry: &DeviceRegistry) -> AppResult<(String, String)> {
        let resource = self.info.resource.clone();
        let simulated = self.is_simulated();

        if let Some(forced) = self.options.forced_driver.clone() {
            let (manufacturer, model) = parse_forced_driver(&forced)?;
            let info = registry.device_info(&manufacturer, &model)?;
            if !simulated {
                let id_timeout = self.options.id_timeout;
                let transport = self.transport_mut()?;
                identification::verify_forced(transport.as_mut(), &info, id_timeout, &resource);
            }
            return Ok((manufacturer, model));
        }

        if simulated {
            return self.options.identity.clone().ok_or_else(|| {
                InstrumentError::IdentificationFailed {
                    resource,
                    reason: "simulated connection needs a forced driver or an identity"
                        .to_string(),
                }
            });
        }

        let id_timeout = self.options.id_timeout;
        let attempts = self.options.id_attempts;
        let transport = self.transport_mut()?;
        identification::sweep(transport.as_mut(), registry, id_timeout, attempts, &resource)
    }

    fn make_ready(&mut self) -> AppResult<()> {
        let timeout = self.options.timeout;
        let resource = self.info.resource.clone();
        self.transport_mut()?
            .set_timeout(timeout)
            .map_err(|e| InstrumentError::Communication(format!("setting timeout on {}: {:#}", resource, e)))?;
        self.state = ConnectionState::Ready;
        Ok(())
    }

    fn simulated_transport(&self) -> SimulatedTransport {
        let identity = self
            .options
            .forced_driver
            .as_deref()
            .and_then(|forced| parse_forced_driver(forced).ok())
            .or_else(|| self.options.identity.clone());
        let mut transport = SimulatedTransport::new(self.info.resource.clone());
        if let Some((manufacturer, model)) = identity {
            transport = transport.with_identity(format!("{},{},SIM0000001,0.0.0", manufacturer, model));
        }
        transport
    }

    fn expect_state(&self, expected: ConnectionState) -> AppResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(InstrumentError::NotConnected(format!(
                "{} (expected {})",
                self.state, expected
            )))
        }
    }

    fn transport_mut(&mut self) -> AppResult<&mut Box<dyn Transport>> {
        let state = self.state;
        self.transport
            .as_mut()
            .ok_or_else(|| InstrumentError::NotConnected(state.to_string()))
    }

    fn ready_transport(&mut self) -> AppResult<&mut Box<dyn Transport>> {
        if self.state != ConnectionState::Ready {
            return Err(InstrumentError::NotConnected(self.state.to_string()));
        }
        self.transport_mut()
    }

    /// Send `command`. Reads return the trimmed response, writes return `None`.
    pub fn send_command(&mut self, command: &str, mode: ReadWrite) -> AppResult<Option<String>> {
        let debug_enabled = self.info.debug_enabled;
        let resource = self.info.resource.clone();
        let transport = self.ready_transport()?;
        let started = Instant::now();

        let result = match mode.resolve(command) {
            ReadWrite::Read => transport
                .query(command)
                .map(|r| Some(r.trim_end_matches(['\r', '\n']).trim().to_string())),
            _ => transport.write(command).map(|_| None),
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(response) => {
                let shown = response.as_deref().unwrap_or("");
                if debug_enabled {
                    info!(resource = resource.as_str(), command, response = shown, elapsed_ms, "exchange");
                } else {
                    trace!(resource = resource.as_str(), command, response = shown, elapsed_ms, "exchange");
                }
                Ok(response)
            }
            Err(e) => Err(InstrumentError::Communication(format!(
                "'{}' on {}: {:#}",
                command, resource, e
            ))),
        }
    }

    /// Send a command without reading.
    pub fn write(&mut self, command: &str) -> AppResult<()> {
        self.send_command(command, ReadWrite::Write).map(|_| ())
    }

    /// Send a command and read the response.
    pub fn query(&mut self, command: &str) -> AppResult<String> {
        self.send_command(command, ReadWrite::Read)
            .map(Option::unwrap_or_default)
    }

    /// Read with a per-operation timeout.
    ///
    /// The transport timeout is restored afterwards whatever the outcome.
    pub fn query_with_timeout(&mut self, command: &str, timeout: Duration) -> AppResult<String> {
        let resource = self.info.resource.clone();
        let transport = self.ready_transport()?;
        let previous = transport.timeout();
        transport
            .set_timeout(timeout)
            .map_err(|e| InstrumentError::Communication(format!("{:#}", e)))?;

        let started = Instant::now();
        let result = transport.query(command);
        let elapsed = started.elapsed();

        if let Err(e) = transport.set_timeout(previous) {
            warn!(resource = resource.as_str(), "Failed to restore transport timeout: {:#}", e);
        }

        match result {
            Ok(response) => Ok(response.trim().to_string()),
            Err(e) if elapsed >= timeout || is_timeout(&e) => Err(InstrumentError::OperationTimeout {
                operation: command.to_string(),
                timeout,
            }),
            Err(e) => Err(InstrumentError::Communication(format!(
                "'{}' on {}: {:#}",
                command, resource, e
            ))),
        }
    }

    /// Identified `(manufacturer, model)`.
    pub fn manufacturer_model(&self) -> AppResult<(String, String)> {
        match (&self.state, &self.info.manf_model) {
            (ConnectionState::Ready, Some(pair)) => Ok(pair.clone()),
            _ => Err(InstrumentError::NotIdentified),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// True when the link never reaches hardware.
    pub fn is_simulated(&self) -> bool {
        self.info.simulated
            || self
                .transport
                .as_ref()
                .map(|t| t.is_simulated())
                .unwrap_or(false)
    }

    /// Exchange log of the underlying transport, when it keeps one.
    pub fn transport_log(&self) -> Option<TransportLog> {
        self.transport.as_ref().and_then(|t| t.log())
    }

    /// Release the transport. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                warn!(resource = self.info.resource.as_str(), "Failed to close transport: {:#}", e);
            } else {
                debug!(resource = self.info.resource.as_str(), "Connection closed");
            }
            self.state = ConnectionState::Closed;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_timeout(err: &anyhow::Error) -> bool {
    let text = format!("{:#}", err).to_lowercase();
    text.contains("timeout") || text.contains("timed out") || text.contains("tmo")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockOpener, MockTransport};
    use crate::instrument::DeviceType;
    use crate::registry::{DriverFactory, DriverRegistration};

    #[test]
    fn test_ethernet_address() {
        let mut connection = Connection::new("10.0.0.7", ConnectionType::Ethernet, ConnectionOptions::default());
        connection.resolve_port().unwrap();
        assert_eq!(connection.info().resource, "TCPIP::10.0.0.7::INSTR");
        assert_eq!(connection.state(), ConnectionState::PortResolved);
    }

    #[test]
    fn test_undefined_connection_type() {
        let mut connection = Connection::new("x", ConnectionType::Undefined, ConnectionOptions::default());
        assert!(matches!(
            connection.resolve_port(),
            Err(InstrumentError::UnsupportedConnectionType(_))
        ));
        assert_eq!(connection.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_refused_without_auto_simulate() {
        let opener = MockOpener::refusing();
        let result = Connection::open(
            "GPIB0::9::INSTR",
            ConnectionType::Raw,
            ConnectionOptions::default(),
            &DeviceRegistry::new(),
            &opener,
        );
        assert!(matches!(result, Err(InstrumentError::ConnectionRefused { .. })));
    }

    #[test]
    fn test_simulated_never_opens() {
        let opener = MockOpener::refusing();
        let connection = Connection::open(
            "sim",
            ConnectionType::Raw,
            ConnectionOptions::default().with_simulated(true).with_identity("Acme", "X1"),
            &DeviceRegistry::new(),
            &opener,
        )
        .unwrap();
        assert_eq!(opener.opens(), 0);
        assert!(connection.is_simulated());
        assert_eq!(
            connection.manufacturer_model().unwrap(),
            ("acme".to_string(), "x1".to_string())
        );
    }

    #[test]
    fn test_simulated_without_identity_fails() {
        let result = Connection::open(
            "sim",
            ConnectionType::Raw,
            ConnectionOptions::default().with_simulated(true),
            &DeviceRegistry::new(),
            &MockOpener::refusing(),
        );
        assert!(matches!(result, Err(InstrumentError::IdentificationFailed { .. })));
    }

    #[test]
    fn test_commands_need_ready() {
        let mut connection = Connection::new("x", ConnectionType::Raw, ConnectionOptions::default());
        assert!(matches!(
            connection.send_command("*IDN?", ReadWrite::Auto),
            Err(InstrumentError::NotConnected(_))
        ));
        assert!(matches!(connection.manufacturer_model(), Err(InstrumentError::NotIdentified)));
    }

    fn mock_registry() -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        registry
            .add(DriverRegistration::new(
                DeviceType::Scope,
                "acme",
                "x1000",
                DriverFactory::IdentityOnly(DeviceType::Scope),
            ))
            .unwrap();
        registry
    }

    #[test]
    fn test_sweep_reaches_ready() {
        let opener = MockOpener::once(MockTransport::new().with_response("*IDN?", "ACME,X1000,0001,1.0"));
        let connection = Connection::open(
            "GPIB0::1::INSTR",
            ConnectionType::Raw,
            ConnectionOptions::default(),
            &mock_registry(),
            &opener,
        )
        .unwrap();
        assert_eq!(connection.state(), ConnectionState::Ready);
        assert!(!connection.is_simulated());
    }

    #[test]
    fn test_failed_identification_releases_transport() {
        let opener = MockOpener::once(MockTransport::new().with_response("*IDN?", "RIGOL,DS1054Z,1,2"));
        let mut connection = Connection::new("GPIB0::1::INSTR", ConnectionType::Raw, ConnectionOptions::default());
        assert!(connection.establish(&mock_registry(), &opener).is_err());
        assert_eq!(connection.state(), ConnectionState::Failed);
        assert!(connection.transport_log().is_none());
    }

    #[test]
    fn test_rejected_timeout_fails_connection() {
        let opener = MockOpener::once(
            MockTransport::new()
                .with_response("*IDN?", "ACME,X1000,0001,1.0")
                .refusing_timeouts(),
        );
        let mut connection = Connection::new("GPIB0::1::INSTR", ConnectionType::Raw, ConnectionOptions::default());
        assert!(matches!(
            connection.establish(&mock_registry(), &opener),
            Err(InstrumentError::Communication(_))
        ));
        assert_eq!(connection.state(), ConnectionState::Failed);
        assert!(matches!(connection.manufacturer_model(), Err(InstrumentError::NotIdentified)));
        assert!(connection.transport_log().is_none());
    }

    #[test]
    fn test_query_with_timeout_maps_timeout() {
        let opener = MockOpener::once(
            MockTransport::new()
                .with_response("*IDN?", "ACME,X1000,0001,1.0")
                .with_response("VOLT?", "1.5"),
        );
        let mut connection = Connection::open(
            "GPIB0::1::INSTR",
            ConnectionType::Raw,
            ConnectionOptions::default(),
            &mock_registry(),
            &opener,
        )
        .unwrap();
        assert!(matches!(
            connection.query_with_timeout("READ?", Duration::from_millis(10)),
            Err(InstrumentError::OperationTimeout { .. })
        ));
        // the connection survives a per-operation timeout
        assert_eq!(connection.query("VOLT?").unwrap(), "1.5");
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut connection = Connection::open(
            "sim",
            ConnectionType::Raw,
            ConnectionOptions::default().with_simulated(true).with_identity("acme", "x1"),
            &DeviceRegistry::new(),
            &MockOpener::refusing(),
        )
        .unwrap();
        connection.close();
        connection.close();
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(connection.write("OUTP OFF").is_err());
    }
}
