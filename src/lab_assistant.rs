//! Setup entry points.
//!
//! [`LabAssistant`] is the front door: give it a resource string and a
//! category and it returns a ready facade, having resolved the address, opened
//! the transport, identified the device and picked the registered driver.
//!
//! ```no_run
//! use lab_assistant::{Channel, LabAssistant, MeasureType, SetupOptions};
//!
//! let assistant = LabAssistant::new();
//! let mut psu = assistant.setup_psu(
//!     "192.168.1.30",
//!     SetupOptions::ethernet().with_forced_driver("Siglent_SPD1168X"),
//! )?;
//! psu.set_voltage(3.3, Channel::Ch1)?;
//! let volts = psu.measure(MeasureType::Voltage, Channel::Ch1)?;
//! # Ok::<(), lab_assistant::InstrumentError>(())
//! ```

use crate::adapters::{default_opener, TransportOpener};
use crate::config::{ConnectionSettings, Settings};
use crate::connection::{Connection, ConnectionOptions};
use crate::dmm::Dmm;
use crate::eload::Eload;
use crate::error::{AppResult, InstrumentError};
use crate::instrument::{ConnectionType, DeviceType};
use crate::psu::Psu;
use crate::registry::DeviceRegistry;
use crate::resolver::{self, Device};
use std::time::Duration;
use tracing::info;

/// Per-call setup choices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetupOptions {
    /// How to turn the resource into an address (default `Raw`)
    pub connection_type: ConnectionType,
    /// Log every exchange at INFO
    pub debug: bool,
    /// Never open a real transport
    pub simulated: bool,
    /// Driver to use without identification, e.g. `Keithley_2380`
    pub forced_driver: Option<String>,
    /// Identity assumed by a simulated connection without a forced driver
    pub identity: Option<(String, String)>,
    /// Command timeout; the configured default when `None`
    pub timeout: Option<Duration>,
}

impl SetupOptions {
    /// Options for a bare host or IP address.
    pub fn ethernet() -> Self {
        Self {
            connection_type: ConnectionType::Ethernet,
            ..Self::default()
        }
    }

    /// Options for a simulated device.
    pub fn simulated() -> Self {
        Self {
            simulated: true,
            ..Self::default()
        }
    }

    pub fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
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

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

enum Registry {
    Global,
    Owned(DeviceRegistry),
}

/// Builds facades from resource strings.
pub struct LabAssistant {
    registry: Registry,
    opener: Box<dyn TransportOpener>,
    defaults: ConnectionSettings,
}

impl Default for LabAssistant {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LabAssistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabAssistant")
            .field("drivers", &self.registry().len())
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl LabAssistant {
    /// Bundled drivers with the default transport opener.
    pub fn new() -> Self {
        Self {
            registry: Registry::Global,
            opener: default_opener(),
            defaults: ConnectionSettings::default(),
        }
    }

    /// Use `registry` and `opener` instead of the defaults.
    pub fn with(registry: DeviceRegistry, opener: Box<dyn TransportOpener>) -> Self {
        Self {
            registry: Registry::Owned(registry),
            opener,
            defaults: ConnectionSettings::default(),
        }
    }

    /// Bundled drivers with connection defaults taken from `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new().with_defaults(settings.connection.clone())
    }

    pub fn with_defaults(mut self, defaults: ConnectionSettings) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn registry(&self) -> &DeviceRegistry {
        match &self.registry {
            Registry::Global => DeviceRegistry::global(),
            Registry::Owned(registry) => registry,
        }
    }

    pub fn setup_psu(&self, resource: &str, options: SetupOptions) -> AppResult<Psu> {
        self.setup(resource, DeviceType::Psu, options)?.into_psu()
    }

    pub fn setup_eload(&self, resource: &str, options: SetupOptions) -> AppResult<Eload> {
        self.setup(resource, DeviceType::Eload, options)?.into_eload()
    }

    pub fn setup_dmm(&self, resource: &str, options: SetupOptions) -> AppResult<Dmm> {
        self.setup(resource, DeviceType::Dmm, options)?.into_dmm()
    }

    /// Connect to `resource` and resolve a `device_type` driver for it.
    pub fn setup(&self, resource: &str, device_type: DeviceType, options: SetupOptions) -> AppResult<Device> {
        let connection_options = self.connection_options(&options);
        let connection = Connection::open(
            resource,
            options.connection_type,
            connection_options,
            self.registry(),
            self.opener.as_ref(),
        )?;
        let device = resolver::resolve(self.registry(), device_type, connection)?;
        info!(resource, driver = device.driver_name(), "Setup complete");
        Ok(device)
    }

    /// Resource descriptors visible to the transport backend.
    pub fn list_available_resources(&self) -> AppResult<Vec<String>> {
        self.opener
            .list_resources()
            .map_err(|e| InstrumentError::Communication(format!("{:#}", e)))
    }

    fn connection_options(&self, options: &SetupOptions) -> ConnectionOptions {
        let mut connection = ConnectionOptions::from(&self.defaults)
            .with_debug(self.defaults.debug || options.debug)
            .with_simulated(options.simulated);
        if let Some(timeout) = options.timeout {
            connection = connection.with_timeout(timeout);
        }
        if let Some(driver) = &options.forced_driver {
            connection = connection.with_forced_driver(driver.clone());
        }
        if let Some((manufacturer, model)) = &options.identity {
            connection = connection.with_identity(manufacturer, model);
        }
        connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockOpener;

    #[test]
    fn test_options_layering() {
        let assistant = LabAssistant::with(DeviceRegistry::new(), Box::new(MockOpener::refusing()))
            .with_defaults(ConnectionSettings {
                auto_simulate: true,
                ..ConnectionSettings::default()
            });
        let options = assistant.connection_options(
            &SetupOptions::simulated()
                .with_identity("Siglent", "SPD1168X")
                .with_timeout(Duration::from_millis(250)),
        );
        assert!(options.simulated);
        assert!(options.auto_simulate);
        assert_eq!(options.timeout, Duration::from_millis(250));
        assert_eq!(options.identity, Some(("siglent".into(), "spd1168x".into())));
    }

    #[test]
    fn test_list_resources_passthrough() {
        let assistant = LabAssistant::with(
            DeviceRegistry::new(),
            Box::new(MockOpener::refusing().with_resources(&["GPIB0::5::INSTR", "TCPIP::10.0.0.2::INSTR"])),
        );
        assert_eq!(assistant.list_available_resources().unwrap().len(), 2);
    }
}
