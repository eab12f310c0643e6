//! Power supply category.
//!
//! [`PsuDriver`] is implemented once per supported model and only knows the
//! model's command dialect. [`Psu`] is what callers hold: it guards channels,
//! fills gaps the driver leaves (power computed from V and I) and puts every
//! output in a safe state on reset and teardown.

use crate::adapters::TransportLog;
use crate::connection::Connection;
use crate::device::{tolerate_advisory, Capability, GenericDevice, OpcCheck};
use crate::error::AppResult;
use crate::instrument::{Channel, DeviceInfo, MeasureType, ReadWrite, State};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Over-voltage limit applied by [`Psu::reset_device`].
pub const SAFE_OVP_VOLTS: f64 = 50.0;
/// Over-current limit applied by [`Psu::reset_device`].
pub const SAFE_OCP_AMPS: f64 = 5.0;

/// Model specific power supply commands.
///
/// Every method has a default body reporting the operation as missing.
/// Control operations are [`Capability::Mandatory`]; telemetry, protection
/// limits and remote sense are [`Capability::Advisory`].
pub trait PsuDriver: Send {
    /// Registered driver name, e.g. `Siglent_SPD1168X`.
    fn name(&self) -> &'static str;

    fn opc_check(&self) -> OpcCheck {
        OpcCheck::default()
    }

    /// One-time setup after the connection is ready.
    fn initialize(&self, _device: &mut GenericDevice) -> AppResult<()> {
        Ok(())
    }

    fn reset(&self, device: &mut GenericDevice) -> AppResult<()> {
        device.unimplemented("reset", Capability::Mandatory)
    }

    fn enable_output(&self, device: &mut GenericDevice, _channel: Channel) -> AppResult<()> {
        device.unimplemented("enable_output", Capability::Mandatory)
    }

    fn disable_output(&self, device: &mut GenericDevice, _channel: Channel) -> AppResult<()> {
        device.unimplemented("disable_output", Capability::Mandatory)
    }

    fn get_output_state(&self, device: &mut GenericDevice, _channel: Channel) -> AppResult<State> {
        device.unimplemented("get_output_state", Capability::Advisory)
    }

    fn set_voltage(&self, device: &mut GenericDevice, _volts: f64, _channel: Channel) -> AppResult<()> {
        device.unimplemented("set_voltage", Capability::Mandatory)
    }

    fn get_voltage(&self, device: &mut GenericDevice, _channel: Channel) -> AppResult<f64> {
        device.unimplemented("get_voltage", Capability::Advisory)
    }

    fn set_current(&self, device: &mut GenericDevice, _amps: f64, _channel: Channel) -> AppResult<()> {
        device.unimplemented("set_current", Capability::Mandatory)
    }

    fn get_current(&self, device: &mut GenericDevice, _channel: Channel) -> AppResult<f64> {
        device.unimplemented("get_current", Capability::Advisory)
    }

    fn set_ovp(&self, device: &mut GenericDevice, _volts: f64, _channel: Channel) -> AppResult<()> {
        device.unimplemented("set_ovp", Capability::Advisory)
    }

    fn set_ocp(&self, device: &mut GenericDevice, _amps: f64, _channel: Channel) -> AppResult<()> {
        device.unimplemented("set_ocp", Capability::Advisory)
    }

    fn set_remote_sense(&self, device: &mut GenericDevice, _state: State, _channel: Channel) -> AppResult<()> {
        device.unimplemented("set_remote_sense", Capability::Advisory)
    }

    fn measure(&self, device: &mut GenericDevice, _measure: MeasureType, _channel: Channel) -> AppResult<f64> {
        device.unimplemented("measure", Capability::Advisory)
    }
}

/// A connected power supply.
pub struct Psu {
    device: GenericDevice,
    driver: Box<dyn PsuDriver>,
    shut_down: bool,
}

impl std::fmt::Debug for Psu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Psu")
            .field("driver", &self.driver.name())
            .field("device", &self.device)
            .finish()
    }
}

impl Psu {
    /// Wrap a ready connection with `driver` and run its initialization.
    pub fn new(connection: Connection, info: Arc<DeviceInfo>, driver: Box<dyn PsuDriver>) -> AppResult<Self> {
        let device = GenericDevice::new(connection, info).with_opc_check(driver.opc_check());
        let mut psu = Self {
            device,
            driver,
            shut_down: false,
        };
        psu.driver.initialize(&mut psu.device)?;
        debug!(driver = psu.driver.name(), "Power supply ready");
        Ok(psu)
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    pub fn device_info(&self) -> &DeviceInfo {
        self.device.info()
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.device.info().available_channels.iter().copied().collect()
    }

    pub fn is_simulated(&self) -> bool {
        self.device.connection().is_simulated()
    }

    pub fn transport_log(&self) -> Option<TransportLog> {
        self.device.connection().transport_log()
    }

    pub fn send_command(&mut self, command: &str, mode: ReadWrite) -> AppResult<Option<String>> {
        self.device.send_command(command, mode)
    }

    pub fn get_id(&mut self) -> AppResult<String> {
        self.device.get_id()
    }

    pub fn check_channel_exists(&self, channel: Channel) -> AppResult<()> {
        self.device.check_channel_exists(channel)
    }

    pub fn operation_wait(&mut self, timeout: Option<Duration>) -> AppResult<()> {
        self.device.operation_wait(timeout)
    }

    /// Reset the instrument and put every channel in a safe state.
    ///
    /// Outputs off, OVP 50 V, OCP 5 A, 0 V, 0 A, remote sense off. Protection
    /// and sense settings the driver lacks are skipped.
    pub fn reset_device(&mut self) -> AppResult<()> {
        self.driver.reset(&mut self.device)?;
        for channel in self.channels() {
            self.driver.disable_output(&mut self.device, channel)?;
            tolerate_advisory(self.driver.set_ovp(&mut self.device, SAFE_OVP_VOLTS, channel))?;
            tolerate_advisory(self.driver.set_ocp(&mut self.device, SAFE_OCP_AMPS, channel))?;
            self.driver.set_voltage(&mut self.device, 0.0, channel)?;
            self.driver.set_current(&mut self.device, 0.0, channel)?;
            tolerate_advisory(self.driver.set_remote_sense(&mut self.device, State::Off, channel))?;
        }
        Ok(())
    }

    pub fn enable_output(&mut self, channel: Channel) -> AppResult<()> {
        self.device.check_channel_exists(channel)?;
        self.driver.enable_output(&mut self.device, channel)
    }

    pub fn disable_output(&mut self, channel: Channel) -> AppResult<()> {
        self.device.check_channel_exists(channel)?;
        self.driver.disable_output(&mut self.device, channel)
    }

    /// `Undefined` is treated as off.
    pub fn set_output_state(&mut self, state: State, channel: Channel) -> AppResult<()> {
        match state {
            State::On => self.enable_output(channel),
            State::Off | State::Undefined => self.disable_output(channel),
        }
    }

    pub fn get_output_state(&mut self, channel: Channel) -> AppResult<State> {
        self.device.check_channel_exists(channel)?;
        self.driver.get_output_state(&mut self.device, channel)
    }

    pub fn set_voltage(&mut self, volts: f64, channel: Channel) -> AppResult<()> {
        self.device.check_channel_exists(channel)?;
        self.driver.set_voltage(&mut self.device, volts, channel)
    }

    pub fn get_voltage(&mut self, channel: Channel) -> AppResult<f64> {
        self.device.check_channel_exists(channel)?;
        self.driver.get_voltage(&mut self.device, channel)
    }

    pub fn set_current(&mut self, amps: f64, channel: Channel) -> AppResult<()> {
        self.device.check_channel_exists(channel)?;
        self.driver.set_current(&mut self.device, amps, channel)
    }

    pub fn get_current(&mut self, channel: Channel) -> AppResult<f64> {
        self.device.check_channel_exists(channel)?;
        self.driver.get_current(&mut self.device, channel)
    }

    pub fn set_ovp(&mut self, volts: f64, channel: Channel) -> AppResult<()> {
        self.device.check_channel_exists(channel)?;
        self.driver.set_ovp(&mut self.device, volts, channel)
    }

    pub fn set_ocp(&mut self, amps: f64, channel: Channel) -> AppResult<()> {
        self.device.check_channel_exists(channel)?;
        self.driver.set_ocp(&mut self.device, amps, channel)
    }

    pub fn set_remote_sense(&mut self, state: State, channel: Channel) -> AppResult<()> {
        self.device.check_channel_exists(channel)?;
        self.driver.set_remote_sense(&mut self.device, state, channel)
    }

    /// Measure `measure` on `channel`.
    ///
    /// Power is computed as V × I when the driver cannot measure it directly.
    pub fn measure(&mut self, measure: MeasureType, channel: Channel) -> AppResult<f64> {
        self.device.check_channel_exists(channel)?;
        match self.driver.measure(&mut self.device, measure, channel) {
            Err(e) if measure == MeasureType::Power && !e.is_critical() => {
                debug!(driver = self.driver.name(), "Computing power from voltage and current");
                let volts = self.driver.measure(&mut self.device, MeasureType::Voltage, channel)?;
                let amps = self.driver.measure(&mut self.device, MeasureType::Current, channel)?;
                Ok(volts * amps)
            }
            other => other,
        }
    }

    /// Disable every output and close the connection. Safe to repeat.
    ///
    /// Failures are logged and do not stop the remaining steps.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for channel in self.channels() {
            if let Err(e) = self.driver.disable_output(&mut self.device, channel) {
                warn!(driver = self.driver.name(), %channel, "Failed to disable output during shutdown: {}", e);
            }
        }
        self.device.close();
    }
}

impl Drop for Psu {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockOpener;
    use crate::connection::ConnectionOptions;
    use crate::error::InstrumentError;
    use crate::instrument::{ConnectionType, DeviceType};
    use crate::registry::DeviceRegistry;
    use std::collections::BTreeSet;

    /// Driver with only the mandatory control surface.
    struct Bare;

    impl PsuDriver for Bare {
        fn name(&self) -> &'static str {
            "Acme_Bare"
        }

        fn reset(&self, device: &mut GenericDevice) -> AppResult<()> {
            device.write("*RST")
        }

        fn enable_output(&self, device: &mut GenericDevice, channel: Channel) -> AppResult<()> {
            device.write(&format!("OUT{} ON", channel.number()))
        }

        fn disable_output(&self, device: &mut GenericDevice, channel: Channel) -> AppResult<()> {
            device.write(&format!("OUT{} OFF", channel.number()))
        }

        fn set_voltage(&self, device: &mut GenericDevice, volts: f64, channel: Channel) -> AppResult<()> {
            device.write(&format!("V{} {}", channel.number(), volts))
        }

        fn set_current(&self, device: &mut GenericDevice, amps: f64, channel: Channel) -> AppResult<()> {
            device.write(&format!("I{} {}", channel.number(), amps))
        }

        fn measure(&self, device: &mut GenericDevice, measure: MeasureType, channel: Channel) -> AppResult<f64> {
            match measure {
                MeasureType::Voltage => device.query_f64(&format!("V{}?", channel.number())),
                MeasureType::Current => device.query_f64(&format!("I{}?", channel.number())),
                _ => device.unimplemented("measure", Capability::Advisory),
            }
        }
    }

    fn psu() -> Psu {
        let connection = Connection::open(
            "sim",
            ConnectionType::Raw,
            ConnectionOptions::default().with_simulated(true).with_identity("acme", "bare"),
            &DeviceRegistry::new(),
            &MockOpener::refusing(),
        )
        .unwrap();
        let info = DeviceInfo {
            device_type: DeviceType::Psu,
            manufacturer: "acme".into(),
            model: "bare".into(),
            id_command: "*IDN?".into(),
            available_channels: BTreeSet::from([Channel::Ch1, Channel::Ch2]),
        };
        Psu::new(connection, Arc::new(info), Box::new(Bare)).unwrap()
    }

    #[test]
    fn test_reset_skips_missing_protection() {
        let mut psu = psu();
        let log = psu.transport_log().unwrap();
        psu.reset_device().unwrap();
        let writes = log.writes();
        assert_eq!(writes[0], "*RST");
        assert!(writes.contains(&"OUT2 OFF".to_string()));
        assert!(writes.contains(&"V1 0".to_string()));
    }

    #[test]
    fn test_power_falls_back_to_v_times_i() {
        let mut psu = psu();
        let log = psu.transport_log().unwrap();
        let power = psu.measure(MeasureType::Power, Channel::Ch1).unwrap();
        assert!((0.0..=1.0).contains(&power));
        let readings: Vec<String> = log.queries().into_iter().filter(|q| q != "*OPC?").collect();
        assert_eq!(readings, vec!["V1?".to_string(), "I1?".to_string()]);
    }

    #[test]
    fn test_channel_guard_runs_first() {
        let mut psu = psu();
        let log = psu.transport_log().unwrap();
        log.clear();
        assert!(matches!(
            psu.set_voltage(1.0, Channel::Ch3),
            Err(InstrumentError::InvalidChannel { .. })
        ));
        assert!(log.is_empty());
    }

    #[test]
    fn test_missing_advisory_is_soft() {
        let mut psu = psu();
        let err = psu.get_voltage(Channel::Ch1).unwrap_err();
        assert!(!err.is_critical());
    }

    #[test]
    fn test_shutdown_disables_all_outputs_once() {
        let mut psu = psu();
        let log = psu.transport_log().unwrap();
        psu.shutdown();
        psu.shutdown();
        assert_eq!(log.writes(), vec!["OUT1 OFF".to_string(), "OUT2 OFF".to_string()]);
    }
}
