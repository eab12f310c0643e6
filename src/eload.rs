//! Electronic load category.

use crate::adapters::TransportLog;
use crate::connection::Connection;
use crate::device::{tolerate_advisory, Capability, GenericDevice, OpcCheck};
use crate::error::AppResult;
use crate::instrument::{Channel, DeviceInfo, EloadMode, EloadSlewRate, MeasureType, ReadWrite, State};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Constant-resistance setpoint applied by [`Eload::reset_device`].
pub const SAFE_RESISTANCE_OHMS: f64 = 10_000.0;

/// Model specific electronic load commands.
///
/// Defaults report the operation as missing: control operations (including
/// the slew rate) as [`Capability::Mandatory`], readbacks and remote sense as
/// [`Capability::Advisory`].
pub trait EloadDriver: Send {
    /// Registered driver name, e.g. `Keithley_2380`.
    fn name(&self) -> &'static str;

    fn opc_check(&self) -> OpcCheck {
        OpcCheck::default()
    }

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

    fn set_mode(&self, device: &mut GenericDevice, _mode: EloadMode, _channel: Channel) -> AppResult<()> {
        device.unimplemented("set_mode", Capability::Mandatory)
    }

    fn get_mode(&self, device: &mut GenericDevice, _channel: Channel) -> AppResult<EloadMode> {
        device.unimplemented("get_mode", Capability::Advisory)
    }

    /// Apply `value` in the unit of `mode`. The facade selects the mode
    /// beforehand when the cached one differs.
    fn set_load(&self, device: &mut GenericDevice, _mode: EloadMode, _value: f64, _channel: Channel) -> AppResult<()> {
        device.unimplemented("set_load", Capability::Mandatory)
    }

    fn get_load(&self, device: &mut GenericDevice, _mode: EloadMode, _channel: Channel) -> AppResult<f64> {
        device.unimplemented("get_load", Capability::Advisory)
    }

    fn set_remote_sense(&self, device: &mut GenericDevice, _state: State, _channel: Channel) -> AppResult<()> {
        device.unimplemented("set_remote_sense", Capability::Advisory)
    }

    /// Apply a slew rate and return the rate the device reports, in A/ms.
    fn set_slew_rate(
        &self,
        device: &mut GenericDevice,
        _rate: EloadSlewRate,
        _amps_per_ms: f64,
        _channel: Channel,
    ) -> AppResult<f64> {
        device.unimplemented("set_slew_rate", Capability::Mandatory)
    }

    fn measure(&self, device: &mut GenericDevice, _measure: MeasureType, _channel: Channel) -> AppResult<f64> {
        device.unimplemented("measure", Capability::Advisory)
    }
}

/// A connected electronic load.
///
/// Keeps the last known regulation mode. All channels are assumed to share
/// it.
pub struct Eload {
    device: GenericDevice,
    driver: Box<dyn EloadDriver>,
    mode: EloadMode,
    shut_down: bool,
}

impl std::fmt::Debug for Eload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Eload")
            .field("driver", &self.driver.name())
            .field("mode", &self.mode)
            .field("device", &self.device)
            .finish()
    }
}

impl Eload {
    pub fn new(connection: Connection, info: Arc<DeviceInfo>, driver: Box<dyn EloadDriver>) -> AppResult<Self> {
        let device = GenericDevice::new(connection, info).with_opc_check(driver.opc_check());
        let mut eload = Self {
            device,
            driver,
            mode: EloadMode::Undefined,
            shut_down: false,
        };
        eload.driver.initialize(&mut eload.device)?;

        if eload.device.info().available_channels.len() > 1 {
            warn!(
                driver = eload.driver.name(),
                "Multi-channel load: all channels are assumed to share one mode"
            );
        }
        if !eload.is_simulated() {
            match eload.driver.get_mode(&mut eload.device, Channel::Ch1) {
                Ok(mode) => eload.mode = mode,
                Err(e) => debug!(driver = eload.driver.name(), "Initial mode unknown: {}", e),
            }
        }
        Ok(eload)
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

    /// Last known regulation mode.
    pub fn cached_mode(&self) -> EloadMode {
        self.mode
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

    /// Reset, then every channel off at 10 kΩ constant resistance with remote
    /// sense off.
    pub fn reset_device(&mut self) -> AppResult<()> {
        self.driver.reset(&mut self.device)?;
        self.mode = EloadMode::Undefined;
        for channel in self.channels() {
            self.driver.disable_output(&mut self.device, channel)?;
            self.set_load(EloadMode::Cr, SAFE_RESISTANCE_OHMS, channel)?;
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

    pub fn set_load(&mut self, mode: EloadMode, value: f64, channel: Channel) -> AppResult<()> {
        self.device.check_channel_exists(channel)?;
        if self.mode != mode {
            self.driver.set_mode(&mut self.device, mode, channel)?;
            self.mode = mode;
        }
        self.driver.set_load(&mut self.device, mode, value, channel)
    }

    pub fn set_mode(&mut self, mode: EloadMode, channel: Channel) -> AppResult<()> {
        self.device.check_channel_exists(channel)?;
        self.driver.set_mode(&mut self.device, mode, channel)?;
        self.mode = mode;
        Ok(())
    }

    /// Query the regulation mode and refresh the cache.
    pub fn get_mode(&mut self, channel: Channel) -> AppResult<EloadMode> {
        self.device.check_channel_exists(channel)?;
        let mode = self.driver.get_mode(&mut self.device, channel)?;
        self.mode = mode;
        Ok(mode)
    }

    /// Setpoint for `mode`, or for the cached mode when `None`.
    pub fn get_load(&mut self, mode: Option<EloadMode>, channel: Channel) -> AppResult<f64> {
        self.device.check_channel_exists(channel)?;
        let mode = mode.unwrap_or(self.mode);
        self.driver.get_load(&mut self.device, mode, channel)
    }

    pub fn set_remote_sense(&mut self, state: State, channel: Channel) -> AppResult<()> {
        self.device.check_channel_exists(channel)?;
        self.driver.set_remote_sense(&mut self.device, state, channel)
    }

    /// `amps_per_ms` is only used with [`EloadSlewRate::Custom`].
    pub fn set_slew_rate(&mut self, rate: EloadSlewRate, amps_per_ms: f64, channel: Channel) -> AppResult<f64> {
        self.device.check_channel_exists(channel)?;
        self.driver.set_slew_rate(&mut self.device, rate, amps_per_ms, channel)
    }

    pub fn measure(&mut self, measure: MeasureType, channel: Channel) -> AppResult<f64> {
        self.device.check_channel_exists(channel)?;
        self.driver.measure(&mut self.device, measure, channel)
    }

    /// Turn every input off and close the connection. Safe to repeat.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for channel in self.channels() {
            if let Err(e) = self.driver.disable_output(&mut self.device, channel) {
                warn!(driver = self.driver.name(), %channel, "Failed to disable input during shutdown: {}", e);
            }
        }
        self.device.close();
    }
}

impl Drop for Eload {
    fn drop(&mut self) {
        self.shutdown();
    }
}
