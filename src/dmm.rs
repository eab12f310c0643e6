//! Digital multimeter category.
//!
//! Multimeters here are single-channel. The facade remembers the configured
//! function so repeated measurements of the same quantity do not reconfigure
//! the meter.

use crate::adapters::TransportLog;
use crate::connection::Connection;
use crate::device::{Capability, GenericDevice, OpcCheck};
use crate::error::AppResult;
use crate::instrument::{Channel, DeviceInfo, MeasureType, ReadWrite};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Model specific multimeter commands.
pub trait DmmDriver: Send {
    /// Registered driver name, e.g. `Siglent_SDM3055`.
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

    fn set_mode(&self, device: &mut GenericDevice, _measure: MeasureType) -> AppResult<()> {
        device.unimplemented("set_mode", Capability::Mandatory)
    }

    fn get_mode(&self, device: &mut GenericDevice) -> AppResult<MeasureType> {
        device.unimplemented("get_mode", Capability::Advisory)
    }

    /// Take one reading in the configured function.
    fn read(&self, device: &mut GenericDevice) -> AppResult<f64> {
        device.unimplemented("measure", Capability::Advisory)
    }
}

/// A connected multimeter.
pub struct Dmm {
    device: GenericDevice,
    driver: Box<dyn DmmDriver>,
    mode: Option<MeasureType>,
}

impl std::fmt::Debug for Dmm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dmm")
            .field("driver", &self.driver.name())
            .field("mode", &self.mode)
            .field("device", &self.device)
            .finish()
    }
}

impl Dmm {
    pub fn new(connection: Connection, info: Arc<DeviceInfo>, driver: Box<dyn DmmDriver>) -> AppResult<Self> {
        let device = GenericDevice::new(connection, info).with_opc_check(driver.opc_check());
        let mut dmm = Self {
            device,
            driver,
            mode: None,
        };
        dmm.driver.initialize(&mut dmm.device)?;
        Ok(dmm)
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    pub fn device_info(&self) -> &DeviceInfo {
        self.device.info()
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

    /// Multimeters register a single channel; anything else is `InvalidChannel`.
    pub fn check_channel_exists(&self, channel: Channel) -> AppResult<()> {
        self.device.check_channel_exists(channel)
    }

    pub fn operation_wait(&mut self, timeout: Option<Duration>) -> AppResult<()> {
        self.device.operation_wait(timeout)
    }

    pub fn reset_device(&mut self) -> AppResult<()> {
        self.driver.reset(&mut self.device)?;
        self.mode = None;
        Ok(())
    }

    pub fn set_mode(&mut self, measure: MeasureType) -> AppResult<()> {
        self.driver.set_mode(&mut self.device, measure)?;
        self.mode = Some(measure);
        Ok(())
    }

    /// Query the configured function and refresh the cache.
    pub fn get_mode(&mut self) -> AppResult<MeasureType> {
        let measure = self.driver.get_mode(&mut self.device)?;
        self.mode = Some(measure);
        Ok(measure)
    }

    /// Measure `measure`, switching function first when needed.
    pub fn measure(&mut self, measure: MeasureType) -> AppResult<f64> {
        if self.mode != Some(measure) {
            debug!(driver = self.driver.name(), ?measure, "Switching measurement function");
            self.set_mode(measure)?;
        }
        self.driver.read(&mut self.device)
    }

    /// Close the connection. A meter has no output to make safe.
    pub fn shutdown(&mut self) {
        self.device.close();
    }
}

impl Drop for Dmm {
    fn drop(&mut self) {
        self.shutdown();
    }
}
