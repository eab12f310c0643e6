//! B&K Precision 9141 triple-output power supply.
//!
//! Most commands act on the currently selected output, so every channel
//! operation selects its channel first with `INST:SEL` (zero based).

use super::unsupported_measure;
use crate::device::GenericDevice;
use crate::error::{AppResult, InstrumentError};
use crate::instrument::{Channel, DeviceType, MeasureType, State};
use crate::psu::PsuDriver;
use crate::registry::{DeviceRegistry, DriverFactory, DriverRegistration};

pub struct Bk9141;

pub fn register(registry: &mut DeviceRegistry) -> AppResult<()> {
    registry.add(
        DriverRegistration::new(DeviceType::Psu, "bk", "9141", DriverFactory::Psu(build))
            .channels(&[Channel::Ch1, Channel::Ch2, Channel::Ch3]),
    )
}

fn build() -> Box<dyn PsuDriver> {
    Box::new(Bk9141)
}

fn select(device: &mut GenericDevice, channel: Channel) -> AppResult<()> {
    device.write(&format!("INST:SEL {}", channel.number() - 1))
}

impl PsuDriver for Bk9141 {
    fn name(&self) -> &'static str {
        "BK_9141"
    }

    fn reset(&self, device: &mut GenericDevice) -> AppResult<()> {
        device.write("*RST")
    }

    fn enable_output(&self, device: &mut GenericDevice, channel: Channel) -> AppResult<()> {
        select(device, channel)?;
        device.write("OUTP:STAT ON")
    }

    fn disable_output(&self, device: &mut GenericDevice, channel: Channel) -> AppResult<()> {
        select(device, channel)?;
        device.write("OUTP:STAT OFF")
    }

    fn get_output_state(&self, device: &mut GenericDevice, channel: Channel) -> AppResult<State> {
        let response = device.query(&format!("OUTP? CH{}", channel.number()))?;
        let upper = response.to_uppercase();
        if upper.contains("ON") {
            Ok(State::On)
        } else if upper.contains("OFF") {
            Ok(State::Off)
        } else {
            Err(InstrumentError::malformed(&response, "expected ON or OFF"))
        }
    }

    fn set_voltage(&self, device: &mut GenericDevice, volts: f64, channel: Channel) -> AppResult<()> {
        select(device, channel)?;
        device.write(&format!("VOLT {}", volts))
    }

    fn get_voltage(&self, device: &mut GenericDevice, channel: Channel) -> AppResult<f64> {
        select(device, channel)?;
        device.query_f64("VOLT?")
    }

    fn set_current(&self, device: &mut GenericDevice, amps: f64, channel: Channel) -> AppResult<()> {
        select(device, channel)?;
        device.write(&format!("CURR {}", amps))
    }

    fn get_current(&self, device: &mut GenericDevice, channel: Channel) -> AppResult<f64> {
        select(device, channel)?;
        device.query_f64("CURR?")
    }

    fn set_remote_sense(&self, device: &mut GenericDevice, state: State, channel: Channel) -> AppResult<()> {
        select(device, channel)?;
        device.write(&format!("VOLT:SENS {}", state.scpi()))
    }

    fn measure(&self, device: &mut GenericDevice, measure: MeasureType, channel: Channel) -> AppResult<f64> {
        let command = match measure {
            MeasureType::Voltage => "MEAS:VOLT:DC?",
            MeasureType::Current => "MEAS:CURR:DC?",
            MeasureType::Power => "MEAS:POW:DC?",
            other => return unsupported_measure(device, other),
        };
        select(device, channel)?;
        device.query_f64(command)
    }
}
