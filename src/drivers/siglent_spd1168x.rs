//! Siglent SPD1168X single-output power supply.
//!
//! Has no reset command and no OVP, OCP or remote sense.

use super::unsupported_measure;
use crate::device::GenericDevice;
use crate::error::{AppResult, InstrumentError};
use crate::instrument::{Channel, DeviceType, MeasureType, State};
use crate::psu::PsuDriver;
use crate::registry::{DeviceRegistry, DriverFactory, DriverRegistration};

pub struct SiglentSpd1168x;

pub fn register(registry: &mut DeviceRegistry) -> AppResult<()> {
    registry.add(
        DriverRegistration::new(
            DeviceType::Psu,
            "siglent",
            "spd1168x",
            DriverFactory::Psu(build),
        )
        .channels(&[Channel::Ch1]),
    )
}

fn build() -> Box<dyn PsuDriver> {
    Box::new(SiglentSpd1168x)
}

/// Output state is bit 4 of the hex `SYST:STAT?` word.
fn output_state_from_status(response: &str) -> AppResult<State> {
    let trimmed = response.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let word = u32::from_str_radix(digits, 16)
        .map_err(|_| InstrumentError::malformed(response, "expected a hex status word"))?;
    let bits = format!("{:08b}", word);
    match bits.as_bytes().get(3) {
        Some(b'1') => Ok(State::On),
        _ => Ok(State::Off),
    }
}

impl PsuDriver for SiglentSpd1168x {
    fn name(&self) -> &'static str {
        "Siglent_SPD1168X"
    }

    /// Output on at 0 V and 0 A.
    fn reset(&self, device: &mut GenericDevice) -> AppResult<()> {
        let channels: Vec<Channel> = device.info().available_channels.iter().copied().collect();
        for channel in channels {
            self.enable_output(device, channel)?;
            self.set_voltage(device, 0.0, channel)?;
            self.set_current(device, 0.0, channel)?;
        }
        Ok(())
    }

    fn enable_output(&self, device: &mut GenericDevice, channel: Channel) -> AppResult<()> {
        device.write(&format!("OUTP CH{},ON", channel.number()))
    }

    fn disable_output(&self, device: &mut GenericDevice, channel: Channel) -> AppResult<()> {
        device.write(&format!("OUTP CH{},OFF", channel.number()))
    }

    fn get_output_state(&self, device: &mut GenericDevice, _channel: Channel) -> AppResult<State> {
        let response = device.query("SYST:STAT?")?;
        output_state_from_status(&response)
    }

    fn set_voltage(&self, device: &mut GenericDevice, volts: f64, channel: Channel) -> AppResult<()> {
        device.write(&format!("CH{}:VOLT {}", channel.number(), volts))
    }

    fn get_voltage(&self, device: &mut GenericDevice, channel: Channel) -> AppResult<f64> {
        device.query_f64(&format!("CH{}:VOLT?", channel.number()))
    }

    fn set_current(&self, device: &mut GenericDevice, amps: f64, channel: Channel) -> AppResult<()> {
        device.write(&format!("CH{}:CURR {}", channel.number(), amps))
    }

    fn get_current(&self, device: &mut GenericDevice, channel: Channel) -> AppResult<f64> {
        device.query_f64(&format!("CH{}:CURR?", channel.number()))
    }

    fn measure(&self, device: &mut GenericDevice, measure: MeasureType, channel: Channel) -> AppResult<f64> {
        let keyword = match measure {
            MeasureType::Voltage => "VOLT",
            MeasureType::Current => "CURR",
            MeasureType::Power => "POWE",
            other => return unsupported_measure(device, other),
        };
        device.query_f64(&format!("MEAS:{}? CH{}", keyword, channel.number()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockOpener, MockTransport};
    use crate::connection::{Connection, ConnectionOptions};
    use crate::instrument::ConnectionType;
    use crate::psu::Psu;

    fn psu(transport: MockTransport) -> Psu {
        let mut registry = DeviceRegistry::new();
        register(&mut registry).unwrap();
        let opener = MockOpener::once(
            transport.with_response("*IDN?", "Siglent Technologies,SPD1168X,SPD13DCC4R0081,1.01.01.01.05"),
        );
        let connection = Connection::open(
            "USB0::0xF4EC::0x1410::SPD13DCC4R0081::INSTR",
            ConnectionType::Raw,
            ConnectionOptions::default(),
            &registry,
            &opener,
        )
        .unwrap();
        let info = registry.device_info("siglent", "spd1168x").unwrap();
        Psu::new(connection, info, Box::new(SiglentSpd1168x)).unwrap()
    }

    #[test]
    fn test_status_word_bit_four() {
        assert_eq!(output_state_from_status("0x10").unwrap(), State::On);
        assert_eq!(output_state_from_status("10").unwrap(), State::On);
        assert_eq!(output_state_from_status("0x0C").unwrap(), State::Off);
        assert!(output_state_from_status("zz").is_err());
    }

    #[test]
    fn test_command_dialect() {
        let transport = MockTransport::new()
            .with_response("MEAS:VOLT? CH1", "3.300")
            .with_response("SYST:STAT?", "0x10");
        let log = transport.exchange_log();
        let mut psu = psu(transport);

        psu.set_voltage(3.3, Channel::Ch1).unwrap();
        psu.enable_output(Channel::Ch1).unwrap();
        assert_eq!(psu.measure(MeasureType::Voltage, Channel::Ch1).unwrap(), 3.3);
        assert_eq!(psu.get_output_state(Channel::Ch1).unwrap(), State::On);
        assert_eq!(
            log.writes(),
            vec!["CH1:VOLT 3.3".to_string(), "OUTP CH1,ON".to_string()]
        );
    }

    #[test]
    fn test_reset_ends_with_output_off() {
        let transport = MockTransport::new();
        let log = transport.exchange_log();
        let mut psu = psu(transport);
        log.clear();

        psu.reset_device().unwrap();
        let writes = log.writes();
        assert_eq!(writes.first().map(String::as_str), Some("OUTP CH1,ON"));
        assert!(writes.contains(&"OUTP CH1,OFF".to_string()));
        assert_eq!(writes.last().map(String::as_str), Some("CH1:CURR 0"));
    }

    #[test]
    fn test_protection_is_advisory() {
        let mut psu = psu(MockTransport::new());
        let err = psu.set_ovp(12.0, Channel::Ch1).unwrap_err();
        assert!(!err.is_critical());
    }
}
