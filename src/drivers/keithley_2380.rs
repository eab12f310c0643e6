//! Keithley 2380 DC electronic load.

use super::{func_keyword, get_load_value, measure_dc, parse_func_response, set_load_value};
use crate::device::GenericDevice;
use crate::eload::EloadDriver;
use crate::error::AppResult;
use crate::instrument::{Channel, DeviceType, EloadMode, EloadSlewRate, MeasureType, State};
use crate::registry::{DeviceRegistry, DriverFactory, DriverRegistration};

pub struct Keithley2380;

pub fn register(registry: &mut DeviceRegistry) -> AppResult<()> {
    registry.add(
        DriverRegistration::new(DeviceType::Eload, "keithley", "2380", DriverFactory::Eload(build))
            .channels(&[Channel::Ch1]),
    )
}

fn build() -> Box<dyn EloadDriver> {
    Box::new(Keithley2380)
}

impl EloadDriver for Keithley2380 {
    fn name(&self) -> &'static str {
        "Keithley_2380"
    }

    fn reset(&self, device: &mut GenericDevice) -> AppResult<()> {
        device.write("*RST")
    }

    fn enable_output(&self, device: &mut GenericDevice, _channel: Channel) -> AppResult<()> {
        device.write("INP ON")
    }

    fn disable_output(&self, device: &mut GenericDevice, _channel: Channel) -> AppResult<()> {
        device.write("INP OFF")
    }

    fn get_output_state(&self, device: &mut GenericDevice, _channel: Channel) -> AppResult<State> {
        let response = device.query("INP?")?;
        Ok(if response.contains('1') { State::On } else { State::Off })
    }

    fn set_mode(&self, device: &mut GenericDevice, mode: EloadMode, _channel: Channel) -> AppResult<()> {
        let keyword = func_keyword(mode)?;
        device.write(&format!("FUNC {}", keyword))
    }

    fn get_mode(&self, device: &mut GenericDevice, _channel: Channel) -> AppResult<EloadMode> {
        let response = device.query("FUNC?")?;
        Ok(parse_func_response(&response))
    }

    fn set_load(&self, device: &mut GenericDevice, mode: EloadMode, value: f64, _channel: Channel) -> AppResult<()> {
        set_load_value(device, mode, value)
    }

    fn get_load(&self, device: &mut GenericDevice, mode: EloadMode, _channel: Channel) -> AppResult<f64> {
        get_load_value(device, mode)
    }

    fn set_remote_sense(&self, device: &mut GenericDevice, state: State, _channel: Channel) -> AppResult<()> {
        super::set_remote_sense(device, state)
    }

    /// Returns the rate read back from the load. In the slow range the load
    /// expects custom rates scaled by 1000.
    fn set_slew_rate(
        &self,
        device: &mut GenericDevice,
        rate: EloadSlewRate,
        amps_per_ms: f64,
        _channel: Channel,
    ) -> AppResult<f64> {
        match rate {
            EloadSlewRate::Fastest => {
                device.write("CURR:SLOW 0")?;
                device.write("CURR:SLEW MAX")?;
            }
            EloadSlewRate::Slowest => {
                device.write("CURR:SLOW 1")?;
                device.write("CURR:SLEW MAX")?;
            }
            EloadSlewRate::Custom => {
                let slow = device.query("CURR:SLOW:STAT?")?.contains('1');
                let value = if slow { amps_per_ms * 1000.0 } else { amps_per_ms };
                device.write(&format!("CURR:SLEW {}", value))?;
            }
        }
        device.query_f64("CURR:SLEW?")
    }

    fn measure(&self, device: &mut GenericDevice, measure: MeasureType, _channel: Channel) -> AppResult<f64> {
        measure_dc(device, measure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockOpener, MockTransport};
    use crate::connection::{Connection, ConnectionOptions};
    use crate::eload::Eload;
    use crate::instrument::ConnectionType;

    const IDN: &str = "Keithley instruments, Model 2380-120-60, 802436011727810007, 1.04-1.04";

    fn eload(transport: MockTransport) -> Eload {
        let mut registry = DeviceRegistry::new();
        register(&mut registry).unwrap();
        let opener = MockOpener::once(transport.with_response("*IDN?", IDN));
        let connection = Connection::open(
            "GPIB0::7::INSTR",
            ConnectionType::Raw,
            ConnectionOptions::default(),
            &registry,
            &opener,
        )
        .unwrap();
        let info = registry.device_info("keithley", "2380").unwrap();
        Eload::new(connection, info, Box::new(Keithley2380)).unwrap()
    }

    #[test]
    fn test_initial_mode_is_read() {
        let eload = eload(MockTransport::new().with_response("FUNC?", "RESISTANCE"));
        assert_eq!(eload.cached_mode(), EloadMode::Cr);
    }

    #[test]
    fn test_set_load_skips_redundant_func() {
        let transport = MockTransport::new().with_response("FUNC?", "CURRENT");
        let log = transport.exchange_log();
        let mut eload = eload(transport);

        eload.set_load(EloadMode::Cc, 1.5, Channel::Ch1).unwrap();
        eload.set_load(EloadMode::Cp, 20.0, Channel::Ch1).unwrap();
        assert_eq!(
            log.writes(),
            vec!["CURR 1.5".to_string(), "FUNC POW".to_string(), "POW 20".to_string()]
        );
        assert_eq!(eload.cached_mode(), EloadMode::Cp);
    }

    #[test]
    fn test_custom_slew_in_slow_range() {
        let transport = MockTransport::new()
            .with_response("CURR:SLOW:STAT?", "1")
            .with_response("CURR:SLEW?", "500");
        let log = transport.exchange_log();
        let mut eload = eload(transport);

        let reported = eload
            .set_slew_rate(EloadSlewRate::Custom, 0.5, Channel::Ch1)
            .unwrap();
        assert_eq!(reported, 500.0);
        assert!(log.writes().contains(&"CURR:SLEW 500".to_string()));
    }

    #[test]
    fn test_reset_leaves_constant_resistance() {
        let transport = MockTransport::new();
        let log = transport.exchange_log();
        let mut eload = eload(transport);
        log.clear();

        eload.reset_device().unwrap();
        assert_eq!(
            log.writes(),
            vec![
                "*RST".to_string(),
                "INP OFF".to_string(),
                "FUNC RES".to_string(),
                "RES 10000".to_string(),
                "SYST:SENS OFF".to_string(),
            ]
        );
    }
}
