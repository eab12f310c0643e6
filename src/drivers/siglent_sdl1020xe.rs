//! Siglent SDL1020X-E DC electronic load.
//!
//! Shares the load dialect of the Keithley 2380 except for input control,
//! which takes a `:INP` prefix, and the slew rate, which is set in A/µs and
//! cannot be read back.

use super::{func_keyword, get_load_value, measure_dc, parse_func_response, set_load_value};
use crate::device::GenericDevice;
use crate::eload::EloadDriver;
use crate::error::{AppResult, InstrumentError};
use crate::instrument::{Channel, DeviceType, EloadMode, EloadSlewRate, MeasureType, State};
use crate::registry::{DeviceRegistry, DriverFactory, DriverRegistration};

pub struct SiglentSdl1020xe;

pub fn register(registry: &mut DeviceRegistry) -> AppResult<()> {
    registry.add(
        DriverRegistration::new(
            DeviceType::Eload,
            "siglent",
            "sdl1020xe",
            DriverFactory::Eload(build),
        )
        .channels(&[Channel::Ch1]),
    )
}

fn build() -> Box<dyn EloadDriver> {
    Box::new(SiglentSdl1020xe)
}

impl EloadDriver for SiglentSdl1020xe {
    fn name(&self) -> &'static str {
        "Siglent_SDL1020XE"
    }

    fn reset(&self, device: &mut GenericDevice) -> AppResult<()> {
        device.write("*RST")
    }

    fn enable_output(&self, device: &mut GenericDevice, _channel: Channel) -> AppResult<()> {
        device.write(":INP ON")
    }

    fn disable_output(&self, device: &mut GenericDevice, _channel: Channel) -> AppResult<()> {
        device.write(":INP OFF")
    }

    fn get_output_state(&self, device: &mut GenericDevice, _channel: Channel) -> AppResult<State> {
        let response = device.query(":INP?")?;
        if response.contains('1') {
            Ok(State::On)
        } else if response.contains('0') {
            Ok(State::Off)
        } else {
            Err(InstrumentError::malformed(&response, "expected 1 or 0"))
        }
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

    /// Always returns 0.0: the applied rate cannot be queried.
    fn set_slew_rate(
        &self,
        device: &mut GenericDevice,
        rate: EloadSlewRate,
        amps_per_ms: f64,
        _channel: Channel,
    ) -> AppResult<f64> {
        match rate {
            EloadSlewRate::Fastest => device.write("CURR:SLEW MAX")?,
            EloadSlewRate::Slowest => device.write("CURR:SLEW MIN")?,
            EloadSlewRate::Custom => device.write(&format!("CURR:SLEW {}", amps_per_ms * 1000.0))?,
        }
        Ok(0.0)
    }

    fn measure(&self, device: &mut GenericDevice, measure: MeasureType, _channel: Channel) -> AppResult<f64> {
        measure_dc(device, measure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockOpener;
    use crate::connection::{Connection, ConnectionOptions};
    use crate::eload::Eload;
    use crate::error::InstrumentError;
    use crate::instrument::ConnectionType;

    fn simulated() -> Eload {
        let mut registry = DeviceRegistry::new();
        register(&mut registry).unwrap();
        let connection = Connection::open(
            "192.168.1.40",
            ConnectionType::Ethernet,
            ConnectionOptions::default()
                .with_simulated(true)
                .with_forced_driver("Siglent_SDL1020XE"),
            &registry,
            &MockOpener::refusing(),
        )
        .unwrap();
        let info = registry.device_info("siglent", "sdl1020xe").unwrap();
        Eload::new(connection, info, Box::new(SiglentSdl1020xe)).unwrap()
    }

    #[test]
    fn test_input_prefix_and_slew() {
        let mut eload = simulated();
        let log = eload.transport_log().unwrap();

        eload.enable_output(Channel::Ch1).unwrap();
        let reported = eload
            .set_slew_rate(EloadSlewRate::Custom, 0.5, Channel::Ch1)
            .unwrap();
        assert_eq!(reported, 0.0);
        assert_eq!(log.writes(), vec![":INP ON".to_string(), "CURR:SLEW 500".to_string()]);
    }

    #[test]
    fn test_undefined_mode_rejected() {
        let mut eload = simulated();
        assert!(matches!(
            eload.set_load(EloadMode::Undefined, 1.0, Channel::Ch1),
            Err(InstrumentError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unsupported_measure_is_soft() {
        let mut eload = simulated();
        let err = eload.measure(MeasureType::Frequency, Channel::Ch1).unwrap_err();
        assert!(!err.is_critical());
    }
}
