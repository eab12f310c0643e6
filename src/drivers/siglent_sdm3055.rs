//! Siglent SDM3055 5½ digit multimeter.
//!
//! The meter does not implement `*OPC?`; a `*STB?` round trip serves as the
//! completion barrier instead.

use crate::device::{GenericDevice, OpcCheck};
use crate::dmm::DmmDriver;
use crate::error::{AppResult, InstrumentError};
use crate::instrument::{Channel, DeviceType, MeasureType};
use crate::registry::{DeviceRegistry, DriverFactory, DriverRegistration};

pub struct SiglentSdm3055;

pub fn register(registry: &mut DeviceRegistry) -> AppResult<()> {
    registry.add(
        DriverRegistration::new(DeviceType::Dmm, "siglent", "sdm3055", DriverFactory::Dmm(build))
            .channels(&[Channel::Ch1]),
    )
}

fn build() -> Box<dyn DmmDriver> {
    Box::new(SiglentSdm3055)
}

fn parse_conf_response(response: &str) -> MeasureType {
    let upper = response.to_uppercase();
    if upper.contains("VOLT") {
        if upper.contains("VOLT:AC") {
            MeasureType::VoltageAc
        } else {
            MeasureType::Voltage
        }
    } else if upper.contains("CURR") {
        if upper.contains("CURR:AC") {
            MeasureType::CurrentAc
        } else {
            MeasureType::Current
        }
    } else if upper.contains("FREQ") {
        MeasureType::Frequency
    } else if upper.contains("RES") {
        MeasureType::Resistance
    } else if upper.contains("CAP") {
        MeasureType::Capacitance
    } else {
        MeasureType::Undefined
    }
}

impl DmmDriver for SiglentSdm3055 {
    fn name(&self) -> &'static str {
        "Siglent_SDM3055"
    }

    fn opc_check(&self) -> OpcCheck {
        OpcCheck {
            command: "*STB?",
            complete: |_| true,
        }
    }

    /// One sample per trigger.
    fn initialize(&self, device: &mut GenericDevice) -> AppResult<()> {
        device.write("SAMP:COUN 1")
    }

    /// `SYST:PRES` keeps user configurations, unlike `*RST`.
    fn reset(&self, device: &mut GenericDevice) -> AppResult<()> {
        device.write("SYST:PRES")
    }

    fn set_mode(&self, device: &mut GenericDevice, measure: MeasureType) -> AppResult<()> {
        let command = match measure {
            MeasureType::VoltageAc => "CONF:VOLT:AC AUTO",
            MeasureType::Voltage => "CONF:VOLT:DC AUTO",
            MeasureType::CurrentAc => "CONF:CURR:AC AUTO",
            MeasureType::Current => "CONF:CURR:DC AUTO",
            MeasureType::Resistance => "CONF:RES AUTO",
            MeasureType::Frequency => "CONF:FREQ",
            MeasureType::Capacitance => "CONF:CAP AUTO",
            other => {
                return Err(InstrumentError::InvalidArgument(format!(
                    "{:?} is not measurable on {}",
                    other,
                    device.name()
                )))
            }
        };
        device.write(command)
    }

    fn get_mode(&self, device: &mut GenericDevice) -> AppResult<MeasureType> {
        let response = device.query("CONF?")?;
        Ok(parse_conf_response(&response))
    }

    fn read(&self, device: &mut GenericDevice) -> AppResult<f64> {
        device.query_f64("READ?")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockOpener, MockTransport};
    use crate::connection::{Connection, ConnectionOptions};
    use crate::dmm::Dmm;
    use crate::instrument::ConnectionType;
    use std::time::Duration;

    fn dmm(transport: MockTransport) -> Dmm {
        let mut registry = DeviceRegistry::new();
        register(&mut registry).unwrap();
        let opener = MockOpener::once(
            transport.with_response("*IDN?", "Siglent Technologies,SDM3055,SDM35FAC4R0253,1.01.01.25"),
        );
        let connection = Connection::open(
            "TCPIP::192.168.1.50::INSTR",
            ConnectionType::Raw,
            ConnectionOptions::default(),
            &registry,
            &opener,
        )
        .unwrap();
        let info = registry.device_info("siglent", "sdm3055").unwrap();
        Dmm::new(connection, info, Box::new(SiglentSdm3055)).unwrap()
    }

    #[test]
    fn test_conf_response_mapping() {
        assert_eq!(parse_conf_response("\"VOLT:AC +1.000000E+00,+1.000000E-06\""), MeasureType::VoltageAc);
        assert_eq!(parse_conf_response("\"VOLT +2.000000E+01\""), MeasureType::Voltage);
        assert_eq!(parse_conf_response("\"CURR:AC\""), MeasureType::CurrentAc);
        assert_eq!(parse_conf_response("\"FREQ\""), MeasureType::Frequency);
        assert_eq!(parse_conf_response("\"RES +2.0E+02\""), MeasureType::Resistance);
        assert_eq!(parse_conf_response("\"CAP\""), MeasureType::Capacitance);
        assert_eq!(parse_conf_response("\"TEMP\""), MeasureType::Undefined);
    }

    #[test]
    fn test_measure_switches_mode_once() {
        let transport = MockTransport::new().with_response("READ?", "+1.23456789E+00");
        let log = transport.exchange_log();
        let mut dmm = dmm(transport);

        assert_eq!(dmm.measure(MeasureType::Voltage).unwrap(), 1.23456789);
        dmm.measure(MeasureType::Voltage).unwrap();
        dmm.measure(MeasureType::Resistance).unwrap();
        assert_eq!(
            log.writes(),
            vec![
                "SAMP:COUN 1".to_string(),
                "CONF:VOLT:DC AUTO".to_string(),
                "CONF:RES AUTO".to_string(),
            ]
        );
    }

    #[test]
    fn test_status_byte_is_the_barrier() {
        let transport = MockTransport::new().with_response("*STB?", "16");
        let log = transport.exchange_log();
        let mut dmm = dmm(transport);

        dmm.operation_wait(Some(Duration::from_millis(500))).unwrap();
        assert_eq!(log.queries().last().map(String::as_str), Some("*STB?"));
    }

    #[test]
    fn test_reset_forgets_mode() {
        let transport = MockTransport::new().with_response("READ?", "0.5");
        let log = transport.exchange_log();
        let mut dmm = dmm(transport);

        dmm.measure(MeasureType::Current).unwrap();
        dmm.reset_device().unwrap();
        dmm.measure(MeasureType::Current).unwrap();
        let confs = log.writes().iter().filter(|w| w.starts_with("CONF:CURR")).count();
        assert_eq!(confs, 2);
    }
}
