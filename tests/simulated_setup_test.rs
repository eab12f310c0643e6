//! End-to-end setup of simulated instruments through `LabAssistant`.

use lab_assistant::adapters::ExchangeKind;
use lab_assistant::{
    Channel, Device, DeviceType, EloadMode, InstrumentError, LabAssistant, MeasureType,
    SetupOptions, State,
};
use std::time::Duration;
use tracing_test::traced_test;

fn assistant() -> LabAssistant {
    LabAssistant::new()
}

#[test]
fn test_psu_set_then_measure() {
    let mut psu = assistant()
        .setup_psu(
            "192.168.1.30",
            SetupOptions::simulated()
                .with_connection_type(lab_assistant::ConnectionType::Ethernet)
                .with_forced_driver("Siglent_SPD1168X"),
        )
        .unwrap();
    assert!(psu.is_simulated());
    assert_eq!(psu.driver_name(), "Siglent_SPD1168X");

    psu.set_voltage(3.3, Channel::Ch1).unwrap();
    let volts = psu.measure(MeasureType::Voltage, Channel::Ch1).unwrap();
    assert!((0.0..=1.0).contains(&volts));

    let entries = psu.transport_log().unwrap().entries();
    let write = entries
        .iter()
        .position(|e| e.kind == ExchangeKind::Write && e.command.contains("3.3"))
        .expect("voltage write logged");
    let query = entries
        .iter()
        .position(|e| e.kind == ExchangeKind::Query && e.command == "MEAS:VOLT? CH1")
        .expect("measure query logged");
    assert!(write < query);
}

#[test]
fn test_psu_rejects_missing_channel_without_io() {
    let mut psu = assistant()
        .setup_psu("sim", SetupOptions::simulated().with_forced_driver("Siglent_SPD1168X"))
        .unwrap();
    let log = psu.transport_log().unwrap();
    let before = log.len();

    let result = psu.set_voltage(5.0, Channel::Ch2);
    assert!(matches!(result, Err(InstrumentError::InvalidChannel { channel: Channel::Ch2, .. })));
    assert_eq!(log.len(), before);
}

#[test]
fn test_psu_reset_on_triple_output() {
    let mut psu = assistant()
        .setup_psu("sim", SetupOptions::simulated().with_forced_driver("BK_9141"))
        .unwrap();
    assert_eq!(psu.channels(), vec![Channel::Ch1, Channel::Ch2, Channel::Ch3]);
    psu.reset_device().unwrap();
    psu.set_output_state(State::On, Channel::Ch3).unwrap();
    psu.operation_wait(Some(Duration::from_millis(500))).unwrap();
}

#[test]
fn test_eload_mode_switch_is_sent_once() {
    let mut eload = assistant()
        .setup_eload("sim", SetupOptions::simulated().with_forced_driver("Keithley_2380"))
        .unwrap();
    let log = eload.transport_log().unwrap();
    assert_eq!(eload.cached_mode(), EloadMode::Undefined);

    eload.set_load(EloadMode::Cc, 1.0, Channel::Ch1).unwrap();
    eload.set_load(EloadMode::Cc, 2.0, Channel::Ch1).unwrap();
    assert_eq!(eload.cached_mode(), EloadMode::Cc);

    let writes = log.writes();
    assert_eq!(writes.iter().filter(|w| w.as_str() == "FUNC CURR").count(), 1);
    assert!(writes.ends_with(&["CURR 1".to_string(), "CURR 2".to_string()]));
}

#[test]
fn test_dmm_measure_on_simulated_meter() {
    let mut dmm = assistant()
        .setup_dmm("sim", SetupOptions::simulated().with_forced_driver("Siglent_SDM3055"))
        .unwrap();
    let value = dmm.measure(MeasureType::Resistance).unwrap();
    assert!((0.0..=1.0).contains(&value));
    assert!(dmm
        .transport_log()
        .unwrap()
        .writes()
        .contains(&"CONF:RES AUTO".to_string()));
}

#[test]
fn test_generic_setup_reports_category() {
    let device = assistant()
        .setup(
            "sim",
            DeviceType::Eload,
            SetupOptions::simulated().with_identity("Siglent", "SDL1020XE"),
        )
        .unwrap();
    assert_eq!(device.device_type(), DeviceType::Eload);
    assert_eq!(device.driver_name(), "Siglent_SDL1020XE");
    assert!(matches!(device, Device::Eload(_)));
}

#[test]
fn test_dropping_facade_closes_link() {
    let psu = assistant()
        .setup_psu("sim", SetupOptions::simulated().with_forced_driver("Siglent_SPD1168X"))
        .unwrap();
    let log = psu.transport_log().unwrap();
    drop(psu);
    assert_eq!(log.writes().last().map(String::as_str), Some("OUTP CH1,OFF"));
}

fn exchange_at_info(lines: &[&str]) -> bool {
    lines
        .iter()
        .any(|line| line.contains(" INFO ") && line.contains("exchange") && line.contains("VOLT"))
}

#[test]
#[traced_test]
fn test_debug_logs_exchanges_at_info() {
    let mut psu = assistant()
        .setup_psu(
            "sim",
            SetupOptions::simulated()
                .with_forced_driver("Siglent_SPD1168X")
                .with_debug(true),
        )
        .unwrap();
    psu.set_voltage(1.5, Channel::Ch1).unwrap();
    logs_assert(|lines: &[&str]| {
        if exchange_at_info(lines) {
            Ok(())
        } else {
            Err("no INFO exchange event".to_string())
        }
    });
}

#[test]
#[traced_test]
fn test_quiet_exchanges_stay_below_info() {
    let mut psu = assistant()
        .setup_psu("sim", SetupOptions::simulated().with_forced_driver("Siglent_SPD1168X"))
        .unwrap();
    psu.set_voltage(1.5, Channel::Ch1).unwrap();
    assert!(logs_contain("exchange"));
    logs_assert(|lines: &[&str]| {
        if exchange_at_info(lines) {
            Err("exchange logged at INFO without debug".to_string())
        } else {
            Ok(())
        }
    });
}
