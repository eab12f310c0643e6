//! Identification sweep against scripted transports.

use lab_assistant::adapters::{MockOpener, MockTransport};
use lab_assistant::registry::{DriverFactory, DriverRegistration};
use lab_assistant::{
    Connection, ConnectionOptions, ConnectionState, ConnectionType, DeviceRegistry, DeviceType,
    InstrumentError,
};
use tracing_test::traced_test;

fn open(transport: MockTransport, options: ConnectionOptions) -> (Connection, lab_assistant::AppResult<()>) {
    let opener = MockOpener::once(transport);
    let mut connection = Connection::new("GPIB0::12::INSTR", ConnectionType::Raw, options);
    let result = connection.establish(DeviceRegistry::global(), &opener);
    (connection, result)
}

#[test]
fn test_builtin_models_are_identified() {
    let cases = [
        ("Siglent Technologies,SPD1168X,SPD13DCC4R0081,1.01.01.01.05", ("siglent", "spd1168x")),
        ("B&K Precision, 9141, 802200010757120031, V1.81-V1.12", ("bk", "9141")),
        ("Keithley instruments, Model 2380-120-60, 802436011727810007, 1.04-1.04", ("keithley", "2380")),
        ("Siglent Technologies,SDL1020X-E,SDL13GCQ4R0105,1.1.1.21", ("siglent", "sdl1020xe")),
        ("Siglent Technologies,SDM3055,SDM35FAC4R0253,1.01.01.25", ("siglent", "sdm3055")),
        ("LECROY,HDO6104,LCRY3702N14729,7.7.0", ("lecroy", "hdo6104")),
    ];
    for (idn, (manufacturer, model)) in cases {
        let (connection, result) = open(
            MockTransport::new().with_response("*IDN?", idn),
            ConnectionOptions::default(),
        );
        result.unwrap();
        assert_eq!(
            connection.manufacturer_model().unwrap(),
            (manufacturer.to_string(), model.to_string()),
            "identifying '{}'",
            idn
        );
    }
}

#[test]
fn test_unmatched_sweep_fails_connection() {
    let (connection, result) = open(
        MockTransport::new().with_response("*IDN?", "RIGOL TECHNOLOGIES,DS1054Z,DS1ZA0000,00.04.04"),
        ConnectionOptions::default(),
    );
    assert!(matches!(result, Err(InstrumentError::IdentificationFailed { .. })));
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert!(matches!(connection.manufacturer_model(), Err(InstrumentError::NotIdentified)));
}

#[test]
fn test_silent_device_fails_connection() {
    let transport = MockTransport::new();
    let log = transport.exchange_log();
    let (connection, result) = open(transport, ConnectionOptions::default());
    assert!(matches!(result, Err(InstrumentError::IdentificationFailed { .. })));
    assert_eq!(connection.state(), ConnectionState::Failed);
    // a transport error moves straight on rather than retrying
    assert_eq!(log.queries(), vec!["*IDN?".to_string()]);
}

#[test]
fn test_failed_connection_cannot_be_retried() {
    let (mut connection, result) = open(MockTransport::new(), ConnectionOptions::default());
    assert!(result.is_err());
    assert!(matches!(
        connection.identify(DeviceRegistry::global()),
        Err(InstrumentError::NotConnected(_))
    ));
}

#[test]
fn test_second_id_command_is_tried() {
    let mut registry = DeviceRegistry::new();
    registry
        .add(
            DriverRegistration::new(
                DeviceType::Scope,
                "siglent",
                "sds1104xe",
                DriverFactory::IdentityOnly(DeviceType::Scope),
            ),
        )
        .unwrap();
    registry
        .add(
            DriverRegistration::new(
                DeviceType::Dmm,
                "hp",
                "3458a",
                DriverFactory::IdentityOnly(DeviceType::Dmm),
            )
            .id_command("ID?"),
        )
        .unwrap();

    let transport = MockTransport::new().with_response("ID?", "HP 3458A");
    let log = transport.exchange_log();
    let connection = Connection::open(
        "GPIB0::22::INSTR",
        ConnectionType::Raw,
        ConnectionOptions::default(),
        &registry,
        &MockOpener::once(transport),
    )
    .unwrap();

    assert_eq!(
        connection.manufacturer_model().unwrap(),
        ("hp".to_string(), "3458a".to_string())
    );
    assert_eq!(log.queries(), vec!["*IDN?".to_string(), "ID?".to_string()]);
}

#[test]
#[traced_test]
fn test_forced_driver_wins_over_mismatch() {
    let transport = MockTransport::new().with_response("*IDN?", "B&K Precision, 9141, 8022, V1.81");
    let log = transport.exchange_log();
    let (connection, result) = open(
        transport,
        ConnectionOptions::default().with_forced_driver("Siglent_SPD1168X"),
    );
    result.unwrap();
    assert_eq!(
        connection.manufacturer_model().unwrap(),
        ("siglent".to_string(), "spd1168x".to_string())
    );
    assert_eq!(log.queries().len(), 1);
    assert!(logs_contain("Forced driver does not match the connected device"));
}

#[test]
fn test_forced_driver_must_be_registered() {
    let (connection, result) = open(
        MockTransport::new(),
        ConnectionOptions::default().with_forced_driver("Acme_PS9000"),
    );
    assert!(matches!(result, Err(InstrumentError::UnknownDevice { .. })));
    assert_eq!(connection.state(), ConnectionState::Failed);
}

#[test]
#[traced_test]
fn test_auto_simulate_fallback() {
    let connection = Connection::open(
        "10.0.0.99",
        ConnectionType::Ethernet,
        ConnectionOptions::default()
            .with_auto_simulate(true)
            .with_forced_driver("Keithley_2380"),
        DeviceRegistry::global(),
        &MockOpener::refusing(),
    )
    .unwrap();
    assert!(connection.is_simulated());
    assert_eq!(connection.info().resource, "TCPIP::10.0.0.99::INSTR");
    assert!(logs_contain("falling back to simulation"));
}
