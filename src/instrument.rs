//! Vendor-neutral vocabulary shared by every layer.
//!
//! These are plain data types: what kind of device something is, how to reach
//! it, which channels it has and what a measurement means. Nothing here talks
//! to hardware.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Category of a bench instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceType {
    /// DC power supply
    Psu,
    /// Oscilloscope
    Scope,
    /// Electronic load
    Eload,
    /// Function generator
    FuncGen,
    /// Digital multimeter
    Dmm,
    /// Not yet known
    Undefined,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Psu => "Power Supply",
            DeviceType::Scope => "Oscilloscope",
            DeviceType::Eload => "Electronic Load",
            DeviceType::FuncGen => "Function Generator",
            DeviceType::Dmm => "Digital Multimeter",
            DeviceType::Undefined => "Undefined",
        };
        f.write_str(name)
    }
}

/// How the resource string should be turned into a transport address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionType {
    /// Bare host or IP; wrapped as `TCPIP::<host>::INSTR`
    Ethernet,
    /// Already a full transport address, used as-is
    #[default]
    Raw,
    /// No strategy; rejected when the port is resolved
    Undefined,
}

/// Output channel of a multi-channel instrument. The first channel is `Ch1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    #[allow(missing_docs)]
    Ch1,
    #[allow(missing_docs)]
    Ch2,
    #[allow(missing_docs)]
    Ch3,
    #[allow(missing_docs)]
    Ch4,
    #[allow(missing_docs)]
    Ch5,
    #[allow(missing_docs)]
    Ch6,
    #[allow(missing_docs)]
    Ch7,
    #[allow(missing_docs)]
    Ch8,
}

impl Channel {
    /// All channels in order.
    pub const ALL: [Channel; 8] = [
        Channel::Ch1,
        Channel::Ch2,
        Channel::Ch3,
        Channel::Ch4,
        Channel::Ch5,
        Channel::Ch6,
        Channel::Ch7,
        Channel::Ch8,
    ];

    /// One-based channel number as used in most SCPI dialects.
    pub fn number(self) -> u8 {
        match self {
            Channel::Ch1 => 1,
            Channel::Ch2 => 2,
            Channel::Ch3 => 3,
            Channel::Ch4 => 4,
            Channel::Ch5 => 5,
            Channel::Ch6 => 6,
            Channel::Ch7 => 7,
            Channel::Ch8 => 8,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.number())
    }
}

/// Direction of a command exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadWrite {
    /// Send and wait for a response
    Read,
    /// Send without reading
    Write,
    /// Decide from the command text
    #[default]
    Auto,
}

impl ReadWrite {
    /// Resolve `Auto` against the command text.
    ///
    /// A command whose header ends in `?` is a query, including headers that
    /// carry arguments such as `MEAS:VOLT? CH1`. Anything else is a write.
    pub fn resolve(self, command: &str) -> ReadWrite {
        match self {
            ReadWrite::Auto => {
                let header = command.split_whitespace().next().unwrap_or("");
                if command.trim_end().ends_with('?') || header.ends_with('?') {
                    ReadWrite::Read
                } else {
                    ReadWrite::Write
                }
            }
            other => other,
        }
    }
}

/// Quantity to measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasureType {
    #[allow(missing_docs)]
    Voltage,
    #[allow(missing_docs)]
    Current,
    #[allow(missing_docs)]
    Power,
    #[allow(missing_docs)]
    VoltageAc,
    #[allow(missing_docs)]
    CurrentAc,
    #[allow(missing_docs)]
    PowerAc,
    #[allow(missing_docs)]
    Resistance,
    /// Four-wire resistance
    Resistance4W,
    #[allow(missing_docs)]
    Capacitance,
    #[allow(missing_docs)]
    Frequency,
    #[allow(missing_docs)]
    Undefined,
}

impl MeasureType {
    /// Unit symbol of the measured quantity.
    pub fn unit(self) -> &'static str {
        match self {
            MeasureType::Voltage => "V",
            MeasureType::Current => "A",
            MeasureType::Power | MeasureType::PowerAc => "W",
            MeasureType::VoltageAc => "Vrms",
            MeasureType::CurrentAc => "Arms",
            MeasureType::Resistance | MeasureType::Resistance4W => "OHM",
            MeasureType::Capacitance => "F",
            MeasureType::Frequency => "Hz",
            MeasureType::Undefined => "Undefined",
        }
    }
}

/// On/off state of an output or feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    #[allow(missing_docs)]
    On,
    #[allow(missing_docs)]
    Off,
    /// State could not be resolved
    Undefined,
}

impl State {
    /// SCPI keyword for this state. `Undefined` maps to `OFF`.
    pub fn scpi(self) -> &'static str {
        match self {
            State::On => "ON",
            State::Off | State::Undefined => "OFF",
        }
    }
}

/// Regulation mode of an electronic load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EloadMode {
    /// Constant resistance
    Cr,
    /// Constant power
    Cp,
    /// Constant voltage
    Cv,
    /// Constant current
    Cc,
    #[allow(missing_docs)]
    Undefined,
}

/// Current slew rate selection for an electronic load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EloadSlewRate {
    /// Fastest rate the device supports
    Fastest,
    /// Slowest rate the device supports
    Slowest,
    /// Caller supplied rate in A/ms
    Custom,
}

/// Generic connection info for a device. Immutable once a connection is built.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionInfo {
    /// Transport address after port resolution
    pub resource: String,
    /// Address resolution strategy
    pub connection_type: ConnectionType,
    /// Identified or caller supplied (manufacturer, model)
    pub manf_model: Option<(String, String)>,
    /// Log every exchange at INFO
    pub debug_enabled: bool,
    /// Never open a real transport
    pub simulated: bool,
    /// Driver to use regardless of identification, e.g. `Siglent_SPD1168X`
    pub forced_driver: Option<String>,
}

/// Static description of a registered device model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device category
    pub device_type: DeviceType,
    /// Lowercase manufacturer key
    pub manufacturer: String,
    /// Lowercase model key
    pub model: String,
    /// Identification query, typically `*IDN?`
    pub id_command: String,
    /// Channels present on the device
    pub available_channels: BTreeSet<Channel>,
}

impl DeviceInfo {
    /// `manufacturer model`, for log lines and error messages.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.manufacturer, self.model)
    }
}
