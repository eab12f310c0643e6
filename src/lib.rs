//! Core library for vendor-neutral bench instrument control.
//!
//! Scripts talk to power supplies, electronic loads and multimeters through
//! category facades ([`Psu`], [`Eload`], [`Dmm`]) and never see vendor command
//! sets. Given a resource string, the library resolves the transport address,
//! opens the link (or simulates it), identifies the device and hands back the
//! facade backed by the registered driver for that model.
//!
//! Layers, bottom up:
//! - [`adapters`]: blocking transports (VISA, simulated, scripted mock)
//! - [`connection`]: lifecycle of one link, identification included
//! - [`registry`] and [`drivers`]: the catalog of supported models
//! - [`resolver`]: identified connection to category facade
//! - [`lab_assistant`]: setup entry points
//!
//! Ambient pieces live in [`config`], [`logging`] and [`error`].

pub mod adapters;
pub mod config;
pub mod connection;
pub mod device;
pub mod dmm;
pub mod drivers;
pub mod eload;
pub mod error;
pub mod identification;
pub mod instrument;
pub mod lab_assistant;
pub mod logging;
pub mod psu;
pub mod registry;
pub mod resolver;

pub use connection::{Connection, ConnectionOptions, ConnectionState};
pub use device::{parse_numeric_response, Capability, GenericDevice};
pub use dmm::{Dmm, DmmDriver};
pub use eload::{Eload, EloadDriver};
pub use error::{AppResult, InstrumentError};
pub use instrument::{
    Channel, ConnectionInfo, ConnectionType, DeviceInfo, DeviceType, EloadMode, EloadSlewRate,
    MeasureType, ReadWrite, State,
};
pub use lab_assistant::{LabAssistant, SetupOptions};
pub use psu::{Psu, PsuDriver};
pub use registry::DeviceRegistry;
pub use resolver::Device;
