//! Driver resolution.
//!
//! Turns an identified connection into a category facade by looking up the
//! registered factory for `(device_type, manufacturer, model)`. This is the
//! one place unsupported hardware is reported.

use crate::connection::Connection;
use crate::dmm::Dmm;
use crate::eload::Eload;
use crate::error::{AppResult, InstrumentError};
use crate::instrument::{DeviceInfo, DeviceType};
use crate::psu::Psu;
use crate::registry::{parse_forced_driver, DeviceRegistry, DriverFactory};
use tracing::{info, warn};

/// A resolved device of any supported category.
#[derive(Debug)]
pub enum Device {
    Psu(Psu),
    Eload(Eload),
    Dmm(Dmm),
}

impl Device {
    pub fn device_type(&self) -> DeviceType {
        match self {
            Device::Psu(_) => DeviceType::Psu,
            Device::Eload(_) => DeviceType::Eload,
            Device::Dmm(_) => DeviceType::Dmm,
        }
    }

    pub fn driver_name(&self) -> &'static str {
        match self {
            Device::Psu(psu) => psu.driver_name(),
            Device::Eload(eload) => eload.driver_name(),
            Device::Dmm(dmm) => dmm.driver_name(),
        }
    }

    pub fn device_info(&self) -> &DeviceInfo {
        match self {
            Device::Psu(psu) => psu.device_info(),
            Device::Eload(eload) => eload.device_info(),
            Device::Dmm(dmm) => dmm.device_info(),
        }
    }

    pub fn into_psu(self) -> AppResult<Psu> {
        match self {
            Device::Psu(psu) => Ok(psu),
            other => Err(other.wrong_category(DeviceType::Psu)),
        }
    }

    pub fn into_eload(self) -> AppResult<Eload> {
        match self {
            Device::Eload(eload) => Ok(eload),
            other => Err(other.wrong_category(DeviceType::Eload)),
        }
    }

    pub fn into_dmm(self) -> AppResult<Dmm> {
        match self {
            Device::Dmm(dmm) => Ok(dmm),
            other => Err(other.wrong_category(DeviceType::Dmm)),
        }
    }

    fn wrong_category(&self, wanted: DeviceType) -> InstrumentError {
        let info = self.device_info();
        InstrumentError::UnknownDevice {
            device_type: wanted,
            manufacturer: info.manufacturer.clone(),
            model: info.model.clone(),
        }
    }
}

/// Build the `device_type` facade for an identified connection.
///
/// A forced driver names the identity directly; otherwise the identified
/// `(manufacturer, model)` is used. A model registered under another category
/// is reported as `UnknownDevice`, with the real category in the log.
pub fn resolve(
    registry: &DeviceRegistry,
    device_type: DeviceType,
    connection: Connection,
) -> AppResult<Device> {
    let (manufacturer, model) = match connection.info().forced_driver.as_deref() {
        Some(forced) => {
            let pair = parse_forced_driver(forced)?;
            registry.device_info(&pair.0, &pair.1)?;
            pair
        }
        None => connection.manufacturer_model()?,
    };

    let registration = match registry.driver(device_type, &manufacturer, &model) {
        Ok(registration) => registration,
        Err(e) => {
            if let Some(actual) = registry.find(&manufacturer, &model) {
                warn!(
                    manufacturer = manufacturer.as_str(),
                    model = model.as_str(),
                    requested = %device_type,
                    actual = %actual.info.device_type,
                    "Device is registered under a different category"
                );
            }
            return Err(e);
        }
    };

    let info = registration.info.clone();
    let device = match registration.factory {
        DriverFactory::Psu(build) => Device::Psu(Psu::new(connection, info, build())?),
        DriverFactory::Eload(build) => Device::Eload(Eload::new(connection, info, build())?),
        DriverFactory::Dmm(build) => Device::Dmm(Dmm::new(connection, info, build())?),
        DriverFactory::IdentityOnly(_) => {
            return Err(InstrumentError::UnknownDevice {
                device_type,
                manufacturer,
                model,
            })
        }
    };

    info!(
        driver = device.driver_name(),
        device_type = %device_type,
        "Driver resolved"
    );
    Ok(device)
}
