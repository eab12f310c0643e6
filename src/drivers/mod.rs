//! Bundled instrument drivers.
//!
//! Each driver module exposes a `register` function that adds its model to a
//! [`DeviceRegistry`]. Registration has no other side effects, so tests can
//! build registries holding any subset of drivers.
//!
//! Supported models:
//! - Siglent SPD1168X power supply
//! - B&K Precision 9141 triple-output power supply
//! - Keithley 2380 electronic load
//! - Siglent SDL1020X-E electronic load
//! - Siglent SDM3055 multimeter
//!
//! The Siglent SDS1104X-E and LeCroy HDO6104 oscilloscopes are registered for
//! identification only.

pub mod bk_9141;
pub mod keithley_2380;
pub mod siglent_sdl1020xe;
pub mod siglent_sdm3055;
pub mod siglent_spd1168x;

use crate::device::GenericDevice;
use crate::error::{AppResult, InstrumentError};
use crate::instrument::{Channel, DeviceType, EloadMode, MeasureType, State};
use crate::registry::{DeviceRegistry, DriverFactory, DriverRegistration};

/// Register every bundled driver.
pub fn register_builtin(registry: &mut DeviceRegistry) -> AppResult<()> {
    siglent_spd1168x::register(registry)?;
    bk_9141::register(registry)?;
    keithley_2380::register(registry)?;
    siglent_sdl1020xe::register(registry)?;
    siglent_sdm3055::register(registry)?;
    register_scopes(registry)
}

fn register_scopes(registry: &mut DeviceRegistry) -> AppResult<()> {
    let four = [Channel::Ch1, Channel::Ch2, Channel::Ch3, Channel::Ch4];
    for (manufacturer, model) in [("siglent", "sds1104xe"), ("lecroy", "hdo6104")] {
        registry.add(
            DriverRegistration::new(
                DeviceType::Scope,
                manufacturer,
                model,
                DriverFactory::IdentityOnly(DeviceType::Scope),
            )
            .channels(&four),
        )?;
    }
    Ok(())
}

// Shared SCPI dialect of the bundled electronic loads.

pub(crate) fn func_keyword(mode: EloadMode) -> AppResult<&'static str> {
    match mode {
        EloadMode::Cc => Ok("CURR"),
        EloadMode::Cp => Ok("POW"),
        EloadMode::Cr => Ok("RES"),
        EloadMode::Cv => Ok("VOLT"),
        EloadMode::Undefined => Err(InstrumentError::InvalidArgument(
            "load mode must be CC, CP, CR or CV".to_string(),
        )),
    }
}

/// Map a `FUNC?` answer. Unrecognized answers give `Undefined`.
pub(crate) fn parse_func_response(response: &str) -> EloadMode {
    let upper = response.to_uppercase();
    if upper.contains("CUR") {
        EloadMode::Cc
    } else if upper.contains("POW") {
        EloadMode::Cp
    } else if upper.contains("RES") {
        EloadMode::Cr
    } else if upper.contains("VOLT") {
        EloadMode::Cv
    } else {
        EloadMode::Undefined
    }
}

pub(crate) fn set_load_value(device: &mut GenericDevice, mode: EloadMode, value: f64) -> AppResult<()> {
    let keyword = func_keyword(mode)?;
    device.write(&format!("{} {}", keyword, value))
}

pub(crate) fn get_load_value(device: &mut GenericDevice, mode: EloadMode) -> AppResult<f64> {
    let keyword = func_keyword(mode)?;
    device.query_f64(&format!("{}?", keyword))
}

pub(crate) fn set_remote_sense(device: &mut GenericDevice, state: State) -> AppResult<()> {
    if state == State::Undefined {
        return Err(InstrumentError::InvalidArgument(
            "remote sense state must be ON or OFF".to_string(),
        ));
    }
    device.write(&format!("SYST:SENS {}", state.scpi()))
}

/// `MEAS:VOLT?`, `MEAS:CURR?` or `MEAS:POW?`; other quantities are unsupported.
pub(crate) fn measure_dc(device: &mut GenericDevice, measure: MeasureType) -> AppResult<f64> {
    let command = match measure {
        MeasureType::Voltage => "MEAS:VOLT?",
        MeasureType::Current => "MEAS:CURR?",
        MeasureType::Power => "MEAS:POW?",
        other => return unsupported_measure(device, other),
    };
    device.query_f64(command)
}

pub(crate) fn unsupported_measure<T>(device: &GenericDevice, measure: MeasureType) -> AppResult<T> {
    device.unimplemented(
        &format!("measure({:?})", measure),
        crate::device::Capability::Advisory,
    )
}
