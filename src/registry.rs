//! Driver registry.
//!
//! A catalog of every supported device model, keyed by
//! `(device_type, manufacturer, model)`, holding the factory that builds its
//! driver plus the identification query for the model. Drivers are added once
//! at startup through side-effect-free `register` functions; afterwards the
//! registry is only read.
//!
//! Entries keep their registration order. That order decides ties during
//! identification, so it is part of the contract rather than an accident of the
//! storage.

use crate::dmm::DmmDriver;
use crate::drivers;
use crate::eload::EloadDriver;
use crate::error::{AppResult, InstrumentError};
use crate::instrument::{Channel, DeviceInfo, DeviceType};
use crate::psu::PsuDriver;
use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{error, warn};

/// Builds a driver for one registered model.
#[derive(Clone, Copy)]
pub enum DriverFactory {
    /// Power supply driver
    Psu(fn() -> Box<dyn PsuDriver>),
    /// Electronic load driver
    Eload(fn() -> Box<dyn EloadDriver>),
    /// Multimeter driver
    Dmm(fn() -> Box<dyn DmmDriver>),
    /// Known model without a facade (scopes, function generators). It can be
    /// identified but never resolved.
    IdentityOnly(DeviceType),
}

impl DriverFactory {
    /// Category this factory produces.
    pub fn device_type(&self) -> DeviceType {
        match self {
            DriverFactory::Psu(_) => DeviceType::Psu,
            DriverFactory::Eload(_) => DeviceType::Eload,
            DriverFactory::Dmm(_) => DeviceType::Dmm,
            DriverFactory::IdentityOnly(device_type) => *device_type,
        }
    }
}

impl fmt::Debug for DriverFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DriverFactory({})", self.device_type())
    }
}

/// One registry entry.
#[derive(Debug, Clone)]
pub struct DriverRegistration {
    /// Shared device description handed to every facade built from this entry
    pub info: Arc<DeviceInfo>,
    /// Driver constructor
    pub factory: DriverFactory,
}

impl DriverRegistration {
    /// Start an entry for `manufacturer`/`model` of category `device_type`.
    ///
    /// Keys are stored lowercase. The id command defaults to `*IDN?` and the
    /// channel set to `{CH1}`.
    pub fn new(
        device_type: DeviceType,
        manufacturer: &str,
        model: &str,
        factory: DriverFactory,
    ) -> Self {
        Self {
            info: Arc::new(DeviceInfo {
                device_type,
                manufacturer: manufacturer.to_lowercase(),
                model: model.to_lowercase(),
                id_command: "*IDN?".to_string(),
                available_channels: BTreeSet::from([Channel::Ch1]),
            }),
            factory,
        }
    }

    /// Use `command` to identify this model.
    pub fn id_command(mut self, command: &str) -> Self {
        Arc::make_mut(&mut self.info).id_command = command.to_string();
        self
    }

    /// Declare the channels present on this model.
    pub fn channels(mut self, channels: &[Channel]) -> Self {
        Arc::make_mut(&mut self.info).available_channels = channels.iter().copied().collect();
        self
    }

    fn key_matches(&self, device_type: DeviceType, manufacturer: &str, model: &str) -> bool {
        self.info.device_type == device_type && self.identity_matches(manufacturer, model)
    }

    fn identity_matches(&self, manufacturer: &str, model: &str) -> bool {
        self.info.manufacturer.eq_ignore_ascii_case(manufacturer)
            && self.info.model.eq_ignore_ascii_case(model)
    }
}

/// Catalog of registered drivers.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: Vec<DriverRegistration>,
}

static GLOBAL: Lazy<DeviceRegistry> = Lazy::new(DeviceRegistry::builtin);

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every bundled driver.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        if let Err(e) = drivers::register_builtin(&mut registry) {
            error!("Bundled driver registration failed: {}", e);
        }
        registry
    }

    /// Process-wide registry of bundled drivers, populated on first use.
    pub fn global() -> &'static DeviceRegistry {
        &GLOBAL
    }

    /// Add an entry.
    ///
    /// Fails with `DuplicateRegistration` when the triple is already present,
    /// leaving the existing entry untouched, and with `Configuration` when the
    /// factory builds a different category than the entry declares.
    pub fn add(&mut self, registration: DriverRegistration) -> AppResult<()> {
        let info = registration.info.clone();
        if registration.factory.device_type() != info.device_type {
            return Err(InstrumentError::Configuration(format!(
                "{} is declared as {} but its driver builds a {}",
                info.display_name(),
                info.device_type,
                registration.factory.device_type()
            )));
        }
        if self
            .entries
            .iter()
            .any(|e| e.key_matches(info.device_type, &info.manufacturer, &info.model))
        {
            return Err(InstrumentError::DuplicateRegistration {
                device_type: info.device_type,
                manufacturer: info.manufacturer.clone(),
                model: info.model.clone(),
            });
        }
        self.entries.push(registration);
        Ok(())
    }

    /// Entry for an exact triple.
    pub fn driver(
        &self,
        device_type: DeviceType,
        manufacturer: &str,
        model: &str,
    ) -> AppResult<&DriverRegistration> {
        self.entries
            .iter()
            .find(|e| e.key_matches(device_type, manufacturer, model))
            .ok_or_else(|| InstrumentError::UnknownDevice {
                device_type,
                manufacturer: manufacturer.to_lowercase(),
                model: model.to_lowercase(),
            })
    }

    /// First entry registered for `manufacturer`/`model`, in any category.
    pub fn find(&self, manufacturer: &str, model: &str) -> Option<&DriverRegistration> {
        self.entries
            .iter()
            .find(|e| e.identity_matches(manufacturer, model))
    }

    /// Device description template for `manufacturer`/`model`.
    pub fn device_info(&self, manufacturer: &str, model: &str) -> AppResult<Arc<DeviceInfo>> {
        self.find(manufacturer, model)
            .map(|e| e.info.clone())
            .ok_or_else(|| InstrumentError::UnknownDevice {
                device_type: DeviceType::Undefined,
                manufacturer: manufacturer.to_lowercase(),
                model: model.to_lowercase(),
            })
    }

    /// Distinct identification queries, most widely used first.
    ///
    /// Commands shared by the same number of models keep the order in which
    /// they were first registered.
    pub fn id_commands(&self) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for entry in &self.entries {
            let command = entry.info.id_command.as_str();
            let count = counts.entry(command).or_insert(0);
            if *count == 0 {
                order.push(command);
            }
            *count += 1;
        }
        // stable sort keeps first-registration order among equal counts
        order.sort_by(|a, b| counts[b].cmp(&counts[a]));
        order.into_iter().map(str::to_string).collect()
    }

    /// Match a raw identification response against the catalog.
    ///
    /// The response usually looks like `manufacturer,model[,serial][,firmware]`,
    /// but field order, separators and extra fields vary (`HP3458A` is a valid
    /// answer). Dashes and ampersands are dropped and case is folded, then an
    /// entry matches when both its manufacturer and its model occur in the
    /// response. The longest `manufacturer + model` wins; ties go to the entry
    /// registered first.
    pub fn match_identity(&self, response: &str) -> Option<(String, String)> {
        let normalized = normalize_identity(response);
        if normalized.is_empty() {
            return None;
        }

        let mut best: Option<&DriverRegistration> = None;
        for entry in &self.entries {
            let manufacturer = normalize_identity(&entry.info.manufacturer);
            let model = normalize_identity(&entry.info.model);
            if !normalized.contains(&manufacturer) || !normalized.contains(&model) {
                continue;
            }
            let score = entry.info.manufacturer.len() + entry.info.model.len();
            match best {
                Some(b) if b.info.manufacturer.len() + b.info.model.len() >= score => {}
                _ => best = Some(entry),
            }
        }

        match best {
            Some(entry) => Some((entry.info.manufacturer.clone(), entry.info.model.clone())),
            None => {
                warn!(
                    response = response.trim(),
                    registered = self.entries.len(),
                    "Failed to match identification response to a registered device"
                );
                None
            }
        }
    }

    /// Every entry, in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &DriverRegistration> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize_identity(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != '-' && *c != '&')
        .collect::<String>()
        .to_lowercase()
}

/// Split a forced driver name such as `Siglent_SPD1168X` into lowercase
/// `(manufacturer, model)`.
pub fn parse_forced_driver(name: &str) -> AppResult<(String, String)> {
    match name.trim().split_once('_') {
        Some((manufacturer, model)) if !manufacturer.is_empty() && !model.is_empty() => {
            Ok((manufacturer.to_lowercase(), model.to_lowercase()))
        }
        _ => Err(InstrumentError::Configuration(format!(
            "forced driver '{}' must look like Manufacturer_Model",
            name
        ))),
    }
}
