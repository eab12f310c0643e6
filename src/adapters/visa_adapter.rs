//! VISA transport for GPIB, USB-TMC and LXI instruments.
//!
//! Accepts any VISA resource descriptor, for example:
//! - `GPIB0::12::INSTR`
//! - `USB0::0xF4EC::0x1410::SPD13DCC4R0081::INSTR`
//! - `TCPIP::192.168.1.30::INSTR`
//!
//! Needs the `instrument_visa` feature and a VISA runtime on the host. Without
//! the feature every open fails, and a connection with auto-simulation enabled
//! falls back to a simulated link.

use super::{Transport, TransportOpener};
use anyhow::{anyhow, Result};
use std::time::Duration;

#[cfg(feature = "instrument_visa")]
use anyhow::Context;
#[cfg(feature = "instrument_visa")]
use std::ffi::CString;
#[cfg(feature = "instrument_visa")]
use std::io::{BufRead, BufReader, Write};
#[cfg(feature = "instrument_visa")]
use tracing::trace;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;
#[cfg(feature = "instrument_visa")]
use visa_rs::enums::attribute::{self, HasAttribute};
#[cfg(feature = "instrument_visa")]
use visa_rs::ResID;

#[cfg(not(feature = "instrument_visa"))]
fn visa_disabled() -> anyhow::Error {
    anyhow!("VISA support not enabled. Rebuild with --features instrument_visa")
}

/// One VISA session speaking newline-terminated SCPI.
pub struct VisaAdapter {
    pub(crate) address: String,
    pub(crate) timeout: Duration,
    pub(crate) terminator: String,
    #[cfg(feature = "instrument_visa")]
    session: Option<Instrument>,
}

impl VisaAdapter {
    /// Unopened adapter for `address` with a 5 s timeout and `\n` terminator.
    pub fn new(address: String) -> Self {
        Self {
            address,
            timeout: Duration::from_secs(5),
            terminator: "\n".to_string(),
            #[cfg(feature = "instrument_visa")]
            session: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_line_terminator(mut self, terminator: String) -> Self {
        self.terminator = terminator;
        self
    }

    /// Open the session through the default resource manager.
    #[cfg(feature = "instrument_visa")]
    pub fn connect(&mut self) -> Result<()> {
        let rm = DefaultRM::new().context("Failed to create VISA resource manager")?;
        let resource: ResID = CString::new(self.address.as_str())
            .context("Resource descriptor contains a NUL byte")?
            .into();
        let session = rm
            .open(&resource, AccessMode::NO_LOCK, self.timeout)
            .with_context(|| format!("Failed to open VISA resource '{}'", self.address))?;
        self.session = Some(session);
        self.push_timeout()?;
        trace!(address = self.address.as_str(), timeout_ms = self.timeout.as_millis() as u64, "VISA session open");
        Ok(())
    }

    #[cfg(not(feature = "instrument_visa"))]
    pub fn connect(&mut self) -> Result<()> {
        Err(visa_disabled())
    }

    #[cfg(feature = "instrument_visa")]
    fn push_timeout(&mut self) -> Result<()> {
        let millis = u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX);
        if let Some(session) = self.session.as_ref() {
            let attr = attribute::AttrTmoValue::new_checked(millis.into())
                .ok_or_else(|| anyhow!("VISA rejects a {}ms timeout", millis))?;
            session.set_attr(attr).context("Failed to set VISA timeout")?;
        }
        Ok(())
    }

    #[cfg(feature = "instrument_visa")]
    fn session(&self) -> Result<&Instrument> {
        self.session
            .as_ref()
            .ok_or_else(|| anyhow!("VISA session for '{}' is not open", self.address))
    }
}

impl Transport for VisaAdapter {
    #[cfg(feature = "instrument_visa")]
    fn write(&mut self, command: &str) -> Result<()> {
        let framed = format!("{}{}", command, self.terminator);
        let mut session = self.session()?;
        session
            .write_all(framed.as_bytes())
            .with_context(|| format!("VISA write of '{}' failed", command))
    }

    #[cfg(not(feature = "instrument_visa"))]
    fn write(&mut self, _command: &str) -> Result<()> {
        Err(visa_disabled())
    }

    /// Write `command` and read one terminated line back.
    #[cfg(feature = "instrument_visa")]
    fn query(&mut self, command: &str) -> Result<String> {
        self.write(command)?;
        let mut line = String::new();
        BufReader::new(self.session()?)
            .read_line(&mut line)
            .with_context(|| format!("VISA read after '{}' failed", command))?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    #[cfg(not(feature = "instrument_visa"))]
    fn query(&mut self, _command: &str) -> Result<String> {
        Err(visa_disabled())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        #[cfg(feature = "instrument_visa")]
        self.push_timeout()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        #[cfg(feature = "instrument_visa")]
        if self.session.take().is_some() {
            trace!(address = self.address.as_str(), "VISA session closed");
        }
        Ok(())
    }

    fn adapter_type(&self) -> &str {
        "visa"
    }

    fn info(&self) -> String {
        format!("VisaAdapter({}, {}ms)", self.address, self.timeout.as_millis())
    }
}

/// Opens [`VisaAdapter`] sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct VisaOpener;

impl VisaOpener {
    pub fn new() -> Self {
        Self
    }
}

impl TransportOpener for VisaOpener {
    fn open(&self, address: &str, timeout: Duration) -> Result<Box<dyn Transport>> {
        let mut adapter = VisaAdapter::new(address.to_string()).with_timeout(timeout);
        adapter.connect()?;
        Ok(Box::new(adapter))
    }

    /// Every `?*INSTR` descriptor the resource manager can see.
    #[cfg(feature = "instrument_visa")]
    fn list_resources(&self) -> Result<Vec<String>> {
        let rm = DefaultRM::new().context("Failed to create VISA resource manager")?;
        let pattern: ResID = CString::new("?*INSTR")
            .context("Invalid resource pattern")?
            .into();
        let mut found = rm
            .find_res_list(&pattern)
            .context("Failed to enumerate VISA resources")?;
        let mut resources = Vec::new();
        while let Some(resource) = found.find_next().context("Failed to read VISA resource list")? {
            resources.push(resource.to_string());
        }
        Ok(resources)
    }

    #[cfg(not(feature = "instrument_visa"))]
    fn list_resources(&self) -> Result<Vec<String>> {
        Err(visa_disabled())
    }
}
