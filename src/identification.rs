//! Identification sweep.
//!
//! Works out which registered model sits behind a freshly linked transport by
//! sending every distinct identification query the registry knows about and
//! matching the answers against the catalog.

use crate::adapters::Transport;
use crate::error::{AppResult, InstrumentError};
use crate::instrument::DeviceInfo;
use crate::registry::DeviceRegistry;
use std::time::Duration;
use tracing::{debug, warn};

/// Responses shorter than this are treated as garbage and re-queried.
pub const MIN_ID_RESPONSE_LEN: usize = 8;

/// Query every id command in registry order until one answer matches.
///
/// The transport timeout is switched to `id_timeout` for the sweep and
/// restored before returning. Transport errors move on to the next command.
pub(crate) fn sweep(
    transport: &mut dyn Transport,
    registry: &DeviceRegistry,
    id_timeout: Duration,
    attempts: u32,
    resource: &str,
) -> AppResult<(String, String)> {
    let commands = registry.id_commands();
    if commands.is_empty() {
        return Err(InstrumentError::IdentificationFailed {
            resource: resource.to_string(),
            reason: "no drivers registered".to_string(),
        });
    }

    let previous = transport.timeout();
    set_timeout(transport, id_timeout, resource);
    let mut last_response = None;
    let mut matched = None;

    for command in &commands {
        let Some(response) = query_id(transport, command, attempts, resource) else {
            continue;
        };
        if let Some(pair) = registry.match_identity(&response) {
            debug!(
                resource,
                command = command.as_str(),
                manufacturer = pair.0.as_str(),
                model = pair.1.as_str(),
                "Device identified"
            );
            matched = Some(pair);
            break;
        }
        last_response = Some(response);
    }

    set_timeout(transport, previous, resource);
    matched.ok_or_else(|| InstrumentError::IdentificationFailed {
        resource: resource.to_string(),
        reason: match last_response {
            Some(response) => format!("no registered device matches '{}'", response.trim()),
            None => format!("no response to any of {:?}", commands),
        },
    })
}

/// Send a forced driver's id command once and warn when the answer does not
/// name the forced model. The forced pair is kept either way.
pub(crate) fn verify_forced(
    transport: &mut dyn Transport,
    info: &DeviceInfo,
    id_timeout: Duration,
    resource: &str,
) {
    let previous = transport.timeout();
    set_timeout(transport, id_timeout, resource);
    match transport.query(&info.id_command) {
        Ok(response) => {
            let normalized = response.to_lowercase().replace(['-', '&'], "");
            if !normalized.contains(&info.model) {
                warn!(
                    resource,
                    forced = info.display_name().as_str(),
                    response = response.trim(),
                    "Forced driver does not match the connected device"
                );
            }
        }
        Err(e) => warn!(
            resource,
            forced = info.display_name().as_str(),
            "Forced driver could not be verified: {:#}",
            e
        ),
    }
    set_timeout(transport, previous, resource);
}

fn query_id(
    transport: &mut dyn Transport,
    command: &str,
    attempts: u32,
    resource: &str,
) -> Option<String> {
    let mut response = None;
    for attempt in 1..=attempts.max(1) {
        match transport.query(command) {
            Ok(answer) => {
                let answer = answer.trim().to_string();
                if answer.len() >= MIN_ID_RESPONSE_LEN {
                    return Some(answer);
                }
                debug!(resource, command, attempt, "Short identification response '{}'", answer);
                response = Some(answer);
            }
            Err(e) => {
                debug!(resource, command, "Identification query failed: {:#}", e);
                return None;
            }
        }
    }
    response.filter(|r| !r.is_empty())
}

fn set_timeout(transport: &mut dyn Transport, timeout: Duration, resource: &str) {
    if let Err(e) = transport.set_timeout(timeout) {
        warn!(resource, "Failed to set transport timeout: {:#}", e);
    }
}
