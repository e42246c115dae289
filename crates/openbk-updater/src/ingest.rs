// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of OpenBK Updater.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Device status ingest
//!
//! Devices announce their running build on `{device_id}/build` with a free
//! text payload such as `OpenBK7231T 1.17.551`. Reports are parsed into a
//! typed [`StatusReport`] and folded into the [`DeviceRegistry`].

use crate::error::StatusParseError;
use crate::events::EventBus;
use crate::registry::{DeviceRegistry, Observation, VersionOutcome};
use openbk_types::{DeviceEvent, PlatformKey};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const STATUS_TOPIC_SUFFIX: &str = "build";

/// Wildcard subscription matching every device's status topic
pub const STATUS_SUBSCRIPTION: &str = "+/build";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub device_id: String,
    pub platform: PlatformKey,
    /// Taken verbatim from the payload
    pub version: String,
}

/// Device id from a `{device_id}/build` topic
pub fn parse_topic(topic: &str) -> Result<&str, StatusParseError> {
    let mut segments = topic.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(device_id), Some(STATUS_TOPIC_SUFFIX), None) if !device_id.is_empty() => Ok(device_id),
        _ => Err(StatusParseError::Topic(topic.to_owned())),
    }
}

/// Platform and version from an `OpenBK{suffix} {version}` payload
pub fn parse_payload(payload: &[u8]) -> Result<(PlatformKey, String), StatusParseError> {
    let text = std::str::from_utf8(payload).map_err(|_| StatusParseError::NotUtf8)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(StatusParseError::Empty);
    }

    let mut tokens = text.split_whitespace();
    let label = tokens.next().ok_or(StatusParseError::Empty)?;
    let version = tokens
        .next()
        .ok_or_else(|| StatusParseError::MissingVersion(text.to_owned()))?;

    let platform = PlatformKey::from_build_label(label)
        .ok_or_else(|| StatusParseError::UnknownFamily(label.to_owned()))?;

    Ok((platform, version.to_owned()))
}

pub fn parse_status(topic: &str, payload: &[u8]) -> Result<StatusReport, StatusParseError> {
    let device_id = parse_topic(topic)?;
    let (platform, version) = parse_payload(payload)?;
    Ok(StatusReport {
        device_id: device_id.to_owned(),
        platform,
        version,
    })
}

/// Routes parsed status reports into the registry
#[derive(Debug, Clone)]
pub struct StatusIngest {
    registry: Arc<DeviceRegistry>,
    events: EventBus,
}

impl StatusIngest {
    pub fn new(registry: Arc<DeviceRegistry>, events: EventBus) -> Self {
        Self { registry, events }
    }

    /// Handle one message from the status subscription
    ///
    /// Malformed messages are logged and dropped.
    pub fn on_message(&self, topic: &str, payload: &[u8]) -> Option<Observation> {
        match parse_status(topic, payload) {
            Ok(report) => Some(self.apply(&report)),
            Err(e) => {
                warn!("Dropping status message on {topic}: {e}");
                None
            }
        }
    }

    pub fn apply(&self, report: &StatusReport) -> Observation {
        let StatusReport {
            device_id,
            platform,
            version,
        } = report;

        let observation = self.registry.observe(device_id, platform, version);
        match observation {
            Observation::Discovered => {
                info!("Discovered device {device_id} ({platform}) running {version}");
                self.events.publish(DeviceEvent::Discovered {
                    device_id: device_id.clone(),
                    platform: platform.clone(),
                    version: version.clone(),
                });
            }
            Observation::Known(VersionOutcome::Unchanged) => {
                debug!("Device {device_id} still on {version}");
            }
            Observation::Known(VersionOutcome::Updated { ref from }) => {
                info!("Device {device_id} version changed from {from} to {version}");
                self.events.publish(DeviceEvent::VersionChanged {
                    device_id: device_id.clone(),
                    from: from.clone(),
                    to: version.clone(),
                });
            }
            Observation::Known(VersionOutcome::Succeeded { attempt }) => {
                info!("Device {device_id} successfully updated to {version} (attempt {attempt})");
                self.events.publish(DeviceEvent::InstallSucceeded {
                    device_id: device_id.clone(),
                    version: version.clone(),
                });
            }
            Observation::Known(VersionOutcome::Mismatch {
                attempt,
                ref expected,
            }) => {
                warn!(
                    "Device {device_id} reported {version} after install of {expected} (attempt {attempt}); version changed unexpectedly"
                );
                self.events.publish(DeviceEvent::InstallMismatch {
                    device_id: device_id.clone(),
                    expected: expected.clone(),
                    reported: version.clone(),
                });
            }
        }
        observation
    }
}
