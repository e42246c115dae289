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

//! Events published whenever device or release state changes

use crate::platform::PlatformKey;
use serde::{Deserialize, Serialize};

/// How the install target was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallKind {
    Latest,
    Version,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    Discovered {
        device_id: String,
        platform: PlatformKey,
        version: String,
    },
    VersionChanged {
        device_id: String,
        from: String,
        to: String,
    },
    InstallStarted {
        device_id: String,
        target_version: String,
        kind: InstallKind,
    },
    Progress {
        device_id: String,
        percent: u8,
    },
    Triggered {
        device_id: String,
        topic: String,
        firmware_url: String,
    },
    InstallSucceeded {
        device_id: String,
        version: String,
    },
    InstallMismatch {
        device_id: String,
        expected: String,
        reported: String,
    },
    InstallTimedOut {
        device_id: String,
        target_version: String,
    },
    InstallFailed {
        device_id: String,
        target_version: String,
        error: String,
    },
    BackupChecked {
        device_id: String,
        version: String,
        available: bool,
    },
    ReleaseRefreshed {
        tag: String,
        platforms: usize,
    },
}

impl DeviceEvent {
    /// Device the event concerns; `None` for feed-wide events
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Discovered { device_id, .. }
            | Self::VersionChanged { device_id, .. }
            | Self::InstallStarted { device_id, .. }
            | Self::Progress { device_id, .. }
            | Self::Triggered { device_id, .. }
            | Self::InstallSucceeded { device_id, .. }
            | Self::InstallMismatch { device_id, .. }
            | Self::InstallTimedOut { device_id, .. }
            | Self::InstallFailed { device_id, .. }
            | Self::BackupChecked { device_id, .. } => Some(device_id),
            Self::ReleaseRefreshed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = DeviceEvent::InstallMismatch {
            device_id: "kitchen-plug".to_owned(),
            expected: "1.3.0".to_owned(),
            reported: "1.2.9".to_owned(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"install_mismatch\""));
        assert!(json.contains("1.2.9"));
    }

    #[test]
    fn test_device_id_accessor() {
        let event = DeviceEvent::Progress {
            device_id: "plug".to_owned(),
            percent: 5,
        };
        assert_eq!(event.device_id(), Some("plug"));

        let refreshed = DeviceEvent::ReleaseRefreshed {
            tag: "1.18.0".to_owned(),
            platforms: 5,
        };
        assert_eq!(refreshed.device_id(), None);
    }
}
