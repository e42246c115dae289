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

use crate::platform::PlatformKey;
use crate::release::FirmwareAsset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Install progress of a single device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstallProgress {
    #[default]
    NotInstalling,
    Installing {
        percent: u8,
    },
}

impl InstallProgress {
    pub fn is_installing(&self) -> bool {
        matches!(self, Self::Installing { .. })
    }

    pub fn percent(&self) -> Option<u8> {
        match self {
            Self::Installing { percent } => Some(*percent),
            Self::NotInstalling => None,
        }
    }
}

/// Read-only view of a device record, as exposed over the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceView {
    pub device_id: String,
    pub platform: PlatformKey,
    pub installed_version: String,
    pub latest_version: Option<String>,
    pub update_available: bool,
    pub in_progress: InstallProgress,
    pub target_version: Option<String>,
    pub previous_version: Option<String>,
    pub backup_available: bool,
    pub firmware: Option<FirmwareAsset>,
    pub release_url: Option<String>,
    pub release_summary: Option<String>,
    pub last_seen: DateTime<Utc>,
}

/// Read-only view of the current release snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseView {
    pub tag: String,
    pub name: Option<String>,
    pub published_at: Option<String>,
    pub release_url: Option<String>,
    pub summary: Option<String>,
    pub platforms: Vec<FirmwareAsset>,
    pub fetched_at: DateTime<Utc>,
}
