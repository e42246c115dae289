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

//! Platform keys and the firmware family table

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Known platforms and the firmware family prefix their release assets carry.
///
/// Order matters: asset resolution walks this table front to back.
pub const PLATFORM_FIRMWARE_TABLE: &[(&str, &str)] = &[
    ("BK7231T", "OpenBK7231T"),
    ("BK7231N", "OpenBK7231N"),
    ("BK7231M", "OpenBK7231M"),
    ("BK7231U", "OpenBK7231U"),
    ("BK7238", "OpenBK7238"),
];

/// Prefix of the family label a device reports on its build topic.
pub const BUILD_LABEL_PREFIX: &str = "OpenBK";

/// Extension of the OTA image published for every platform.
pub const FIRMWARE_EXTENSION: &str = "rbl";

/// Short code identifying a device's microcontroller family (e.g. `BK7231T`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformKey(String);

impl PlatformKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// All platforms with a published firmware family, in table order
    pub fn known() -> impl Iterator<Item = PlatformKey> {
        PLATFORM_FIRMWARE_TABLE
            .iter()
            .map(|(key, _)| PlatformKey::new(*key))
    }

    /// Firmware family prefix used in release asset names.
    ///
    /// Returns `None` for platforms outside the table; such devices are still
    /// tracked but never have a firmware candidate.
    pub fn firmware_prefix(&self) -> Option<&'static str> {
        PLATFORM_FIRMWARE_TABLE
            .iter()
            .find(|(key, _)| *key == self.0)
            .map(|(_, prefix)| *prefix)
    }

    /// Map a reported family label (`OpenBK7231T`) to its platform key (`BK7231T`)
    pub fn from_build_label(label: &str) -> Option<Self> {
        if let Some((key, _)) = PLATFORM_FIRMWARE_TABLE
            .iter()
            .find(|(_, prefix)| *prefix == label)
        {
            return Some(Self::new(*key));
        }

        let suffix = label.strip_prefix(BUILD_LABEL_PREFIX)?;
        if suffix.is_empty() || suffix.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self(format!("BK{suffix}")))
    }
}

impl fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for PlatformKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlatformKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
