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

//! Shared data types for the OpenBK firmware updater
//!
//! These types cross the boundary between the update service and its HTTP API,
//! so they are plain serde structs with no behaviour beyond simple accessors.

pub mod device;
pub mod events;
pub mod platform;
pub mod release;

pub use device::{DeviceView, InstallProgress, ReleaseView};
pub use events::{DeviceEvent, InstallKind};
pub use platform::{BUILD_LABEL_PREFIX, FIRMWARE_EXTENSION, PLATFORM_FIRMWARE_TABLE, PlatformKey};
pub use release::{FirmwareAsset, ReleaseSnapshot};
