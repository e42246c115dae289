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

//! OpenBK Updater - firmware update service for OpenBK devices
//!
//! Watches the OpenBK release feed, tracks devices from their MQTT build
//! reports, and pushes firmware to them over OTA-HTTP on request.

pub mod cache;
pub mod config;
pub mod downloader;
pub mod error;
pub mod events;
pub mod firmware_url;
pub mod ingest;
pub mod mqtt;
pub mod notes;
pub mod orchestrator;
pub mod registry;
pub mod release;
pub mod store;
pub mod version;
pub mod web;

pub use cache::ReleaseCache;
pub use config::UpdaterConfig;
pub use error::{FeedError, InstallError, StatusParseError};
pub use events::EventBus;
pub use ingest::StatusIngest;
pub use orchestrator::{InstallTarget, InstallTicket, UpdateOrchestrator};
pub use registry::DeviceRegistry;
pub use release::{GithubReleaseFeed, ReleaseFeed};
pub use version::{is_newer, parse_version, update_available};
