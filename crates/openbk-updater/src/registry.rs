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

//! Per-device state records
//!
//! A record is created on the first status report from a device and lives
//! for the rest of the process. Install bookkeeping is held in a single
//! optional slot so that "installing" and "has a target version" can never
//! disagree.

use crate::error::{InstallError, InstallResult};
use crate::notes::release_summary;
use crate::version::update_available;
use chrono::{DateTime, Utc};
use openbk_types::{DeviceView, InstallProgress, PlatformKey, ReleaseSnapshot};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveInstall {
    attempt: u64,
    target_version: String,
    percent: u8,
}

/// Result of feeding a reported version into a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionOutcome {
    /// Same version as before; nothing changed
    Unchanged,
    /// Version changed while no install was running
    Updated { from: String },
    /// The in-flight install landed on its target
    Succeeded { attempt: u64 },
    /// The device came back with something other than the target
    Mismatch { attempt: u64, expected: String },
}

/// Bookkeeping handed back when an install attempt starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStart {
    pub attempt: u64,
    /// Version that was replaced and should be checked for rollback
    pub backup_candidate: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub device_id: String,
    pub platform: PlatformKey,
    pub installed_version: String,
    pub previous_version: Option<String>,
    pub backup_available: bool,
    pub last_seen: DateTime<Utc>,
    install: Option<ActiveInstall>,
}

impl DeviceRecord {
    pub fn new(device_id: impl Into<String>, platform: PlatformKey, version: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            platform,
            installed_version: version.into(),
            previous_version: None,
            backup_available: false,
            last_seen: Utc::now(),
            install: None,
        }
    }

    pub fn in_progress(&self) -> InstallProgress {
        match self.install {
            Some(ref active) => InstallProgress::Installing {
                percent: active.percent,
            },
            None => InstallProgress::NotInstalling,
        }
    }

    pub fn target_version(&self) -> Option<&str> {
        self.install.as_ref().map(|active| active.target_version.as_str())
    }

    pub fn current_attempt(&self) -> Option<u64> {
        self.install.as_ref().map(|active| active.attempt)
    }

    pub fn is_attempt_active(&self, attempt: u64) -> bool {
        self.current_attempt() == Some(attempt)
    }

    /// Apply a version reported by the device
    ///
    /// Only a change of version counts. While installing, the first changed
    /// report ends the attempt whether or not it matches the target.
    pub fn report_version(&mut self, version: &str) -> VersionOutcome {
        self.last_seen = Utc::now();

        if version == self.installed_version {
            return VersionOutcome::Unchanged;
        }

        let from = std::mem::replace(&mut self.installed_version, version.to_owned());
        match self.install.take() {
            Some(active) if active.target_version == version => VersionOutcome::Succeeded {
                attempt: active.attempt,
            },
            Some(active) => VersionOutcome::Mismatch {
                attempt: active.attempt,
                expected: active.target_version,
            },
            None => VersionOutcome::Updated { from },
        }
    }

    /// Enter Installing for `target_version`
    pub fn begin_install(&mut self, attempt: u64, target_version: &str) -> InstallResult<InstallStart> {
        if let Some(ref active) = self.install {
            return Err(InstallError::AlreadyInstalling {
                device_id: self.device_id.clone(),
                target_version: active.target_version.clone(),
            });
        }

        let backup_candidate = (self.installed_version != target_version).then(|| {
            self.previous_version = Some(self.installed_version.clone());
            self.backup_available = false;
            self.installed_version.clone()
        });

        self.install = Some(ActiveInstall {
            attempt,
            target_version: target_version.to_owned(),
            percent: 0,
        });

        Ok(InstallStart {
            attempt,
            backup_candidate,
        })
    }

    /// Raise progress of `attempt`; returns the new value when it moved
    pub fn set_progress(&mut self, attempt: u64, percent: u8) -> Option<u8> {
        let active = self.install.as_mut().filter(|a| a.attempt == attempt)?;
        let percent = percent.min(100);
        (percent > active.percent).then(|| {
            active.percent = percent;
            percent
        })
    }

    /// Drop back to Idle if `attempt` is still the running one
    ///
    /// Returns the abandoned target version.
    pub fn end_install(&mut self, attempt: u64) -> Option<String> {
        if self.is_attempt_active(attempt) {
            self.install.take().map(|active| active.target_version)
        } else {
            None
        }
    }

    /// Record the outcome of the asynchronous backup check
    pub fn set_backup_available(&mut self, version: &str, available: bool) -> bool {
        if self.previous_version.as_deref() == Some(version) {
            self.backup_available = available;
            true
        } else {
            false
        }
    }

    pub fn view(&self, snapshot: Option<&ReleaseSnapshot>) -> DeviceView {
        let firmware = snapshot.and_then(|s| s.asset(self.platform.as_str())).cloned();
        let latest_version = firmware.as_ref().map(|asset| asset.version.clone());

        DeviceView {
            device_id: self.device_id.clone(),
            platform: self.platform.clone(),
            installed_version: self.installed_version.clone(),
            update_available: latest_version
                .as_deref()
                .is_some_and(|latest| update_available(&self.installed_version, latest)),
            latest_version,
            in_progress: self.in_progress(),
            target_version: self.target_version().map(str::to_owned),
            previous_version: self.previous_version.clone(),
            backup_available: self.backup_available,
            firmware,
            release_url: snapshot.and_then(|s| s.html_url.clone()),
            release_summary: snapshot.map(release_summary),
            last_seen: self.last_seen,
        }
    }
}

/// What a status report did to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Discovered,
    Known(VersionOutcome),
}

/// All devices seen so far, keyed by device id
///
/// The lock is never held across an await point; every operation is a short
/// synchronous section over one record.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, DeviceRecord>>,
    attempts: AtomicU64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update a record from a status report
    pub fn observe(&self, device_id: &str, platform: &PlatformKey, version: &str) -> Observation {
        let mut devices = self.devices.lock();
        match devices.get_mut(device_id) {
            Some(record) => Observation::Known(record.report_version(version)),
            None => {
                devices.insert(
                    device_id.to_owned(),
                    DeviceRecord::new(device_id, platform.clone(), version),
                );
                Observation::Discovered
            }
        }
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.devices.lock().get(device_id).cloned()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.lock().contains_key(device_id)
    }

    /// Snapshot of every record, ordered by device id
    pub fn list(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self.devices.lock().values().cloned().collect();
        records.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        records
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against one record under the lock
    pub fn update<R>(&self, device_id: &str, f: impl FnOnce(&mut DeviceRecord) -> R) -> Option<R> {
        self.devices.lock().get_mut(device_id).map(f)
    }

    /// Start an install on a known device
    pub fn begin_install(&self, device_id: &str, target_version: &str) -> InstallResult<InstallStart> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        self.update(device_id, |record| record.begin_install(attempt, target_version))
            .unwrap_or_else(|| Err(InstallError::UnknownDevice(device_id.to_owned())))
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Report(String),
        Begin(String),
        Progress(u8),
        End,
    }

    fn arb_version() -> impl Strategy<Value = String> {
        (1u8..3, 0u8..3).prop_map(|(minor, patch)| format!("1.{minor}.{patch}"))
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            arb_version().prop_map(Op::Report),
            arb_version().prop_map(Op::Begin),
            (0u8..=100).prop_map(Op::Progress),
            Just(Op::End),
        ]
    }

    proptest! {
        #[test]
        fn installing_iff_target(ops in proptest::collection::vec(arb_op(), 1..64)) {
            let mut device = DeviceRecord::new("plug", PlatformKey::new("BK7231T"), "1.0.0");
            let mut attempt = 0;
            let mut last_percent = 0;

            for op in ops {
                match op {
                    Op::Report(version) => {
                        device.report_version(&version);
                    }
                    Op::Begin(version) => {
                        if device.begin_install(attempt + 1, &version).is_ok() {
                            attempt += 1;
                            last_percent = 0;
                        }
                    }
                    Op::Progress(percent) => {
                        device.set_progress(attempt, percent);
                    }
                    Op::End => {
                        device.end_install(attempt);
                    }
                }

                prop_assert_eq!(device.in_progress().is_installing(), device.target_version().is_some());
                if let Some(percent) = device.in_progress().percent() {
                    prop_assert!(percent >= last_percent);
                    last_percent = percent;
                }
            }
        }
    }
}
