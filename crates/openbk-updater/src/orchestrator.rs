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

//! Per-device firmware update orchestration
//!
//! Every install goes through the same workflow: resolve the target asset,
//! enter Installing, download, store, work out the URL the device can reach,
//! and publish the OTA trigger. The three entry points only differ in how
//! the asset is found (see [`InstallTarget`]). Completion is observed later
//! through status reports, or forced by the install watchdog.

use crate::cache::ReleaseCache;
use crate::downloader::{FirmwareDownloader, PROGRESS_DOWNLOAD_START, PROGRESS_DOWNLOADED};
use crate::error::{InstallError, InstallResult, RollbackBlocker};
use crate::events::EventBus;
use crate::firmware_url::ServerUrlResolver;
use crate::mqtt::{OtaPublisher, ota_topic};
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::store::ArtifactStore;
use openbk_types::{DeviceEvent, DeviceView, FirmwareAsset, InstallKind, PlatformKey};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const PROGRESS_STORED: u8 = 50;
pub const PROGRESS_TRIGGERED: u8 = 60;

const INSTALL_CANCELLED: &str = "install cancelled before the OTA trigger was published";

/// How the firmware to install is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallTarget {
    /// Newest firmware in the cached release
    Latest,
    /// A specific version from the release history
    Version(String),
    /// The version that was running before the last install
    Rollback,
}

impl InstallTarget {
    pub fn kind(&self) -> InstallKind {
        match self {
            Self::Latest => InstallKind::Latest,
            Self::Version(_) => InstallKind::Version,
            Self::Rollback => InstallKind::Rollback,
        }
    }
}

/// Handed back once the OTA trigger has been published
#[derive(Debug, Clone)]
pub struct InstallTicket {
    pub device_id: String,
    pub attempt: u64,
    pub target_version: String,
    pub topic: String,
    pub firmware_url: String,
    pub stored_path: PathBuf,
    pub sha256: String,
}

pub struct UpdateOrchestrator {
    registry: Arc<DeviceRegistry>,
    cache: Arc<ReleaseCache>,
    store: ArtifactStore,
    downloader: FirmwareDownloader,
    urls: ServerUrlResolver,
    publisher: Arc<dyn OtaPublisher>,
    events: EventBus,
    install_timeout: Option<Duration>,
}

impl std::fmt::Debug for UpdateOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateOrchestrator")
            .field("store", &self.store)
            .field("urls", &self.urls)
            .field("install_timeout", &self.install_timeout)
            .finish_non_exhaustive()
    }
}

impl UpdateOrchestrator {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        cache: Arc<ReleaseCache>,
        store: ArtifactStore,
        downloader: FirmwareDownloader,
        urls: ServerUrlResolver,
        publisher: Arc<dyn OtaPublisher>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            cache,
            store,
            downloader,
            urls,
            publisher,
            events,
            install_timeout: None,
        }
    }

    /// Force Installing back to Idle when no status report arrives in time
    #[must_use]
    pub fn with_install_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.install_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ReleaseCache> {
        &self.cache
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn device_view(&self, device_id: &str) -> Option<DeviceView> {
        let snapshot = self.cache.current();
        self.registry
            .get(device_id)
            .map(|record| record.view(snapshot.as_deref()))
    }

    pub fn device_views(&self) -> Vec<DeviceView> {
        let snapshot = self.cache.current();
        self.registry
            .list()
            .iter()
            .map(|record| record.view(snapshot.as_deref()))
            .collect()
    }

    pub async fn install_latest(&self, device_id: &str) -> InstallResult<InstallTicket> {
        self.install(device_id, InstallTarget::Latest).await
    }

    pub async fn install_version(&self, device_id: &str, version: &str) -> InstallResult<InstallTicket> {
        self.install(device_id, InstallTarget::Version(version.to_owned()))
            .await
    }

    pub async fn rollback(&self, device_id: &str) -> InstallResult<InstallTicket> {
        self.install(device_id, InstallTarget::Rollback).await
    }

    /// Run the install workflow for one device
    ///
    /// Rejections (unknown device, nothing to install, rollback not possible,
    /// already installing) leave the record untouched. Failures after the
    /// device entered Installing put it back to Idle before returning.
    pub async fn install(&self, device_id: &str, target: InstallTarget) -> InstallResult<InstallTicket> {
        let asset = match self.prepare(device_id, &target).await {
            Ok(asset) => asset,
            Err(e) => {
                error!("Cannot start {:?} install on {device_id}: {e}", target.kind());
                return Err(e);
            }
        };

        let start = self.registry.begin_install(device_id, &asset.version)?;
        info!(
            "Installing {} on {device_id} ({:?}, attempt {})",
            asset.version,
            target.kind(),
            start.attempt
        );
        self.events.publish(DeviceEvent::InstallStarted {
            device_id: device_id.to_owned(),
            target_version: asset.version.clone(),
            kind: target.kind(),
        });

        if let Some(previous) = start.backup_candidate {
            self.spawn_backup_check(device_id, &asset.platform, previous);
        }
        self.spawn_watchdog(device_id, start.attempt, &asset.version);

        // Dropping this future before delivery finishes must not leave the device Installing
        let mut guard = AttemptGuard {
            registry: &self.registry,
            events: &self.events,
            device_id,
            attempt: start.attempt,
            armed: true,
        };

        match self.deliver(device_id, start.attempt, &asset).await {
            Ok(ticket) => {
                guard.disarm();
                Ok(ticket)
            }
            Err(e) => {
                error!("Install of {} on {device_id} failed: {e}", asset.version);
                guard.abandon(&e.to_string());
                Err(e)
            }
        }
    }

    /// Look up the device and the asset to install; no state changes here
    async fn prepare(&self, device_id: &str, target: &InstallTarget) -> InstallResult<FirmwareAsset> {
        let record = self
            .registry
            .get(device_id)
            .ok_or_else(|| InstallError::UnknownDevice(device_id.to_owned()))?;

        if let Some(target_version) = record.target_version() {
            return Err(InstallError::AlreadyInstalling {
                device_id: device_id.to_owned(),
                target_version: target_version.to_owned(),
            });
        }

        self.resolve_target(&record, target).await
    }

    async fn resolve_target(&self, record: &DeviceRecord, target: &InstallTarget) -> InstallResult<FirmwareAsset> {
        let platform = &record.platform;
        match target {
            InstallTarget::Latest => self
                .cache
                .asset(platform)
                .ok_or_else(|| InstallError::NoFirmwareAvailable(platform.clone())),
            InstallTarget::Version(version) => self.find_version(platform, version).await,
            InstallTarget::Rollback => {
                let previous = record
                    .previous_version
                    .as_deref()
                    .ok_or(InstallError::RollbackUnavailable(RollbackBlocker::NoPreviousVersion))?;
                if !record.backup_available {
                    return Err(InstallError::RollbackUnavailable(
                        RollbackBlocker::BackupNotAvailable {
                            version: previous.to_owned(),
                        },
                    ));
                }
                self.find_version(platform, previous).await
            }
        }
    }

    async fn find_version(&self, platform: &PlatformKey, version: &str) -> InstallResult<FirmwareAsset> {
        self.cache
            .find_version(platform, version)
            .await?
            .ok_or_else(|| InstallError::VersionNotFound {
                platform: platform.clone(),
                version: version.to_owned(),
            })
    }

    /// Download, store and trigger; the device is Installing throughout
    async fn deliver(&self, device_id: &str, attempt: u64, asset: &FirmwareAsset) -> InstallResult<InstallTicket> {
        self.progress(device_id, attempt, PROGRESS_DOWNLOAD_START);
        let firmware = self
            .downloader
            .download(&asset.download_url, Some(asset.size), |percent| {
                self.progress(device_id, attempt, percent);
            })
            .await?;

        self.progress(device_id, attempt, PROGRESS_DOWNLOADED);
        let stored = self.store.put(&asset.filename, &firmware).await?;
        info!(
            "Firmware {} saved to {} ({} bytes, sha256 {})",
            asset.filename,
            stored.path.display(),
            stored.size,
            stored.sha256
        );

        self.progress(device_id, attempt, PROGRESS_STORED);
        let firmware_url = self.urls.firmware_url(&asset.filename);
        let topic = ota_topic(device_id);

        // A status report may have ended the attempt while we were downloading
        if !self.is_active(device_id, attempt) {
            return Err(InstallError::Superseded {
                device_id: device_id.to_owned(),
                target_version: asset.version.clone(),
            });
        }

        self.publisher.publish_ota(&topic, &firmware_url).await?;
        info!("OTA update triggered for {device_id} via {topic}: {firmware_url}");
        self.events.publish(DeviceEvent::Triggered {
            device_id: device_id.to_owned(),
            topic: topic.clone(),
            firmware_url: firmware_url.clone(),
        });
        self.progress(device_id, attempt, PROGRESS_TRIGGERED);

        Ok(InstallTicket {
            device_id: device_id.to_owned(),
            attempt,
            target_version: asset.version.clone(),
            topic,
            firmware_url,
            stored_path: stored.path,
            sha256: stored.sha256,
        })
    }

    fn is_active(&self, device_id: &str, attempt: u64) -> bool {
        self.registry
            .update(device_id, |record| record.is_attempt_active(attempt))
            .unwrap_or(false)
    }

    fn progress(&self, device_id: &str, attempt: u64, percent: u8) {
        let moved = self
            .registry
            .update(device_id, |record| record.set_progress(attempt, percent))
            .flatten();
        if let Some(percent) = moved {
            debug!("Install progress for {device_id}: {percent}%");
            self.events.publish(DeviceEvent::Progress {
                device_id: device_id.to_owned(),
                percent,
            });
        }
    }

    /// Check in the background whether `version` can be rolled back to
    fn spawn_backup_check(&self, device_id: &str, platform: &PlatformKey, version: String) {
        let cache = self.cache.clone();
        let registry = self.registry.clone();
        let events = self.events.clone();
        let device_id = device_id.to_owned();
        let platform = platform.clone();

        tokio::spawn(async move {
            let available = match cache.find_version(&platform, &version).await {
                Ok(found) => found.is_some(),
                Err(e) => {
                    warn!("Backup check for {version} on {device_id} failed: {e}");
                    false
                }
            };

            if available {
                info!("Backup version {version} is available for {device_id}");
            } else {
                warn!("Previous version {version} not found in releases; rollback unavailable for {device_id}");
            }

            let recorded = registry
                .update(&device_id, |record| record.set_backup_available(&version, available))
                .unwrap_or(false);
            if recorded {
                events.publish(DeviceEvent::BackupChecked {
                    device_id,
                    version,
                    available,
                });
            }
        });
    }

    /// Force the attempt back to Idle once the install timeout has passed
    ///
    /// Armed when the device enters Installing, so a stalled download or
    /// publish is covered as well as a device that never reports back.
    fn spawn_watchdog(&self, device_id: &str, attempt: u64, target_version: &str) {
        let Some(timeout) = self.install_timeout else {
            return;
        };
        let registry = self.registry.clone();
        let events = self.events.clone();
        let device_id = device_id.to_owned();
        let target_version = target_version.to_owned();

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = registry
                .update(&device_id, |record| record.end_install(attempt))
                .flatten();
            if expired.is_some() {
                warn!(
                    "Install of {target_version} on {device_id} timed out after {}s",
                    timeout.as_secs()
                );
                events.publish(DeviceEvent::InstallTimedOut {
                    device_id,
                    target_version,
                });
            }
        });
    }
}

/// Ends an install attempt that did not reach the OTA trigger
///
/// Runs on drop unless disarmed, so a cancelled `install` future still puts
/// the device back to Idle and reports `InstallFailed`.
struct AttemptGuard<'a> {
    registry: &'a DeviceRegistry,
    events: &'a EventBus,
    device_id: &'a str,
    attempt: u64,
    armed: bool,
}

impl AttemptGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }

    fn abandon(&mut self, reason: &str) {
        self.armed = false;
        let abandoned = self
            .registry
            .update(self.device_id, |record| record.end_install(self.attempt))
            .flatten();
        if let Some(target_version) = abandoned {
            self.events.publish(DeviceEvent::InstallFailed {
                device_id: self.device_id.to_owned(),
                target_version,
                error: reason.to_owned(),
            });
        }
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                "Install attempt {} on {} was cancelled before the OTA trigger",
                self.attempt, self.device_id
            );
            self.abandon(INSTALL_CANCELLED);
        }
    }
}
