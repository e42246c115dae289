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

//! Error types for the updater crate

use openbk_types::PlatformKey;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("release feed request failed: {0}")]
    Transport(String),

    #[error("release feed rate limit exceeded (HTTP 403)")]
    RateLimited,

    #[error("release feed returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode release feed response: {0}")]
    Decode(String),
}

impl FeedError {
    /// Whether a cached snapshot may stand in for the failed fetch
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RateLimited | Self::Decode(_)
        )
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Why a rollback cannot start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackBlocker {
    NoPreviousVersion,
    BackupNotAvailable { version: String },
}

impl fmt::Display for RollbackBlocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPreviousVersion => f.write_str("no previous version recorded"),
            Self::BackupNotAvailable { version } => {
                write!(f, "version {version} is not available in release history")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("device {device_id} is already installing {target_version}")]
    AlreadyInstalling {
        device_id: String,
        target_version: String,
    },

    #[error("no firmware available for platform {0}")]
    NoFirmwareAvailable(PlatformKey),

    #[error("firmware {version} not found for platform {platform}")]
    VersionNotFound {
        platform: PlatformKey,
        version: String,
    },

    #[error("rollback unavailable: {0}")]
    RollbackUnavailable(RollbackBlocker),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("firmware download failed: {0}")]
    Download(String),

    #[error("failed to store firmware: {0}")]
    Storage(#[from] std::io::Error),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("install of {target_version} on {device_id} was superseded")]
    Superseded {
        device_id: String,
        target_version: String,
    },
}

impl InstallError {
    /// Rejections happen before the device enters Installing and leave no trace
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnknownDevice(_)
                | Self::AlreadyInstalling { .. }
                | Self::NoFirmwareAvailable(_)
                | Self::VersionNotFound { .. }
                | Self::RollbackUnavailable(_)
                | Self::Feed(_)
        )
    }
}

#[derive(Debug, Error)]
#[error("OTA command publish failed: {0}")]
pub struct PublishError(pub String);

/// Rejection reasons of the `{device_id}/build` status grammar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusParseError {
    #[error("topic {0:?} does not match '{{device_id}}/build'")]
    Topic(String),

    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("empty build payload")]
    Empty,

    #[error("build payload {0:?} has no version token (expected 'OpenBK{{Platform}} {{Version}}')")]
    MissingVersion(String),

    #[error("unrecognised firmware family label {0:?}")]
    UnknownFamily(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;
pub type InstallResult<T> = std::result::Result<T, InstallError>;
