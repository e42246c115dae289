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

//! Streaming firmware downloader
//!
//! Pulls a firmware image into memory, reporting install progress between
//! [`PROGRESS_DOWNLOAD_START`] and [`PROGRESS_DOWNLOADED`] as bytes arrive.

use crate::error::{InstallError, InstallResult};
use crate::release::USER_AGENT;
use futures_util::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub const PROGRESS_DOWNLOAD_START: u8 = 5;
pub const PROGRESS_DOWNLOADED: u8 = 45;

/// Map received bytes onto the 5..=45 progress window
pub fn download_progress(downloaded: u64, total: Option<u64>) -> u8 {
    let span = u64::from(PROGRESS_DOWNLOADED - PROGRESS_DOWNLOAD_START);
    match total {
        Some(total) if total > 0 => {
            let step = downloaded.min(total) * span / total;
            PROGRESS_DOWNLOAD_START + u8::try_from(step).unwrap_or(PROGRESS_DOWNLOADED - PROGRESS_DOWNLOAD_START)
        }
        _ => PROGRESS_DOWNLOAD_START,
    }
}

#[derive(Debug, Clone)]
pub struct FirmwareDownloader {
    client: Client,
}

impl FirmwareDownloader {
    pub fn new(timeout: Duration) -> InstallResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| InstallError::Download(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Download `url`, calling `on_progress` on every whole-percent change
    ///
    /// `expected_size` is used for progress when the server sends no
    /// content length.
    pub async fn download(
        &self,
        url: &str,
        expected_size: Option<u64>,
        mut on_progress: impl FnMut(u8),
    ) -> InstallResult<Vec<u8>> {
        debug!("Downloading firmware from {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| InstallError::Download(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(InstallError::Download(format!(
                "Download failed with status: {}",
                response.status()
            )));
        }

        let total = response
            .content_length()
            .filter(|len| *len > 0)
            .or(expected_size.filter(|size| *size > 0));

        let mut bytes = Vec::with_capacity(usize::try_from(total.unwrap_or(0)).unwrap_or(0));
        let mut last = PROGRESS_DOWNLOAD_START;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| InstallError::Download(format!("Failed to read body: {e}")))?;
            bytes.extend_from_slice(&chunk);

            let percent = download_progress(bytes.len() as u64, total);
            if percent != last {
                last = percent;
                on_progress(percent);
            }
        }

        debug!("Downloaded {} bytes from {url}", bytes.len());
        Ok(bytes)
    }
}
