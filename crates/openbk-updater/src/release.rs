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

//! GitHub release feed client
//!
//! Fetches the latest release (and, on demand, the full history) and turns
//! each release into a [`ReleaseSnapshot`] holding at most one firmware asset
//! per known platform.

use crate::config::FeedSettings;
use crate::error::{FeedError, FeedResult};
use async_trait::async_trait;
use chrono::Utc;
use openbk_types::{FIRMWARE_EXTENSION, FirmwareAsset, PlatformKey, ReleaseSnapshot};
use regex::Regex;
use reqwest::header::{ACCEPT, LOCATION};
use reqwest::{Client, Response, StatusCode, redirect};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

pub(crate) const USER_AGENT: &str = concat!("openbk-updater/", env!("CARGO_PKG_VERSION"));

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("version pattern is valid"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub assets: Vec<GithubAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

/// Source of release snapshots
#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    /// Fetch the latest release, with CDN redirects resolved
    async fn fetch_latest(&self) -> FeedResult<ReleaseSnapshot>;

    /// Fetch the release history, newest first
    async fn fetch_all_releases(&self) -> FeedResult<Vec<ReleaseSnapshot>>;

    /// Search the full history for a platform's firmware at `version`
    async fn find_version(
        &self,
        platform: &PlatformKey,
        version: &str,
    ) -> FeedResult<Option<FirmwareAsset>> {
        info!("Searching for firmware version {version} for platform {platform}");
        let releases = self.fetch_all_releases().await?;
        let found = find_in_history(&releases, platform, version);
        match found {
            Some(ref asset) => info!("Found firmware {} for {platform}", asset.filename),
            None => warn!("Firmware version {version} for platform {platform} not found in releases"),
        }
        Ok(found)
    }
}

/// Extract the version from a `{prefix}_{X.Y.Z}.rbl` file name
pub fn extract_version<'a>(filename: &'a str, prefix: &str) -> Option<&'a str> {
    let version = filename
        .strip_prefix(prefix)?
        .strip_prefix('_')?
        .strip_suffix(FIRMWARE_EXTENSION)?
        .strip_suffix('.')?;
    VERSION_PATTERN.is_match(version).then_some(version)
}

/// File name a platform's firmware carries for `version`
pub fn firmware_filename(prefix: &str, version: &str) -> String {
    format!("{prefix}_{version}.{FIRMWARE_EXTENSION}")
}

/// Pick the first asset matching the platform's naming convention
pub fn resolve_asset(assets: &[GithubAsset], platform: &PlatformKey) -> Option<FirmwareAsset> {
    let prefix = platform.firmware_prefix()?;
    assets.iter().find_map(|asset| {
        extract_version(&asset.name, prefix).map(|version| FirmwareAsset {
            platform: platform.clone(),
            version: version.to_owned(),
            download_url: asset.browser_download_url.clone(),
            filename: asset.name.clone(),
            size: asset.size,
        })
    })
}

/// Build a snapshot from a raw release; download URLs are left untouched
pub fn snapshot_from_release(release: GithubRelease) -> ReleaseSnapshot {
    let assets: BTreeMap<PlatformKey, FirmwareAsset> = PlatformKey::known()
        .filter_map(|platform| {
            resolve_asset(&release.assets, &platform).map(|asset| (platform, asset))
        })
        .collect();

    ReleaseSnapshot {
        tag: release.tag_name,
        name: release.name,
        published_at: release.published_at,
        body: release.body,
        html_url: release.html_url,
        assets,
        fetched_at: Utc::now(),
    }
}

/// Newest-first scan of the history for a platform's firmware at `version`
pub fn find_in_history(
    releases: &[ReleaseSnapshot],
    platform: &PlatformKey,
    version: &str,
) -> Option<FirmwareAsset> {
    releases
        .iter()
        .filter_map(|release| release.asset(platform.as_str()))
        .find(|asset| asset.version == version)
        .cloned()
}

/// Devices cannot validate TLS, so every firmware URL is recorded as plain HTTP
pub fn downgrade_to_http(url: &str) -> String {
    match url.strip_prefix("https://") {
        Some(rest) => format!("http://{rest}"),
        None => url.to_owned(),
    }
}

/// GitHub REST client for the firmware repository
#[derive(Debug, Clone)]
pub struct GithubReleaseFeed {
    client: Client,
    head_client: Client,
    base_url: String,
    owner: String,
    repo: String,
}

impl GithubReleaseFeed {
    pub fn new(settings: &FeedSettings) -> FeedResult<Self> {
        let timeout = std::time::Duration::from_secs(settings.request_timeout_secs);

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Transport(format!("Failed to build HTTP client: {e}")))?;

        // HEAD requests must see the redirect itself rather than follow it
        let head_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| FeedError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            head_client,
            base_url: settings.api_base_url.trim_end_matches('/').to_owned(),
            owner: settings.repo_owner.clone(),
            repo: settings.repo_name.clone(),
        })
    }

    fn releases_url(&self) -> String {
        format!("{}/repos/{}/{}/releases", self.base_url, self.owner, self.repo)
    }

    async fn get(&self, url: &str) -> FeedResult<Response> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        log_rate_limit(&response);

        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::FORBIDDEN => {
                warn!("GitHub API rate limit exceeded");
                Err(FeedError::RateLimited)
            }
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(FeedError::Status {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    /// Follow one CDN redirect hop; failures fall back to the original URL
    async fn resolve_cdn_url(&self, platform: &PlatformKey, url: &str) -> String {
        match self.head_client.head(url).send().await {
            Ok(response)
                if matches!(response.status().as_u16(), 301 | 302 | 303 | 307 | 308) =>
            {
                match response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .filter(|location| !location.is_empty())
                {
                    Some(location) => {
                        debug!("Resolved CDN URL for {platform}: {location}");
                        location.to_owned()
                    }
                    None => url.to_owned(),
                }
            }
            Ok(_) => url.to_owned(),
            Err(e) => {
                warn!("Failed to resolve CDN URL for {platform}: {e}. Using original URL.");
                url.to_owned()
            }
        }
    }
}

#[async_trait]
impl ReleaseFeed for GithubReleaseFeed {
    async fn fetch_latest(&self) -> FeedResult<ReleaseSnapshot> {
        let url = format!("{}/latest", self.releases_url());
        debug!("Fetching latest firmware release from {url}");

        let release: GithubRelease = self
            .get(&url)
            .await?
            .json()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))?;

        let mut snapshot = snapshot_from_release(release);
        for asset in snapshot.assets.values_mut() {
            let resolved = self
                .resolve_cdn_url(&asset.platform, &asset.download_url)
                .await;
            asset.download_url = downgrade_to_http(&resolved);
        }

        Ok(snapshot)
    }

    async fn fetch_all_releases(&self) -> FeedResult<Vec<ReleaseSnapshot>> {
        let url = self.releases_url();
        debug!("Fetching release history from {url}");

        let releases: Vec<GithubRelease> = self
            .get(&url)
            .await?
            .json()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))?;

        Ok(releases
            .into_iter()
            .map(|release| {
                let mut snapshot = snapshot_from_release(release);
                for asset in snapshot.assets.values_mut() {
                    asset.download_url = downgrade_to_http(&asset.download_url);
                }
                snapshot
            })
            .collect())
    }
}

fn log_rate_limit(response: &Response) {
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };

    if let Some(remaining) = header("x-ratelimit-remaining") {
        let reset = header("x-ratelimit-reset").unwrap_or_default();
        debug!("GitHub API rate limit: {remaining} requests remaining (resets at: {reset})");
        if let Ok(remaining) = remaining.parse::<u32>()
            && remaining < 10
        {
            warn!("GitHub rate limit low: {remaining} remaining");
        }
    }
}
