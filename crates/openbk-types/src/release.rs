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

//! Release snapshot and firmware asset types

use crate::platform::PlatformKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One platform's firmware image inside a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareAsset {
    pub platform: PlatformKey,
    /// Dotted three-part version extracted from the file name
    pub version: String,
    /// Effective download URL (CDN target when a redirect was resolved)
    pub download_url: String,
    pub filename: String,
    /// Size in bytes as advertised by the feed
    pub size: u64,
}

/// One fetched-and-parsed view of the upstream release feed.
///
/// Snapshots are never mutated after construction; a refresh replaces the
/// whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSnapshot {
    /// Tag name (e.g., "1.18.42")
    pub tag: String,
    pub name: Option<String>,
    /// Raw publication timestamp as sent by the feed
    pub published_at: Option<String>,
    /// Release notes (markdown)
    pub body: Option<String>,
    pub html_url: Option<String>,
    /// At most one asset per platform
    pub assets: BTreeMap<PlatformKey, FirmwareAsset>,
    pub fetched_at: DateTime<Utc>,
}

impl ReleaseSnapshot {
    /// Tag with any leading `v` removed
    pub fn version(&self) -> &str {
        self.tag.trim_start_matches(['v', 'V'])
    }

    pub fn asset(&self, platform: &str) -> Option<&FirmwareAsset> {
        self.assets.get(platform)
    }

    pub fn published_at_utc(&self) -> Option<DateTime<Utc>> {
        self.published_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(tag: &str, published_at: Option<&str>) -> ReleaseSnapshot {
        let mut assets = BTreeMap::new();
        assets.insert(
            PlatformKey::new("BK7231T"),
            FirmwareAsset {
                platform: PlatformKey::new("BK7231T"),
                version: "1.2.3".to_owned(),
                download_url: "http://example.com/OpenBK7231T_1.2.3.rbl".to_owned(),
                filename: "OpenBK7231T_1.2.3.rbl".to_owned(),
                size: 1024,
            },
        );
        ReleaseSnapshot {
            tag: tag.to_owned(),
            name: None,
            published_at: published_at.map(str::to_owned),
            body: None,
            html_url: None,
            assets,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_version_strips_prefix() {
        assert_eq!(snapshot("v1.2.3", None).version(), "1.2.3");
        assert_eq!(snapshot("1.2.3", None).version(), "1.2.3");
    }

    #[test]
    fn test_asset_lookup_by_str() {
        let snap = snapshot("1.2.3", None);
        assert_eq!(snap.asset("BK7231T").unwrap().version, "1.2.3");
        assert!(snap.asset("BK7231N").is_none());
    }

    #[test]
    fn test_published_at_parsing() {
        let snap = snapshot("1.2.3", Some("2024-05-01T12:30:00Z"));
        let parsed = snap.published_at_utc().unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-05-01T12:30:00+00:00");

        assert!(snapshot("1.2.3", Some("yesterday")).published_at_utc().is_none());
        assert!(snapshot("1.2.3", None).published_at_utc().is_none());
    }

    #[test]
    fn test_snapshot_serializes_platform_keys_as_strings() {
        let json = serde_json::to_value(snapshot("1.2.3", None)).unwrap();
        assert_eq!(json["assets"]["BK7231T"]["version"], "1.2.3");
    }
}
