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

//! Version parsing and comparison module

/// Parse semver-like version strings (e.g., "1.17.551", "v1.17.551")
pub fn parse_version(s: &str) -> Option<(u32, u32, u32)> {
    let s = s.trim().trim_start_matches('v').trim_start_matches('V');
    let mut parts = s.split('.');

    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    Some((major, minor, patch))
}

/// Returns true if `remote` is strictly newer than `local`
pub fn is_newer(local: &str, remote: &str) -> Option<bool> {
    Some(parse_version(remote)? > parse_version(local)?)
}

/// Whether `latest` should be offered to a device running `installed`
///
/// Devices sometimes report builds that are not plain X.Y.Z (custom or
/// development builds); those are compared by plain inequality.
pub fn update_available(installed: &str, latest: &str) -> bool {
    is_newer(installed, latest).unwrap_or_else(|| installed.trim() != latest.trim())
}
