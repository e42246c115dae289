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

//! Human readable release summary built from the release notes

use openbk_types::ReleaseSnapshot;
use regex::Regex;
use std::sync::LazyLock;

static CHANGES_H3: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?si)###\s*Changes\s*\n(.*?)(?:\n###|\z)").expect("changes pattern is valid")
});

static CHANGES_H2: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?si)##\s*Changes\s*\n(.*?)(?:\n##|\z)").expect("changes pattern is valid")
});

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("link pattern is valid"));

/// Extract the "Changes" section of a release body, links reduced to their text
pub fn extract_changes(body: &str) -> Option<String> {
    [&*CHANGES_H3, &*CHANGES_H2].into_iter().find_map(|pattern| {
        let changes = pattern.captures(body)?.get(1)?.as_str().trim();
        (!changes.is_empty()).then(|| MARKDOWN_LINK.replace_all(changes, "$1").into_owned())
    })
}

/// Multi-line summary shown next to an available update
pub fn release_summary(snapshot: &ReleaseSnapshot) -> String {
    let mut parts = vec![format!("Version: {}", snapshot.tag)];

    if let Some(ref published_at) = snapshot.published_at {
        match snapshot.published_at_utc() {
            Some(dt) => parts.push(format!("Published: {}", dt.format("%Y-%m-%d %H:%M UTC"))),
            None => parts.push(format!("Published: {published_at}")),
        }
    }

    if let Some(changes) = snapshot.body.as_deref().and_then(extract_changes) {
        parts.push(format!("\nChanges:\n{changes}"));
    }

    parts.join("\n")
}
