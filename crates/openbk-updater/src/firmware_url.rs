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

//! Device-reachable firmware URLs

use crate::config::UpdaterConfig;
use crate::release::downgrade_to_http;

/// Path prefix under which stored firmware is served
pub const FIRMWARE_SERVER_PATH: &str = "/api/openbk_firmware";

/// Picks the base URL devices should download firmware from
///
/// Candidates are tried in order: explicit server URL, internal URL,
/// external URL, then the fallback hostname guess. Devices cannot do TLS,
/// so the result is always plain HTTP.
#[derive(Debug, Clone)]
pub struct ServerUrlResolver {
    server_url: Option<String>,
    internal_url: Option<String>,
    external_url: Option<String>,
    fallback_url: String,
}

impl ServerUrlResolver {
    pub fn new(
        server_url: Option<String>,
        internal_url: Option<String>,
        external_url: Option<String>,
        fallback_url: String,
    ) -> Self {
        Self {
            server_url,
            internal_url,
            external_url,
            fallback_url,
        }
    }

    pub fn from_config(config: &UpdaterConfig) -> Self {
        Self::new(
            config.serving.server_url.clone(),
            config.serving.internal_url.clone(),
            config.serving.external_url.clone(),
            config.fallback_url(),
        )
    }

    pub fn base_url(&self) -> String {
        let base = [&self.server_url, &self.internal_url, &self.external_url]
            .into_iter()
            .flatten()
            .map(|url| url.trim())
            .find(|url| !url.is_empty())
            .unwrap_or(self.fallback_url.as_str());

        downgrade_to_http(base).trim_end_matches('/').to_owned()
    }

    pub fn firmware_url(&self, filename: &str) -> String {
        format!("{}{FIRMWARE_SERVER_PATH}/{filename}", self.base_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(server: Option<&str>, internal: Option<&str>, external: Option<&str>) -> ServerUrlResolver {
        ServerUrlResolver::new(
            server.map(str::to_owned),
            internal.map(str::to_owned),
            external.map(str::to_owned),
            "http://homeassistant.local:8123".to_owned(),
        )
    }

    #[test]
    fn test_explicit_server_url_wins() {
        let r = resolver(
            Some("https://10.0.0.2:8123/"),
            Some("http://internal:8123"),
            Some("https://ha.example.com"),
        );
        assert_eq!(
            r.firmware_url("OpenBK7231T_1.2.3.rbl"),
            "http://10.0.0.2:8123/api/openbk_firmware/OpenBK7231T_1.2.3.rbl"
        );
    }

    #[test]
    fn test_precedence_chain() {
        assert_eq!(
            resolver(None, Some("http://internal:8123/"), Some("https://ha.example.com")).base_url(),
            "http://internal:8123"
        );
        assert_eq!(
            resolver(None, None, Some("https://ha.example.com/")).base_url(),
            "http://ha.example.com"
        );
        assert_eq!(
            resolver(Some("  "), None, None).base_url(),
            "http://homeassistant.local:8123"
        );
    }

    #[test]
    fn test_from_config_fallback_uses_http_port() {
        let mut config = UpdaterConfig::default();
        config.http.port = 8080;
        let r = ServerUrlResolver::from_config(&config);
        assert_eq!(
            r.firmware_url("x.rbl"),
            "http://homeassistant.local:8080/api/openbk_firmware/x.rbl"
        );
    }
}
