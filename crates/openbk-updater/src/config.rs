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

//! Configuration module for the updater

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_api_base_url() -> String {
    "https://api.github.com".to_owned()
}

fn default_repo_owner() -> String {
    "openshwprojects".to_owned()
}

fn default_repo_name() -> String {
    "OpenBK7231T_App".to_owned()
}

fn default_3600() -> u64 {
    3600
}

fn default_30() -> u64 {
    30
}

fn default_900() -> u64 {
    900
}

fn default_mqtt_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "openbk-updater".to_owned()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_owned()
}

fn default_http_port() -> u16 {
    8123
}

fn default_fallback_host() -> String {
    "homeassistant.local".to_owned()
}

fn default_firmware_dir() -> PathBuf {
    PathBuf::from("openbk_firmware")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdaterConfig {
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub serving: ServingSettings,
    #[serde(default)]
    pub install: InstallSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSettings {
    /// API base URL (overridable for testing)
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_repo_owner")]
    pub repo_owner: String,

    #[serde(default = "default_repo_name")]
    pub repo_name: String,

    /// How often the shared release snapshot is refreshed (seconds)
    #[serde(default = "default_3600")]
    pub update_interval_secs: u64,

    /// Hard ceiling for any single feed request (seconds)
    #[serde(default = "default_30")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_30")]
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingSettings {
    /// Explicit URL devices should download firmware from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,

    /// Hostname guessed when no URL is known at all
    #[serde(default = "default_fallback_host")]
    pub fallback_host: String,

    #[serde(default = "default_firmware_dir")]
    pub firmware_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSettings {
    /// Seconds to wait for the device to report a new build after the OTA
    /// trigger; 0 disables the watchdog
    #[serde(default = "default_900")]
    pub timeout_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            repo_owner: default_repo_owner(),
            repo_name: default_repo_name(),
            update_interval_secs: default_3600(),
            request_timeout_secs: default_30(),
        }
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_30(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

impl Default for ServingSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            internal_url: None,
            external_url: None,
            fallback_host: default_fallback_host(),
            firmware_dir: default_firmware_dir(),
        }
    }
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_900(),
        }
    }
}

impl UpdaterConfig {
    /// Load from an optional TOML file, apply environment overrides, validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply overrides from a key lookup (environment variables in production)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("OPENBK_SERVER_URL").filter(|v| !v.trim().is_empty()) {
            self.serving.server_url = Some(url.trim().to_owned());
        }
        if let Some(dir) = lookup("OPENBK_FIRMWARE_DIR") {
            self.serving.firmware_dir = PathBuf::from(dir);
        }
        if let Some(interval) = lookup("OPENBK_UPDATE_INTERVAL_SECS")
            && let Ok(secs) = interval.parse()
        {
            self.feed.update_interval_secs = secs;
        }
        if let Some(port) = lookup("OPENBK_HTTP_PORT")
            && let Ok(port) = port.parse()
        {
            self.http.port = port;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT")
            && let Ok(port) = port.parse()
        {
            self.mqtt.port = port;
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.update_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "feed.update_interval_secs must be greater than zero".to_owned(),
            ));
        }
        if self.feed.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "feed.request_timeout_secs must be greater than zero".to_owned(),
            ));
        }
        if self.feed.repo_owner.is_empty() || self.feed.repo_name.is_empty() {
            return Err(ConfigError::Invalid(
                "feed.repo_owner and feed.repo_name must be set".to_owned(),
            ));
        }
        if !is_http_url(&self.feed.api_base_url) {
            return Err(ConfigError::Invalid(format!(
                "feed.api_base_url must be an http(s) URL, got {}",
                self.feed.api_base_url
            )));
        }
        if let Some(ref url) = self.serving.server_url
            && !is_http_url(url)
        {
            return Err(ConfigError::Invalid(format!(
                "serving.server_url must be an http(s) URL, got {url}"
            )));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.feed.update_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.feed.request_timeout_secs)
    }

    pub fn install_timeout(&self) -> Option<Duration> {
        (self.install.timeout_secs > 0).then(|| Duration::from_secs(self.install.timeout_secs))
    }

    /// Last-resort base URL built from the fallback hostname and our HTTP port
    pub fn fallback_url(&self) -> String {
        format!("http://{}:{}", self.serving.fallback_host, self.http.port)
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = UpdaterConfig::default();
        assert_eq!(config.feed.update_interval_secs, 3600);
        assert_eq!(config.feed.request_timeout_secs, 30);
        assert_eq!(config.feed.repo_owner, "openshwprojects");
        assert_eq!(config.feed.repo_name, "OpenBK7231T_App");
        assert_eq!(config.mqtt.port, 1883);
        assert!(config.serving.server_url.is_none());
        assert_eq!(config.serving.firmware_dir, PathBuf::from("openbk_firmware"));
        assert_eq!(config.install_timeout(), Some(Duration::from_secs(900)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: UpdaterConfig = toml::from_str(
            r#"
            [feed]
            update_interval_secs = 7200

            [serving]
            server_url = "http://192.168.1.10:8123"
            "#,
        )
        .unwrap();

        assert_eq!(config.feed.update_interval_secs, 7200);
        assert_eq!(config.feed.request_timeout_secs, 30);
        assert_eq!(
            config.serving.server_url.as_deref(),
            Some("http://192.168.1.10:8123")
        );
        assert_eq!(config.mqtt.host, "127.0.0.1");
    }

    #[test]
    fn test_from_file() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(
            temp_file.path(),
            "[mqtt]\nhost = \"broker.lan\"\nport = 8883\n\n[install]\ntimeout_secs = 0\n",
        )
        .unwrap();

        let config = UpdaterConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.port, 8883);
        assert!(config.install_timeout().is_none());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = UpdaterConfig::from_file(Path::new("/nonexistent/openbk.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENBK_SERVER_URL", " http://10.0.0.2:8123 "),
            ("OPENBK_UPDATE_INTERVAL_SECS", "600"),
            ("MQTT_PORT", "not-a-port"),
            ("MQTT_USERNAME", "ha"),
        ]);

        let mut config = UpdaterConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_owned()));

        assert_eq!(
            config.serving.server_url.as_deref(),
            Some("http://10.0.0.2:8123")
        );
        assert_eq!(config.feed.update_interval_secs, 600);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.username.as_deref(), Some("ha"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = UpdaterConfig::default();
        config.feed.update_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = UpdaterConfig::default();
        config.serving.server_url = Some("192.168.1.10:8123".to_owned());
        assert!(config.validate().is_err());

        let mut config = UpdaterConfig::default();
        config.feed.repo_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fallback_url() {
        let config = UpdaterConfig::default();
        assert_eq!(config.fallback_url(), "http://homeassistant.local:8123");
    }
}
