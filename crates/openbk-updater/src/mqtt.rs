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

//! MQTT plumbing: the status subscription and the OTA command channel

use crate::config::MqttSettings;
use crate::error::PublishError;
use crate::ingest::{STATUS_SUBSCRIPTION, StatusIngest};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Command topic a device listens on for OTA-over-HTTP requests
pub fn ota_topic(device_id: &str) -> String {
    format!("cmnd/{device_id}/ota_http")
}

/// Outbound side of the OTA trigger
#[async_trait]
pub trait OtaPublisher: Send + Sync {
    /// Fire-and-forget publish of `firmware_url` on `topic`
    async fn publish_ota(&self, topic: &str, firmware_url: &str) -> Result<(), PublishError>;
}

#[async_trait]
impl OtaPublisher for AsyncClient {
    async fn publish_ota(&self, topic: &str, firmware_url: &str) -> Result<(), PublishError> {
        self.publish(topic, QoS::AtMostOnce, false, firmware_url.as_bytes().to_vec())
            .await
            .map_err(|e| PublishError(e.to_string()))
    }
}

pub fn mqtt_options(settings: &MqttSettings) -> MqttOptions {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
    if let Some(ref username) = settings.username {
        options.set_credentials(username, settings.password.as_deref().unwrap_or_default());
    }
    options
}

pub fn connect(settings: &MqttSettings) -> (AsyncClient, EventLoop) {
    info!("Connecting to MQTT broker at {}:{}", settings.host, settings.port);
    AsyncClient::new(mqtt_options(settings), 20)
}

/// Queue the `+/build` subscription without waiting for room in the request channel
///
/// Called from the task that drains that channel, so it must never block on it.
pub fn subscribe_status(client: &AsyncClient) -> bool {
    match client.try_subscribe(STATUS_SUBSCRIPTION, QoS::AtMostOnce) {
        Ok(()) => {
            debug!("Subscribed to {STATUS_SUBSCRIPTION}");
            true
        }
        Err(e) => {
            error!("Subscribe to {STATUS_SUBSCRIPTION} failed: {e}");
            false
        }
    }
}

/// Drive the MQTT connection and feed `+/build` messages into `ingest`
///
/// Never returns; connection errors are logged and retried.
pub async fn run_status_loop(client: AsyncClient, mut eventloop: EventLoop, ingest: StatusIngest) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                ingest.on_message(&p.topic, &p.payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                // Re-subscribe on every (re)connect; the broker may have lost our session
                subscribe_status(&client);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT disconnected");
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT connection error: {e}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ota_topic() {
        assert_eq!(ota_topic("kitchen-plug"), "cmnd/kitchen-plug/ota_http");
    }

    #[test]
    fn test_mqtt_options_from_settings() {
        let settings = MqttSettings {
            host: "broker.lan".to_owned(),
            port: 1884,
            username: Some("ha".to_owned()),
            password: Some("secret".to_owned()),
            ..MqttSettings::default()
        };

        let options = mqtt_options(&settings);
        assert_eq!(options.broker_address(), ("broker.lan".to_owned(), 1884));
        assert_eq!(options.client_id(), "openbk-updater");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_subscribe_does_not_block_on_full_queue() {
        let (client, _eventloop) = AsyncClient::new(mqtt_options(&MqttSettings::default()), 1);
        client
            .try_publish(ota_topic("plug"), QoS::AtMostOnce, false, b"http://host/fw.rbl".to_vec())
            .unwrap();

        assert!(!subscribe_status(&client));
    }

    #[tokio::test]
    async fn test_subscribe_queues_when_there_is_room() {
        let (client, _eventloop) = AsyncClient::new(mqtt_options(&MqttSettings::default()), 4);
        assert!(subscribe_status(&client));
    }
}
