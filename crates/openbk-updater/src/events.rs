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

//! In-process fan-out of device lifecycle events

use openbk_types::DeviceEvent;
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_CAPACITY: usize = 256;

/// Broadcast bus for [`DeviceEvent`]s
///
/// Publishing never blocks and never fails; events sent while nobody is
/// subscribed are dropped, and slow subscribers observe a lag instead of
/// holding up the sender.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DeviceEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: DeviceEvent) {
        trace!("Device event: {event:?}");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(DeviceEvent::Progress {
            device_id: "plug".to_owned(),
            percent: 5,
        });

        match rx.recv().await.unwrap() {
            DeviceEvent::Progress { device_id, percent } => {
                assert_eq!(device_id, "plug");
                assert_eq!(percent, 5);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(DeviceEvent::ReleaseRefreshed {
            tag: "1.0.0".to_owned(),
            platforms: 0,
        });
    }
}
