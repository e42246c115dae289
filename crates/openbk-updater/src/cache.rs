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

//! Shared, single-flight cache of the latest release snapshot

use crate::error::FeedResult;
use crate::events::EventBus;
use crate::notes::release_summary;
use crate::release::ReleaseFeed;
use openbk_types::{DeviceEvent, FirmwareAsset, PlatformKey, ReleaseSnapshot, ReleaseView};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, warn};

/// Latest release snapshot shared by every device consumer
///
/// The snapshot is swapped as a whole; readers holding an `Arc` keep seeing
/// the snapshot they loaded. Refreshes are serialized, and a caller that
/// queued behind a running refresh takes that refresh's result instead of
/// hitting the feed again.
pub struct ReleaseCache {
    feed: Arc<dyn ReleaseFeed>,
    current: RwLock<Option<Arc<ReleaseSnapshot>>>,
    refresh_lock: Mutex<()>,
    completed: AtomicU64,
    events: EventBus,
}

impl std::fmt::Debug for ReleaseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseCache")
            .field("current", &self.current.read().as_ref().map(|s| s.tag.clone()))
            .field("completed", &self.completed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ReleaseCache {
    pub fn new(feed: Arc<dyn ReleaseFeed>, events: EventBus) -> Self {
        Self {
            feed,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            completed: AtomicU64::new(0),
            events,
        }
    }

    /// Last good snapshot, if any fetch has ever succeeded
    pub fn current(&self) -> Option<Arc<ReleaseSnapshot>> {
        self.current.read().clone()
    }

    /// Latest asset for one platform
    pub fn asset(&self, platform: &PlatformKey) -> Option<FirmwareAsset> {
        self.current()
            .and_then(|snapshot| snapshot.asset(platform.as_str()).cloned())
    }

    pub fn view(&self) -> Option<ReleaseView> {
        self.current().map(|snapshot| release_view(&snapshot))
    }

    /// Fetch the latest release and publish it as the current snapshot
    ///
    /// Transport, rate limit and decode failures fall back to the previous
    /// snapshot when there is one. Other failures are returned, but the
    /// previous snapshot stays current either way.
    pub async fn refresh(&self) -> FeedResult<Arc<ReleaseSnapshot>> {
        let seen = self.completed.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        if self.completed.load(Ordering::Acquire) != seen
            && let Some(snapshot) = self.current()
        {
            debug!("Joined concurrent refresh, using snapshot {}", snapshot.tag);
            return Ok(snapshot);
        }

        let result = self.feed.fetch_latest().await;
        self.completed.fetch_add(1, Ordering::Release);

        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.current.write() = Some(snapshot.clone());

                let platforms: Vec<&str> = snapshot.assets.keys().map(PlatformKey::as_str).collect();
                info!(
                    "Release {} cached with firmware for: {}",
                    snapshot.tag,
                    platforms.join(", ")
                );
                self.events.publish(DeviceEvent::ReleaseRefreshed {
                    tag: snapshot.tag.clone(),
                    platforms: snapshot.assets.len(),
                });
                Ok(snapshot)
            }
            Err(e) => match self.current() {
                Some(previous) if e.is_recoverable() => {
                    warn!("Release refresh failed ({e}); keeping cached release {}", previous.tag);
                    Ok(previous)
                }
                _ => {
                    error!("Release refresh failed: {e}");
                    Err(e)
                }
            },
        }
    }

    /// Historical lookup; always goes to the feed
    pub async fn find_version(
        &self,
        platform: &PlatformKey,
        version: &str,
    ) -> FeedResult<Option<FirmwareAsset>> {
        self.feed.find_version(platform, version).await
    }

    /// Refresh every `period`, starting one period from now
    pub async fn run_periodic(self: Arc<Self>, period: Duration) {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            if let Err(e) = self.refresh().await {
                debug!("Scheduled refresh produced no snapshot: {e}");
            }
        }
    }
}

pub fn release_view(snapshot: &ReleaseSnapshot) -> ReleaseView {
    ReleaseView {
        tag: snapshot.tag.clone(),
        name: snapshot.name.clone(),
        published_at: snapshot.published_at.clone(),
        release_url: snapshot.html_url.clone(),
        summary: Some(release_summary(snapshot)),
        platforms: snapshot.assets.values().cloned().collect(),
        fetched_at: snapshot.fetched_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::AtomicUsize;

    struct ScriptedFeed {
        responses: parking_lot::Mutex<VecDeque<FeedResult<ReleaseSnapshot>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedFeed {
        fn new(responses: Vec<FeedResult<ReleaseSnapshot>>) -> Self {
            Self {
                responses: parking_lot::Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReleaseFeed for ScriptedFeed {
        async fn fetch_latest(&self) -> FeedResult<ReleaseSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(FeedError::Transport("script exhausted".to_owned())))
        }

        async fn fetch_all_releases(&self) -> FeedResult<Vec<ReleaseSnapshot>> {
            Ok(Vec::new())
        }
    }

    fn snapshot(tag: &str) -> ReleaseSnapshot {
        ReleaseSnapshot {
            tag: tag.to_owned(),
            name: None,
            published_at: None,
            body: None,
            html_url: None,
            assets: BTreeMap::new(),
            fetched_at: Utc::now(),
        }
    }

    fn cache_with(feed: Arc<ScriptedFeed>) -> ReleaseCache {
        ReleaseCache::new(feed, EventBus::new())
    }

    #[tokio::test]
    async fn test_first_failure_is_surfaced() {
        let feed = Arc::new(ScriptedFeed::new(vec![Err(FeedError::RateLimited)]));
        let cache = cache_with(feed.clone());

        assert!(matches!(cache.refresh().await, Err(FeedError::RateLimited)));
        assert!(cache.current().is_none());
        assert!(cache.view().is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_after_success_serves_stale() {
        let feed = Arc::new(ScriptedFeed::new(vec![
            Ok(snapshot("1.0.0")),
            Err(FeedError::RateLimited),
        ]));
        let cache = cache_with(feed.clone());

        let first = cache.refresh().await.unwrap();
        let second = cache.refresh().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.current().unwrap().tag, "1.0.0");
        assert_eq!(feed.calls(), 2);
    }

    #[tokio::test]
    async fn test_two_failures_keep_first_snapshot() {
        let feed = Arc::new(ScriptedFeed::new(vec![
            Ok(snapshot("1.0.0")),
            Err(FeedError::Transport("timeout".to_owned())),
            Err(FeedError::Status {
                status: 500,
                message: "oops".to_owned(),
            }),
        ]));
        let cache = cache_with(feed);

        let first = cache.refresh().await.unwrap();
        assert!(cache.refresh().await.is_ok());
        assert!(matches!(
            cache.refresh().await,
            Err(FeedError::Status { status: 500, .. })
        ));

        let current = cache.current().unwrap();
        assert!(Arc::ptr_eq(&first, &current));
    }

    #[tokio::test]
    async fn test_success_replaces_snapshot() {
        let feed = Arc::new(ScriptedFeed::new(vec![
            Ok(snapshot("1.0.0")),
            Ok(snapshot("1.1.0")),
        ]));
        let cache = cache_with(feed);
        let events = cache.events.clone();
        let mut rx = events.subscribe();

        let held = cache.refresh().await.unwrap();
        cache.refresh().await.unwrap();

        assert_eq!(held.tag, "1.0.0");
        assert_eq!(cache.current().unwrap().tag, "1.1.0");
        assert!(matches!(
            rx.recv().await,
            Ok(DeviceEvent::ReleaseRefreshed { ref tag, .. }) if tag == "1.0.0"
        ));
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_fetch() {
        let mut feed = ScriptedFeed::new(vec![Ok(snapshot("1.0.0")), Ok(snapshot("2.0.0"))]);
        feed.delay = Duration::from_millis(50);
        let feed = Arc::new(feed);
        let cache = cache_with(feed.clone());

        let (a, b) = tokio::join!(cache.refresh(), cache.refresh());

        assert_eq!(a.unwrap().tag, "1.0.0");
        assert_eq!(b.unwrap().tag, "1.0.0");
        assert_eq!(feed.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_refresh_waits_one_period() {
        let feed = Arc::new(ScriptedFeed::new(vec![Ok(snapshot("1.0.0"))]));
        let cache = Arc::new(cache_with(feed.clone()));

        let task = tokio::spawn(cache.clone().run_periodic(Duration::from_secs(3600)));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(feed.calls(), 0);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(feed.calls(), 1);
        assert_eq!(cache.current().unwrap().tag, "1.0.0");

        task.abort();
    }

    #[test]
    fn test_release_view() {
        let mut release = snapshot("1.2.3");
        release.html_url = Some("https://github.com/r/1.2.3".to_owned());
        let view = release_view(&release);

        assert_eq!(view.tag, "1.2.3");
        assert_eq!(view.release_url.as_deref(), Some("https://github.com/r/1.2.3"));
        assert_eq!(view.summary.as_deref(), Some("Version: 1.2.3"));
        assert!(view.platforms.is_empty());
    }
}
