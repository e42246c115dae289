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

//! HTTP surface: firmware file responder, operator API and event stream

use crate::error::InstallError;
use crate::firmware_url::FIRMWARE_SERVER_PATH;
use crate::orchestrator::{InstallTarget, InstallTicket, UpdateOrchestrator};
use crate::store::{ArtifactStore, ResolveError};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Request, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct AppState {
    pub orchestrator: Arc<UpdateOrchestrator>,
    pub store: ArtifactStore,
    /// Flipped to `true` when the server is shutting down; ends open event streams
    pub shutdown: watch::Sender<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct InstallRequest {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Serialize)]
struct InstallResponse {
    device_id: String,
    attempt: u64,
    target_version: String,
    topic: String,
    firmware_url: String,
    sha256: String,
}

impl From<InstallTicket> for InstallResponse {
    fn from(ticket: InstallTicket) -> Self {
        Self {
            device_id: ticket.device_id,
            attempt: ticket.attempt,
            target_version: ticket.target_version,
            topic: ticket.topic,
            firmware_url: ticket.firmware_url,
            sha256: ticket.sha256,
        }
    }
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

impl From<InstallError> for ApiError {
    fn from(err: InstallError) -> Self {
        let status = match err {
            InstallError::UnknownDevice(_) => StatusCode::NOT_FOUND,
            InstallError::AlreadyInstalling { .. }
            | InstallError::NoFirmwareAvailable(_)
            | InstallError::VersionNotFound { .. }
            | InstallError::RollbackUnavailable(_)
            | InstallError::Superseded { .. } => StatusCode::CONFLICT,
            InstallError::Feed(_)
            | InstallError::Download(_)
            | InstallError::Storage(_)
            | InstallError::Publish(_) => StatusCode::BAD_GATEWAY,
        };
        Self(status, err.to_string())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/release", get(release_handler))
        .route("/api/devices", get(devices_handler))
        .route("/api/devices/{device_id}", get(device_handler))
        .route("/api/devices/{device_id}/install", post(install_handler))
        .route("/api/devices/{device_id}/rollback", post(rollback_handler))
        .route("/api/events", get(events_handler))
        .route(
            &format!("{FIRMWARE_SERVER_PATH}/{{filename}}"),
            get(firmware_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn release_handler(State(state): State<AppState>) -> Response {
    match state.orchestrator.cache().view() {
        Some(view) => Json(view).into_response(),
        None => ApiError(
            StatusCode::SERVICE_UNAVAILABLE,
            "no release data fetched yet".to_owned(),
        )
        .into_response(),
    }
}

async fn devices_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.device_views())
}

async fn device_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .orchestrator
        .device_view(&device_id)
        .map(Json)
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, format!("unknown device: {device_id}")))
}

async fn install_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: InstallRequest = if body.iter().all(u8::is_ascii_whitespace) {
        InstallRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError(StatusCode::BAD_REQUEST, format!("invalid request body: {e}")))?
    };

    let target = match request.version {
        Some(version) => InstallTarget::Version(version),
        None => InstallTarget::Latest,
    };

    let ticket = state.orchestrator.install(&device_id, target).await?;
    Ok((StatusCode::ACCEPTED, Json(InstallResponse::from(ticket))))
}

async fn rollback_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = state.orchestrator.rollback(&device_id).await?;
    Ok((StatusCode::ACCEPTED, Json(InstallResponse::from(ticket))))
}

/// SSE stream of every device and release event
async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("Event stream connected");
    let events = BroadcastStream::new(state.orchestrator.events().subscribe())
        .filter_map(|message| {
            let event = message.ok()?;
            Event::default().event("device").json_data(&event).ok()
        })
        .map(Ok);

    // Graceful shutdown waits for open connections, so the stream has to end by itself
    let stream = futures_util::StreamExt::take_until(
        events,
        shutdown_requested(state.shutdown.subscribe()),
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Serve a stored firmware image to a device
async fn firmware_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    request: Request,
) -> Response {
    match state.store.resolve(&filename).await {
        Ok(path) => match ServeFile::new(path).oneshot(request).await {
            Ok(response) => response.into_response(),
            Err(never) => match never {},
        },
        Err(ResolveError::Forbidden) => {
            warn!("Refused firmware request outside store: {filename:?}");
            StatusCode::FORBIDDEN.into_response()
        }
        Err(ResolveError::NotFound) => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ReleaseCache;
    use crate::downloader::FirmwareDownloader;
    use crate::error::{FeedError, FeedResult, PublishError};
    use crate::events::EventBus;
    use crate::firmware_url::ServerUrlResolver;
    use crate::mqtt::OtaPublisher;
    use crate::registry::DeviceRegistry;
    use crate::release::ReleaseFeed;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use openbk_types::{DeviceView, PlatformKey, ReleaseSnapshot};
    use std::time::Duration;
    use tempfile::TempDir;

    struct EmptyFeed;

    #[async_trait]
    impl ReleaseFeed for EmptyFeed {
        async fn fetch_latest(&self) -> FeedResult<ReleaseSnapshot> {
            Err(FeedError::RateLimited)
        }

        async fn fetch_all_releases(&self) -> FeedResult<Vec<ReleaseSnapshot>> {
            Ok(Vec::new())
        }
    }

    struct NullPublisher;

    #[async_trait]
    impl OtaPublisher for NullPublisher {
        async fn publish_ota(&self, _topic: &str, _firmware_url: &str) -> Result<(), PublishError> {
            Ok(())
        }
    }

    fn app(dir: &TempDir) -> (Router, AppState) {
        let events = EventBus::new();
        let store = ArtifactStore::new(dir.path());
        let orchestrator = UpdateOrchestrator::new(
            Arc::new(DeviceRegistry::new()),
            Arc::new(ReleaseCache::new(Arc::new(EmptyFeed), events.clone())),
            store.clone(),
            FirmwareDownloader::new(Duration::from_secs(1)).unwrap(),
            ServerUrlResolver::new(None, None, None, "http://localhost:8123".to_owned()),
            Arc::new(NullPublisher),
            events,
        );
        let state = AppState {
            orchestrator: Arc::new(orchestrator),
            store,
            shutdown: watch::channel(false).0,
        };
        (router(state.clone()), state)
    }

    fn get(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_serves_stored_firmware() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("OpenBK7231T_1.2.3.rbl"), b"firmware-bytes").unwrap();
        let (router, _) = app(&dir);

        let response = router
            .oneshot(get("/api/openbk_firmware/OpenBK7231T_1.2.3.rbl"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"firmware-bytes");
    }

    #[tokio::test]
    async fn test_missing_firmware_is_404() {
        let dir = TempDir::new().unwrap();
        let (router, _) = app(&dir);

        let response = router
            .oneshot(get("/api/openbk_firmware/OpenBK7231T_9.9.9.rbl"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_traversal_is_403() {
        let dir = TempDir::new().unwrap();
        let (router, _) = app(&dir);

        let response = router
            .oneshot(get("/api/openbk_firmware/..%2Fsecret.txt"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_release_unavailable_before_first_fetch() {
        let dir = TempDir::new().unwrap();
        let (router, _) = app(&dir);

        let response = router.oneshot(get("/api/release")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_device_listing() {
        let dir = TempDir::new().unwrap();
        let (router, state) = app(&dir);
        let registry = state.orchestrator.registry();
        registry.observe("b-plug", &PlatformKey::new("BK7231N"), "1.0.0");
        registry.observe("a-plug", &PlatformKey::new("BK7231T"), "1.2.3");

        let response = router.clone().oneshot(get("/api/devices")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let devices: Vec<DeviceView> = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device_id, "a-plug");
        assert!(!devices[0].update_available);

        let response = router.clone().oneshot(get("/api/devices/a-plug")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router.oneshot(get("/api/devices/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_operator_command_status_codes() {
        let dir = TempDir::new().unwrap();
        let (router, state) = app(&dir);
        state
            .orchestrator
            .registry()
            .observe("plug", &PlatformKey::new("BK7231T"), "1.2.3");

        let response = router
            .clone()
            .oneshot(post("/api/devices/ghost/rollback", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router
            .clone()
            .oneshot(post("/api/devices/plug/rollback", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("no previous version"));

        let response = router
            .clone()
            .oneshot(post("/api/devices/plug/install", r#"{"version": "1.0.0"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = router
            .clone()
            .oneshot(post("/api/devices/plug/install", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = router
            .oneshot(post("/api/devices/plug/install", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_event_stream_ends_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let (router, state) = app(&dir);

        let response = router.oneshot(get("/api/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );
        let mut stream = response.into_body().into_data_stream();

        // Open until shutdown is signalled
        let pending = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
        assert!(pending.is_err());

        state.shutdown.send_replace(true);
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(chunk) = stream.next().await {
                chunk.unwrap();
            }
        })
        .await;
        assert!(drained.is_ok(), "event stream ends after shutdown");
    }
}
