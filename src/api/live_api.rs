use crate::error::{AppError, AppResult};
use crate::services::live_state::{normalize_media_url, LiveEvent, LiveStateChannel, PlayerLiveState};
use crate::AppState;
use async_stream::stream;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde_json::json;
use std::sync::Arc;
use url::Url;

/// Records what a player is rendering and mirrors it to its live subscriber.
pub async fn push_state(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
    headers: HeaderMap,
    Json(mut live): Json<PlayerLiveState>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.tokens.contains(&player_id).await {
        return Err(AppError::not_found("Player", player_id));
    }
    if let Some(raw) = live.media_url.take().filter(|u| !u.trim().is_empty()) {
        let base = public_base(&state, &headers)?;
        live.media_url = Some(normalize_media_url(&raw, &base));
    }
    state.live.publish(&player_id, live).await;
    Ok(Json(json!({ "success": true })))
}

/// Streams state snapshots for one player until the client goes away or is replaced.
pub async fn subscribe(State(state): State<AppState>, Path(player_id): Path<String>) -> impl IntoResponse {
    let mut subscription = state.live.subscribe(&player_id).await;
    tracing::debug!(
        "Live subscriber {} attached to player {}",
        subscription.id,
        player_id
    );
    let guard = Unsubscribe {
        live: state.live.clone(),
        player_id,
        subscription_id: subscription.id,
    };

    let stream = stream! {
        let _guard = guard;
        while let Some(event) = subscription.events.recv().await {
            match event {
                LiveEvent::State(snapshot) => match Event::default().json_data(&snapshot) {
                    Ok(event) => {
                        yield Ok::<_, axum::Error>(event);
                    }
                    Err(e) => tracing::warn!("Dropping unserializable live state: {}", e),
                },
                LiveEvent::Closed(reason) => {
                    yield Ok(Event::default()
                        .event("closed")
                        .data(json!({ "reason": reason }).to_string()));
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn preview(State(state): State<AppState>, Path(player_id): Path<String>) -> Response {
    match state.live.get_last(&player_id).await {
        Some(live) => Json(live).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "status": "offline" }))).into_response(),
    }
}

/// Frees the subscriber slot once the SSE body is dropped.
struct Unsubscribe {
    live: Arc<LiveStateChannel>,
    player_id: String,
    subscription_id: u64,
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let live = self.live.clone();
        let player_id = std::mem::take(&mut self.player_id);
        let subscription_id = self.subscription_id;
        handle.spawn(async move {
            live.unsubscribe(&player_id, subscription_id).await;
        });
    }
}

/// Base for absolutizing media URLs: configured public URL, then the request's Host, then the bind address.
fn public_base(state: &AppState, headers: &HeaderMap) -> AppResult<Url> {
    let raw = match &state.config.server.public_url {
        Some(public) => public.clone(),
        None => {
            let tls = state
                .config
                .server
                .https
                .as_ref()
                .map_or(false, |https| https.enabled);
            let scheme = headers
                .get("x-forwarded-proto")
                .and_then(|h| h.to_str().ok())
                .unwrap_or(if tls { "https" } else { "http" });
            match headers.get("host").and_then(|h| h.to_str().ok()) {
                Some(host) => format!("{}://{}/", scheme, host),
                None => format!(
                    "{}://{}:{}/",
                    scheme, state.config.server.host, state.config.server.port
                ),
            }
        }
    };
    Url::parse(&raw).map_err(|e| AppError::BadRequest(format!("Invalid base URL {}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{call, call_with_headers};
    use crate::services::live_state::LiveStatus;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use futures::StreamExt;
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_push_normalizes_and_preview_reads_back() {
        let (state, _dir) = crate::test_state();
        state.tokens.set("p1", "secret".to_string()).await;

        let (status, body) = call(&state, Method::GET, "/api/players/p1/preview", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"status": "offline"}));

        let (status, _) = call_with_headers(
            &state,
            Method::POST,
            "/api/players/p1/state",
            &[("host", "signage.local:8080")],
            Some(json!({"mediaUrl": "/uploads/a.png", "status": "playing"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&state, Method::GET, "/api/players/p1/preview", None).await;
        assert_eq!(body["mediaUrl"], "http://signage.local:8080/uploads/a.png");

        // Without a Host header the bind address is used.
        let (status, _) = call(
            &state,
            Method::POST,
            "/api/players/p1/state",
            Some(json!({
                "mediaUrl": "uploads\\promo.mp4",
                "mediaType": "video",
                "currentTime": 3.5,
                "status": "playing"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&state, Method::GET, "/api/players/p1/preview", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "playing");
        assert_eq!(body["mediaUrl"], "http://127.0.0.1:4000/uploads/promo.mp4");
        assert_eq!(body["currentTime"], 3.5);
    }

    #[tokio::test]
    async fn test_player_app_push_is_mirrored() {
        let (state, _dir) = crate::test_state();
        state.tokens.set("p1", "secret".to_string()).await;
        let (status, _) = call(
            &state,
            Method::POST,
            "/api/players/p1/state",
            Some(json!({
                "playerId": "p1",
                "status": "playing",
                "mediaType": "image",
                "mediaUrl": "uploads/a.png",
                "currentTime": 0,
                "timestamp": "2025-01-08T10:00:00.123456"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&state, Method::GET, "/api/players/p1/preview", None).await;
        assert_eq!(body["playerId"], "p1");
        assert_eq!(body["mediaType"], "image");
        assert_eq!(body["mediaUrl"], "http://127.0.0.1:4000/uploads/a.png");
        assert_ne!(body["timestamp"], "2025-01-08T10:00:00.123456");
    }

    #[tokio::test]
    async fn test_push_for_unknown_player_is_rejected() {
        let (state, _dir) = crate::test_state();
        let (status, _) = call(
            &state,
            Method::POST,
            "/api/players/ghost/state",
            Some(json!({"status": "idle"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(state.live.get_last("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_subscriber_receives_pushes_then_replacement_notice() {
        let (state, _dir) = crate::test_state();
        let response = crate::app(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/players/p1/subscribe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
        let mut frames = response.into_body().into_data_stream();

        let mut playing = crate::services::live_state::PlayerLiveState::with_status(LiveStatus::Playing);
        playing.media_url = Some("http://cdn/a.png".to_string());
        state.live.publish("p1", playing).await;
        let frame = frames.next().await.unwrap().unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.contains("\"mediaUrl\":\"http://cdn/a.png\""));

        // A second viewer takes over the slot.
        let _second = state.live.subscribe("p1").await;
        let frame = frames.next().await.unwrap().unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.contains("event: closed"));
        assert!(text.contains("{\"reason\":\"replaced\"}"));
        assert!(frames.next().await.is_none());
    }
}
