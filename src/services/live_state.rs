use chrono::{DateTime, Utc};
use serde::{de::IgnoredAny, Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveStatus {
    Offline,
    Idle,
    Playing,
}

/// What a player is rendering right now. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLiveState {
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub current_time: Option<f64>,
    pub status: LiveStatus,
    /// Stamped on receipt; whatever the player sent is discarded.
    #[serde(default = "Utc::now", deserialize_with = "received_at")]
    pub timestamp: DateTime<Utc>,
    /// Anything else the player reports (`playerId`, ...) is mirrored as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn received_at<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    IgnoredAny::deserialize(deserializer)?;
    Ok(Utc::now())
}

impl PlayerLiveState {
    pub fn with_status(status: LiveStatus) -> Self {
        Self {
            media_url: None,
            media_type: None,
            current_time: None,
            status,
            timestamp: Utc::now(),
            extra: Default::default(),
        }
    }
}

/// Items delivered to the single subscriber of a player's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    State(PlayerLiveState),
    /// The stream ends; the reason is `replaced` or `removed`.
    Closed(&'static str),
}

pub struct Subscription {
    pub id: u64,
    pub events: UnboundedReceiver<LiveEvent>,
}

#[derive(Debug, Default)]
struct Slot {
    last: Option<PlayerLiveState>,
    subscriber: Option<(u64, UnboundedSender<LiveEvent>)>,
}

/// Per-player last-known state plus at most one push subscriber.
#[derive(Debug, Default)]
pub struct LiveStateChannel {
    next_subscription: AtomicU64,
    slots: RwLock<HashMap<String, Slot>>,
}

impl LiveStateChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the last state and pushes it to the current subscriber, if any.
    pub async fn publish(&self, player_id: &str, mut state: PlayerLiveState) {
        state.timestamp = Utc::now();
        let mut slots = self.slots.write().await;
        let slot = slots.entry(player_id.to_string()).or_default();
        if let Some((_, sender)) = &slot.subscriber {
            if sender.send(LiveEvent::State(state.clone())).is_err() {
                // Receiver went away with its HTTP stream.
                slot.subscriber = None;
            }
        }
        slot.last = Some(state);
    }

    /// Attaches a new subscriber, closing out the previous one with reason `replaced`.
    pub async fn subscribe(&self, player_id: &str) -> Subscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, events) = unbounded_channel();
        let mut slots = self.slots.write().await;
        let slot = slots.entry(player_id.to_string()).or_default();
        if let Some((previous, old)) = slot.subscriber.replace((id, sender)) {
            tracing::debug!(
                "Live subscriber {} for player {} replaced by {}",
                previous,
                player_id,
                id
            );
            let _ = old.send(LiveEvent::Closed("replaced"));
        }
        Subscription { id, events }
    }

    /// Releases the subscriber slot unless a newer subscriber already took it.
    ///
    /// A slot left with neither a subscriber nor a state is dropped.
    pub async fn unsubscribe(&self, player_id: &str, subscription_id: u64) {
        let mut slots = self.slots.write().await;
        let Some(slot) = slots.get_mut(player_id) else {
            return;
        };
        if matches!(slot.subscriber, Some((id, _)) if id == subscription_id) {
            slot.subscriber = None;
        }
        if slot.subscriber.is_none() && slot.last.is_none() {
            slots.remove(player_id);
        }
    }

    #[cfg(test)]
    async fn slot_count(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn get_last(&self, player_id: &str) -> Option<PlayerLiveState> {
        self.slots
            .read()
            .await
            .get(player_id)
            .and_then(|slot| slot.last.clone())
    }

    /// Forgets everything about a deleted player.
    pub async fn remove(&self, player_id: &str) {
        let removed = self.slots.write().await.remove(player_id);
        if let Some((_, sender)) = removed.and_then(|slot| slot.subscriber) {
            let _ = sender.send(LiveEvent::Closed("removed"));
        }
    }
}

/// Makes a reported media location absolute against `base` so remote viewers can load it.
///
/// Backslashes from Windows hosts become forward slashes; absolute http(s) URLs pass through.
pub fn normalize_media_url(raw: &str, base: &Url) -> String {
    let cleaned = raw.replace('\\', "/");
    if cleaned.starts_with("http://") || cleaned.starts_with("https://") {
        return cleaned;
    }
    match base.join(&cleaned) {
        Ok(url) => url.to_string(),
        Err(e) => {
            tracing::warn!("Could not absolutize media URL {}: {}", raw, e);
            cleaned
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing(url: &str) -> PlayerLiveState {
        PlayerLiveState {
            media_url: Some(url.to_string()),
            media_type: Some("image".to_string()),
            current_time: Some(1.5),
            status: LiveStatus::Playing,
            timestamp: Utc::now(),
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_publish_overwrites_and_pushes() {
        let channel = LiveStateChannel::new();
        assert!(channel.get_last("p1").await.is_none());

        let mut sub = channel.subscribe("p1").await;
        channel.publish("p1", playing("http://h/a.png")).await;
        channel.publish("p1", playing("http://h/b.png")).await;

        let last = channel.get_last("p1").await.unwrap();
        assert_eq!(last.media_url.as_deref(), Some("http://h/b.png"));

        match sub.events.try_recv() {
            Ok(LiveEvent::State(state)) => {
                assert_eq!(state.media_url.as_deref(), Some("http://h/a.png"))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(sub.events.try_recv(), Ok(LiveEvent::State(_))));
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_subscriber_replaces_first() {
        let channel = LiveStateChannel::new();
        let mut first = channel.subscribe("p1").await;
        let mut second = channel.subscribe("p1").await;

        assert_eq!(first.events.try_recv(), Ok(LiveEvent::Closed("replaced")));

        channel.publish("p1", playing("http://h/a.png")).await;
        assert!(first.events.try_recv().is_err());
        assert!(matches!(second.events.try_recv(), Ok(LiveEvent::State(_))));

        // The stale subscriber leaving must not detach the current one.
        channel.unsubscribe("p1", first.id).await;
        channel.publish("p1", playing("http://h/b.png")).await;
        assert!(matches!(second.events.try_recv(), Ok(LiveEvent::State(_))));
    }

    #[tokio::test]
    async fn test_offline_snapshot_reaches_subscriber() {
        let channel = LiveStateChannel::new();
        let mut sub = channel.subscribe("p1").await;
        channel
            .publish("p1", PlayerLiveState::with_status(LiveStatus::Offline))
            .await;

        assert_eq!(
            channel.get_last("p1").await.unwrap().status,
            LiveStatus::Offline
        );
        match sub.events.try_recv() {
            Ok(LiveEvent::State(state)) => assert_eq!(state.status, LiveStatus::Offline),
            other => panic!("unexpected {:?}", other),
        }
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_closes_subscriber() {
        let channel = LiveStateChannel::new();
        let mut sub = channel.subscribe("p1").await;
        channel.publish("p1", playing("http://h/a.png")).await;
        channel.remove("p1").await;

        assert!(matches!(sub.events.try_recv(), Ok(LiveEvent::State(_))));
        assert_eq!(sub.events.try_recv(), Ok(LiveEvent::Closed("removed")));
        assert!(channel.get_last("p1").await.is_none());
    }

    #[test]
    fn test_normalize_media_url() {
        let base = Url::parse("http://10.0.0.5:4000/").unwrap();
        assert_eq!(
            normalize_media_url("uploads/slide.png", &base),
            "http://10.0.0.5:4000/uploads/slide.png"
        );
        assert_eq!(
            normalize_media_url("/uploads/slide.png", &base),
            "http://10.0.0.5:4000/uploads/slide.png"
        );
        assert_eq!(
            normalize_media_url("uploads\\deck\\page-1.png", &base),
            "http://10.0.0.5:4000/uploads/deck/page-1.png"
        );
        assert_eq!(
            normalize_media_url("https://cdn.example.com/a.mp4", &base),
            "https://cdn.example.com/a.mp4"
        );
    }

    #[tokio::test]
    async fn test_idle_subscription_leaves_no_slot_behind() {
        let channel = LiveStateChannel::new();
        let sub = channel.subscribe("ghost").await;
        assert_eq!(channel.slot_count().await, 1);
        channel.unsubscribe("ghost", sub.id).await;
        assert_eq!(channel.slot_count().await, 0);

        // A slot holding a snapshot survives its subscriber.
        let sub = channel.subscribe("p1").await;
        channel.publish("p1", playing("http://h/a.png")).await;
        channel.unsubscribe("p1", sub.id).await;
        assert!(channel.get_last("p1").await.is_some());
    }

    #[test]
    fn test_state_body_from_player_app() {
        let state: PlayerLiveState = serde_json::from_str(
            r#"{"playerId":"p1","status":"playing","mediaType":"image","mediaUrl":"uploads/a.png","currentTime":0,"timestamp":"2025-01-08T10:00:00.123456"}"#,
        )
        .unwrap();
        assert_eq!(state.status, LiveStatus::Playing);
        assert_eq!(state.current_time, Some(0.0));
        assert_eq!(state.extra.get("playerId"), Some(&serde_json::json!("p1")));
        assert!(!state.extra.contains_key("timestamp"));

        let echoed = serde_json::to_value(&state).unwrap();
        assert_eq!(echoed["playerId"], "p1");
        assert!(echoed["timestamp"].is_string());
    }

    #[test]
    fn test_state_body_accepts_minimal_payload() {
        let state: PlayerLiveState = serde_json::from_str(r#"{"status":"idle"}"#).unwrap();
        assert_eq!(state.status, LiveStatus::Idle);
        assert!(state.media_url.is_none());
        assert!(serde_json::from_str::<PlayerLiveState>(r#"{"status":"dancing"}"#).is_err());
    }
}
