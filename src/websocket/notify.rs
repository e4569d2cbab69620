use chrono::Utc;

use super::{PlayerRegistry, ServerMessage, TickerUpdate};
use crate::models::TickerSettings;

/// Persisted collections whose writes players and consoles are told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Media,
    Playlists,
    Schedules,
    Players,
}

impl Collection {
    fn console_event(self, timestamp: String) -> ServerMessage {
        match self {
            Collection::Media => ServerMessage::MediaUpdated { timestamp },
            Collection::Playlists => ServerMessage::PlaylistsUpdated { timestamp },
            Collection::Schedules => ServerMessage::SchedulesUpdated { timestamp },
            Collection::Players => ServerMessage::PlayersUpdated { timestamp },
        }
    }
}

/// One `content-changed` to every player and the matching `*-updated` to every console.
pub async fn content_changed(registry: &PlayerRegistry, collection: Collection) {
    let timestamp = Utc::now().to_rfc3339();
    let players = registry
        .broadcast_to_players(&ServerMessage::ContentChanged {
            timestamp: timestamp.clone(),
        })
        .await;
    let consoles = registry
        .broadcast_to_consoles(&collection.console_event(timestamp))
        .await;
    tracing::debug!(
        "{:?} changed: notified {} players and {} consoles",
        collection,
        players,
        consoles
    );
}

/// Pushes the new marquee to every player, then runs the usual content-change notice.
pub async fn ticker_changed(registry: &PlayerRegistry, settings: &TickerSettings) {
    let update = TickerUpdate::from(settings);
    registry
        .broadcast_to_players(&ServerMessage::TickerUpdated(update.clone()))
        .await;
    registry
        .broadcast_to_consoles(&ServerMessage::TickerSettingsUpdated { data: update })
        .await;
    registry
        .broadcast_to_players(&ServerMessage::ContentChanged {
            timestamp: Utc::now().to_rfc3339(),
        })
        .await;
}

pub async fn unicast_to_player(
    registry: &PlayerRegistry,
    player_id: &str,
    message: ServerMessage,
) -> bool {
    registry.send_to_player(player_id, message).await
}
