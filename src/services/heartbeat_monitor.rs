use crate::websocket::{CloseReason, PlayerRegistry};
use crate::AppState;
use std::time::Duration;
use tokio::time::interval;

pub async fn run(state: AppState) {
    let players = &state.config.players;
    if players.heartbeat_timeout_secs == 0 {
        tracing::info!("Heartbeat reaper disabled; silent players stay connected");
        return;
    }

    let timeout = Duration::from_secs(players.heartbeat_timeout_secs);
    let mut tick = interval(Duration::from_secs(players.reaper_interval_secs.max(1)));

    loop {
        tick.tick().await;

        let reaped = reap_stale(&state.registry, timeout).await;
        if reaped > 0 {
            tracing::warn!("Closed {} unresponsive player connections", reaped);
        }
    }
}

/// Asks every connection silent for longer than `timeout` to close.
///
/// The socket's own disconnect handling then marks the player offline.
pub async fn reap_stale(registry: &PlayerRegistry, timeout: Duration) -> usize {
    let mut reaped = 0;
    for (player_id, connection_id) in registry.stale_players(timeout).await {
        if registry
            .close_connection(&player_id, connection_id, CloseReason::HeartbeatTimeout)
            .await
        {
            tracing::debug!("Reaping player {} (connection {})", player_id, connection_id);
            reaped += 1;
        }
    }
    reaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::{Outbound, Transport};
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn test_only_silent_connections_are_reaped() {
        let registry = PlayerRegistry::new();
        let (quiet_tx, mut quiet_rx) = unbounded_channel();
        let (busy_tx, mut busy_rx) = unbounded_channel();
        let busy_id = registry.next_connection_id();
        registry
            .attach(
                "quiet",
                Transport {
                    connection_id: registry.next_connection_id(),
                    sender: quiet_tx,
                },
            )
            .await;
        registry
            .attach(
                "busy",
                Transport {
                    connection_id: busy_id,
                    sender: busy_tx,
                },
            )
            .await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        registry.touch("busy", busy_id).await;

        assert_eq!(reap_stale(&registry, Duration::from_millis(20)).await, 1);
        assert!(matches!(
            quiet_rx.try_recv(),
            Ok(Outbound::Close(CloseReason::HeartbeatTimeout))
        ));
        assert!(busy_rx.try_recv().is_err());
    }
}
