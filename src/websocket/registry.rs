use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;

use super::ServerMessage;

pub type ConnectionId = u64;

/// Why the server closed a connection. Sent as the WebSocket close reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    InvalidCredentials,
    Superseded,
    Removed,
    TokenRotated,
    HeartbeatTimeout,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::InvalidCredentials => "invalid-credentials",
            CloseReason::Superseded => "superseded",
            CloseReason::Removed => "removed",
            CloseReason::TokenRotated => "token-rotated",
            CloseReason::HeartbeatTimeout => "heartbeat-timeout",
        }
    }
}

/// Items queued for a single connection's send task.
#[derive(Debug)]
pub enum Outbound {
    Message(ServerMessage),
    Close(CloseReason),
}

/// Handle to one live connection: its identity plus its outbound queue.
#[derive(Debug, Clone)]
pub struct Transport {
    pub connection_id: ConnectionId,
    pub sender: UnboundedSender<Outbound>,
}

impl Transport {
    pub fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(Outbound::Message(message)).is_ok()
    }

    pub fn close(&self, reason: CloseReason) -> bool {
        self.sender.send(Outbound::Close(reason)).is_ok()
    }
}

#[derive(Debug)]
struct PlayerLink {
    transport: Transport,
    last_seen: Instant,
}

/// Authoritative map of connected players and console subscribers.
///
/// Each player id maps to at most one transport; the most recent connection wins.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    next_connection_id: AtomicU64,
    players: RwLock<HashMap<String, PlayerLink>>,
    consoles: RwLock<HashMap<ConnectionId, Transport>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Registers `transport` for `player_id`, replacing any earlier connection.
    ///
    /// The replaced transport is told to close; returns whether one existed. Re-attaching
    /// the connection that already owns the id only refreshes it.
    pub async fn attach(&self, player_id: &str, transport: Transport) -> bool {
        let connection_id = transport.connection_id;
        let previous = {
            let mut players = self.players.write().await;
            players.insert(
                player_id.to_string(),
                PlayerLink {
                    transport,
                    last_seen: Instant::now(),
                },
            )
        };

        match previous {
            Some(link) if link.transport.connection_id == connection_id => false,
            Some(link) => {
                tracing::info!(
                    "Player {} reconnected; superseding connection {}",
                    player_id,
                    link.transport.connection_id
                );
                link.transport.close(CloseReason::Superseded);
                true
            }
            None => false,
        }
    }

    /// Removes the mapping only if it still points at `connection_id`.
    pub async fn detach(&self, player_id: &str, connection_id: ConnectionId) -> bool {
        let mut players = self.players.write().await;
        match players.get(player_id) {
            Some(link) if link.transport.connection_id == connection_id => {
                players.remove(player_id);
                true
            }
            _ => false,
        }
    }

    /// Drops the mapping for `player_id`, sending `notice` and then a close to its transport.
    pub async fn evict(
        &self,
        player_id: &str,
        notice: Option<ServerMessage>,
        reason: CloseReason,
    ) -> bool {
        let removed = self.players.write().await.remove(player_id);
        match removed {
            Some(link) => {
                if let Some(message) = notice {
                    link.transport.send(message);
                }
                link.transport.close(reason);
                true
            }
            None => false,
        }
    }

    /// Asks the current transport for `player_id` to close, leaving the mapping for the
    /// connection's own disconnect handling.
    pub async fn close_player(&self, player_id: &str, reason: CloseReason) -> bool {
        let players = self.players.read().await;
        match players.get(player_id) {
            Some(link) => link.transport.close(reason),
            None => false,
        }
    }

    /// Like [`close_player`](Self::close_player), but only if `connection_id` is still current.
    pub async fn close_connection(
        &self,
        player_id: &str,
        connection_id: ConnectionId,
        reason: CloseReason,
    ) -> bool {
        let players = self.players.read().await;
        match players.get(player_id) {
            Some(link) if link.transport.connection_id == connection_id => {
                link.transport.close(reason)
            }
            _ => false,
        }
    }

    pub async fn touch(&self, player_id: &str, connection_id: ConnectionId) -> bool {
        let mut players = self.players.write().await;
        match players.get_mut(player_id) {
            Some(link) if link.transport.connection_id == connection_id => {
                link.last_seen = Instant::now();
                true
            }
            _ => false,
        }
    }

    pub async fn is_connected(&self, player_id: &str) -> bool {
        self.players.read().await.contains_key(player_id)
    }

    pub async fn connected_players(&self) -> Vec<String> {
        self.players.read().await.keys().cloned().collect()
    }

    /// Connections whose last heartbeat (or connect) is older than `timeout`.
    pub async fn stale_players(&self, timeout: Duration) -> Vec<(String, ConnectionId)> {
        let now = Instant::now();
        self.players
            .read()
            .await
            .iter()
            .filter(|(_, link)| now.duration_since(link.last_seen) > timeout)
            .map(|(id, link)| (id.clone(), link.transport.connection_id))
            .collect()
    }

    /// Targeted delivery. `false` means "not connected right now", never a hard failure.
    pub async fn send_to_player(&self, player_id: &str, message: ServerMessage) -> bool {
        let players = self.players.read().await;
        match players.get(player_id) {
            Some(link) => link.transport.send(message),
            None => false,
        }
    }

    pub async fn add_console(&self, transport: Transport) {
        self.consoles
            .write()
            .await
            .insert(transport.connection_id, transport);
    }

    pub async fn remove_console(&self, connection_id: ConnectionId) -> bool {
        self.consoles.write().await.remove(&connection_id).is_some()
    }

    pub async fn console_count(&self) -> usize {
        self.consoles.read().await.len()
    }

    /// Queues `message` on every player transport; returns how many accepted it.
    pub async fn broadcast_to_players(&self, message: &ServerMessage) -> usize {
        let players = self.players.read().await;
        let delivered = players
            .values()
            .filter(|link| link.transport.send(message.clone()))
            .count();
        tracing::debug!("Broadcast to {}/{} players", delivered, players.len());
        delivered
    }

    pub async fn broadcast_to_consoles(&self, message: &ServerMessage) -> usize {
        let consoles = self.consoles.read().await;
        consoles
            .values()
            .filter(|transport| transport.send(message.clone()))
            .count()
    }

    pub async fn broadcast_to_all(&self, message: &ServerMessage) -> usize {
        self.broadcast_to_players(message).await + self.broadcast_to_consoles(message).await
    }
}
