use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::auth::generate_token;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{NewPlayer, Player, PlayerStatus, PlayerToken};
use crate::services::catalog;
use crate::services::live_state::{LiveStatus, PlayerLiveState};
use crate::websocket::notify::{self, Collection};
use crate::websocket::{CloseReason, ConnectionId, ServerMessage, Transport, TickerUpdate};
use crate::AppState;

#[derive(Debug, Default)]
pub struct Registration {
    pub name: Option<String>,
    pub location: Option<String>,
    pub device_info: Option<serde_json::Value>,
    pub ip_address: Option<String>,
}

/// Reserves an identity and issues its only token. The player stays offline until it connects.
pub async fn register(state: &AppState, registration: Registration) -> AppResult<(Player, String)> {
    let player_id = format!("player-{}", Uuid::new_v4().simple());
    let token = generate_token();
    let device_info = registration
        .device_info
        .map(|info| serde_json::to_string(&info))
        .transpose()?;

    let issued = token.clone();
    let new_id = player_id.clone();
    let player = db::interact(&state.db, move |conn| {
        use crate::schema::{player_tokens, players};
        conn.transaction(|conn| {
            let count: i64 = players::table.count().get_result(conn)?;
            let now = Utc::now().naive_utc();
            diesel::insert_into(players::table)
                .values(&NewPlayer {
                    id: new_id.clone(),
                    name: non_blank(registration.name)
                        .unwrap_or_else(|| format!("Display {}", count + 1)),
                    location: non_blank(registration.location)
                        .unwrap_or_else(|| "Unknown Location".to_string()),
                    status: PlayerStatus::Offline.as_str().to_string(),
                    ip_address: registration.ip_address,
                    device_info,
                    registered_at: now,
                })
                .execute(conn)?;
            diesel::insert_into(player_tokens::table)
                .values(&PlayerToken {
                    player_id: new_id.clone(),
                    token: issued,
                    issued_at: now,
                })
                .execute(conn)?;
            players::table
                .find(&new_id)
                .select(Player::as_select())
                .first::<Player>(conn)
        })
        .map_err(AppError::from)
    })
    .await?;

    state.tokens.set(&player_id, token.clone()).await;
    tracing::info!("Registered player {} ({})", player.id, player.name);

    state
        .registry
        .broadcast_to_consoles(&ServerMessage::PlayerRegistered {
            player: player.clone(),
        })
        .await;
    notify::content_changed(&state.registry, Collection::Players).await;

    Ok((player, token))
}

pub async fn authenticate_connect(state: &AppState, player_id: &str, token: &str) -> bool {
    state.tokens.verify(player_id, token).await
}

/// Binds an authenticated transport to `player_id`, replacing any earlier one.
///
/// The token is checked again after the bind so a rotation that lands mid-connect cannot
/// leave a transport holding a revoked credential.
pub async fn on_connect(
    state: &AppState,
    player_id: &str,
    token: &str,
    transport: Transport,
) -> AppResult<()> {
    let connection_id = transport.connection_id;
    state.registry.attach(player_id, transport.clone()).await;
    if !state.tokens.verify(player_id, token).await {
        state.registry.detach(player_id, connection_id).await;
        return Err(AppError::Unauthorized);
    }

    transport.send(ServerMessage::ConnectionConfirmed {
        player_id: player_id.to_string(),
    });
    state
        .live
        .publish(player_id, PlayerLiveState::with_status(LiveStatus::Idle))
        .await;

    let id = player_id.to_string();
    let stored = db::interact(&state.db, move |conn| {
        use crate::schema::players;
        let now = Utc::now().naive_utc();
        diesel::update(players::table.find(&id))
            .set((
                players::status.eq(PlayerStatus::Online.as_str()),
                players::last_sync.eq(Some(now)),
                players::last_heartbeat.eq(Some(now)),
            ))
            .execute(conn)?;
        let player = players::table
            .find(&id)
            .select(Player::as_select())
            .first::<Player>(conn)
            .optional()?;
        Ok((player, catalog::load_ticker(conn)?))
    })
    .await;

    match stored {
        Ok((player, ticker)) => {
            transport.send(ServerMessage::TickerUpdated(TickerUpdate::from(&ticker)));
            if let Some(player) = player {
                state
                    .registry
                    .broadcast_to_consoles(&ServerMessage::PlayerConnected { player })
                    .await;
            }
        }
        Err(e) => tracing::error!("Failed to record connect for player {}: {}", player_id, e),
    }

    tracing::info!(
        "Player {} connected on connection {}",
        player_id,
        connection_id
    );
    Ok(())
}

pub async fn on_heartbeat(state: &AppState, player_id: &str, connection_id: ConnectionId) {
    if !state.registry.touch(player_id, connection_id).await {
        tracing::debug!(
            "Ignoring heartbeat for player {} from stale connection {}",
            player_id,
            connection_id
        );
        return;
    }

    let id = player_id.to_string();
    let result = db::interact(&state.db, move |conn| {
        use crate::schema::players;
        Ok(diesel::update(players::table.find(&id))
            .set(players::last_heartbeat.eq(Some(Utc::now().naive_utc())))
            .execute(conn)?)
    })
    .await;
    match result {
        Ok(_) => tracing::debug!("Heartbeat from player {}", player_id),
        Err(e) => tracing::error!("Failed to record heartbeat for {}: {}", player_id, e),
    }
}

/// Tears down the mapping for `connection_id`. Returns `false` when a newer connection
/// already owns the player, in which case nothing else changes.
pub async fn on_disconnect(state: &AppState, player_id: &str, connection_id: ConnectionId) -> bool {
    if !state.registry.detach(player_id, connection_id).await {
        tracing::debug!(
            "Connection {} for player {} was already replaced",
            connection_id,
            player_id
        );
        return false;
    }

    state
        .live
        .publish(player_id, PlayerLiveState::with_status(LiveStatus::Offline))
        .await;

    let id = player_id.to_string();
    let stored = db::interact(&state.db, move |conn| {
        use crate::schema::players;
        diesel::update(players::table.find(&id))
            .set((
                players::status.eq(PlayerStatus::Offline.as_str()),
                players::last_sync.eq(Some(Utc::now().naive_utc())),
            ))
            .execute(conn)?;
        Ok(players::table
            .find(&id)
            .select(Player::as_select())
            .first::<Player>(conn)
            .optional()?)
    })
    .await;

    match stored {
        Ok(Some(player)) => {
            state
                .registry
                .broadcast_to_consoles(&ServerMessage::PlayerDisconnected { player })
                .await;
        }
        Ok(None) => {}
        Err(e) => tracing::error!("Failed to record disconnect for {}: {}", player_id, e),
    }

    tracing::info!("Player {} disconnected", player_id);
    true
}

pub async fn send_to_player(state: &AppState, player_id: &str, message: ServerMessage) -> bool {
    notify::unicast_to_player(&state.registry, player_id, message).await
}

/// Deletes the player and its token, then closes any live connection with a removal notice.
pub async fn remove_player(state: &AppState, player_id: &str) -> AppResult<()> {
    let id = player_id.to_string();
    let deleted = db::interact(&state.db, move |conn| {
        use crate::schema::{player_tokens, players};
        conn.transaction(|conn| {
            diesel::delete(player_tokens::table.find(&id)).execute(conn)?;
            diesel::delete(players::table.find(&id)).execute(conn)
        })
        .map_err(AppError::from)
    })
    .await?;
    if deleted == 0 {
        return Err(AppError::not_found("Player", player_id));
    }

    state.tokens.remove(player_id).await;
    state
        .registry
        .evict(
            player_id,
            Some(ServerMessage::PlayerDeleted {
                message: "Player has been removed from the system".to_string(),
            }),
            CloseReason::Removed,
        )
        .await;
    state.live.remove(player_id).await;

    tracing::info!("Removed player {}", player_id);
    state
        .registry
        .broadcast_to_consoles(&ServerMessage::PlayerRemoved {
            player_id: player_id.to_string(),
        })
        .await;
    notify::content_changed(&state.registry, Collection::Players).await;
    Ok(())
}

/// Issues a fresh token. The old one stops working at once and any open connection is closed.
pub async fn rotate_token(state: &AppState, player_id: &str) -> AppResult<String> {
    let token = generate_token();
    let id = player_id.to_string();
    let issued = token.clone();
    let found = db::interact(&state.db, move |conn| {
        use crate::schema::{player_tokens, players};
        conn.transaction(|conn| {
            let exists = players::table
                .find(&id)
                .count()
                .get_result::<i64>(conn)?
                > 0;
            if exists {
                diesel::replace_into(player_tokens::table)
                    .values(&PlayerToken {
                        player_id: id.clone(),
                        token: issued,
                        issued_at: Utc::now().naive_utc(),
                    })
                    .execute(conn)?;
            }
            Ok::<_, diesel::result::Error>(exists)
        })
        .map_err(AppError::from)
    })
    .await?;
    if !found {
        return Err(AppError::not_found("Player", player_id));
    }

    state.tokens.set(player_id, token.clone()).await;
    state
        .registry
        .close_player(player_id, CloseReason::TokenRotated)
        .await;
    tracing::info!("Rotated token for player {}", player_id);
    Ok(token)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
