use crate::auth::bearer_token;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{Player, PlayerStatus};
use crate::services::content_service::{self, ResolvedContent};
use crate::services::player_service::{self, Registration};
use crate::websocket::notify::{self, Collection};
use crate::websocket::ServerMessage;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub location: Option<String>,
    pub device_info: Option<serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub player_id: String,
    pub token: String,
    pub player: Player,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub player_id: String,
    pub token: String,
}

#[derive(Deserialize)]
pub struct UpdatePlayerRequest {
    pub name: Option<String>,
    pub location: Option<String>,
}

#[derive(Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    #[serde(flatten)]
    pub player: Player,
    pub is_connected: bool,
}

pub async fn register_player(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RegisterRequest>>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let registration = Registration {
        name: req.name,
        location: req.location,
        device_info: req.device_info,
        ip_address: client_ip(&headers),
    };
    let (player, token) = player_service::register(&state, registration).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            player_id: player.id.clone(),
            token,
            player,
        }),
    ))
}

pub async fn authenticate_player(
    State(state): State<AppState>,
    Json(req): Json<AuthRequest>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.tokens.verify(&req.player_id, &req.token).await {
        tracing::warn!("Rejected authentication for player {}", req.player_id);
        return Err(AppError::Unauthorized);
    }

    let player_id = req.player_id;
    let player = db::interact(&state.db, move |conn| {
        use crate::schema::players;
        let updated = diesel::update(players::table.find(&player_id))
            .set((
                players::status.eq(PlayerStatus::Online.as_str()),
                players::last_sync.eq(Some(Utc::now().naive_utc())),
            ))
            .execute(conn)?;
        if updated == 0 {
            return Err(AppError::not_found("Player", player_id));
        }
        Ok(players::table
            .find(&player_id)
            .select(Player::as_select())
            .first::<Player>(conn)?)
    })
    .await?;

    Ok(Json(json!({ "success": true, "player": player })))
}

pub async fn list_players(State(state): State<AppState>) -> AppResult<Json<Vec<PlayerView>>> {
    let players = db::interact(&state.db, |conn| {
        use crate::schema::players;
        Ok(players::table
            .order(players::registered_at.asc())
            .select(Player::as_select())
            .load::<Player>(conn)?)
    })
    .await?;

    let connected: HashSet<String> = state.registry.connected_players().await.into_iter().collect();
    let views = players
        .into_iter()
        .map(|player| PlayerView {
            is_connected: connected.contains(&player.id),
            player,
        })
        .collect();
    Ok(Json(views))
}

pub async fn list_locations(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    let locations = db::interact(&state.db, |conn| {
        use crate::schema::players;
        Ok(players::table
            .select(players::location)
            .distinct()
            .order(players::location.asc())
            .load::<String>(conn)?)
    })
    .await?;
    Ok(Json(locations))
}

pub async fn update_player(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
    Json(req): Json<UpdatePlayerRequest>,
) -> AppResult<Json<Player>> {
    let id = player_id.clone();
    let player = db::interact(&state.db, move |conn| {
        use crate::schema::players;
        conn.transaction(|conn| {
            let mut player = players::table
                .find(&id)
                .select(Player::as_select())
                .first::<Player>(conn)
                .optional()?
                .ok_or_else(|| AppError::not_found("Player", id.clone()))?;
            if let Some(name) = req.name.filter(|n| !n.trim().is_empty()) {
                player.name = name;
            }
            if let Some(location) = req.location.filter(|l| !l.trim().is_empty()) {
                player.location = location;
            }
            diesel::update(players::table.find(&id))
                .set((
                    players::name.eq(&player.name),
                    players::location.eq(&player.location),
                ))
                .execute(conn)?;
            Ok::<_, AppError>(player)
        })
    })
    .await?;

    let config = json!({ "name": player.name, "location": player.location });
    if !player_service::send_to_player(&state, &player_id, ServerMessage::ConfigUpdate { config })
        .await
    {
        tracing::debug!("Player {} offline, config update not pushed", player_id);
    }
    state
        .registry
        .broadcast_to_consoles(&ServerMessage::PlayerUpdated {
            player: player.clone(),
        })
        .await;
    notify::content_changed(&state.registry, Collection::Players).await;
    Ok(Json(player))
}

pub async fn delete_player(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    player_service::remove_player(&state, &player_id).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn send_command(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let message = ServerMessage::Command {
        command: req.command.clone(),
        data: req.data,
        timestamp: Utc::now().to_rfc3339(),
    };
    if !player_service::send_to_player(&state, &player_id, message).await {
        return Err(AppError::NotConnected(player_id));
    }
    tracing::info!("Sent command {} to player {}", req.command, player_id);
    Ok(Json(json!({ "success": true, "message": "Command sent" })))
}

pub async fn rotate_token(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let token = player_service::rotate_token(&state, &player_id).await?;
    Ok(Json(json!({ "playerId": player_id, "token": token })))
}

pub async fn get_player_schedule(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<ResolvedContent>> {
    let content = content_service::resolve(&state, &player_id, bearer_token(&headers)?).await?;
    Ok(Json(content))
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}
