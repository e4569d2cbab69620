use crate::db;
use crate::error::AppResult;
use crate::models::{PlayerStatus, TickerSettings};
use crate::services::catalog;
use crate::websocket::notify;
use crate::AppState;
use axum::{extract::State, Json};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerPatch {
    pub ticker_text: Option<String>,
    pub ticker_enabled: Option<bool>,
    pub ticker_speed: Option<f64>,
}

impl TickerPatch {
    fn apply(self, settings: &mut TickerSettings) {
        if let Some(text) = self.ticker_text {
            settings.ticker_text = text;
        }
        if let Some(enabled) = self.ticker_enabled {
            settings.ticker_enabled = enabled;
        }
        if let Some(speed) = self.ticker_speed {
            settings.ticker_speed = speed;
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_media: i64,
    pub total_playlists: i64,
    pub active_playlists: i64,
    pub total_schedules: i64,
    pub active_schedules: i64,
    pub total_players: i64,
    pub online_players: i64,
    pub offline_players: i64,
}

pub async fn get_settings(State(state): State<AppState>) -> AppResult<Json<TickerSettings>> {
    let settings = db::interact(&state.db, |conn| catalog::load_ticker(conn)).await?;
    Ok(Json(settings))
}

pub async fn save_settings(
    State(state): State<AppState>,
    Json(patch): Json<TickerPatch>,
) -> AppResult<Json<TickerSettings>> {
    let settings = db::interact(&state.db, move |conn| {
        let mut settings = catalog::load_ticker(conn)?;
        patch.apply(&mut settings);
        catalog::save_ticker(conn, &settings)?;
        Ok(settings)
    })
    .await?;

    tracing::info!(
        "Ticker updated (enabled: {}, speed: {})",
        settings.ticker_enabled,
        settings.ticker_speed
    );
    notify::ticker_changed(&state.registry, &settings).await;
    Ok(Json(settings))
}

pub async fn get_stats(State(state): State<AppState>) -> AppResult<Json<Stats>> {
    let stats = db::interact(&state.db, |conn| {
        use crate::schema::{media_items, players, playlists, schedules};
        let total_players = players::table.select(count_star()).first::<i64>(conn)?;
        let online_players = players::table
            .filter(players::status.eq(PlayerStatus::Online.as_str()))
            .select(count_star())
            .first::<i64>(conn)?;
        Ok(Stats {
            total_media: media_items::table.select(count_star()).first::<i64>(conn)?,
            total_playlists: playlists::table.select(count_star()).first::<i64>(conn)?,
            active_playlists: playlists::table
                .filter(playlists::is_active.eq(true))
                .select(count_star())
                .first::<i64>(conn)?,
            total_schedules: schedules::table.select(count_star()).first::<i64>(conn)?,
            active_schedules: schedules::table
                .filter(schedules::is_active.eq(true))
                .select(count_star())
                .first::<i64>(conn)?,
            total_players,
            online_players,
            offline_players: total_players - online_players,
        })
    })
    .await?;
    Ok(Json(stats))
}
