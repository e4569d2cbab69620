pub mod live_api;
pub mod media_api;
pub mod players_api;
pub mod playlists_api;
pub mod schedules_api;
pub mod settings_api;

use crate::AppState;
use axum::{
    routing::{delete, get, post, put},
    Router,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        // Settings & stats
        .route(
            "/settings",
            get(settings_api::get_settings).post(settings_api::save_settings),
        )
        .route("/stats", get(settings_api::get_stats))
        // Media
        .route("/media", get(media_api::list_media))
        .route("/media", post(media_api::create_media))
        .route("/media/:id", put(media_api::update_media))
        .route("/media/:id", delete(media_api::delete_media))
        // Playlists
        .route("/playlists", get(playlists_api::list_playlists))
        .route("/playlists", post(playlists_api::create_playlist))
        .route("/playlists/:id", put(playlists_api::update_playlist))
        .route("/playlists/:id", delete(playlists_api::delete_playlist))
        // Schedules
        .route("/schedules", get(schedules_api::list_schedules))
        .route("/schedules", post(schedules_api::create_schedule))
        .route("/schedules/:id", put(schedules_api::update_schedule))
        .route("/schedules/:id", delete(schedules_api::delete_schedule))
        // Players
        .route("/players", get(players_api::list_players))
        .route("/players/register", post(players_api::register_player))
        .route("/players/auth", post(players_api::authenticate_player))
        .route("/players/locations", get(players_api::list_locations))
        .route(
            "/players/:id",
            delete(players_api::delete_player).put(players_api::update_player),
        )
        .route("/players/:id/command", post(players_api::send_command))
        .route("/players/:id/token", post(players_api::rotate_token))
        .route(
            "/player-schedule/:id",
            get(players_api::get_player_schedule),
        )
        // Live preview
        .route("/players/:id/state", post(live_api::push_state))
        .route("/players/:id/subscribe", get(live_api::subscribe))
        .route("/players/:id/preview", get(live_api::preview))
}
