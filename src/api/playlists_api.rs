use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{Playlist, PlaylistEntry, PlaylistRow};
use crate::services::catalog;
use crate::websocket::notify::{self, Collection};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlaylistRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub media_items: Vec<PlaylistEntry>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlaylistRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub media_items: Option<Vec<PlaylistEntry>>,
    pub is_active: Option<bool>,
}

fn default_true() -> bool {
    true
}

pub async fn list_playlists(State(state): State<AppState>) -> AppResult<Json<Vec<Playlist>>> {
    let playlists = db::interact(&state.db, |conn| catalog::load_playlists(conn)).await?;
    Ok(Json(playlists))
}

pub async fn create_playlist(
    State(state): State<AppState>,
    Json(req): Json<CreatePlaylistRequest>,
) -> AppResult<(StatusCode, Json<Playlist>)> {
    let playlist = Playlist {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        description: req.description,
        media_items: req.media_items,
        is_active: req.is_active,
        created_at: Utc::now().naive_utc(),
    };

    let row = playlist.clone().into_row()?;
    db::interact(&state.db, move |conn| {
        use crate::schema::playlists;
        Ok(diesel::insert_into(playlists::table)
            .values(&row)
            .execute(conn)?)
    })
    .await?;

    tracing::info!(
        "Created playlist {} with {} entries",
        playlist.id,
        playlist.media_items.len()
    );
    notify::content_changed(&state.registry, Collection::Playlists).await;
    Ok((StatusCode::CREATED, Json(playlist)))
}

pub async fn update_playlist(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
    Json(req): Json<UpdatePlaylistRequest>,
) -> AppResult<Json<Playlist>> {
    let playlist = db::interact(&state.db, move |conn| {
        use crate::schema::playlists::dsl::*;
        let row = playlists
            .find(&playlist_id)
            .select(PlaylistRow::as_select())
            .first::<PlaylistRow>(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("Playlist", playlist_id.clone()))?;

        let mut playlist = Playlist::try_from(row)?;
        if let Some(new_name) = req.name {
            playlist.name = new_name;
        }
        if req.description.is_some() {
            playlist.description = req.description;
        }
        if let Some(new_entries) = req.media_items {
            playlist.media_items = new_entries;
        }
        if let Some(active) = req.is_active {
            playlist.is_active = active;
        }

        diesel::update(playlists.find(&playlist_id))
            .set(&playlist.clone().into_row()?)
            .execute(conn)?;
        Ok(playlist)
    })
    .await?;

    notify::content_changed(&state.registry, Collection::Playlists).await;
    Ok(Json(playlist))
}

pub async fn delete_playlist(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let target = playlist_id.clone();
    let deleted = db::interact(&state.db, move |conn| {
        use crate::schema::playlists::dsl::*;
        Ok(diesel::delete(playlists.find(&target)).execute(conn)?)
    })
    .await?;
    if deleted == 0 {
        return Err(AppError::not_found("Playlist", playlist_id));
    }

    tracing::info!("Deleted playlist {}", playlist_id);
    notify::content_changed(&state.registry, Collection::Playlists).await;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::call;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_playlist_crud() {
        let (state, _dir) = crate::test_state();

        let (status, created) = call(
            &state,
            Method::POST,
            "/api/playlists",
            Some(json!({
                "name": "Lobby loop",
                "mediaItems": ["m1", {"mediaId": "m2", "duration": 20}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["isActive"], true);
        assert_eq!(
            created["mediaItems"],
            json!([
                {"mediaId": "m1", "duration": null},
                {"mediaId": "m2", "duration": 20}
            ])
        );
        let id = created["id"].as_str().unwrap().to_string();

        let (status, updated) = call(
            &state,
            Method::PUT,
            &format!("/api/playlists/{}", id),
            Some(json!({"isActive": false})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["isActive"], false);
        assert_eq!(updated["name"], "Lobby loop");

        let (status, updated) = call(
            &state,
            Method::PUT,
            &format!("/api/playlists/{}", id),
            Some(json!({"mediaItems": [{"mediaId": "m3", "duration": 5}]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["mediaItems"], json!([{"mediaId": "m3", "duration": 5}]));
        assert_eq!(updated["isActive"], false);

        let (status, _) = call(
            &state,
            Method::PUT,
            "/api/playlists/nope",
            Some(json!({"name": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&state, Method::DELETE, &format!("/api/playlists/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, listed) = call(&state, Method::GET, "/api/playlists", None).await;
        assert_eq!(listed, json!([]));
    }
}
