use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{MediaItem, MediaRow, MediaType};
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
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMediaRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub media_type: Option<MediaType>,
    pub url: Option<String>,
    pub duration: Option<u32>,
    #[serde(default, deserialize_with = "tag_list")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub file_size: i64,
    /// Page image URLs from the document converter, in page order. Creates a document group.
    pub pages: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMediaRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub duration: Option<u32>,
    #[serde(default, deserialize_with = "optional_tag_list")]
    pub tags: Option<Vec<String>>,
}

pub async fn list_media(State(state): State<AppState>) -> AppResult<Json<Vec<MediaItem>>> {
    let media = db::interact(&state.db, |conn| catalog::load_media(conn)).await?;
    Ok(Json(media))
}

pub async fn create_media(
    State(state): State<AppState>,
    Json(req): Json<CreateMediaRequest>,
) -> AppResult<(StatusCode, Json<MediaItem>)> {
    let default_duration = state.config.players.default_entry_duration_secs;
    let duration = req.duration.filter(|d| *d > 0).unwrap_or(default_duration);
    let now = Utc::now().naive_utc();
    let id = Uuid::new_v4().to_string();

    let (item, pages) = match req.pages {
        Some(page_urls) => {
            if page_urls.is_empty() {
                return Err(AppError::BadRequest(
                    "A document group needs at least one page".to_string(),
                ));
            }
            let pages: Vec<MediaItem> = page_urls
                .into_iter()
                .enumerate()
                .map(|(idx, url)| MediaItem {
                    id: format!("{}-{}", id, idx),
                    name: format!("{} (Page {})", req.name, idx + 1),
                    media_type: MediaType::Image,
                    url: Some(url),
                    duration,
                    tags: req.tags.clone(),
                    pages: None,
                    group_id: Some(id.clone()),
                    file_size: 0,
                    created_at: now,
                })
                .collect();
            let group = MediaItem {
                id: id.clone(),
                name: req.name,
                media_type: MediaType::DocumentGroup,
                url: None,
                duration,
                tags: req.tags,
                pages: Some(pages.iter().map(|p| p.id.clone()).collect()),
                group_id: None,
                file_size: req.file_size,
                created_at: now,
            };
            (group, pages)
        }
        None => {
            let url = req
                .url
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| AppError::BadRequest("url is required".to_string()))?;
            let item = MediaItem {
                id,
                name: req.name,
                media_type: req.media_type.unwrap_or_else(|| infer_media_type(&url)),
                url: Some(url),
                duration,
                tags: req.tags,
                pages: None,
                group_id: None,
                file_size: req.file_size,
                created_at: now,
            };
            (item, Vec::new())
        }
    };

    let mut rows = vec![item.clone().into_row()?];
    for page in pages {
        rows.push(page.into_row()?);
    }
    db::interact(&state.db, move |conn| {
        use crate::schema::media_items;
        Ok(diesel::insert_into(media_items::table)
            .values(&rows)
            .execute(conn)?)
    })
    .await?;

    tracing::info!("Added media {} ({})", item.id, item.media_type.as_str());
    notify::content_changed(&state.registry, Collection::Media).await;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn update_media(
    State(state): State<AppState>,
    Path(media_id): Path<String>,
    Json(req): Json<UpdateMediaRequest>,
) -> AppResult<Json<MediaItem>> {
    let item = db::interact(&state.db, move |conn| {
        use crate::schema::media_items::dsl::*;
        let row = media_items
            .find(&media_id)
            .select(MediaRow::as_select())
            .first::<MediaRow>(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("Media", media_id.clone()))?;

        let mut item = MediaItem::try_from(row)?;
        if let Some(new_name) = req.name {
            item.name = new_name;
        }
        if let Some(new_url) = req.url {
            item.url = Some(new_url);
        }
        if let Some(secs) = req.duration.filter(|d| *d > 0) {
            item.duration = secs;
        }
        if let Some(new_tags) = req.tags {
            item.tags = new_tags;
        }

        diesel::update(media_items.find(&media_id))
            .set(&item.clone().into_row()?)
            .execute(conn)?;
        Ok(item)
    })
    .await?;

    notify::content_changed(&state.registry, Collection::Media).await;
    Ok(Json(item))
}

/// Deletes an item; a document group takes its pages with it.
pub async fn delete_media(
    State(state): State<AppState>,
    Path(media_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let target = media_id.clone();
    let deleted = db::interact(&state.db, move |conn| {
        use crate::schema::media_items::dsl::*;
        conn.transaction(|conn| {
            let pages_removed = diesel::delete(media_items.filter(group_id.eq(&target)))
                .execute(conn)?;
            let removed = diesel::delete(media_items.find(&target)).execute(conn)?;
            Ok::<_, diesel::result::Error>((removed, pages_removed))
        })
        .map_err(AppError::from)
    })
    .await?;

    match deleted {
        (0, _) => Err(AppError::not_found("Media", media_id)),
        (_, pages) => {
            tracing::info!("Deleted media {} and {} pages", media_id, pages);
            notify::content_changed(&state.registry, Collection::Media).await;
            Ok(Json(serde_json::json!({ "success": true })))
        }
    }
}

fn infer_media_type(url: &str) -> MediaType {
    let ext = url
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "mp4" | "webm" | "mov" | "mkv" | "avi" => MediaType::Video,
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "svg" => MediaType::Image,
        _ => MediaType::Text,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTags {
    List(Vec<String>),
    Csv(String),
}

impl From<RawTags> for Vec<String> {
    fn from(raw: RawTags) -> Self {
        let tags: Vec<String> = match raw {
            RawTags::List(list) => list,
            RawTags::Csv(csv) => csv.split(',').map(str::to_string).collect(),
        };
        tags.into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Accepts `["a", "b"]` or the upload form's `"a, b"`.
fn tag_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(RawTags::deserialize(deserializer)?.into())
}

fn optional_tag_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Vec<String>>, D::Error> {
    Ok(Option::<RawTags>::deserialize(deserializer)?.map(Into::into))
}
