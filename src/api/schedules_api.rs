use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{optional_date, patch_date, Schedule, ScheduleRow, TimeSlot};
use crate::services::{catalog, schedule_service};
use crate::websocket::notify::{self, Collection};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduleRequest {
    pub name: String,
    #[serde(default)]
    pub playlist_ids: Vec<String>,
    #[serde(default)]
    pub player_ids: Vec<String>,
    #[serde(default, deserialize_with = "optional_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "optional_date")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub time_slots: Vec<TimeSlot>,
    #[serde(default)]
    pub recurring_days: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateScheduleRequest {
    pub name: Option<String>,
    pub playlist_ids: Option<Vec<String>>,
    pub player_ids: Option<Vec<String>>,
    #[serde(default, deserialize_with = "patch_date")]
    pub start_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "patch_date")]
    pub end_date: Option<Option<NaiveDate>>,
    pub time_slots: Option<Vec<TimeSlot>>,
    pub recurring_days: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

fn default_true() -> bool {
    true
}

pub async fn list_schedules(State(state): State<AppState>) -> AppResult<Json<Vec<Schedule>>> {
    let schedules = db::interact(&state.db, |conn| catalog::load_schedules(conn)).await?;
    Ok(Json(schedules))
}

pub async fn create_schedule(
    State(state): State<AppState>,
    Json(req): Json<CreateScheduleRequest>,
) -> AppResult<(StatusCode, Json<Schedule>)> {
    let schedule = Schedule {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        playlist_ids: req.playlist_ids,
        player_ids: req.player_ids,
        start_date: req.start_date,
        end_date: req.end_date,
        time_slots: req.time_slots,
        recurring_days: normalize_days(req.recurring_days),
        is_active: req.is_active,
        created_at: Utc::now().naive_utc(),
    };
    validate(&schedule)?;

    let row = schedule.clone().into_row()?;
    db::interact(&state.db, move |conn| {
        use crate::schema::schedules;
        Ok(diesel::insert_into(schedules::table)
            .values(&row)
            .execute(conn)?)
    })
    .await?;

    tracing::info!(
        "Created schedule {} targeting {} players",
        schedule.id,
        schedule.player_ids.len()
    );
    notify::content_changed(&state.registry, Collection::Schedules).await;
    Ok((StatusCode::CREATED, Json(schedule)))
}

pub async fn update_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<String>,
    Json(req): Json<UpdateScheduleRequest>,
) -> AppResult<Json<Schedule>> {
    let schedule = db::interact(&state.db, move |conn| {
        use crate::schema::schedules::dsl::*;
        let row = schedules
            .find(&schedule_id)
            .select(ScheduleRow::as_select())
            .first::<ScheduleRow>(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("Schedule", schedule_id.clone()))?;

        let mut schedule = Schedule::try_from(row)?;
        if let Some(new_name) = req.name {
            schedule.name = new_name;
        }
        if let Some(playlists) = req.playlist_ids {
            schedule.playlist_ids = playlists;
        }
        if let Some(players) = req.player_ids {
            schedule.player_ids = players;
        }
        if let Some(start) = req.start_date {
            schedule.start_date = start;
        }
        if let Some(end) = req.end_date {
            schedule.end_date = end;
        }
        if let Some(slots) = req.time_slots {
            schedule.time_slots = slots;
        }
        if let Some(days) = req.recurring_days {
            schedule.recurring_days = normalize_days(days);
        }
        if let Some(active) = req.is_active {
            schedule.is_active = active;
        }
        validate(&schedule)?;

        diesel::update(schedules.find(&schedule_id))
            .set(&schedule.clone().into_row()?)
            .execute(conn)?;
        Ok(schedule)
    })
    .await?;

    notify::content_changed(&state.registry, Collection::Schedules).await;
    Ok(Json(schedule))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let target = schedule_id.clone();
    let deleted = db::interact(&state.db, move |conn| {
        use crate::schema::schedules::dsl::*;
        Ok(diesel::delete(schedules.find(&target)).execute(conn)?)
    })
    .await?;
    if deleted == 0 {
        return Err(AppError::not_found("Schedule", schedule_id));
    }

    tracing::info!("Deleted schedule {}", schedule_id);
    notify::content_changed(&state.registry, Collection::Schedules).await;
    Ok(Json(serde_json::json!({ "success": true })))
}

fn normalize_days(days: Vec<String>) -> Vec<String> {
    days.into_iter()
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

fn validate(schedule: &Schedule) -> AppResult<()> {
    if let (Some(start), Some(end)) = (schedule.start_date, schedule.end_date) {
        if end < start {
            return Err(AppError::BadRequest(
                "endDate is before startDate".to_string(),
            ));
        }
    }
    for slot in &schedule.time_slots {
        if !schedule_service::is_wall_clock(&slot.start_time)
            || !schedule_service::is_wall_clock(&slot.end_time)
        {
            return Err(AppError::BadRequest(format!(
                "Time slot {}-{} is not HH:MM",
                slot.start_time, slot.end_time
            )));
        }
    }
    Ok(())
}
