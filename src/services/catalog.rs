use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::db::{self, DbPool};
use crate::error::AppResult;
use crate::models::{
    GlobalSetting, MediaItem, MediaRow, Playlist, PlaylistRow, Schedule, ScheduleRow,
    TickerSettings,
};

/// Read snapshot of everything content resolution needs.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub schedules: Vec<Schedule>,
    pub playlists: Vec<Playlist>,
    pub media: Vec<MediaItem>,
    pub ticker: TickerSettings,
}

impl Catalog {
    pub async fn load(pool: &DbPool) -> AppResult<Catalog> {
        db::interact(pool, |conn| {
            Ok(Catalog {
                schedules: load_schedules(conn)?,
                playlists: load_playlists(conn)?,
                media: load_media(conn)?,
                ticker: load_ticker(conn)?,
            })
        })
        .await
    }
}

/// Decodes rows, skipping (and logging) any whose JSON columns are unreadable.
fn decode_rows<R, T>(kind: &str, rows: Vec<R>, id_of: impl Fn(&R) -> String) -> Vec<T>
where
    T: TryFrom<R, Error = serde_json::Error>,
{
    rows.into_iter()
        .filter_map(|row| {
            let id = id_of(&row);
            match T::try_from(row) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::error!("Skipping corrupt {} {}: {}", kind, id, e);
                    None
                }
            }
        })
        .collect()
}

pub fn load_schedules(conn: &mut SqliteConnection) -> AppResult<Vec<Schedule>> {
    use crate::schema::schedules::dsl::*;
    let rows = schedules
        .order((created_at.asc(), id.asc()))
        .select(ScheduleRow::as_select())
        .load::<ScheduleRow>(conn)?;
    Ok(decode_rows("schedule", rows, |row| row.id.clone()))
}

pub fn load_playlists(conn: &mut SqliteConnection) -> AppResult<Vec<Playlist>> {
    use crate::schema::playlists::dsl::*;
    let rows = playlists
        .order((created_at.asc(), id.asc()))
        .select(PlaylistRow::as_select())
        .load::<PlaylistRow>(conn)?;
    Ok(decode_rows("playlist", rows, |row| row.id.clone()))
}

pub fn load_media(conn: &mut SqliteConnection) -> AppResult<Vec<MediaItem>> {
    use crate::schema::media_items::dsl::*;
    let rows = media_items
        .order((created_at.asc(), id.asc()))
        .select(MediaRow::as_select())
        .load::<MediaRow>(conn)?;
    Ok(decode_rows("media item", rows, |row| row.id.clone()))
}

pub fn load_ticker(conn: &mut SqliteConnection) -> AppResult<TickerSettings> {
    use crate::schema::global_settings::dsl::*;
    let rows = global_settings
        .select(GlobalSetting::as_select())
        .load::<GlobalSetting>(conn)?;
    Ok(TickerSettings::from_settings(&rows))
}

pub fn save_ticker(conn: &mut SqliteConnection, settings: &TickerSettings) -> AppResult<()> {
    use crate::schema::global_settings::dsl::*;
    let now = chrono::Utc::now().naive_utc();
    conn.transaction(|conn| {
        for row in settings.to_settings(now) {
            diesel::insert_into(global_settings)
                .values(&row)
                .on_conflict(key)
                .do_update()
                .set(&row)
                .execute(conn)?;
        }
        Ok::<_, diesel::result::Error>(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_pool;

    #[tokio::test]
    async fn test_ticker_defaults_then_persists() {
        let (pool, _dir) = temp_pool();
        let catalog = Catalog::load(&pool).await.unwrap();
        assert_eq!(catalog.ticker, TickerSettings::default());
        assert!(catalog.schedules.is_empty());

        let settings = TickerSettings {
            ticker_text: "Sale today".to_string(),
            ticker_enabled: false,
            ticker_speed: 5.0,
        };
        let saved = settings.clone();
        db::interact(&pool, move |conn| save_ticker(conn, &saved))
            .await
            .unwrap();
        // Saving twice updates in place.
        let saved = settings.clone();
        db::interact(&pool, move |conn| save_ticker(conn, &saved))
            .await
            .unwrap();

        let ticker = db::interact(&pool, |conn| load_ticker(conn)).await.unwrap();
        assert_eq!(ticker, settings);
    }

    #[tokio::test]
    async fn test_corrupt_rows_are_skipped() {
        let (pool, _dir) = temp_pool();
        let now = chrono::Utc::now().naive_utc();
        {
            use crate::schema::schedules;
            let mut conn = pool.get().unwrap();
            let good = ScheduleRow {
                id: "good".to_string(),
                name: "Good".to_string(),
                playlist_ids: "[]".to_string(),
                player_ids: "[\"p1\"]".to_string(),
                start_date: None,
                end_date: None,
                time_slots: "[]".to_string(),
                recurring_days: "[]".to_string(),
                is_active: true,
                created_at: now,
            };
            let bad = ScheduleRow {
                id: "bad".to_string(),
                player_ids: "{not json".to_string(),
                ..good.clone()
            };
            diesel::insert_into(schedules::table)
                .values(&vec![good, bad])
                .execute(&mut conn)
                .unwrap();
        }

        let loaded = db::interact(&pool, |conn| load_schedules(conn)).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "good");
    }
}
