use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

// Player models
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerStatus {
    Online,
    Offline,
}

impl PlayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerStatus::Online => "online",
            PlayerStatus::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::players)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub name: String,
    pub location: String,
    pub status: String,
    pub ip_address: Option<String>,
    #[serde(serialize_with = "json_text")]
    pub device_info: Option<String>,
    /// Label of the playlists most recently resolved for this player.
    pub current_content: Option<String>,
    pub last_sync: Option<NaiveDateTime>,
    pub last_heartbeat: Option<NaiveDateTime>,
    pub registered_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::players)]
pub struct NewPlayer {
    pub id: String,
    pub name: String,
    pub location: String,
    pub status: String,
    pub ip_address: Option<String>,
    pub device_info: Option<String>,
    pub registered_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::player_tokens)]
pub struct PlayerToken {
    pub player_id: String,
    pub token: String,
    pub issued_at: NaiveDateTime,
}

// Media models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaType {
    Image,
    Video,
    Text,
    Document,
    Url,
    DocumentGroup,
    #[serde(other)]
    Other,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Text => "text",
            MediaType::Document => "document",
            MediaType::Url => "url",
            MediaType::DocumentGroup => "document-group",
            MediaType::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "image" => MediaType::Image,
            "video" => MediaType::Video,
            "text" => MediaType::Text,
            "document" => MediaType::Document,
            "url" => MediaType::Url,
            "document-group" => MediaType::DocumentGroup,
            _ => MediaType::Other,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::media_items)]
#[diesel(treat_none_as_null = true)]
pub struct MediaRow {
    pub id: String,
    pub name: String,
    pub media_type: String,
    pub url: Option<String>,
    pub duration_secs: i32,
    pub tags: String,
    pub pages: Option<String>,
    pub group_id: Option<String>,
    pub file_size: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub url: Option<String>,
    /// Stored per-use default, in seconds.
    pub duration: u32,
    pub tags: Vec<String>,
    /// Ordered page item ids; only set for document groups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub file_size: i64,
    pub created_at: NaiveDateTime,
}

impl MediaItem {
    pub fn is_document_group(&self) -> bool {
        self.media_type == MediaType::DocumentGroup
    }

    pub fn into_row(self) -> Result<MediaRow, serde_json::Error> {
        Ok(MediaRow {
            tags: serde_json::to_string(&self.tags)?,
            pages: self.pages.as_ref().map(serde_json::to_string).transpose()?,
            id: self.id,
            name: self.name,
            media_type: self.media_type.as_str().to_string(),
            url: self.url,
            duration_secs: self.duration as i32,
            group_id: self.group_id,
            file_size: self.file_size,
            created_at: self.created_at,
        })
    }
}

impl TryFrom<MediaRow> for MediaItem {
    type Error = serde_json::Error;

    fn try_from(row: MediaRow) -> Result<Self, Self::Error> {
        Ok(MediaItem {
            tags: serde_json::from_str(&row.tags)?,
            pages: row.pages.as_deref().map(serde_json::from_str).transpose()?,
            id: row.id,
            name: row.name,
            media_type: MediaType::parse(&row.media_type),
            url: row.url,
            duration: row.duration_secs.max(0) as u32,
            group_id: row.group_id,
            file_size: row.file_size,
            created_at: row.created_at,
        })
    }
}

// Playlist models
#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::playlists)]
#[diesel(treat_none_as_null = true)]
pub struct PlaylistRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub entries: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

/// One slot of a playlist. Accepts either a bare media id or `{mediaId, duration}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPlaylistEntry", rename_all = "camelCase")]
pub struct PlaylistEntry {
    pub media_id: String,
    pub duration: Option<u32>,
}

impl PlaylistEntry {
    /// Duration in force for this slot; zero or missing falls back to `default_secs`.
    pub fn effective_duration(&self, default_secs: u32) -> u32 {
        match self.duration {
            Some(secs) if secs > 0 => secs,
            _ => default_secs,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPlaylistEntry {
    Id(String),
    Full {
        #[serde(rename = "mediaId")]
        media_id: String,
        #[serde(default)]
        duration: Option<u32>,
    },
}

impl From<RawPlaylistEntry> for PlaylistEntry {
    fn from(raw: RawPlaylistEntry) -> Self {
        match raw {
            RawPlaylistEntry::Id(media_id) => PlaylistEntry {
                media_id,
                duration: None,
            },
            RawPlaylistEntry::Full { media_id, duration } => PlaylistEntry { media_id, duration },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub media_items: Vec<PlaylistEntry>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

impl Playlist {
    pub fn into_row(self) -> Result<PlaylistRow, serde_json::Error> {
        Ok(PlaylistRow {
            entries: serde_json::to_string(&self.media_items)?,
            id: self.id,
            name: self.name,
            description: self.description,
            is_active: self.is_active,
            created_at: self.created_at,
        })
    }
}

impl TryFrom<PlaylistRow> for Playlist {
    type Error = serde_json::Error;

    fn try_from(row: PlaylistRow) -> Result<Self, Self::Error> {
        Ok(Playlist {
            media_items: serde_json::from_str(&row.entries)?,
            id: row.id,
            name: row.name,
            description: row.description,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

// Schedule models
#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::schedules)]
#[diesel(treat_none_as_null = true)]
pub struct ScheduleRow {
    pub id: String,
    pub name: String,
    pub playlist_ids: String,
    pub player_ids: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub time_slots: String,
    pub recurring_days: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    /// Wall-clock `HH:MM`, inclusive.
    pub start_time: String,
    /// Wall-clock `HH:MM`, inclusive.
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub playlist_ids: Vec<String>,
    pub player_ids: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub time_slots: Vec<TimeSlot>,
    /// Lowercase weekday names; empty means every day.
    pub recurring_days: Vec<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

impl Schedule {
    pub fn into_row(self) -> Result<ScheduleRow, serde_json::Error> {
        Ok(ScheduleRow {
            playlist_ids: serde_json::to_string(&self.playlist_ids)?,
            player_ids: serde_json::to_string(&self.player_ids)?,
            time_slots: serde_json::to_string(&self.time_slots)?,
            recurring_days: serde_json::to_string(&self.recurring_days)?,
            id: self.id,
            name: self.name,
            start_date: self.start_date,
            end_date: self.end_date,
            is_active: self.is_active,
            created_at: self.created_at,
        })
    }
}

impl TryFrom<ScheduleRow> for Schedule {
    type Error = serde_json::Error;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        Ok(Schedule {
            playlist_ids: serde_json::from_str(&row.playlist_ids)?,
            player_ids: serde_json::from_str(&row.player_ids)?,
            time_slots: serde_json::from_str(&row.time_slots)?,
            recurring_days: serde_json::from_str(&row.recurring_days)?,
            id: row.id,
            name: row.name,
            start_date: row.start_date,
            end_date: row.end_date,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

// Global Settings models
#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::global_settings)]
#[diesel(primary_key(key))]
pub struct GlobalSetting {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub updated_at: NaiveDateTime,
}

pub const TICKER_TEXT_KEY: &str = "ticker_text";
pub const TICKER_ENABLED_KEY: &str = "ticker_enabled";
pub const TICKER_SPEED_KEY: &str = "ticker_speed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerSettings {
    pub ticker_text: String,
    pub ticker_enabled: bool,
    /// Scroll speed; the console slider moves in half steps.
    pub ticker_speed: f64,
}

impl Default for TickerSettings {
    fn default() -> Self {
        Self {
            ticker_text: String::new(),
            ticker_enabled: true,
            ticker_speed: 2.0,
        }
    }
}

impl TickerSettings {
    /// Builds settings from stored key/value rows, keeping defaults for missing or unreadable keys.
    pub fn from_settings(rows: &[GlobalSetting]) -> Self {
        let mut settings = TickerSettings::default();
        for row in rows {
            match row.key.as_str() {
                TICKER_TEXT_KEY => settings.ticker_text = row.value.clone(),
                TICKER_ENABLED_KEY => {
                    if let Ok(enabled) = row.value.parse() {
                        settings.ticker_enabled = enabled;
                    }
                }
                TICKER_SPEED_KEY => match f64::from_str(row.value.trim()) {
                    Ok(speed) if speed.is_finite() => settings.ticker_speed = speed,
                    _ => {}
                },
                _ => {}
            }
        }
        settings
    }

    pub fn to_settings(&self, now: NaiveDateTime) -> Vec<GlobalSetting> {
        vec![
            GlobalSetting {
                key: TICKER_TEXT_KEY.to_string(),
                value: self.ticker_text.clone(),
                description: Some("Marquee text shown on every player".to_string()),
                updated_at: now,
            },
            GlobalSetting {
                key: TICKER_ENABLED_KEY.to_string(),
                value: self.ticker_enabled.to_string(),
                description: Some("Whether players render the marquee".to_string()),
                updated_at: now,
            },
            GlobalSetting {
                key: TICKER_SPEED_KEY.to_string(),
                value: self.ticker_speed.to_string(),
                description: Some("Marquee scroll speed".to_string()),
                updated_at: now,
            },
        ]
    }
}

/// Emits a JSON text column as structured JSON instead of an escaped string.
fn json_text<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    let parsed = value
        .as_deref()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok());
    parsed.serialize(serializer)
}

/// Treats `""` and `null` as an absent date, the way the console submits cleared date inputs.
pub fn optional_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Like [`optional_date`], but distinguishes "field absent" (outer `None`) from "cleared".
pub fn patch_date<'de, D>(deserializer: D) -> Result<Option<Option<NaiveDate>>, D::Error>
where
    D: Deserializer<'de>,
{
    optional_date(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playlist_entry_accepts_bare_ids_and_objects() {
        let entries: Vec<PlaylistEntry> =
            serde_json::from_str(r#"["m1", {"mediaId": "m2", "duration": 12}, {"mediaId": "m3"}]"#)
                .unwrap();

        assert_eq!(entries[0].media_id, "m1");
        assert_eq!(entries[0].effective_duration(5), 5);
        assert_eq!(entries[1].effective_duration(5), 12);
        assert_eq!(entries[2].effective_duration(7), 7);

        let zero = PlaylistEntry {
            media_id: "m4".to_string(),
            duration: Some(0),
        };
        assert_eq!(zero.effective_duration(5), 5);
    }

    #[test]
    fn test_playlist_entry_serializes_as_object() {
        let entry = PlaylistEntry {
            media_id: "m1".to_string(),
            duration: Some(8),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, serde_json::json!({"mediaId": "m1", "duration": 8}));
    }

    #[test]
    fn test_ticker_settings_from_rows() {
        let now = chrono::Utc::now().naive_utc();
        let stored = TickerSettings {
            ticker_text: "Welcome".to_string(),
            ticker_enabled: false,
            ticker_speed: 1.5,
        };
        let rows = stored.to_settings(now);
        assert_eq!(TickerSettings::from_settings(&rows), stored);

        let garbage = vec![GlobalSetting {
            key: TICKER_SPEED_KEY.to_string(),
            value: "fast".to_string(),
            description: None,
            updated_at: now,
        }];
        assert_eq!(TickerSettings::from_settings(&garbage).ticker_speed, 2.0);
        assert_eq!(TickerSettings::from_settings(&[]), TickerSettings::default());
    }

    #[test]
    fn test_media_type_round_trips_through_text_column() {
        assert_eq!(MediaType::parse("document-group"), MediaType::DocumentGroup);
        assert_eq!(MediaType::parse("hologram"), MediaType::Other);
        let json = serde_json::to_string(&MediaType::DocumentGroup).unwrap();
        assert_eq!(json, "\"document-group\"");
    }
}
