use chrono::Utc;
use diesel::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

use crate::db::{self, DbPool};
use crate::error::{AppError, AppResult};
use crate::models::{MediaItem, Playlist, Schedule, TickerSettings};
use crate::services::catalog::Catalog;
use crate::services::clock;
use crate::services::schedule_service::matching_schedules;
use crate::AppState;

/// A media item as it will play: its own fields plus the duration its playlist slot assigns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMedia {
    #[serde(flatten)]
    pub item: MediaItem,
    pub playlist_duration: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedContent {
    pub player_id: String,
    pub current_schedule: Option<Schedule>,
    pub playlists: Vec<Playlist>,
    pub media: Vec<ResolvedMedia>,
    pub ticker_text: String,
    pub ticker_enabled: bool,
    pub ticker_speed: f64,
    pub server_time: String,
    pub content_hash: String,
}

#[derive(Debug, Default)]
pub struct Assembly {
    /// Referenced playlists, each listed once, in first-reference order.
    pub playlists: Vec<Playlist>,
    pub media: Vec<ResolvedMedia>,
}

/// Expands matched schedules into the ordered play sequence.
///
/// Order is schedule order, then each schedule's playlist order, then entry order. A playlist
/// referenced by two schedules contributes twice. Document groups are replaced by their pages,
/// and every page carries the referencing entry's duration rather than its own.
pub fn assemble(
    matched: &[&Schedule],
    playlists: &[Playlist],
    media: &[MediaItem],
    default_duration_secs: u32,
) -> Assembly {
    let playlist_by_id: HashMap<&str, &Playlist> =
        playlists.iter().map(|p| (p.id.as_str(), p)).collect();
    let media_by_id: HashMap<&str, &MediaItem> =
        media.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut assembly = Assembly::default();
    let mut seen = HashSet::new();

    for schedule in matched {
        for playlist_id in &schedule.playlist_ids {
            let Some(playlist) = playlist_by_id.get(playlist_id.as_str()) else {
                tracing::debug!(
                    "Schedule {} references missing playlist {}",
                    schedule.id,
                    playlist_id
                );
                continue;
            };
            if seen.insert(playlist.id.as_str()) {
                assembly.playlists.push((*playlist).clone());
            }

            for entry in &playlist.media_items {
                let duration = entry.effective_duration(default_duration_secs);
                let Some(item) = media_by_id.get(entry.media_id.as_str()) else {
                    continue;
                };

                if item.is_document_group() {
                    let pages = item.pages.as_deref().unwrap_or_default();
                    assembly.media.extend(
                        pages
                            .iter()
                            .filter_map(|page_id| media_by_id.get(page_id.as_str()))
                            .map(|page| ResolvedMedia {
                                item: (*page).clone(),
                                playlist_duration: duration,
                            }),
                    );
                } else {
                    assembly.media.push(ResolvedMedia {
                        item: (*item).clone(),
                        playlist_duration: duration,
                    });
                }
            }
        }
    }

    assembly
}

/// Fingerprint of what a player would draw; equal inputs always give equal hashes.
pub fn content_hash(media: &[ResolvedMedia], ticker: &TickerSettings) -> String {
    let mut hasher = Sha256::new();
    for entry in media {
        hasher.update(entry.item.id.as_bytes());
        hasher.update(b":");
        hasher.update(entry.playlist_duration.to_le_bytes());
        hasher.update(entry.item.url.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(ticker.ticker_text.as_bytes());
    hasher.update([u8::from(ticker.ticker_enabled)]);
    hasher.update(ticker.ticker_speed.to_bits().to_le_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Resolves what `player_id` should be playing right now.
///
/// A supplied bearer token must be valid; an absent one is accepted for older players.
pub async fn resolve(
    state: &AppState,
    player_id: &str,
    bearer: Option<&str>,
) -> AppResult<ResolvedContent> {
    if let Some(token) = bearer {
        if !state.tokens.verify(player_id, token).await {
            tracing::warn!("Rejected resolve for player {}: bad token", player_id);
            return Err(AppError::Unauthorized);
        }
    }

    let now = clock::resolve_now(state.timezone);
    let catalog = Catalog::load(&state.db).await?;
    let matched = matching_schedules(&catalog.schedules, player_id, &now);
    let assembly = assemble(
        &matched,
        &catalog.playlists,
        &catalog.media,
        state.config.players.default_entry_duration_secs,
    );

    tracing::debug!(
        "Resolved {} schedules, {} media items for player {} at {} {}",
        matched.len(),
        assembly.media.len(),
        player_id,
        now.date,
        now.time_label()
    );

    let label = assembly
        .playlists
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    tokio::spawn(record_sync(
        state.db.clone(),
        player_id.to_string(),
        label,
    ));

    let content_hash = content_hash(&assembly.media, &catalog.ticker);
    Ok(ResolvedContent {
        player_id: player_id.to_string(),
        current_schedule: matched.first().map(|s| (*s).clone()),
        playlists: assembly.playlists,
        media: assembly.media,
        ticker_text: catalog.ticker.ticker_text,
        ticker_enabled: catalog.ticker.ticker_enabled,
        ticker_speed: catalog.ticker.ticker_speed,
        server_time: now.instant.to_rfc3339(),
        content_hash,
    })
}

/// Stores the resolved playlist label and sync time; failures are only logged.
async fn record_sync(pool: DbPool, player_id: String, label: String) {
    let result = db::interact(&pool, move |conn| {
        use crate::schema::players;
        Ok(diesel::update(players::table.find(&player_id))
            .set((
                players::current_content.eq(Some(label)),
                players::last_sync.eq(Some(Utc::now().naive_utc())),
            ))
            .execute(conn)?)
    })
    .await;
    if let Err(e) = result {
        tracing::error!("Failed to record sync: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaType, PlaylistEntry, TimeSlot};

    fn media(id: &str, media_type: MediaType, duration: u32) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            name: id.to_string(),
            media_type,
            url: Some(format!("uploads/{}.png", id)),
            duration,
            tags: vec![],
            pages: None,
            group_id: None,
            file_size: 0,
            created_at: Utc::now().naive_utc(),
        }
    }

    fn playlist(id: &str, entries: &[(&str, Option<u32>)]) -> Playlist {
        Playlist {
            id: id.to_string(),
            name: format!("Playlist {}", id),
            description: None,
            media_items: entries
                .iter()
                .map(|(media_id, duration)| PlaylistEntry {
                    media_id: media_id.to_string(),
                    duration: *duration,
                })
                .collect(),
            is_active: true,
            created_at: Utc::now().naive_utc(),
        }
    }

    fn schedule(id: &str, playlist_ids: &[&str]) -> Schedule {
        Schedule {
            id: id.to_string(),
            name: id.to_string(),
            playlist_ids: playlist_ids.iter().map(|s| s.to_string()).collect(),
            player_ids: vec!["p1".to_string()],
            start_date: None,
            end_date: None,
            time_slots: vec![TimeSlot {
                start_time: "00:00".to_string(),
                end_time: "23:59".to_string(),
            }],
            recurring_days: vec![],
            is_active: true,
            created_at: Utc::now().naive_utc(),
        }
    }

    fn ids(assembly: &Assembly) -> Vec<&str> {
        assembly.media.iter().map(|m| m.item.id.as_str()).collect()
    }

    #[test]
    fn test_no_match_is_empty() {
        let assembly = assemble(&[], &[playlist("A", &[("m1", None)])], &[], 5);
        assert!(assembly.media.is_empty());
        assert!(assembly.playlists.is_empty());
    }

    #[test]
    fn test_merges_schedules_in_order() {
        let items = vec![
            media("m1", MediaType::Image, 5),
            media("m2", MediaType::Video, 5),
            media("m3", MediaType::Image, 5),
        ];
        let lists = vec![
            playlist("A", &[("m1", Some(10)), ("m2", None)]),
            playlist("B", &[("m3", Some(7))]),
        ];
        let s1 = schedule("s1", &["A"]);
        let s2 = schedule("s2", &["B"]);

        let assembly = assemble(&[&s1, &s2], &lists, &items, 5);
        assert_eq!(ids(&assembly), vec!["m1", "m2", "m3"]);
        assert_eq!(
            assembly
                .media
                .iter()
                .map(|m| m.playlist_duration)
                .collect::<Vec<_>>(),
            vec![10, 5, 7]
        );

        // Reverse schedule order, reverse output.
        let reversed = assemble(&[&s2, &s1], &lists, &items, 5);
        assert_eq!(ids(&reversed), vec!["m3", "m1", "m2"]);
    }

    #[test]
    fn test_playlist_repeats_per_referencing_schedule() {
        let items = vec![media("m1", MediaType::Image, 5)];
        let lists = vec![playlist("A", &[("m1", None)])];
        let s1 = schedule("s1", &["A"]);
        let s2 = schedule("s2", &["A"]);

        let assembly = assemble(&[&s1, &s2], &lists, &items, 5);
        assert_eq!(ids(&assembly), vec!["m1", "m1"]);
        assert_eq!(assembly.playlists.len(), 1);
    }

    #[test]
    fn test_document_group_pages_inherit_entry_duration() {
        let mut group = media("deck", MediaType::DocumentGroup, 5);
        group.url = None;
        group.pages = Some(vec![
            "deck-0".to_string(),
            "deck-1".to_string(),
            "deck-2".to_string(),
        ]);
        let mut items = vec![group];
        for n in 0..3 {
            let mut page = media(&format!("deck-{}", n), MediaType::Image, 99);
            page.group_id = Some("deck".to_string());
            items.push(page);
        }
        let lists = vec![playlist("A", &[("deck", Some(12))])];
        let s1 = schedule("s1", &["A"]);

        let assembly = assemble(&[&s1], &lists, &items, 5);
        assert_eq!(ids(&assembly), vec!["deck-0", "deck-1", "deck-2"]);
        assert!(assembly.media.iter().all(|m| m.playlist_duration == 12));
        // Pages keep their stored default untouched.
        assert!(assembly.media.iter().all(|m| m.item.duration == 99));
    }

    #[test]
    fn test_missing_references_are_skipped() {
        let mut group = media("deck", MediaType::DocumentGroup, 5);
        group.pages = Some(vec!["gone".to_string(), "deck-1".to_string()]);
        let items = vec![group, media("deck-1", MediaType::Image, 5)];
        let lists = vec![playlist("A", &[("ghost", None), ("deck", None)])];
        let s1 = schedule("s1", &["A", "missing-playlist"]);

        let assembly = assemble(&[&s1], &lists, &items, 8);
        assert_eq!(ids(&assembly), vec!["deck-1"]);
        assert_eq!(assembly.media[0].playlist_duration, 8);
    }

    #[test]
    fn test_resolved_media_serializes_flat() {
        let resolved = ResolvedMedia {
            item: media("m1", MediaType::Image, 5),
            playlist_duration: 9,
        };
        let json = serde_json::to_value(&resolved).unwrap();
        assert_eq!(json["id"], "m1");
        assert_eq!(json["type"], "image");
        assert_eq!(json["playlistDuration"], 9);
    }

    #[test]
    fn test_hash_tracks_content_and_ticker() {
        let resolved = vec![ResolvedMedia {
            item: media("m1", MediaType::Image, 5),
            playlist_duration: 9,
        }];
        let ticker = TickerSettings::default();
        let a = content_hash(&resolved, &ticker);
        assert_eq!(a, content_hash(&resolved, &ticker));
        assert_eq!(a.len(), 16);

        assert_ne!(a, content_hash(&[], &ticker));
        let louder = TickerSettings {
            ticker_text: "News".to_string(),
            ..TickerSettings::default()
        };
        assert_ne!(a, content_hash(&resolved, &louder));
        let slower = TickerSettings {
            ticker_speed: 1.5,
            ..TickerSettings::default()
        };
        assert_ne!(a, content_hash(&resolved, &slower));
    }

    #[tokio::test]
    async fn test_resolve_scenarios() {
        let (state, _dir) = crate::test_state();
        let now = Utc::now().naive_utc();
        {
            use crate::schema::{media_items, playlists, schedules};
            let mut conn = state.db.get().unwrap();
            let rows: Vec<_> = ["m1", "m2", "m3"]
                .iter()
                .map(|id| media(id, MediaType::Image, 5).into_row().unwrap())
                .collect();
            diesel::insert_into(media_items::table)
                .values(&rows)
                .execute(&mut conn)
                .unwrap();
            let lists = vec![
                playlist("A", &[("m1", None), ("m2", None)]).into_row().unwrap(),
                playlist("B", &[("m3", None)]).into_row().unwrap(),
            ];
            diesel::insert_into(playlists::table)
                .values(&lists)
                .execute(&mut conn)
                .unwrap();
            let mut first = schedule("s1", &["A"]);
            first.created_at = now;
            let mut second = schedule("s2", &["B"]);
            second.created_at = now + chrono::Duration::seconds(1);
            diesel::insert_into(schedules::table)
                .values(&vec![
                    first.into_row().unwrap(),
                    second.into_row().unwrap(),
                ])
                .execute(&mut conn)
                .unwrap();
        }

        let content = resolve(&state, "p1", None).await.unwrap();
        let media_ids: Vec<_> = content.media.iter().map(|m| m.item.id.clone()).collect();
        assert_eq!(media_ids, vec!["m1", "m2", "m3"]);
        assert_eq!(content.current_schedule.as_ref().unwrap().id, "s1");
        assert_eq!(content.ticker_speed, 2.0);

        let again = resolve(&state, "p1", None).await.unwrap();
        assert_eq!(again.media, content.media);
        assert_eq!(again.content_hash, content.content_hash);

        let idle = resolve(&state, "p9", None).await.unwrap();
        assert!(idle.media.is_empty());
        assert!(idle.current_schedule.is_none());
        let json = serde_json::to_value(&idle).unwrap();
        assert!(json["currentSchedule"].is_null());
        assert_eq!(json["media"], serde_json::json!([]));

        state.tokens.set("p1", "good".to_string()).await;
        assert!(resolve(&state, "p1", Some("good")).await.is_ok());
        assert!(matches!(
            resolve(&state, "p1", Some("bad")).await,
            Err(AppError::Unauthorized)
        ));
    }
}
