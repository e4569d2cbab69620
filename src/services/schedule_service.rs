use chrono::{NaiveDate, NaiveTime, Weekday};

use crate::models::{Schedule, TimeSlot};
use crate::services::clock::LocalNow;

/// True iff `schedule` is in force for `player_id` at `now`.
///
/// Every conjunct must hold: active, targeted, within the inclusive date range, on a
/// recurring day (an empty set means every day) and inside at least one time slot.
pub fn is_in_force(schedule: &Schedule, player_id: &str, now: &LocalNow) -> bool {
    schedule.is_active
        && schedule.player_ids.iter().any(|id| id == player_id)
        && within_dates(schedule.start_date, schedule.end_date, now.date)
        && on_recurring_day(&schedule.recurring_days, now.weekday)
        && schedule
            .time_slots
            .iter()
            .any(|slot| slot_covers(slot, now.time_of_day))
}

/// Every schedule in force for the player, in the order given.
pub fn matching_schedules<'a>(
    schedules: &'a [Schedule],
    player_id: &str,
    now: &LocalNow,
) -> Vec<&'a Schedule> {
    schedules
        .iter()
        .filter(|schedule| is_in_force(schedule, player_id, now))
        .collect()
}

fn within_dates(start: Option<NaiveDate>, end: Option<NaiveDate>, date: NaiveDate) -> bool {
    start.map_or(true, |start| date >= start) && end.map_or(true, |end| date <= end)
}

fn on_recurring_day(days: &[String], weekday: Weekday) -> bool {
    days.is_empty()
        || days
            .iter()
            .any(|day| day.trim().parse::<Weekday>().map_or(false, |d| d == weekday))
}

fn slot_covers(slot: &TimeSlot, time_of_day: NaiveTime) -> bool {
    match (
        parse_wall_clock(&slot.start_time),
        parse_wall_clock(&slot.end_time),
    ) {
        (Some(start), Some(end)) => time_of_day >= start && time_of_day <= end,
        _ => {
            tracing::warn!(
                "Ignoring unreadable time slot {}-{}",
                slot.start_time,
                slot.end_time
            );
            false
        }
    }
}

/// Whether `raw` reads as a local wall-clock time (`HH:MM`, seconds optional).
pub fn is_wall_clock(raw: &str) -> bool {
    parse_wall_clock(raw).is_some()
}

fn parse_wall_clock(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}
