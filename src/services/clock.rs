use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;

/// "Now" as seen by schedules: calendar fields in the configured zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalNow {
    pub weekday: Weekday,
    /// Wall-clock time truncated to the minute.
    pub time_of_day: NaiveTime,
    pub date: NaiveDate,
    pub instant: DateTime<Tz>,
}

impl LocalNow {
    pub fn time_label(&self) -> String {
        self.time_of_day.format("%H:%M").to_string()
    }
}

pub fn resolve_now(tz: Tz) -> LocalNow {
    resolve_at(Utc::now(), tz)
}

pub fn resolve_at(at: DateTime<Utc>, tz: Tz) -> LocalNow {
    let local = at.with_timezone(&tz);
    let time_of_day =
        NaiveTime::from_hms_opt(local.hour(), local.minute(), 0).unwrap_or_default();
    LocalNow {
        weekday: local.weekday(),
        time_of_day,
        date: local.date_naive(),
        instant: local,
    }
}
