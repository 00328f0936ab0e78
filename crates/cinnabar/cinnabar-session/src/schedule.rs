//! Session window arithmetic.
//!
//! A session runs on configured weekdays between a start and an end time
//! of day, expressed in an IANA zone; connections come up during a warm-up
//! period immediately before the start. All decisions here are pure
//! functions of an injected `now`, which is what makes them testable.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono::Datelike;
use chrono_tz::Tz;
use cinnabar_config::{ConfigError, SessionConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Before the next warm-up window.
    Closed,
    /// Inside warm-up or the active window.
    Open,
}

#[derive(Clone, Debug)]
pub struct SessionSchedule {
    days: Vec<Weekday>,
    start: NaiveTime,
    end: NaiveTime,
    warm_up: Duration,
    tz: Tz,
}

/// One concrete upcoming window, in UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    /// Warm-up begins here.
    pub open: DateTime<Utc>,
    /// Session ends here.
    pub close: DateTime<Utc>,
}

impl SessionSchedule {
    pub fn from_config(config: &SessionConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            days: config.weekdays()?,
            start: config.start_time()?,
            end: config.end_time()?,
            warm_up: Duration::seconds(config.session_warm_up_time as i64),
            tz: config.zone()?,
        })
    }

    /// The next (or current) window whose close lies after `now`.
    pub fn next_window(&self, now: DateTime<Utc>) -> Option<Window> {
        let local_today = now.with_timezone(&self.tz).date_naive();
        // yesterday first: an overnight session may still be running
        for offset in -1..=7i64 {
            let date = local_today + Duration::days(offset);
            if !self.days.contains(&date.weekday()) {
                continue;
            }
            let open_naive = date.and_time(self.start) - self.warm_up;
            let close_date = if self.end > self.start {
                date
            } else {
                date + Duration::days(1) // overnight session
            };
            let close_naive = close_date.and_time(self.end);
            let open = resolve_local(&self.tz, open_naive);
            let close = resolve_local(&self.tz, close_naive);
            if close > now {
                return Some(Window { open, close });
            }
        }
        None
    }

    pub fn phase(&self, now: DateTime<Utc>) -> Phase {
        match self.next_window(now) {
            Some(w) if w.open <= now => Phase::Open,
            _ => Phase::Closed,
        }
    }

    /// Seconds to sleep before warm-up; zero when already open.
    pub fn until_open(&self, now: DateTime<Utc>) -> u64 {
        match self.next_window(now) {
            Some(w) if w.open > now => (w.open - now).num_seconds().max(0) as u64,
            _ => 0,
        }
    }

    /// Seconds until the scheduled end; zero when closed.
    pub fn remaining(&self, now: DateTime<Utc>) -> u64 {
        match self.next_window(now) {
            Some(w) if w.open <= now => (w.close - now).num_seconds().max(0) as u64,
            _ => 0,
        }
    }
}

/// Resolves a wall-clock instant in `tz`, taking the earlier of two
/// candidates on DST overlap and shifting forward through DST gaps.
fn resolve_local(tz: &Tz, naive: chrono::NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.with_timezone(&Utc)
        }
        chrono::LocalResult::None => {
            // inside a DST gap: try an hour later
            match tz.from_local_datetime(&(naive + Duration::hours(1))) {
                chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
                    dt.with_timezone(&Utc)
                }
                chrono::LocalResult::None => Utc.from_utc_datetime(&naive),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(days: &[Weekday], start: &str, end: &str, warm_up: u64, tz: &str) -> SessionSchedule {
        SessionSchedule {
            days: days.to_vec(),
            start: NaiveTime::parse_from_str(start, "%H:%M").unwrap(),
            end: NaiveTime::parse_from_str(end, "%H:%M").unwrap(),
            warm_up: Duration::seconds(warm_up as i64),
            tz: tz.parse().unwrap(),
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn weekday_session_opens_with_warm_up() {
        // Wednesday 2024-01-03, session 08:00-17:00 UTC, 10 min warm-up
        let s = schedule(&[Weekday::Wed], "08:00", "17:00", 600, "UTC");

        let before = utc("2024-01-03T07:40:00Z");
        assert_eq!(s.phase(before), Phase::Closed);
        assert_eq!(s.until_open(before), 600);

        let warming = utc("2024-01-03T07:55:00Z");
        assert_eq!(s.phase(warming), Phase::Open);
        assert_eq!(s.until_open(warming), 0);
        assert_eq!(s.remaining(warming), 9 * 3600 + 300);

        let active = utc("2024-01-03T12:00:00Z");
        assert_eq!(s.remaining(active), 5 * 3600);

        let after = utc("2024-01-03T17:00:01Z");
        assert_eq!(s.phase(after), Phase::Closed);
    }

    #[test]
    fn skips_to_the_next_configured_day() {
        let s = schedule(&[Weekday::Mon], "09:00", "10:00", 0, "UTC");
        // Wednesday: the coming Monday is five days out
        let now = utc("2024-01-03T12:00:00Z");
        let w = s.next_window(now).unwrap();
        assert_eq!(w.open, utc("2024-01-08T09:00:00Z"));
        assert_eq!(w.close, utc("2024-01-08T10:00:00Z"));
    }

    #[test]
    fn overnight_session_spans_midnight() {
        let s = schedule(&[Weekday::Fri], "22:00", "04:00", 0, "UTC");
        // late Friday night, still inside Friday's window
        let now = utc("2024-01-06T01:00:00Z"); // Saturday 01:00
        assert_eq!(s.phase(now), Phase::Open);
        assert_eq!(s.remaining(now), 3 * 3600);
    }

    #[test]
    fn respects_the_configured_zone() {
        // 08:00 in New York is 13:00 UTC in January (EST)
        let s = schedule(&[Weekday::Wed], "08:00", "17:00", 0, "America/New_York");
        let now = utc("2024-01-03T12:30:00Z");
        assert_eq!(s.phase(now), Phase::Closed);
        assert_eq!(s.until_open(now), 1800);
    }
}
