//! Timetable arithmetic.
//!
//! Schedule times are wall-clock `HH:MM` strings in the railway's local
//! timezone. No train runs for 24 hours or more, so a schedule crosses
//! midnight at most once.

use chrono::{DateTime, FixedOffset, NaiveTime, Timelike, Utc};

use crate::models::{Stop, Train};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Serde adapter for `Option<NaiveTime>` as `"HH:MM"`.
///
/// `null`, `""` and `"--:--"` all mean "not scheduled".
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(time) => serializer.serialize_str(&time.format("%H:%M").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => super::parse_hhmm(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// Parse `"HH:MM"`; the placeholder `"--:--"` and blanks yield `None`.
pub fn parse_hhmm(s: &str) -> Result<Option<NaiveTime>, String> {
    let s = s.trim();
    if s.is_empty() || s == "--:--" {
        return Ok(None);
    }
    NaiveTime::parse_from_str(s, "%H:%M")
        .map(Some)
        .map_err(|e| format!("invalid schedule time '{}': {}", s, e))
}

fn minutes_of(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Scheduled stops as `(stop index, minutes since the first day's midnight)`,
/// with a midnight crossing unwrapped by adding a day.
fn unwrapped_minutes(stops: &[Stop]) -> Result<Vec<(usize, u32)>, String> {
    let mut out = Vec::new();
    let mut day_offset = 0;
    let mut previous: Option<u32> = None;

    for (index, stop) in stops.iter().enumerate() {
        let Some(time) = stop.scheduled_time else {
            continue;
        };
        let mut minutes = minutes_of(time) + day_offset;
        if let Some(prev) = previous {
            if minutes < prev {
                if day_offset > 0 {
                    return Err(format!(
                        "stop {} ({}) goes back in time a second time",
                        index, stop.station_id
                    ));
                }
                day_offset = MINUTES_PER_DAY;
                minutes += MINUTES_PER_DAY;
            }
        }
        previous = Some(minutes);
        out.push((index, minutes));
    }

    if let (Some(first), Some(last)) = (out.first(), out.last()) {
        if last.1 - first.1 >= MINUTES_PER_DAY {
            return Err("schedule spans 24 hours or more".to_string());
        }
    }

    Ok(out)
}

/// Check that scheduled times never decrease along the stop sequence,
/// allowing one midnight crossing.
pub fn check_schedule(stops: &[Stop]) -> Result<(), String> {
    unwrapped_minutes(stops).map(|_| ())
}

/// Minutes since the local midnight the run started from, so a run that
/// left yesterday evening reads past `24 * 60` this morning.
fn service_minutes(at: DateTime<Utc>, offset: FixedOffset, first: u32, last: u32) -> f64 {
    let local = at.with_timezone(&offset);
    let now = (local.hour() * 60 + local.minute()) as f64 + local.second() as f64 / 60.0;

    if last >= MINUTES_PER_DAY && now < first as f64 && now <= (last - MINUTES_PER_DAY) as f64 {
        now + MINUTES_PER_DAY as f64
    } else {
        now
    }
}

/// Scheduled progress, but only while the timetable has the train running.
///
/// Outside the service window the timetable says nothing about where a late
/// or early run might be, so there is no ceiling.
pub fn scheduled_ceiling(train: &Train, at: DateTime<Utc>, offset: FixedOffset) -> Option<f64> {
    let times = unwrapped_minutes(&train.stops).ok()?;
    let (_, first_minutes) = *times.first()?;
    let (_, last_minutes) = *times.last()?;

    let now = service_minutes(at, offset, first_minutes, last_minutes);
    if now < first_minutes as f64 || now > last_minutes as f64 {
        return None;
    }
    scheduled_progress(train, at, offset)
}

/// Where the timetable says the train should be at `at`, as route progress.
///
/// Before departure this is `0`, after arrival the last scheduled index.
/// Returns `None` when the train has no scheduled stops.
pub fn scheduled_progress(train: &Train, at: DateTime<Utc>, offset: FixedOffset) -> Option<f64> {
    let times = unwrapped_minutes(&train.stops).ok()?;
    let (_, first_minutes) = *times.first()?;
    let (_, last_minutes) = *times.last()?;

    let now = service_minutes(at, offset, first_minutes, last_minutes);

    let mut previous: Option<(usize, u32)> = None;
    for &(index, minutes) in &times {
        if (minutes as f64) <= now {
            previous = Some((index, minutes));
            continue;
        }
        return Some(match previous {
            Some((prev_index, prev_minutes)) => {
                let span = (minutes - prev_minutes) as f64;
                if span <= 0.0 {
                    prev_index as f64
                } else {
                    let fraction = (now - prev_minutes as f64) / span;
                    prev_index as f64 + fraction * (index - prev_index) as f64
                }
            }
            None => 0.0,
        });
    }

    previous.map(|(index, _)| index as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StopKind;
    use chrono::TimeZone;

    fn stop(station: &str, time: Option<&str>) -> Stop {
        Stop {
            station_id: station.to_string(),
            stop_kind: StopKind::RegularStop,
            scheduled_time: time.and_then(|t| parse_hhmm(t).unwrap()),
        }
    }

    fn train(stops: Vec<Stop>) -> Train {
        Train {
            id: "T".to_string(),
            name: "Test".to_string(),
            stops,
            route_revision: 1,
            off_days: Vec::new(),
        }
    }

    fn dhaka() -> FixedOffset {
        FixedOffset::east_opt(6 * 3600).unwrap()
    }

    fn at_local(h: u32, m: u32) -> DateTime<Utc> {
        dhaka()
            .with_ymd_and_hms(2024, 5, 1, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_parse_placeholder() {
        assert_eq!(parse_hhmm("--:--").unwrap(), None);
        assert!(parse_hhmm("25:99").is_err());
        assert_eq!(
            parse_hhmm("07:45").unwrap(),
            NaiveTime::from_hms_opt(7, 45, 0)
        );
    }

    #[test]
    fn test_schedule_single_midnight_crossing_is_allowed() {
        let stops = vec![
            stop("A", Some("22:00")),
            stop("B", Some("23:30")),
            stop("C", Some("01:15")),
        ];
        assert!(check_schedule(&stops).is_ok());
    }

    #[test]
    fn test_schedule_going_back_twice_is_rejected() {
        let stops = vec![
            stop("A", Some("22:00")),
            stop("B", Some("01:00")),
            stop("C", Some("00:30")),
        ];
        assert!(check_schedule(&stops).is_err());
    }

    #[test]
    fn test_schedule_spanning_a_full_day_is_rejected() {
        let stops = vec![
            stop("A", Some("10:00")),
            stop("B", Some("23:00")),
            stop("C", Some("11:00")),
        ];
        assert!(check_schedule(&stops).is_err());
    }

    #[test]
    fn test_scheduled_progress_interpolates() {
        let t = train(vec![
            stop("A", Some("08:00")),
            stop("B", None),
            stop("C", Some("10:00")),
        ]);
        let progress = scheduled_progress(&t, at_local(9, 0), dhaka()).unwrap();
        assert!((progress - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_scheduled_progress_clamps_outside_service() {
        let t = train(vec![stop("A", Some("08:00")), stop("B", Some("10:00"))]);
        assert_eq!(scheduled_progress(&t, at_local(6, 0), dhaka()), Some(0.0));
        assert_eq!(scheduled_progress(&t, at_local(12, 0), dhaka()), Some(1.0));
    }

    #[test]
    fn test_scheduled_progress_after_midnight() {
        let t = train(vec![
            stop("A", Some("23:00")),
            stop("B", Some("01:00")),
            stop("C", Some("03:00")),
        ]);
        let progress = scheduled_progress(&t, at_local(0, 0), dhaka()).unwrap();
        assert!((progress - 0.5).abs() < 1e-9);
        let progress = scheduled_progress(&t, at_local(2, 0), dhaka()).unwrap();
        assert!((progress - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_unscheduled_train_has_no_progress() {
        let t = train(vec![stop("A", None), stop("B", None)]);
        assert_eq!(scheduled_progress(&t, at_local(9, 0), dhaka()), None);
    }

    #[test]
    fn test_ceiling_only_inside_service_window() {
        let t = train(vec![stop("A", Some("08:00")), stop("B", Some("10:00"))]);
        assert_eq!(scheduled_ceiling(&t, at_local(6, 0), dhaka()), None);
        assert_eq!(scheduled_ceiling(&t, at_local(9, 0), dhaka()), Some(0.5));
        assert_eq!(scheduled_ceiling(&t, at_local(11, 0), dhaka()), None);

        let night = train(vec![stop("A", Some("22:00")), stop("B", Some("02:00"))]);
        assert_eq!(scheduled_ceiling(&night, at_local(0, 0), dhaka()), Some(0.5));
        assert_eq!(scheduled_ceiling(&night, at_local(12, 0), dhaka()), None);
    }
}
