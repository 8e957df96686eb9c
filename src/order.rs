//! # Alert Orderer
//! Deterministic chronological ordering of a batch.
//!
//! Effective timestamp, in priority order:
//! 1. date + separate time-of-day, when both parse
//! 2. a single date or date-time value in any supported format
//! 3. `NaiveDateTime::MIN` (unknown dates sort oldest)
//!
//! The sort is stable, so equal timestamps keep their input order.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::alert::{Alert, StoredAlert};

const DATETIME_FORMATS: [&str; 12] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %I:%M:%S %p",
    "%Y-%m-%d %I:%M %p",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y %I:%M:%S %p",
    "%d/%m/%Y %I:%M %p",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];

const TIME_FORMATS: [&str; 4] = ["%H:%M:%S%.f", "%H:%M", "%I:%M:%S %p", "%I:%M %p"];

/// Rewrite `a. m.` / `p.m.` / `pm` variants (after a digit or space) into ` AM` / ` PM`.
fn normalize_meridiem(s: &str) -> String {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)(^|[\d\s])\s*([ap])\.?\s*m\.?(\s|$)").expect("meridiem regex")
    });
    let out = re.replace_all(s.trim(), |caps: &regex::Captures| {
        format!("{} {}M{}", &caps[1], caps[2].to_ascii_uppercase(), &caps[3])
    });
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a time-of-day in 24h or 12h notation.
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let mut s = normalize_meridiem(raw);
    if s.is_empty() {
        return None;
    }
    // chrono needs minutes: "7 PM" -> "7:00 PM"
    if !s.contains(':') && (s.ends_with(" AM") || s.ends_with(" PM")) {
        let (hour, meridiem) = s.split_at(s.len() - 3);
        s = format!("{hour}:00{meridiem}");
    }
    TIME_FORMATS
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(&s, f).ok())
}

/// Parse a date or date-time (RFC 3339 offsets are converted to UTC).
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = normalize_meridiem(raw);
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(&s) {
        return Some(dt.naive_utc());
    }
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(&s, f).ok())
    {
        return Some(dt);
    }
    parse_date(&s).map(|d| d.and_time(NaiveTime::MIN))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
}

/// Resolve the sort key of one alert.
pub fn effective_timestamp(alert: &Alert) -> NaiveDateTime {
    let date = alert.published_at.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let time = alert.published_time.as_deref().map(str::trim).filter(|s| !s.is_empty());

    if let (Some(d), Some(t)) = (date, time) {
        let day = parse_date(d).or_else(|| parse_datetime(d).map(|dt| dt.date()));
        if let (Some(day), Some(tod)) = (day, parse_time(t)) {
            return day.and_time(tod);
        }
    }
    date.and_then(parse_datetime)
        .unwrap_or(NaiveDateTime::MIN)
}

/// Stable ascending sort by effective timestamp.
pub fn order_alerts(mut alerts: Vec<Alert>) -> Vec<Alert> {
    alerts.sort_by_cached_key(effective_timestamp);
    alerts
}

/// Same ordering for alerts already accepted into a project.
pub fn order_stored(mut alerts: Vec<StoredAlert>) -> Vec<StoredAlert> {
    alerts.sort_by_cached_key(|a| effective_timestamp(&a.alert));
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn alert(url: &str, date: Option<&str>, time: Option<&str>) -> Alert {
        Alert {
            url: url.into(),
            published_at: date.map(str::to_string),
            published_time: time.map(str::to_string),
            ..Alert::default()
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn date_plus_time_sorts_chronologically() {
        let out = order_alerts(vec![
            alert("a", Some("2024-01-03"), Some("18:45")),
            alert("b", Some("2024-01-03"), Some("08:15")),
            alert("c", Some("2024-01-02"), None),
        ]);
        let urls: Vec<&str> = out.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["c", "b", "a"]);
    }

    #[test]
    fn twelve_hour_variants() {
        assert_eq!(parse_time("6:45 PM"), NaiveTime::from_hms_opt(18, 45, 0));
        assert_eq!(parse_time("06:45 p. m."), NaiveTime::from_hms_opt(18, 45, 0));
        assert_eq!(parse_time("8:15 a.m."), NaiveTime::from_hms_opt(8, 15, 0));
        assert_eq!(parse_time("12:05 am"), NaiveTime::from_hms_opt(0, 5, 0));
        assert_eq!(parse_time("7pm"), NaiveTime::from_hms_opt(19, 0, 0));
        assert_eq!(
            parse_datetime("2024-01-03 06:45 P. M."),
            Some(at(2024, 1, 3, 18, 45))
        );
    }

    #[test]
    fn iso_and_dmy_formats() {
        assert_eq!(
            parse_datetime("2024-01-03T10:00:00Z"),
            Some(at(2024, 1, 3, 10, 0))
        );
        assert_eq!(
            parse_datetime("2024-01-03T10:00:00-05:00"),
            Some(at(2024, 1, 3, 15, 0))
        );
        assert_eq!(parse_datetime("03/01/2024 09:30"), Some(at(2024, 1, 3, 9, 30)));
        assert_eq!(parse_datetime("2024-01-03"), Some(at(2024, 1, 3, 0, 0)));
    }

    #[test]
    fn unparseable_dates_sort_first_and_stay_stable() {
        let out = order_alerts(vec![
            alert("dated", Some("2020-05-05"), None),
            alert("junk1", Some("yesterday"), None),
            alert("none", None, None),
            alert("junk2", Some("??"), Some("25:99")),
        ]);
        let urls: Vec<&str> = out.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["junk1", "none", "junk2", "dated"]);
    }

    #[test]
    fn bad_time_falls_back_to_date() {
        let a = alert("a", Some("2024-01-03"), Some("later"));
        assert_eq!(effective_timestamp(&a), at(2024, 1, 3, 0, 0));
    }
}
