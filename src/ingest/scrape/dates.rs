//! Heuristic date recognition for scraped listing pages.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap())
}

/// Parse a date found anywhere in `text`, relative forms resolved against now.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    parse_date_at(text, Utc::now())
}

/// Patterns are tried in a fixed order and the first that yields a valid
/// date wins: `YYYY/MM/DD`, `MM/DD/YYYY`, `YYYY-MM-DD`, `N units ago`,
/// then RFC 2822, RFC 3339, `Month D, YYYY` and `D Month YYYY`.
pub fn parse_date_at(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    static YMD_SLASH: OnceCell<Regex> = OnceCell::new();
    if let Some(c) = re(&YMD_SLASH, r"(\d{4})/(\d{1,2})/(\d{1,2})").captures(text) {
        if let Some(d) = ymd(&c[1], &c[2], &c[3]) {
            return Some(d);
        }
    }

    static MDY_SLASH: OnceCell<Regex> = OnceCell::new();
    if let Some(c) = re(&MDY_SLASH, r"(\d{1,2})/(\d{1,2})/(\d{4})").captures(text) {
        if let Some(d) = ymd(&c[3], &c[1], &c[2]) {
            return Some(d);
        }
    }

    static YMD_DASH: OnceCell<Regex> = OnceCell::new();
    if let Some(c) = re(&YMD_DASH, r"(\d{4})-(\d{1,2})-(\d{1,2})").captures(text) {
        if let Ok(full) = DateTime::parse_from_rfc3339(text) {
            return Some(full.with_timezone(&Utc));
        }
        if let Some(d) = ymd(&c[1], &c[2], &c[3]) {
            return Some(d);
        }
    }

    static AGO: OnceCell<Regex> = OnceCell::new();
    if let Some(c) = re(&AGO, r"(?i)\b(\d{1,3})\s+(day|hour|minute)s?\s+ago").captures(text) {
        let n: i64 = c[1].parse().ok()?;
        let delta = match c[2].to_ascii_lowercase().as_str() {
            "day" => Duration::days(n),
            "hour" => Duration::hours(n),
            _ => Duration::minutes(n),
        };
        return Some(now - delta);
    }

    if let Ok(d) = DateTime::parse_from_rfc2822(text) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = DateTime::parse_from_rfc3339(text) {
        return Some(d.with_timezone(&Utc));
    }

    static MONTH_FIRST: OnceCell<Regex> = OnceCell::new();
    if let Some(c) =
        re(&MONTH_FIRST, r"([A-Za-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})").captures(text)
    {
        if let Some(d) = month_name(&c[1]).and_then(|m| ymd_n(&c[3], m, &c[2])) {
            return Some(d);
        }
    }

    static DAY_FIRST: OnceCell<Regex> = OnceCell::new();
    if let Some(c) = re(&DAY_FIRST, r"(\d{1,2})\s+([A-Za-z]{3,9})\.?,?\s+(\d{4})").captures(text) {
        if let Some(d) = month_name(&c[2]).and_then(|m| ymd_n(&c[3], m, &c[1])) {
            return Some(d);
        }
    }

    None
}

fn ymd(y: &str, m: &str, d: &str) -> Option<DateTime<Utc>> {
    ymd_n(y, m.parse().ok()?, d)
}

fn ymd_n(y: &str, m: u32, d: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(y.parse().ok()?, m, d.parse().ok()?)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn month_name(s: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    let lower = s.to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| *m == lower || (lower.len() <= 4 && m.starts_with(lower.trim_end_matches('t'))))
        .map(|i| i as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn numeric_forms_in_priority_order() {
        assert_eq!(parse_date("2024/03/15"), Some(at(2024, 3, 15)));
        assert_eq!(parse_date("Patch 14.6 - 03/15/2024"), Some(at(2024, 3, 15)));
        assert_eq!(parse_date("posted 2024-3-5"), Some(at(2024, 3, 5)));
        assert_eq!(
            parse_date("2024-03-15T10:30:00Z"),
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap())
        );
        assert_eq!(parse_date("2024/13/40"), None);
    }

    #[test]
    fn relative_forms_use_injected_clock() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        assert_eq!(parse_date_at("3 days ago", now), Some(now - Duration::days(3)));
        assert_eq!(parse_date_at("1 Hour ago", now), Some(now - Duration::hours(1)));
        assert_eq!(parse_date_at("45 minutes ago", now), Some(now - Duration::minutes(45)));
        assert_eq!(parse_date_at("1000 days ago", now), None, "oversized counts are not truncated");
    }

    #[test]
    fn named_month_and_rfc_forms() {
        assert_eq!(parse_date("March 5, 2024"), Some(at(2024, 3, 5)));
        assert_eq!(parse_date("Sept 12 2023"), Some(at(2023, 9, 12)));
        assert_eq!(parse_date("12 Dec 2023"), Some(at(2023, 12, 12)));
        assert_eq!(
            parse_date("Tue, 05 Mar 2024 08:00:00 GMT"),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn garbage_is_none() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("coming soon"), None);
        assert_eq!(parse_date("Season 14"), None);
    }
}
