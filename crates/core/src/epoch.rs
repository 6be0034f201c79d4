//! Point-in-time policy for historical retrieval.
//!
//! An [`Epoch`] says whether history is consulted at all, and if so which
//! version of a key should be served: the newest one, or the one that was
//! current at a given instant.

use std::sync::LazyLock;

use chrono::{DateTime, Days, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Strict calendar-date format accepted for epochs (e.g. `20240131`).
pub const EPOCH_DATE_FORMAT: &str = "%Y%m%d";

/// Which historical version, if any, a retrieval should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Epoch {
    /// Retrieval is disabled.
    NoHistory,
    /// Return the newest stored version.
    Latest,
    /// Return the version that was current at the given instant.
    AsOf(DateTime<Utc>),
}

impl Epoch {
    /// Whether this epoch enables retrieval at all.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Epoch::NoHistory)
    }

    /// Parse an epoch setting relative to the current time.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnparseableEpoch` if the input matches none of
    /// the accepted forms.
    pub fn parse(setting: impl Into<EpochSetting>) -> Result<Self, ConfigError> {
        Self::parse_at(setting, Utc::now())
    }

    /// Parse an epoch setting, resolving relative phrases against `now`.
    pub fn parse_at(setting: impl Into<EpochSetting>, now: DateTime<Utc>) -> Result<Self, ConfigError> {
        match setting.into() {
            EpochSetting::Flag(true) => Ok(Epoch::Latest),
            EpochSetting::Flag(false) => Ok(Epoch::NoHistory),
            EpochSetting::Instant(at) => Ok(Epoch::AsOf(at)),
            EpochSetting::Number(n) => parse_text(&n.to_string(), now),
            EpochSetting::Text(text) => parse_text(&text, now),
        }
    }
}

/// Raw epoch value as it appears in configuration.
///
/// Environment variables holding `20240101` arrive as integers, which is why
/// `Number` exists alongside `Text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EpochSetting {
    Flag(bool),
    Number(u64),
    Instant(DateTime<Utc>),
    Text(String),
}

impl Default for EpochSetting {
    fn default() -> Self {
        EpochSetting::Flag(false)
    }
}

impl From<bool> for EpochSetting {
    fn from(flag: bool) -> Self {
        EpochSetting::Flag(flag)
    }
}

impl From<DateTime<Utc>> for EpochSetting {
    fn from(at: DateTime<Utc>) -> Self {
        EpochSetting::Instant(at)
    }
}

impl From<&str> for EpochSetting {
    fn from(text: &str) -> Self {
        EpochSetting::Text(text.to_string())
    }
}

impl From<String> for EpochSetting {
    fn from(text: String) -> Self {
        EpochSetting::Text(text)
    }
}

static RELATIVE_AGO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+|an?)\s+(second|sec|minute|min|hour|day|week|month|year)s?\s+ago$").expect("valid regex")
});

static RELATIVE_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^in\s+(\d+|an?)\s+(second|sec|minute|min|hour|day|week|month|year)s?$").expect("valid regex")
});

static RELATIVE_LAST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^last\s+(second|minute|hour|day|week|month|year)$").expect("valid regex"));

fn parse_text(input: &str, now: DateTime<Utc>) -> Result<Epoch, ConfigError> {
    let trimmed = input.trim();
    match trimmed {
        "True" | "true" => return Ok(Epoch::Latest),
        "False" | "false" => return Ok(Epoch::NoHistory),
        _ => {}
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, EPOCH_DATE_FORMAT) {
        return Ok(Epoch::AsOf(midnight(date)));
    }

    parse_natural(trimmed, now)
        .map(Epoch::AsOf)
        .ok_or_else(|| ConfigError::UnparseableEpoch(input.to_string()))
}

/// Resolve a human-friendly date expression against `now`.
fn parse_natural(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let phrase = input.to_lowercase();
    let today = now.date_naive();

    match phrase.as_str() {
        "now" => return Some(now),
        "today" => return Some(midnight(today)),
        "yesterday" => return today.checked_sub_days(Days::new(1)).map(midnight),
        "tomorrow" => return today.checked_add_days(Days::new(1)).map(midnight),
        _ => {}
    }

    if let Some(caps) = RELATIVE_AGO.captures(&phrase) {
        return shift(now, amount(&caps[1])?, &caps[2], Direction::Back);
    }
    if let Some(caps) = RELATIVE_IN.captures(&phrase) {
        return shift(now, amount(&caps[1])?, &caps[2], Direction::Forward);
    }
    if let Some(caps) = RELATIVE_LAST.captures(&phrase) {
        return shift(now, 1, &caps[1], Direction::Back);
    }

    if let Ok(date) = NaiveDate::parse_from_str(&phrase, "%Y-%m-%d") {
        return Some(midnight(date));
    }

    DateTime::parse_from_rfc3339(input).ok().map(|at| at.with_timezone(&Utc))
}

#[derive(Clone, Copy)]
enum Direction {
    Back,
    Forward,
}

fn amount(token: &str) -> Option<u32> {
    match token {
        "a" | "an" => Some(1),
        digits => digits.parse().ok(),
    }
}

fn shift(now: DateTime<Utc>, n: u32, unit: &str, direction: Direction) -> Option<DateTime<Utc>> {
    let n64 = i64::from(n);
    let delta = match unit {
        "second" | "sec" => Duration::try_seconds(n64)?,
        "minute" | "min" => Duration::try_minutes(n64)?,
        "hour" => Duration::try_hours(n64)?,
        "day" => Duration::try_days(n64)?,
        "week" => Duration::try_weeks(n64)?,
        "month" | "year" => {
            let months = if unit == "year" { Months::new(n.checked_mul(12)?) } else { Months::new(n) };
            return match direction {
                Direction::Back => now.checked_sub_months(months),
                Direction::Forward => now.checked_add_months(months),
            };
        }
        _ => return None,
    };

    match direction {
        Direction::Back => now.checked_sub_signed(delta),
        Direction::Forward => now.checked_add_signed(delta),
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_booleans() {
        assert_eq!(Epoch::parse(true).unwrap(), Epoch::Latest);
        assert_eq!(Epoch::parse(false).unwrap(), Epoch::NoHistory);
        assert_eq!(Epoch::parse("True").unwrap(), Epoch::Latest);
        assert_eq!(Epoch::parse("False").unwrap(), Epoch::NoHistory);
    }

    #[test]
    fn test_parse_instant_passthrough() {
        let now = Utc::now();
        assert_eq!(Epoch::parse(now).unwrap(), Epoch::AsOf(now));
    }

    #[test]
    fn test_parse_strict_date() {
        assert_eq!(Epoch::parse("20240131").unwrap(), Epoch::AsOf(at(2024, 1, 31)));
    }

    #[test]
    fn test_parse_numeric_date() {
        assert_eq!(Epoch::parse(EpochSetting::Number(20240131)).unwrap(), Epoch::AsOf(at(2024, 1, 31)));
    }

    #[test]
    fn test_parse_yesterday() {
        let epoch = Epoch::parse_at("yesterday", fixed_now()).unwrap();
        assert_eq!(epoch, Epoch::AsOf(at(2024, 3, 9)));
    }

    #[test]
    fn test_parse_relative_ago() {
        let epoch = Epoch::parse_at("3 days ago", fixed_now()).unwrap();
        assert_eq!(epoch, Epoch::AsOf(Utc.with_ymd_and_hms(2024, 3, 7, 15, 30, 0).unwrap()));

        let epoch = Epoch::parse_at("an hour ago", fixed_now()).unwrap();
        assert_eq!(epoch, Epoch::AsOf(Utc.with_ymd_and_hms(2024, 3, 10, 14, 30, 0).unwrap()));

        let epoch = Epoch::parse_at("2 months ago", fixed_now()).unwrap();
        assert_eq!(epoch, Epoch::AsOf(Utc.with_ymd_and_hms(2024, 1, 10, 15, 30, 0).unwrap()));
    }

    #[test]
    fn test_parse_last_and_in() {
        let epoch = Epoch::parse_at("last week", fixed_now()).unwrap();
        assert_eq!(epoch, Epoch::AsOf(Utc.with_ymd_and_hms(2024, 3, 3, 15, 30, 0).unwrap()));

        let epoch = Epoch::parse_at("in 1 year", fixed_now()).unwrap();
        assert_eq!(epoch, Epoch::AsOf(Utc.with_ymd_and_hms(2025, 3, 10, 15, 30, 0).unwrap()));
    }

    #[test]
    fn test_parse_iso_forms() {
        assert_eq!(Epoch::parse("2024-01-01").unwrap(), Epoch::AsOf(at(2024, 1, 1)));
        assert_eq!(
            Epoch::parse("2024-01-01T12:00:00+02:00").unwrap(),
            Epoch::AsOf(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(matches!(Epoch::parse("not a date at all"), Err(ConfigError::UnparseableEpoch(_))));
        assert!(matches!(Epoch::parse("20241399"), Err(ConfigError::UnparseableEpoch(_))));
        assert!(matches!(Epoch::parse(""), Err(ConfigError::UnparseableEpoch(_))));
    }

    #[test]
    fn test_setting_deserializes_untagged() {
        let flag: EpochSetting = serde_json::from_str("true").unwrap();
        assert_eq!(flag, EpochSetting::Flag(true));

        let number: EpochSetting = serde_json::from_str("20240101").unwrap();
        assert_eq!(number, EpochSetting::Number(20240101));

        let text: EpochSetting = serde_json::from_str("\"yesterday\"").unwrap();
        assert_eq!(text, EpochSetting::Text("yesterday".into()));
    }

    #[test]
    fn test_is_enabled() {
        assert!(!Epoch::NoHistory.is_enabled());
        assert!(Epoch::Latest.is_enabled());
        assert!(Epoch::AsOf(fixed_now()).is_enabled());
    }
}
