//! Relative time resolution.
//!
//! Turns phrases such as "last week", "this month" or "last 3 days" into an
//! absolute `{from, to}` pair of RFC 3339 timestamps. Calendar phrases
//! ("last week", "last month") resolve to the previous *full* period, while
//! "last N units" is always a rolling window ending at the reference instant.
//! Anything unrecognized resolves to `None`, meaning "apply no time filter".

use std::sync::LazyLock;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, Offset,
    SecondsFormat, TimeZone, Utc,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Absolute time window, both ends inclusive, formatted as RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: String,
    pub to: String,
}

impl TimeRange {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    fn between(from: DateTime<FixedOffset>, to: DateTime<FixedOffset>) -> Self {
        Self {
            from: format_instant(from),
            to: format_instant(to),
        }
    }
}

/// Unit of a rolling "last N units" window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Day,
    Week,
    Month,
    Year,
}

impl Unit {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            _ => None,
        }
    }
}

/// Resolves relative phrases against a fixed reference instant.
#[derive(Debug, Clone)]
pub struct RelativeTimeResolver {
    now: DateTime<FixedOffset>,
}

impl RelativeTimeResolver {
    /// Resolver anchored at the current instant in the given timezone.
    pub fn new(timezone: Option<&str>) -> Self {
        let offset = timezone.map(parse_timezone).unwrap_or_else(utc_offset);
        Self {
            now: Utc::now().with_timezone(&offset),
        }
    }

    /// Resolver anchored at a specific instant.
    pub fn at(now: DateTime<FixedOffset>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.now
    }

    /// Resolve a phrase to an absolute range, or `None` for "no time filter".
    pub fn resolve(&self, phrase: &str) -> Option<TimeRange> {
        let phrase = phrase.trim().to_lowercase();
        let phrase = phrase.split_whitespace().collect::<Vec<_>>().join(" ");

        if NO_FILTER_PHRASES.contains(&phrase.as_str()) {
            return None;
        }

        if let Some(range) = self.resolve_exact(&phrase) {
            return Some(range);
        }

        if let Some(caps) = ROLLING_EXACT_PATTERN.captures(&phrase) {
            return self.rolling_from_captures(&caps);
        }

        self.resolve_fuzzy(&phrase)
    }

    fn resolve_exact(&self, phrase: &str) -> Option<TimeRange> {
        let today = self.now.date_naive();
        match phrase {
            "today" => Some(TimeRange::between(self.start_of_day(today)?, self.now)),
            "yesterday" => {
                let day = today.pred_opt()?;
                Some(TimeRange::between(
                    self.start_of_day(day)?,
                    self.end_of_day(day)?,
                ))
            }
            "this week" => Some(TimeRange::between(
                self.start_of_day(sunday_on_or_before(today))?,
                self.now,
            )),
            "this month" => Some(TimeRange::between(
                self.start_of_day(first_of_month(today))?,
                self.now,
            )),
            "this year" => Some(TimeRange::between(
                self.start_of_day(NaiveDate::from_ymd_opt(today.year(), 1, 1)?)?,
                self.now,
            )),
            "last week" => {
                let this_sunday = sunday_on_or_before(today);
                let start = this_sunday - Duration::days(7);
                let end = this_sunday - Duration::days(1);
                Some(TimeRange::between(
                    self.start_of_day(start)?,
                    self.end_of_day(end)?,
                ))
            }
            "last month" => {
                let end = first_of_month(today).pred_opt()?;
                Some(TimeRange::between(
                    self.start_of_day(first_of_month(end))?,
                    self.end_of_day(end)?,
                ))
            }
            "last year" => {
                let year = today.year() - 1;
                Some(TimeRange::between(
                    self.start_of_day(NaiveDate::from_ymd_opt(year, 1, 1)?)?,
                    self.end_of_day(NaiveDate::from_ymd_opt(year, 12, 31)?)?,
                ))
            }
            _ => None,
        }
    }

    /// Substring matching for phrases embedded in longer text
    /// ("for today", "within this month").
    fn resolve_fuzzy(&self, phrase: &str) -> Option<TimeRange> {
        if let Some(caps) = ROLLING_ANYWHERE_PATTERN.captures(phrase) {
            return self.rolling_from_captures(&caps);
        }

        FUZZY_ORDER
            .iter()
            .find(|candidate| contains_phrase(phrase, candidate))
            .and_then(|candidate| self.resolve_exact(candidate))
    }

    fn rolling_from_captures(&self, caps: &regex::Captures<'_>) -> Option<TimeRange> {
        let amount: u32 = caps.get(1)?.as_str().parse().ok()?;
        let unit = Unit::parse(caps.get(2)?.as_str())?;
        self.rolling(amount, unit)
    }

    fn rolling(&self, amount: u32, unit: Unit) -> Option<TimeRange> {
        let start = match unit {
            Unit::Day => self
                .now
                .checked_sub_signed(Duration::try_days(i64::from(amount))?)?,
            Unit::Week => self
                .now
                .checked_sub_signed(Duration::try_weeks(i64::from(amount))?)?,
            Unit::Month => self.now.checked_sub_months(Months::new(amount))?,
            Unit::Year => self
                .now
                .checked_sub_months(Months::new(amount.checked_mul(12)?))?,
        };
        Some(TimeRange::between(start, self.now))
    }

    fn start_of_day(&self, date: NaiveDate) -> Option<DateTime<FixedOffset>> {
        self.localize(date.and_hms_opt(0, 0, 0)?)
    }

    fn end_of_day(&self, date: NaiveDate) -> Option<DateTime<FixedOffset>> {
        self.localize(date.and_hms_milli_opt(23, 59, 59, 999)?)
    }

    fn localize(&self, local: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        self.now.offset().from_local_datetime(&local).single()
    }
}

/// Validate an absolute timestamp coming from untrusted output.
///
/// ISO-prefixed values pass through untouched; other recognizable formats
/// are converted to RFC 3339 at start of day in `offset`; anything else is
/// returned unchanged. Never fails.
pub fn normalize_timestamp(value: &str, offset: &FixedOffset) -> String {
    let trimmed = value.trim();
    if ISO_PREFIX_PATTERN.is_match(trimmed) {
        return trimmed.to_string();
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return format_instant(dt);
    }

    for format in ["%Y/%m/%d", "%m/%d/%Y", "%d %B %Y", "%B %d, %Y", "%b %d, %Y", "%d %b %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            let local = date.and_hms_opt(0, 0, 0);
            if let Some(dt) = local.and_then(|l| offset.from_local_datetime(&l).single()) {
                return format_instant(dt);
            }
        }
    }

    trimmed.to_string()
}

/// Parse `UTC`, `Z` or a fixed `±HH:MM` offset; anything else is UTC.
pub fn parse_timezone(tz: &str) -> FixedOffset {
    let tz = tz.trim();
    if tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z") || tz.is_empty() {
        return utc_offset();
    }

    OFFSET_PATTERN
        .captures(tz)
        .and_then(|caps| {
            let sign = if &caps[1] == "-" { -1 } else { 1 };
            let hours: i32 = caps[2].parse().ok()?;
            let minutes: i32 = caps.get(3).map_or(Some(0), |m| m.as_str().parse().ok())?;
            FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        })
        .unwrap_or_else(utc_offset)
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// RFC 3339 with millisecond precision in the instant's own offset.
pub fn format_instant(dt: DateTime<FixedOffset>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn sunday_on_or_before(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    haystack
        .match_indices(phrase)
        .any(|(start, matched)| {
            let before = haystack[..start].chars().next_back();
            let after = haystack[start + matched.len()..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
}

const NO_FILTER_PHRASES: &[&str] = &["", "all", "all time", "any time", "anytime", "ever"];

// Checked in order: "yesterday" before "today" and calendar periods before
// the current ones so "since last week" is not read as "this week".
const FUZZY_ORDER: &[&str] = &[
    "yesterday",
    "today",
    "last week",
    "last month",
    "last year",
    "this week",
    "this month",
    "this year",
];

static ROLLING_EXACT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:last|past)\s+(\d+)\s+(day|week|month|year)s?$").expect("Invalid regex")
});
static ROLLING_ANYWHERE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:last|past)\s+(\d+)\s+(day|week|month|year)s?\b").expect("Invalid regex")
});
static ISO_PREFIX_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("Invalid regex"));
static OFFSET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:UTC|GMT)?([+-])(\d{1,2})(?::?(\d{2}))?$").expect("Invalid regex")
});
