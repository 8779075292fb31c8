//! Date search values.
//!
//! A search date is an implicit range: "2024" covers the whole year, "2024-01-15"
//! the whole day. Values are parsed into an inclusive `[lower, upper]` pair of
//! UTC instants with microsecond resolution.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::params::SearchPrefix;

/// Date precision for search parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePrecision {
    /// Year only (e.g., "2024")
    Year,
    /// Year and month (e.g., "2024-01")
    Month,
    /// Full date (e.g., "2024-01-15")
    Day,
    /// Date and time to minutes (e.g., "2024-01-15T10:30Z")
    Minute,
    /// Date and time to seconds (e.g., "2024-01-15T10:30:00Z")
    Second,
    /// Fractional seconds
    Fraction,
}

impl fmt::Display for DatePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatePrecision::Year => write!(f, "year"),
            DatePrecision::Month => write!(f, "month"),
            DatePrecision::Day => write!(f, "day"),
            DatePrecision::Minute => write!(f, "minute"),
            DatePrecision::Second => write!(f, "second"),
            DatePrecision::Fraction => write!(f, "fraction"),
        }
    }
}

/// A parsed date search value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateValue {
    /// The value as supplied.
    pub original: String,
    /// Precision of the supplied value.
    pub precision: DatePrecision,
    /// First instant covered by the value.
    pub lower: DateTime<Utc>,
    /// Last instant covered by the value (inclusive).
    pub upper: DateTime<Utc>,
}

impl DateValue {
    /// Parses a FHIR date, dateTime or instant.
    ///
    /// Times without an offset are taken as UTC.
    pub fn parse(value: &str) -> Result<Self, String> {
        let (lower, next, precision) = match value.len() {
            4 => {
                let year = parse_year(value)?;
                let start = ymd(year, 1, 1)?;
                (start, ymd(year + 1, 1, 1)?, DatePrecision::Year)
            }
            7 => {
                let date = NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d")
                    .map_err(|e| format!("invalid year-month: {}", e))?;
                let start = date.and_time(chrono::NaiveTime::MIN);
                let (y, m) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                (start, ymd(y, m, 1)?, DatePrecision::Month)
            }
            10 => {
                let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .map_err(|e| format!("invalid date: {}", e))?;
                let start = date.and_time(chrono::NaiveTime::MIN);
                (start, start + Duration::days(1), DatePrecision::Day)
            }
            _ => return Self::parse_date_time(value),
        };

        Ok(Self {
            original: value.to_string(),
            precision,
            lower: Utc.from_utc_datetime(&lower),
            upper: Utc.from_utc_datetime(&next) - Duration::microseconds(1),
        })
    }

    fn parse_date_time(value: &str) -> Result<Self, String> {
        let (local, offset) = split_offset(value)?;

        let (naive, precision) = if let Ok(dt) =
            NaiveDateTime::parse_from_str(local, "%Y-%m-%dT%H:%M:%S%.f")
        {
            let precision = if local.contains('.') {
                DatePrecision::Fraction
            } else {
                DatePrecision::Second
            };
            (dt, precision)
        } else {
            let dt = NaiveDateTime::parse_from_str(local, "%Y-%m-%dT%H:%M")
                .map_err(|e| format!("invalid dateTime '{}': {}", value, e))?;
            (dt, DatePrecision::Minute)
        };

        let lower = offset
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| format!("ambiguous local time '{}'", value))?
            .with_timezone(&Utc);

        let upper = match precision {
            DatePrecision::Minute => lower + Duration::minutes(1) - Duration::microseconds(1),
            DatePrecision::Second => lower + Duration::seconds(1) - Duration::microseconds(1),
            _ => lower,
        };

        Ok(Self {
            original: value.to_string(),
            precision,
            lower,
            upper,
        })
    }

    /// Width of the implicit range, used to widen `ap` comparisons.
    pub fn span(&self) -> Duration {
        match self.precision {
            DatePrecision::Fraction => Duration::seconds(1),
            _ => self.upper - self.lower + Duration::microseconds(1),
        }
    }
}

/// A prefixed date comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateBound {
    /// The comparison prefix.
    pub prefix: SearchPrefix,
    /// The compared value.
    pub value: DateValue,
}

impl DateBound {
    /// Parses a prefixed date value such as `ge2024-01-01`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (prefix, date) = SearchPrefix::extract(raw);
        Ok(Self {
            prefix,
            value: DateValue::parse(date)?,
        })
    }
}

fn parse_year(value: &str) -> Result<i32, String> {
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("invalid year '{}'", value));
    }
    value
        .parse::<i32>()
        .map_err(|e| format!("invalid year '{}': {}", value, e))
}

fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDateTime, String> {
    NaiveDate::from_ymd_opt(year, month, day)
        .map(|d| d.and_time(chrono::NaiveTime::MIN))
        .ok_or_else(|| format!("date out of range: {}-{}-{}", year, month, day))
}

/// Largest UTC offset, in hours, a dateTime may carry.
const MAX_OFFSET_HOURS: i32 = 14;

/// Splits a dateTime into its local part and offset.
fn split_offset(value: &str) -> Result<(&str, FixedOffset), String> {
    let utc = FixedOffset::east_opt(0).ok_or("invalid offset")?;

    if let Some(local) = value.strip_suffix('Z') {
        return Ok((local, utc));
    }

    let time_start = value
        .find('T')
        .ok_or_else(|| format!("invalid date '{}'", value))?;
    let time = &value[time_start..];

    if let Some(pos) = time.rfind(['+', '-']) {
        let (local, tz) = value.split_at(time_start + pos);
        let sign = if tz.starts_with('-') { -1 } else { 1 };
        let mut parts = tz[1..].split(':');
        let invalid = || format!("invalid offset in '{}'", value);
        let hours: i32 = parts
            .next()
            .and_then(|h| h.parse().ok())
            .filter(|h| (0..=MAX_OFFSET_HOURS).contains(h))
            .ok_or_else(invalid)?;
        let minutes: i32 = match parts.next() {
            Some(m) => m
                .parse()
                .ok()
                .filter(|m| (0..60).contains(m))
                .ok_or_else(invalid)?,
            None => 0,
        };
        let offset =
            FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)?;
        return Ok((local, offset));
    }

    Ok((value, utc))
}
