//! 5-field cron expression parsing and next-fire computation.
//!
//! Implements the classic crontab grammar (minute, hour, day-of-month,
//! month, day-of-week) with lists, ranges, steps, and month/weekday names.
//! [`CronExpr::next_after`] is a pure function from a reference instant to
//! the next matching instant; all I/O-free so schedule math is testable
//! with fixed timestamps.

use chrono::{
    DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone,
    Timelike,
};

/// Forward search bound, in days. An expression with no match inside this
/// window (e.g. `0 0 30 2 *`) yields [`CronError::NoMatch`].
pub const SEARCH_HORIZON_DAYS: u32 = 1464;

/// Errors from cron parsing and next-fire computation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    /// Expression does not have exactly five whitespace-separated fields.
    #[error("expected 5 fields (minute hour day-of-month month day-of-week), found {0}")]
    FieldCount(usize),

    /// A field contains an unparsable or out-of-range item.
    #[error("invalid {field} field {value:?}: {reason}")]
    InvalidField {
        /// Which of the five fields was rejected.
        field: &'static str,
        /// The offending item text.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No matching instant within the search horizon of the reference time.
    #[error("no matching instant within {0} days of the reference time")]
    NoMatch(u32),
}

/// A parsed, validated 5-field cron expression.
///
/// Field values are stored as bitmasks, so this is a small `Copy` value.
/// The source text is not retained; callers that need it (e.g. for
/// persistence) keep the original string alongside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronExpr {
    minute: FieldSet,
    hour: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
    day_of_week: FieldSet,
}

impl CronExpr {
    /// Parse and fully validate a cron expression.
    ///
    /// Accepted per field: `*`, single values, ranges (`a-b`), steps
    /// (`*/n`, `a-b/n`, `a/n` running to the field maximum), and
    /// comma-separated lists of these. Months and weekdays also accept
    /// three-letter names (`JAN`, `MON`, ...), case-insensitive. Weekday
    /// `7` is normalized to `0` (Sunday).
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        Ok(Self {
            minute: parse_field(fields[0], Field::Minute)?,
            hour: parse_field(fields[1], Field::Hour)?,
            day_of_month: parse_field(fields[2], Field::DayOfMonth)?,
            month: parse_field(fields[3], Field::Month)?,
            day_of_week: parse_field(fields[4], Field::DayOfWeek)?,
        })
    }

    /// Compute the next matching instant strictly after `after`, in the
    /// reference's own timezone, at whole-minute precision.
    ///
    /// Searches forward minute by minute, skipping whole months, days, and
    /// hours that cannot match. Local times skipped by a zone transition
    /// are passed over; ambiguous ones resolve to the earliest instant.
    ///
    /// # Errors
    ///
    /// [`CronError::NoMatch`] when no instant within
    /// [`SEARCH_HORIZON_DAYS`] matches.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Result<DateTime<Tz>, CronError> {
        let tz = after.timezone();
        let reference = after.naive_local();

        // Truncate to the minute, then step one past the reference so the
        // result is strictly after it.
        let mut t = reference
            - TimeDelta::seconds(i64::from(reference.second()))
            - TimeDelta::nanoseconds(i64::from(reference.nanosecond()))
            + TimeDelta::minutes(1);
        let horizon = t + TimeDelta::days(i64::from(SEARCH_HORIZON_DAYS));

        while t < horizon {
            if !self.month.contains(t.month()) {
                t = start_of_next_month(t.date());
                continue;
            }
            if !self.day_matches(t.date()) {
                t = (t.date() + Days::new(1)).and_time(NaiveTime::MIN);
                continue;
            }
            if !self.hour.contains(t.hour()) {
                t = t.date().and_time(NaiveTime::MIN) + TimeDelta::hours(i64::from(t.hour()) + 1);
                continue;
            }
            if !self.minute.contains(t.minute()) {
                t += TimeDelta::minutes(1);
                continue;
            }
            match tz.from_local_datetime(&t).earliest() {
                Some(hit) => return Ok(hit),
                // Local minute does not exist in this zone (DST gap).
                None => t += TimeDelta::minutes(1),
            }
        }

        Err(CronError::NoMatch(SEARCH_HORIZON_DAYS))
    }

    /// Day match combining day-of-month and day-of-week.
    ///
    /// Classic cron rule: when both fields are restricted (neither is `*`),
    /// a day matches if EITHER does; when exactly one is restricted, only
    /// it constrains the day.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.day_of_month.contains(date.day());
        let dow = self
            .day_of_week
            .contains(date.weekday().num_days_from_sunday());

        match (self.day_of_month.wildcard, self.day_of_week.wildcard) {
            (true, true) => true,
            (false, true) => dom,
            (true, false) => dow,
            (false, false) => dom || dow,
        }
    }
}

impl std::str::FromStr for CronExpr {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Allowed values for one field, as a bitmask.
///
/// `wildcard` records whether the field source text was exactly `*`, which
/// the day-match rule distinguishes from an equivalent explicit range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    bits: u64,
    wildcard: bool,
}

impl FieldSet {
    fn contains(self, value: u32) -> bool {
        value < 64 && self.bits & (1 << value) != 0
    }
}

/// Which of the five fields an item belongs to, for ranges and messages.
#[derive(Debug, Clone, Copy)]
enum Field {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

impl Field {
    fn name(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::DayOfMonth => "day-of-month",
            Self::Month => "month",
            Self::DayOfWeek => "day-of-week",
        }
    }

    fn min(self) -> u32 {
        match self {
            Self::Minute | Self::Hour | Self::DayOfWeek => 0,
            Self::DayOfMonth | Self::Month => 1,
        }
    }

    fn max(self) -> u32 {
        match self {
            Self::Minute => 59,
            Self::Hour => 23,
            Self::DayOfMonth => 31,
            Self::Month => 12,
            Self::DayOfWeek => 7,
        }
    }

    /// Resolve a three-letter month or weekday name.
    fn alias(self, word: &str) -> Option<u32> {
        let lower = word.to_ascii_lowercase();
        match self {
            Self::Month => MONTH_NAMES
                .iter()
                .position(|n| *n == lower)
                .map(|i| i as u32 + 1),
            Self::DayOfWeek => DAY_NAMES.iter().position(|n| *n == lower).map(|i| i as u32),
            _ => None,
        }
    }
}

fn parse_field(text: &str, field: Field) -> Result<FieldSet, CronError> {
    let wildcard = text == "*";
    let mut bits = 0u64;

    for item in text.split(',') {
        if item.is_empty() {
            return Err(invalid(field, text, "empty list item"));
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step_text)) => {
                let step: u32 = step_text
                    .parse()
                    .map_err(|_| invalid(field, item, "step is not a number"))?;
                if step == 0 {
                    return Err(invalid(field, item, "step must be at least 1"));
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (start, end) = if range == "*" {
            (field.min(), field.max())
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, field)?, parse_value(b, field)?)
        } else {
            let value = parse_value(range, field)?;
            if item.contains('/') {
                // "N/step" runs from N to the field maximum.
                (value, field.max())
            } else {
                (value, value)
            }
        };

        if start > end {
            return Err(invalid(field, item, "range start exceeds end"));
        }

        let mut v = start;
        while v <= end {
            bits |= 1 << normalize(field, v);
            v += step;
        }
    }

    Ok(FieldSet { bits, wildcard })
}

fn parse_value(text: &str, field: Field) -> Result<u32, CronError> {
    let value = match field.alias(text) {
        Some(named) => named,
        None => text
            .parse::<u32>()
            .map_err(|_| invalid(field, text, "not a number or known name"))?,
    };

    if value < field.min() || value > field.max() {
        return Err(invalid(
            field,
            text,
            format!("out of range {}-{}", field.min(), field.max()),
        ));
    }
    Ok(value)
}

/// Weekday 7 is an alias for 0 (Sunday).
fn normalize(field: Field, value: u32) -> u32 {
    match field {
        Field::DayOfWeek if value == 7 => 0,
        _ => value,
    }
}

fn invalid(field: Field, value: &str, reason: impl Into<String>) -> CronError {
    CronError::InvalidField {
        field: field.name(),
        value: value.to_owned(),
        reason: reason.into(),
    }
}

fn start_of_next_month(date: NaiveDate) -> NaiveDateTime {
    let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date);
    (first + Months::new(1)).and_time(NaiveTime::MIN)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
