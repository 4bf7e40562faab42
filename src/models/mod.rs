use std::fmt;
use std::str::FromStr;

use async_graphql::{InputValueError, InputValueResult, Scalar, ScalarType, Value};
use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, Time};

use crate::error::{BookingError, BookingResult};

pub mod appointment;
pub mod exception;
pub mod interval;
pub mod schedule;
pub mod template;

pub const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
pub const TIME_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]:[second]");
pub const SHORT_TIME_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]");

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// A calendar day with no time zone attached, written `YYYY-MM-DD`.
///
/// Dates are compared as calendar values, never as instants, so a booking
/// made late in the evening can't drift onto the next day.
#[derive(sqlx::Type, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[sqlx(transparent)]
pub struct CalendarDate(pub Date);

impl CalendarDate {
    pub fn parse(date_str: &str) -> BookingResult<Self> {
        Date::parse(date_str.trim(), DATE_FORMAT)
            .map(CalendarDate)
            .map_err(|_err| {
                BookingError::validation(format!("{} is not a valid YYYY-MM-DD date", date_str))
            })
    }

    /// 1 for Monday through 7 for Sunday
    pub fn day_of_week(&self) -> i16 {
        self.0.weekday().number_from_monday() as i16
    }

    /// Which occurrence of its weekday this is within the month, from 1 to 5
    pub fn week_of_month(&self) -> i16 {
        (self.0.day() as i16 - 1) / 7 + 1
    }

    pub fn checked_add_days(self, days: i64) -> Option<Self> {
        self.0.checked_add(Duration::days(days)).map(CalendarDate)
    }
}

impl FromStr for CalendarDate {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CalendarDate::parse(s)
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = self.0.format(DATE_FORMAT).map_err(|_err| fmt::Error)?;
        f.write_str(&formatted)
    }
}

#[Scalar]
impl ScalarType for CalendarDate {
    fn parse(value: Value) -> InputValueResult<Self> {
        if let Value::String(date_str) = &value {
            if let Ok(date) = CalendarDate::parse(date_str) {
                return Ok(date);
            }
        }

        Err(InputValueError::expected_type(value))
    }

    fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

/// A wall-clock time within a day, written `HH:MM:SS`.
#[derive(sqlx::Type, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[sqlx(transparent)]
pub struct TimeOfDay(pub Time);

impl TimeOfDay {
    pub fn parse(time_str: &str) -> BookingResult<Self> {
        let trimmed = time_str.trim();
        Time::parse(trimmed, TIME_FORMAT)
            .or_else(|_err| Time::parse(trimmed, SHORT_TIME_FORMAT))
            .map(TimeOfDay)
            .map_err(|_err| {
                BookingError::validation(format!("{} is not a valid HH:MM:SS time", time_str))
            })
    }

    pub fn seconds_since_midnight(&self) -> u32 {
        let (hour, minute, second) = self.0.as_hms();
        u32::from(hour) * 3600 + u32::from(minute) * 60 + u32::from(second)
    }

    /// `None` once the result would roll past midnight.
    pub fn checked_add_minutes(self, minutes: u32) -> Option<Self> {
        let total = self.seconds_since_midnight().checked_add(minutes.checked_mul(60)?)?;
        if total >= SECONDS_PER_DAY {
            return None;
        }

        Time::from_hms(
            (total / 3600) as u8,
            ((total % 3600) / 60) as u8,
            (total % 60) as u8,
        )
        .ok()
        .map(TimeOfDay)
    }
}

impl FromStr for TimeOfDay {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeOfDay::parse(s)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = self.0.format(TIME_FORMAT).map_err(|_err| fmt::Error)?;
        f.write_str(&formatted)
    }
}

#[Scalar]
impl ScalarType for TimeOfDay {
    fn parse(value: Value) -> InputValueResult<Self> {
        if let Value::String(time_str) = &value {
            if let Ok(time) = TimeOfDay::parse(time_str) {
                return Ok(time);
            }
        }

        Err(InputValueError::expected_type(value))
    }

    fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

/// A point in time, exchanged as RFC 3339.
#[derive(sqlx::Type, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[sqlx(transparent)]
pub struct Timestamp(pub OffsetDateTime);

impl From<OffsetDateTime> for Timestamp {
    fn from(time: OffsetDateTime) -> Self {
        Timestamp(time)
    }
}

#[Scalar]
impl ScalarType for Timestamp {
    fn parse(value: Value) -> InputValueResult<Self> {
        if let Value::String(time_str) = &value {
            if let Ok(time) = OffsetDateTime::parse(time_str, &Rfc3339) {
                return Ok(Timestamp(time));
            }
        }

        Err(InputValueError::expected_type(value))
    }

    fn to_value(&self) -> Value {
        self.0
            .format(&Rfc3339)
            .map(Value::String)
            .unwrap_or(Value::Null)
    }
}
