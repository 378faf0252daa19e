//! The single civil-calendar reference used for every date decision.
//!
//! Timestamps are stored in UTC. Whenever a date, weekday or wall-clock time
//! is needed it is derived through one [`Calendar`], which carries the fixed
//! UTC offset configured for the deployment.

use crate::error::AppError;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

const OFFSET_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[offset_hour sign:mandatory]:[offset_minute]");
const CLOCK_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]");
const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: UtcOffset,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl Calendar {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(UtcOffset::UTC)
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    pub fn local(&self, at: OffsetDateTime) -> PrimitiveDateTime {
        let shifted = at.to_offset(self.offset);
        PrimitiveDateTime::new(shifted.date(), shifted.time())
    }

    pub fn date_of(&self, at: OffsetDateTime) -> Date {
        at.to_offset(self.offset).date()
    }
}

/// Parses `+HH:MM` / `-HH:MM`. A bare `Z` or `UTC` means zero offset.
pub fn parse_offset(raw: &str) -> Result<UtcOffset, AppError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(UtcOffset::UTC);
    }
    UtcOffset::parse(trimmed, OFFSET_FORMAT)
        .map_err(|_| AppError::invalid_input(format!("offset must look like +03:00, got '{trimmed}'")))
}

pub fn format_offset(offset: UtcOffset) -> String {
    offset
        .format(OFFSET_FORMAT)
        .unwrap_or_else(|_| "+00:00".to_string())
}

/// Parses a wall-clock `HH:MM`.
pub fn parse_clock_time(raw: &str) -> Result<Time, AppError> {
    let trimmed = raw.trim();
    Time::parse(trimmed, CLOCK_FORMAT)
        .map_err(|_| AppError::invalid_input(format!("time must be HH:MM, got '{trimmed}'")))
}

pub fn format_clock_time(at: Time) -> String {
    format!("{:02}:{:02}", at.hour(), at.minute())
}

pub fn parse_date(raw: &str) -> Result<Date, AppError> {
    let trimmed = raw.trim();
    Date::parse(trimmed, DATE_FORMAT)
        .map_err(|_| AppError::invalid_input(format!("date must be YYYY-MM-DD, got '{trimmed}'")))
}
