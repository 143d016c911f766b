use crate::model::TimeWindow;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use extractor_core::config::{MAX_CHUNK_SIZE_DAYS, MIN_CHUNK_SIZE_DAYS};
use extractor_core::{Error, Result};

/// Ordered, contiguous chunks of `[start, end)`. Every chunk spans
/// `chunk_size_days` except the last, which is clipped to `end`.
#[derive(Debug, Clone)]
pub struct Windows {
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Duration,
}

impl Iterator for Windows {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        if self.cursor >= self.end {
            return None;
        }

        let next = self
            .cursor
            .checked_add_signed(self.step)
            .map_or(self.end, |t| t.min(self.end));
        let window = TimeWindow::new(self.cursor, next).ok()?;
        self.cursor = next;
        Some(window)
    }
}

pub fn windows(start: DateTime<Utc>, end: DateTime<Utc>, chunk_size_days: u32) -> Result<Windows> {
    if start >= end {
        return Err(Error::InvalidRange { start, end });
    }

    if !(MIN_CHUNK_SIZE_DAYS..=MAX_CHUNK_SIZE_DAYS).contains(&chunk_size_days) {
        return Err(Error::Config(format!(
            "chunk_size_days must be within [{}, {}], got {}",
            MIN_CHUNK_SIZE_DAYS, MAX_CHUNK_SIZE_DAYS, chunk_size_days
        )));
    }

    Ok(Windows {
        cursor: start,
        end,
        step: Duration::days(i64::from(chunk_size_days)),
    })
}

pub fn split(start: DateTime<Utc>, end: DateTime<Utc>, chunk_size_days: u32) -> Result<Vec<TimeWindow>> {
    Ok(windows(start, end, chunk_size_days)?.collect())
}

/// Parses ISO-8601 input into UTC. Offset-less values are taken as UTC and a
/// bare date means midnight.
pub fn parse_utc(input: &str) -> Result<DateTime<Utc>> {
    let s = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Some(midnight) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }

    Err(Error::Config(format!("invalid ISO-8601 timestamp '{}'", input)))
}

/// Second-precision UTC rendering used in queries and status lines.
pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
