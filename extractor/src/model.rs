use chrono::{DateTime, Duration, Utc};
use extractor_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Half-open `[start, end)` interval in UTC. `start < end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} → {}",
            crate::window::format_utc(self.start),
            crate::window::format_utc(self.end)
        )
    }
}

/// Server-driven pagination position. Both counters are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub start_position: u32,
    pub page_number: u32,
}

impl PageCursor {
    pub fn first() -> Self {
        Self {
            start_position: 1,
            page_number: 1,
        }
    }

    /// Moves past the `returned` records of the current page.
    pub fn advance(self, returned: usize) -> Self {
        let returned = u32::try_from(returned).unwrap_or(u32::MAX);
        Self {
            start_position: self.start_position.saturating_add(returned),
            page_number: self.page_number.saturating_add(1),
        }
    }
}

/// A persistence-ready record. Identity is `id` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRow {
    pub id: String,
    pub payload: Value,
    pub ingested_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub page_number: u32,
    pub page_size: u32,
    pub request_descriptor: Value,
}

/// Short-lived bearer credential. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Queryable entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Item,
    Invoice,
}

impl Entity {
    pub const ALL: [Entity; 2] = [Entity::Item, Entity::Invoice];

    /// Name used in the query `FROM` clause and as the key of the record
    /// array under `QueryResponse`.
    pub fn api_name(&self) -> &'static str {
        match self {
            Entity::Item => "Item",
            Entity::Invoice => "Invoice",
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            Entity::Item => "qb_items",
            Entity::Invoice => "qb_invoices",
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.api_name())
    }
}
