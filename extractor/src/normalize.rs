use crate::model::{ExtractedRow, TimeWindow};
use chrono::{DateTime, Utc};
use extractor_core::{Error, Result};
use serde_json::Value;

/// Provenance shared by every record of one page.
#[derive(Debug, Clone, Copy)]
pub struct PageContext<'a> {
    pub window: &'a TimeWindow,
    pub page_number: u32,
    pub page_size: u32,
    pub ingested_at: DateTime<Utc>,
    pub request_descriptor: &'a Value,
}

/// The record's `Id`, as a string. Numeric ids are accepted; empty strings,
/// nulls and other shapes are not.
pub fn natural_key(record: &Value) -> Option<String> {
    match record.get("Id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Wraps one raw record with its extraction provenance. The payload is the
/// whole record, untouched.
pub fn normalize(record: Value, ctx: &PageContext<'_>) -> Result<ExtractedRow> {
    let id = natural_key(&record).ok_or_else(|| Error::MissingId {
        context: format!("window {} page {}", ctx.window, ctx.page_number),
    })?;

    Ok(ExtractedRow {
        id,
        payload: record,
        ingested_at: ctx.ingested_at,
        window_start: ctx.window.start(),
        window_end: ctx.window.end(),
        page_number: ctx.page_number,
        page_size: ctx.page_size,
        request_descriptor: ctx.request_descriptor.clone(),
    })
}
