use crate::api::{HttpRequest, HttpResponse, Invoker, TokenSource};
use crate::model::{AuthToken, Entity, ExtractedRow, PageCursor, TimeWindow};
use crate::normalize::{normalize, PageContext};
use crate::window::format_utc;
use chrono::{DateTime, Utc};
use extractor_core::{Error, Result};
use metrics::counter;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Everything drained from one window.
#[derive(Debug, Clone)]
pub struct WindowExtract {
    pub window: TimeWindow,
    pub rows: Vec<ExtractedRow>,
    /// Non-empty pages received.
    pub pages: u32,
    pub requests: u32,
    pub skipped: usize,
}

enum Step {
    Next(PageCursor),
    Done,
}

/// Walks the query endpoint page by page for a single window.
///
/// Pages are requested strictly in increasing `STARTPOSITION` order. An
/// empty page or a page shorter than `page_size` ends the window; a 401
/// triggers exactly one token refresh and one repeat of the same request.
pub struct Paginator {
    invoker: Invoker,
    tokens: Arc<dyn TokenSource>,
    query_url: String,
    entity: Entity,
    page_size: u32,
}

impl Paginator {
    pub fn new(
        invoker: Invoker,
        tokens: Arc<dyn TokenSource>,
        query_url: impl Into<String>,
        entity: Entity,
        page_size: u32,
    ) -> Self {
        Self {
            invoker,
            tokens,
            query_url: query_url.into(),
            entity,
            page_size: page_size.max(1),
        }
    }

    #[instrument(skip_all, fields(entity = %self.entity, window = %window))]
    pub async fn drain(
        &self,
        window: &TimeWindow,
        mut token: AuthToken,
        ingested_at: DateTime<Utc>,
    ) -> Result<WindowExtract> {
        let mut extract = WindowExtract {
            window: *window,
            rows: Vec::new(),
            pages: 0,
            requests: 0,
            skipped: 0,
        };
        let mut cursor = PageCursor::first();

        loop {
            match self
                .step(window, cursor, &mut token, ingested_at, &mut extract)
                .await?
            {
                Step::Next(next) => cursor = next,
                Step::Done => break,
            }
        }

        Ok(extract)
    }

    async fn step(
        &self,
        window: &TimeWindow,
        cursor: PageCursor,
        token: &mut AuthToken,
        ingested_at: DateTime<Utc>,
        extract: &mut WindowExtract,
    ) -> Result<Step> {
        let query = build_query(self.entity, window, cursor, self.page_size);
        let (response, requests) = self.fetch_page(&query, token).await?;
        extract.requests += requests;

        let records = take_records(&response, self.entity)?;
        if records.is_empty() {
            debug!(start_position = cursor.start_position, "Empty page, window drained");
            return Ok(Step::Done);
        }

        let descriptor = json!({ "query": query });
        let ctx = PageContext {
            window,
            page_number: cursor.page_number,
            page_size: self.page_size,
            ingested_at,
            request_descriptor: &descriptor,
        };

        let returned = records.len();
        for record in records {
            match normalize(record, &ctx) {
                Ok(row) => extract.rows.push(row),
                Err(e @ Error::MissingId { .. }) => {
                    debug!(error = %e, "Skipping record");
                    extract.skipped += 1;
                    counter!("extractor_records_skipped").increment(1);
                }
                Err(e) => return Err(e),
            }
        }
        extract.pages += 1;

        counter!("extractor_pages_fetched", "entity" => self.entity.api_name()).increment(1);
        debug!(
            page = cursor.page_number,
            start_position = cursor.start_position,
            returned,
            "Fetched page"
        );

        if returned < self.page_size as usize {
            return Ok(Step::Done);
        }

        Ok(Step::Next(cursor.advance(returned)))
    }

    /// Returns the page and the number of requests it took (1, or 2 after a
    /// re-authentication). On a 401 the token is refreshed in place.
    async fn fetch_page(&self, query: &str, token: &mut AuthToken) -> Result<(HttpResponse, u32)> {
        let response = self.invoker.invoke(&self.query_request(query, token)?).await?;
        if !response.is_unauthorized() {
            return Ok((response, 1));
        }

        warn!("Access token rejected, re-authenticating");
        counter!("extractor_reauthentications").increment(1);
        *token = self.tokens.fetch_token().await?;

        let response = self.invoker.invoke(&self.query_request(query, token)?).await?;
        if response.is_unauthorized() {
            return Err(Error::Auth(format!(
                "request rejected with 401 after re-authentication: {}",
                response.text()
            )));
        }

        Ok((response, 2))
    }

    fn query_request(&self, query: &str, token: &AuthToken) -> Result<HttpRequest> {
        let mut request = HttpRequest::get(&self.query_url).query_param("query", query);
        request.set_bearer(token)?;
        Ok(request)
    }
}

/// Lower bound inclusive, upper bound exclusive.
pub fn build_query(entity: Entity, window: &TimeWindow, cursor: PageCursor, page_size: u32) -> String {
    format!(
        "SELECT * FROM {} WHERE MetaData.LastUpdatedTime >= '{}' AND MetaData.LastUpdatedTime < '{}' STARTPOSITION {} MAXRESULTS {}",
        entity.api_name(),
        format_utc(window.start()),
        format_utc(window.end()),
        cursor.start_position,
        page_size
    )
}

/// The record array under `QueryResponse.<Entity>`. Absent or null means no
/// more data.
fn take_records(response: &HttpResponse, entity: Entity) -> Result<Vec<Value>> {
    let mut body: Value = response.json()?;
    let pointer = format!("/QueryResponse/{}", entity.api_name());

    match body.pointer_mut(&pointer).map(Value::take) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(records)) => Ok(records),
        Some(other) => Err(Error::Validation(format!(
            "expected an array at {}, got {}",
            pointer,
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
