use crate::api::{Invoker, TokenSource};
use crate::model::{Entity, TimeWindow};
use crate::paginator::Paginator;
use crate::store::RowSink;
use crate::window::{format_utc, windows};
use chrono::{DateTime, Utc};
use extractor_core::config::{clamp_chunk_size_days, clamp_page_size};
use extractor_core::Result;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument};
use uuid::Uuid;

/// Inbound parameters for one extraction run. Sizes are clamped on the way in.
#[derive(Debug, Clone)]
pub struct ExtractParams {
    pub entity: Entity,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    page_size: u32,
    chunk_size_days: u32,
    pub dry_run: bool,
}

impl ExtractParams {
    pub fn new(entity: Entity, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            entity,
            start,
            end,
            page_size: 500,
            chunk_size_days: 1,
            dry_run: false,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = clamp_page_size(page_size);
        self
    }

    pub fn with_chunk_size_days(mut self, days: u32) -> Self {
        self.chunk_size_days = clamp_chunk_size_days(days);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn chunk_size_days(&self) -> u32 {
        self.chunk_size_days
    }
}

#[derive(Debug, Clone)]
pub struct WindowStats {
    pub window: TimeWindow,
    pub rows: usize,
    pub pages: u32,
    pub skipped: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub windows: Vec<WindowStats>,
    pub total_rows: usize,
    pub total_pages: u32,
    pub total_skipped: usize,
}

/// Drains windows one after another: fetch a token, paginate the window,
/// then hand its rows to the sink before moving on. A failure stops the run;
/// windows already written stay written.
pub struct Pipeline {
    invoker: Invoker,
    tokens: Arc<dyn TokenSource>,
    sink: Arc<dyn RowSink>,
    query_url: String,
}

impl Pipeline {
    pub fn new(
        invoker: Invoker,
        tokens: Arc<dyn TokenSource>,
        sink: Arc<dyn RowSink>,
        query_url: impl Into<String>,
    ) -> Self {
        Self {
            invoker,
            tokens,
            sink,
            query_url: query_url.into(),
        }
    }

    #[instrument(skip_all, fields(entity = %params.entity))]
    pub async fn run(&self, params: &ExtractParams) -> Result<RunSummary> {
        let plan = windows(params.start, params.end, params.chunk_size_days())?;
        let paginator = Paginator::new(
            self.invoker.clone(),
            self.tokens.clone(),
            self.query_url.clone(),
            params.entity,
            params.page_size(),
        );
        let ingested_at = Utc::now();
        let run_id = Uuid::new_v4();

        info!(
            run_id = %run_id,
            start = %format_utc(params.start),
            end = %format_utc(params.end),
            page_size = params.page_size(),
            chunk_size_days = params.chunk_size_days(),
            dry_run = params.dry_run,
            "Starting extraction"
        );

        let mut summary = RunSummary {
            run_id,
            windows: Vec::new(),
            total_rows: 0,
            total_pages: 0,
            total_skipped: 0,
        };

        for window in plan {
            let started = Instant::now();

            let token = self.tokens.fetch_token().await?;
            let extract = paginator.drain(&window, token, ingested_at).await?;

            if !params.dry_run {
                self.sink.upsert(&extract.rows).await?;
            }

            let stats = WindowStats {
                window,
                rows: extract.rows.len(),
                pages: extract.pages,
                skipped: extract.skipped,
                duration: started.elapsed(),
            };

            info!(
                "[{}] chunk {} | rows={} | pages={} | skipped={} | duration_s={:.3}",
                params.entity.table_name(),
                window,
                stats.rows,
                stats.pages,
                stats.skipped,
                stats.duration.as_secs_f64()
            );
            counter!("extractor_rows_extracted", "entity" => params.entity.api_name())
                .increment(stats.rows as u64);
            histogram!("extractor_window_duration_ms").record(stats.duration.as_millis() as f64);

            summary.total_rows += stats.rows;
            summary.total_pages += stats.pages;
            summary.total_skipped += stats.skipped;
            summary.windows.push(stats);
        }

        info!(
            "[{}] total_rows={} for range {} → {} | windows={} | pages={}",
            params.entity.table_name(),
            summary.total_rows,
            format_utc(params.start),
            format_utc(params.end),
            summary.windows.len(),
            summary.total_pages
        );

        Ok(summary)
    }
}
