use crate::model::{Entity, ExtractedRow};
use async_trait::async_trait;
use extractor_core::config::{is_sql_identifier, UPSERT_COLUMNS};
use extractor_core::{Error, Result};
use metrics::counter;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

const NON_KEY_COLUMNS: [&str; UPSERT_COLUMNS - 1] = [
    "payload",
    "ingested_at_utc",
    "extract_window_start_utc",
    "extract_window_end_utc",
    "page_number",
    "page_size",
    "request_payload",
];

/// Destination for normalized rows.
#[async_trait]
pub trait RowSink: Send + Sync {
    /// Inserts or overwrites `rows` by id. Returns the number of rows
    /// submitted, which may exceed the number actually changed.
    async fn upsert(&self, rows: &[ExtractedRow]) -> Result<usize>;
}

/// Schema-qualified table name built only from validated identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    pub fn new(schema: &str, table: &str) -> Result<Self> {
        for part in [schema, table] {
            if !is_sql_identifier(part) {
                return Err(Error::Config(format!("'{}' is not a valid SQL identifier", part)));
            }
        }
        Ok(Self {
            schema: schema.to_string(),
            table: table.to_string(),
        })
    }

    pub fn for_entity(schema: &str, entity: Entity) -> Result<Self> {
        Self::new(schema, entity.table_name())
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

pub struct PgSink {
    pool: PgPool,
    table: TableName,
    batch_size: usize,
}

impl PgSink {
    pub fn new(pool: PgPool, table: TableName, batch_size: usize) -> Self {
        Self {
            pool,
            table,
            batch_size: batch_size.max(1),
        }
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Creates the schema and landing table when missing.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn ensure_table(&self) -> Result<()> {
        for statement in create_table_statements(&self.table) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        info!(table = %self.table, "Landing table ready");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RowSink for PgSink {
    #[instrument(skip(self, rows), fields(table = %self.table, row_count = rows.len()))]
    async fn upsert(&self, rows: &[ExtractedRow]) -> Result<usize> {
        if rows.is_empty() {
            info!(table = %self.table, "No rows to upsert");
            return Ok(0);
        }

        let unique = collapse_duplicate_ids(rows);

        // One transaction for the whole call: either every batch lands or none does
        let mut tx = self.pool.begin().await?;

        for batch in unique.chunks(self.batch_size) {
            let statement = upsert_statement(&self.table, batch.len());
            let mut query = sqlx::query(&statement);

            for row in batch {
                query = query
                    .bind(&row.id)
                    .bind(&row.payload)
                    .bind(row.ingested_at)
                    .bind(row.window_start)
                    .bind(row.window_end)
                    .bind(to_int4(row.page_number, "page_number")?)
                    .bind(to_int4(row.page_size, "page_size")?)
                    .bind(&row.request_descriptor);
            }

            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;

        counter!("extractor_rows_upserted", "table" => self.table.to_string())
            .increment(rows.len() as u64);

        debug!(
            submitted = rows.len(),
            unique = unique.len(),
            "Upserted rows"
        );

        Ok(rows.len())
    }
}

fn to_int4(value: u32, column: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| Error::Validation(format!("{} {} does not fit in an INTEGER column", column, value)))
}

/// Keeps only the last occurrence of each id, in submission order.
/// Postgres refuses to update the same row twice within one statement.
pub fn collapse_duplicate_ids(rows: &[ExtractedRow]) -> Vec<&ExtractedRow> {
    let mut last_seen: HashMap<&str, usize> = HashMap::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        last_seen.insert(row.id.as_str(), index);
    }

    rows.iter()
        .enumerate()
        .filter(|(index, row)| last_seen.get(row.id.as_str()) == Some(index))
        .map(|(_, row)| row)
        .collect()
}

pub fn upsert_statement(table: &TableName, row_count: usize) -> String {
    let mut values_strings = Vec::with_capacity(row_count);
    let mut param_index = 1;

    for _ in 0..row_count {
        let placeholders: Vec<String> = (0..UPSERT_COLUMNS)
            .map(|i| format!("${}", param_index + i))
            .collect();
        values_strings.push(format!("({})", placeholders.join(", ")));
        param_index += UPSERT_COLUMNS;
    }

    let assignments: Vec<String> = NON_KEY_COLUMNS
        .iter()
        .map(|column| format!("{column} = EXCLUDED.{column}"))
        .collect();

    format!(
        "INSERT INTO {} (id, {}) VALUES {} ON CONFLICT (id) DO UPDATE SET {}",
        table,
        NON_KEY_COLUMNS.join(", "),
        values_strings.join(", "),
        assignments.join(", ")
    )
}

pub fn create_table_statements(table: &TableName) -> [String; 2] {
    [
        format!("CREATE SCHEMA IF NOT EXISTS {}", table.schema()),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                payload JSONB NOT NULL,
                ingested_at_utc TIMESTAMPTZ NOT NULL,
                extract_window_start_utc TIMESTAMPTZ NOT NULL,
                extract_window_end_utc TIMESTAMPTZ NOT NULL,
                page_number INTEGER NOT NULL,
                page_size INTEGER NOT NULL,
                request_payload JSONB NOT NULL
            )
            "#,
            table
        ),
    ]
}
