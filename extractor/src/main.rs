use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use extractor::app::{self, App};
use extractor::model::Entity;
use extractor::pipeline::ExtractParams;
use extractor::secrets::EnvSecrets;
use extractor::window::{format_utc, parse_utc, split};
use extractor_core::{telemetry, Config};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[clap(name = "extractor")]
#[clap(about = "Windowed QuickBooks extractor loading raw records into Postgres", version)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the landing schema and tables
    Migrate,

    /// Print the windows a range would be split into
    Windows {
        #[clap(long, env = "EXTRACT_START", value_parser = parse_timestamp)]
        start: DateTime<Utc>,

        #[clap(long, env = "EXTRACT_END", value_parser = parse_timestamp)]
        end: DateTime<Utc>,

        /// Window length in days (clamped to 1..=30)
        #[clap(long)]
        chunk_days: Option<u32>,
    },

    /// Extract an entity over [start, end) and upsert it
    Extract {
        #[clap(long, value_enum)]
        entity: Entity,

        /// Inclusive lower bound (RFC3339 or YYYY-MM-DD)
        #[clap(long, env = "EXTRACT_START", value_parser = parse_timestamp)]
        start: DateTime<Utc>,

        /// Exclusive upper bound (RFC3339 or YYYY-MM-DD)
        #[clap(long, env = "EXTRACT_END", value_parser = parse_timestamp)]
        end: DateTime<Utc>,

        /// Records per page (clamped to 1..=1000)
        #[clap(long)]
        page_size: Option<u32>,

        #[clap(long)]
        chunk_days: Option<u32>,

        /// Extract and report without writing
        #[clap(long)]
        dry_run: bool,
    },
}

fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, String> {
    parse_utc(input).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Fatal error");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // Initialize telemetry
    telemetry::init(&config.telemetry)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => {
            info!(schema = %config.sink.schema, "Creating landing tables");
            let pool = app::connect(&config.database).await?;
            app::migrate(&config, &pool).await?;
            info!("Landing tables ready");
        }

        Commands::Windows { start, end, chunk_days } => {
            let days = chunk_days.unwrap_or(config.extract.chunk_size_days);
            let windows = split(start, end, extractor_core::config::clamp_chunk_size_days(days))?;
            for window in &windows {
                println!("{}\t{}", format_utc(window.start()), format_utc(window.end()));
            }
            println!("{} windows", windows.len());
        }

        Commands::Extract {
            entity,
            start,
            end,
            page_size,
            chunk_days,
            dry_run,
        } => {
            let params = ExtractParams::new(entity, start, end)
                .with_page_size(page_size.unwrap_or(config.extract.page_size))
                .with_chunk_size_days(chunk_days.unwrap_or(config.extract.chunk_size_days))
                .with_dry_run(dry_run);

            let app = App::bootstrap(config, Arc::new(EnvSecrets), dry_run).await?;
            let summary = app.run_extract(&params).await?;

            info!(
                run_id = %summary.run_id,
                windows = summary.windows.len(),
                rows = summary.total_rows,
                pages = summary.total_pages,
                skipped = summary.total_skipped,
                dry_run,
                "Extraction completed"
            );
        }
    }

    telemetry::shutdown();
    Ok(())
}
