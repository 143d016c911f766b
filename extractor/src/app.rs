use crate::api::{Invoker, OAuthTokenProvider, ReqwestTransport, TokenSource, Transport};
use crate::model::Entity;
use crate::pipeline::{ExtractParams, Pipeline, RunSummary};
use crate::secrets::{ApiEnvironment, Credentials, SecretStore};
use crate::store::{PgSink, TableName};
use extractor_core::config::DatabaseConfig;
use extractor_core::{Config, Result, RetryPolicy};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

pub struct App {
    config: Config,
    pool: PgPool,
    invoker: Invoker,
    tokens: Arc<dyn TokenSource>,
    query_url: String,
}

impl App {
    /// Loads credentials, then opens the pool. A missing secret fails before
    /// any connection is attempted. Dry runs get a pool that never connects.
    #[instrument(skip(config, secrets))]
    pub async fn bootstrap(config: Config, secrets: Arc<dyn SecretStore>, dry_run: bool) -> Result<Self> {
        let credentials = Credentials::load(secrets.as_ref())?;

        let pool = if dry_run {
            PgPoolOptions::new().connect_lazy(&config.database.url)?
        } else {
            connect(&config.database).await?
        };

        Self::new(config, pool, credentials, secrets)
    }

    pub fn new(
        config: Config,
        pool: PgPool,
        credentials: Credentials,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self> {
        info!("Initializing application");

        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(Duration::from_secs(
            config.api.request_timeout_secs,
        ))?);

        let invoker = Invoker::new(transport.clone(), RetryPolicy::from_config(&config.api));
        let tokens: Arc<dyn TokenSource> = Arc::new(OAuthTokenProvider::new(
            transport,
            secrets,
            config.api.token_url.clone(),
            Duration::from_secs(config.api.token_timeout_secs),
        ));

        let query_url = query_url(&config, &credentials);
        info!(
            environment = ?credentials.environment,
            realm_id = %credentials.realm_id,
            "Using QuickBooks company"
        );

        Ok(Self {
            config,
            pool,
            invoker,
            tokens,
            query_url,
        })
    }

    pub async fn run_extract(&self, params: &ExtractParams) -> Result<RunSummary> {
        let table = TableName::for_entity(&self.config.sink.schema, params.entity)?;
        let sink = PgSink::new(self.pool.clone(), table, self.config.sink.batch_size);
        if !params.dry_run {
            sink.health_check().await?;
            info!(table = %sink.table(), "Writing to landing table");
        }

        let pipeline = Pipeline::new(
            self.invoker.clone(),
            self.tokens.clone(),
            Arc::new(sink),
            self.query_url.clone(),
        );
        pipeline.run(params).await
    }
}

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await?;
    Ok(pool)
}

/// One sink per entity in the configured schema. Needs only the database.
pub fn landing_sinks(config: &Config, pool: &PgPool) -> Result<Vec<PgSink>> {
    Entity::ALL
        .iter()
        .map(|entity| {
            let table = TableName::for_entity(&config.sink.schema, *entity)?;
            Ok(PgSink::new(pool.clone(), table, config.sink.batch_size))
        })
        .collect()
}

/// Creates the schema and every entity's landing table.
pub async fn migrate(config: &Config, pool: &PgPool) -> Result<()> {
    for sink in landing_sinks(config, pool)? {
        sink.ensure_table().await?;
    }
    Ok(())
}

fn query_url(config: &Config, credentials: &Credentials) -> String {
    let base = match credentials.environment {
        ApiEnvironment::Sandbox => &config.api.sandbox_base_url,
        ApiEnvironment::Production => &config.api.production_base_url,
    };
    format!(
        "{}/v3/company/{}/query",
        base.trim_end_matches('/'),
        credentials.realm_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{StaticSecrets, CLIENT_ID, CLIENT_SECRET, ENV_SELECTOR, REALM_ID, REFRESH_TOKEN};
    use extractor_core::Error;
    use pretty_assertions::assert_eq;

    fn credentials(selector: &str) -> Credentials {
        let store = StaticSecrets::new()
            .with(ENV_SELECTOR, selector)
            .with(REALM_ID, "9130")
            .with(CLIENT_ID, "id")
            .with(CLIENT_SECRET, "secret")
            .with(REFRESH_TOKEN, "refresh");
        Credentials::load(&store).unwrap()
    }

    /// Nothing listens on port 1, so any connection attempt fails with a
    /// database error rather than a configuration error.
    fn unreachable_database() -> Config {
        let mut config = Config::default();
        config.database.url = "postgres://postgres@127.0.0.1:1/unused".to_string();
        config.database.connect_timeout_secs = 1;
        config
    }

    #[test]
    fn query_url_follows_environment() {
        let config = Config::default();
        assert_eq!(
            query_url(&config, &credentials("sandbox")),
            "https://sandbox-quickbooks.api.intuit.com/v3/company/9130/query"
        );
        assert_eq!(
            query_url(&config, &credentials("production")),
            "https://quickbooks.api.intuit.com/v3/company/9130/query"
        );
    }

    #[tokio::test]
    async fn missing_secret_is_reported_before_connecting() {
        let secrets = Arc::new(StaticSecrets::new().with(CLIENT_ID, "id"));

        let result = App::bootstrap(unreachable_database(), secrets, false).await;

        match result {
            Err(Error::Config(msg)) => assert!(msg.contains(REALM_ID)),
            Err(other) => panic!("expected a configuration error, got {:?}", other),
            Ok(_) => panic!("expected a configuration error"),
        }
    }

    #[tokio::test]
    async fn migrate_sinks_need_no_api_secrets() {
        let config = unreachable_database();
        let pool = PgPoolOptions::new().connect_lazy(&config.database.url).unwrap();

        let tables: Vec<String> = landing_sinks(&config, &pool)
            .unwrap()
            .iter()
            .map(|sink| sink.table().to_string())
            .collect();

        assert_eq!(tables, vec!["raw.qb_items", "raw.qb_invoices"]);
    }

    #[tokio::test]
    async fn migrate_reports_unreachable_database() {
        let config = unreachable_database();
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(1))
            .connect_lazy(&config.database.url)
            .unwrap();

        assert!(matches!(migrate(&config, &pool).await, Err(Error::Database(_))));
    }

    #[tokio::test]
    async fn dry_run_bootstrap_never_connects() {
        let store = StaticSecrets::new()
            .with(REALM_ID, "9130")
            .with(CLIENT_ID, "id")
            .with(CLIENT_SECRET, "secret")
            .with(REFRESH_TOKEN, "refresh");

        let app = App::bootstrap(unreachable_database(), Arc::new(store), true).await;

        assert!(app.is_ok());
    }
}
