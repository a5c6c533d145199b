use std::sync::Arc;

use fixflow_agent::domains::default_router;
use fixflow_agent::llm::{LlmError, OpenAiCompatibleClient};
use fixflow_agent::router::RouterError;
use fixflow_agent::AgentRuntime;
use fixflow_core::config::{AppConfig, ConfigError};
use fixflow_db::{connect_with_config, migrations, DbPool, SqlSessionRepository};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub agent_runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("model client setup failed: {0}")]
    ModelClient(#[source] LlmError),
    #[error("domain catalog setup failed: {0}")]
    Catalog(#[source] RouterError),
}

/// Revalidates `config` so hand-built configurations fail before any connection is opened.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    config.validate()?;
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let client = OpenAiCompatibleClient::from_config(&config.llm).map_err(BootstrapError::ModelClient)?;
    info!(
        event_name = "system.bootstrap.model_client_ready",
        correlation_id = "bootstrap",
        endpoint = client.endpoint(),
        model = client.model(),
        "model client configured"
    );
    let client = Arc::new(client);
    let router = default_router(client, &config.guardrails).map_err(BootstrapError::Catalog)?;
    let domain_count = router.route_count();
    let sessions = Arc::new(SqlSessionRepository::new(db_pool.clone()));
    info!(
        event_name = "system.bootstrap.catalog_ready",
        correlation_id = "bootstrap",
        domain_count,
        "domain catalog registered"
    );

    Ok(Application {
        config,
        db_pool,
        agent_runtime: Arc::new(AgentRuntime::new(Arc::new(router), sessions)),
    })
}
