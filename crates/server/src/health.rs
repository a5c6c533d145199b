use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use fixflow_db::{migrations, DbPool};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    domains: Arc<[String]>,
}

impl HealthState {
    pub fn new(db_pool: DbPool, domains: Vec<String>) -> Self {
        Self { db_pool, domains: domains.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoreHealth {
    pub status: &'static str,
    pub schema_version: Option<i64>,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub session_store: StoreHealth,
    pub domains: Vec<String>,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Ready only when the session store answers and carries at least one migration.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let session_store = store_health(&state.db_pool).await;
    let ready = session_store.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        session_store,
        domains: state.domains.to_vec(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn store_health(pool: &DbPool) -> StoreHealth {
    match migrations::applied_versions(pool).await {
        Ok(versions) => match versions.last().copied() {
            Some(version) => StoreHealth {
                status: "ready",
                schema_version: Some(version),
                detail: "session store reachable".to_string(),
            },
            None => StoreHealth {
                status: "degraded",
                schema_version: None,
                detail: "session store has no applied migrations".to_string(),
            },
        },
        Err(error) => StoreHealth {
            status: "degraded",
            schema_version: None,
            detail: format!("session store unreachable: {error}"),
        },
    }
}
