use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use fixflow_agent::{AgentRuntime, MessageRequest, RoutedReply};
use fixflow_core::errors::InterfaceError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<AgentRuntime>,
    pub request_timeout: Duration,
}

/// Body of `POST /agent/message`. `modal_name` is accepted for older clients.
#[derive(Clone, Debug, Deserialize)]
pub struct MessageIn {
    pub session_id: String,
    #[serde(alias = "modal_name")]
    pub domain_key: String,
    pub message: String,
}

impl From<MessageIn> for MessageRequest {
    fn from(value: MessageIn) -> Self {
        Self { session_id: value.session_id, domain_key: value.domain_key, message: value.message }
    }
}

/// Response of `POST /agent/message`. `final_complaint` mirrors `final_artifact` for older clients.
#[derive(Clone, Debug, Serialize)]
pub struct MessageOut {
    #[serde(flatten)]
    pub reply: RoutedReply,
    pub final_complaint: Option<Map<String, Value>>,
}

impl From<RoutedReply> for MessageOut {
    fn from(reply: RoutedReply) -> Self {
        let final_complaint = reply.final_artifact.clone();
        Self { reply, final_complaint }
    }
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": {
                "code": self.0.code(),
                "message": self.0.message(),
                "correlation_id": self.0.correlation_id(),
            }
        });
        (status, Json(body)).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new().route("/agent/message", post(post_message)).with_state(state)
}

pub async fn post_message(
    State(state): State<ApiState>,
    payload: Result<Json<MessageIn>, JsonRejection>,
) -> Result<Json<MessageOut>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();

    let Json(body) = payload.map_err(|rejection| {
        ApiError(InterfaceError::BadRequest {
            code: "invalid_request",
            message: rejection.body_text(),
            correlation_id: correlation_id.clone(),
        })
    })?;

    let outcome = tokio::time::timeout(
        state.request_timeout,
        state.runtime.handle_message(body.into(), &correlation_id),
    )
    .await;

    match outcome {
        Ok(Ok(reply)) => Ok(Json(reply.into())),
        Ok(Err(error)) => {
            let mapped = error.into_interface(correlation_id.as_str());
            info!(
                event_name = "api.message.rejected",
                correlation_id = %correlation_id,
                code = mapped.code(),
                "message request failed"
            );
            Err(ApiError(mapped))
        }
        Err(_) => {
            warn!(
                event_name = "api.message.timeout",
                correlation_id = %correlation_id,
                timeout_secs = state.request_timeout.as_secs(),
                "message request exceeded deadline"
            );
            Err(ApiError(InterfaceError::ServiceUnavailable {
                code: "request_timeout",
                message: format!(
                    "request did not complete within {}s",
                    state.request_timeout.as_secs()
                ),
                correlation_id,
            }))
        }
    }
}
