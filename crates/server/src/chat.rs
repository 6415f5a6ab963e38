use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use parley_agent::{DecisionExplanation, DialogueRuntime, SubmitResponse};
use parley_core::errors::InterfaceError;

const MAX_MESSAGE_CHARS: usize = 4_000;
const EXPLAIN_UNAVAILABLE: &str = "conversation context could not be read";

#[derive(Clone)]
pub struct ChatState {
    runtime: Arc<DialogueRuntime>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MessageRequest {
    pub user_id: String,
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub fn router(runtime: Arc<DialogueRuntime>) -> Router {
    Router::new()
        .route("/v1/messages", post(submit_message))
        .route("/v1/explain", post(explain))
        .with_state(ChatState { runtime })
}

pub async fn submit_message(
    State(state): State<ChatState>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    validate(&body)?;

    let reply = state
        .runtime
        .submit_message(body.user_id.trim(), &body.message, body.conversation_id.as_deref())
        .await;

    info!(
        event_name = "server.messages.handled",
        conversation_id = %reply.conversation_id,
        correlation_id = reply.trace.as_ref().map(|trace| trace.correlation_id.as_str()),
        "message handled"
    );
    Ok(Json(reply))
}

pub async fn explain(
    State(state): State<ChatState>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<DecisionExplanation>, ApiError> {
    validate(&body)?;

    state
        .runtime
        .explain_decision(body.user_id.trim(), &body.message, body.conversation_id.as_deref())
        .await
        .map(Json)
        .map_err(|error| {
            let correlation_id = Uuid::new_v4().to_string();
            warn!(
                event_name = "server.explain.failed",
                correlation_id = %correlation_id,
                error_class = error.error_class(),
                error = %error,
                "decision could not be explained"
            );
            reject(InterfaceError::ServiceUnavailable {
                message: EXPLAIN_UNAVAILABLE.to_string(),
                correlation_id,
            })
        })
}

fn validate(body: &MessageRequest) -> Result<(), ApiError> {
    let problem = if body.user_id.trim().is_empty() {
        Some("user_id is required")
    } else if body.message.trim().is_empty() {
        Some("message is required")
    } else if body.message.chars().count() > MAX_MESSAGE_CHARS {
        Some("message is too long")
    } else {
        None
    };

    match problem {
        Some(message) => Err(reject(InterfaceError::BadRequest {
            message: message.to_string(),
            correlation_id: Uuid::new_v4().to_string(),
        })),
        None => Ok(()),
    }
}

fn reject(error: InterfaceError) -> ApiError {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let detail = match &error {
        InterfaceError::BadRequest { message, .. }
        | InterfaceError::NotFound { message, .. }
        | InterfaceError::ServiceUnavailable { message, .. }
        | InterfaceError::Internal { message, .. } => message.clone(),
    };

    (
        status,
        Json(ErrorBody {
            error: error.user_message(),
            detail,
            correlation_id: error.correlation_id().to_string(),
        }),
    )
}
