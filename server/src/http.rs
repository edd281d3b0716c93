//! Route handlers and wire types.

use crate::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use council_application::engine::EventSubscriber;
use council_application::ports::context_source::ContextSelectors;
use council_application::StartRequest;
use council_domain::{CompanyId, ConversationId, Question, SessionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

/// Header a reattaching client sends to resume after its last received
/// sequence number.
pub const LAST_EVENT_SEQ: &str = "last-event-seq";

const NDJSON: &str = "application/x-ndjson";

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .route("/v1/sessions", post(start_session))
        .route("/v1/sessions/{id}/stop", post(stop_session))
        .route("/v1/sessions/{id}/events", get(attach_session))
        .layer(cors)
        .with_state(state)
}

/// Inbound `startSession` request body.
#[derive(Debug, Deserialize)]
pub struct StartSessionInput {
    pub user_id: String,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub question: String,
    #[serde(default)]
    pub attachment_ids: Vec<String>,
    #[serde(default)]
    pub department_ids: Vec<String>,
    #[serde(default)]
    pub role_ids: Vec<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub playbook_ids: Vec<String>,
    #[serde(default)]
    pub decision_ids: Vec<String>,
    /// BYOK gateway key; overrides the platform key when present.
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    code: &'static str,
    message: String,
}

impl StartSessionInput {
    /// Validate and lower into the engine's start request.
    pub fn into_start_request(self) -> Result<StartRequest, String> {
        let question = Question::try_new(self.question)
            .ok_or_else(|| "question must not be empty".to_string())?;
        Ok(StartRequest {
            user: UserId::new(self.user_id),
            company: self.company_id.map(CompanyId::new),
            conversation: self.conversation_id.map(ConversationId::new),
            question,
            attachments: self.attachment_ids,
            selectors: ContextSelectors {
                departments: self.department_ids,
                roles: self.role_ids,
                project: self.project_id,
                playbooks: self.playbook_ids,
                prior_decisions: self.decision_ids,
            },
            api_key: self.api_key,
        })
    }
}

/// Parse the resume header; absent or malformed means "from live".
pub fn parse_last_seq(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(LAST_EVENT_SEQ)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn ndjson_stream(mut subscriber: EventSubscriber, session_id: Option<String>) -> Response {
    let stream = async_stream::stream! {
        while let Some(envelope) = subscriber.recv().await {
            if let Ok(mut line) = serde_json::to_string(&envelope) {
                line.push('\n');
                yield Ok::<_, Infallible>(line);
            }
        }
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, NDJSON);
    if let Some(id) = session_id {
        builder = builder.header("x-session-id", id);
    }
    builder
        .body(Body::from_stream(stream))
        .expect("static response parts are valid")
}

async fn start_session(
    State(state): State<AppState>,
    Json(input): Json<StartSessionInput>,
) -> Response {
    let request = match input.into_start_request() {
        Ok(request) => request,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiError {
                    code: "bad_request",
                    message,
                }),
            )
                .into_response();
        }
    };

    let handle = state.orchestrator.start(request);
    debug!(session = %handle.session_id, "session stream opened");
    ndjson_stream(handle.events, Some(handle.session_id.to_string()))
}

async fn stop_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session_id = SessionId::new(id);
    if state.orchestrator.stop(&session_id) {
        StatusCode::ACCEPTED.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiError {
                code: "not_running",
                message: format!("session {} is not running", session_id),
            }),
        )
            .into_response()
    }
}

/// Reattach to a session's event stream. Live sessions resume from
/// `Last-Event-Seq`; terminated sessions yield their final record once.
async fn attach_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let session_id = SessionId::new(id);
    let last_seq = parse_last_seq(&headers);

    if let Some(subscriber) = state.orchestrator.attach(&session_id, last_seq) {
        return ndjson_stream(subscriber, None);
    }

    match state.store.load_message(&session_id).await {
        Ok(Some(record)) => {
            let line = json!({ "type": "final_record", "payload": record });
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, NDJSON)],
                format!("{line}\n"),
            )
                .into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiError {
                code: "unknown_session",
                message: format!("session {} not found", session_id),
            }),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                code: "store_error",
                message: err.to_string(),
            }),
        )
            .into_response(),
    }
}
