//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/assistants/{assistant}/sessions/{session_id}/turns`: submit a turn, get an SSE stream
//! - `GET  /v1/assistants`                   : Configured assistants and their tools
//! - `GET  /v1/tools`                        : Every registered tool
//! - `GET  /v1/sessions`                     : The caller's sessions
//! - `GET  /v1/sessions/{session_id}/messages`: One session's persisted log
//!
//! Tenant and user are resolved upstream and arrive as `X-Tenant-Id` and
//! `X-User-Id` headers.

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use deskpilot_agent::TurnError;
use deskpilot_core::error::StoreError;
use deskpilot_core::message::{Message, SessionKey, SessionSummary};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::SharedState;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/assistants/{assistant}/sessions/{session_id}/turns",
            post(submit_turn_handler),
        )
        .route("/assistants", get(list_assistants_handler))
        .route("/tools", get(list_tools_handler))
        .route("/sessions", get(list_sessions_handler))
        .route("/sessions/{session_id}/messages", get(session_messages_handler))
        .with_state(state)
}

// ── Errors ────────────────────────────────────────────────────────────────

/// The single structured error a caller receives instead of a stream.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            status: self.status.as_u16(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<TurnError> for ApiError {
    fn from(e: TurnError) -> Self {
        let status =
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        warn!(error = %e, "Message store request failed");
        Self::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    }
}

/// Tenant and user of the caller, from the upstream-resolved headers.
fn caller(headers: &HeaderMap) -> Result<(String, String), ApiError> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, format!("Missing {name} header")))
    };
    Ok((read(TENANT_HEADER)?, read(USER_HEADER)?))
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct TurnRequest {
    message: String,
}

#[derive(Serialize, Deserialize)]
pub struct AssistantDto {
    pub name: String,
    pub tools: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub struct AssistantListResponse {
    pub assistants: Vec<AssistantDto>,
}

#[derive(Serialize, Deserialize)]
pub struct ToolDto {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolDto>,
    pub count: usize,
}

#[derive(Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub count: usize,
}

#[derive(Serialize, Deserialize)]
pub struct SessionMessagesResponse {
    pub session: SessionSummary,
    pub messages: Vec<Message>,
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /v1/assistants/{assistant}/sessions/{session_id}/turns`
///
/// The engine runs to completion before the response starts, so every
/// failure is a plain JSON error. Once streaming, the body is `chunk`
/// events followed by one `done`. A client disconnect drops the stream and
/// stops the relay; entries already in the log stay.
async fn submit_turn_handler(
    State(state): State<SharedState>,
    Path((assistant, session_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(payload): Json<TurnRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let (tenant_id, user_id) = caller(&headers)?;
    let key = SessionKey::new(tenant_id, user_id, session_id);
    info!(session = %key, assistant = %assistant, "v1 turn request");

    let reply = state
        .service
        .submit_turn(&assistant, &key, &payload.message)
        .await?;

    let stream = reply.events.map(|event| {
        Ok(SseEvent::default()
            .event(event.event_type())
            .data(event.payload().to_string()))
    });
    Ok(Sse::new(stream))
}

async fn list_assistants_handler(State(state): State<SharedState>) -> Json<AssistantListResponse> {
    Json(AssistantListResponse {
        assistants: state
            .service
            .assistants()
            .map(|profile| AssistantDto {
                name: profile.name.clone(),
                tools: profile.tools.names().into_iter().map(String::from).collect(),
            })
            .collect(),
    })
}

async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let defs = state.tools.definitions();
    let count = defs.len();

    Json(ToolListResponse {
        tools: defs
            .into_iter()
            .map(|d| ToolDto {
                name: d.name,
                description: d.description,
                parameters: d.parameters,
            })
            .collect(),
        count,
    })
}

async fn list_sessions_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<SessionListResponse>, ApiError> {
    let (tenant_id, user_id) = caller(&headers)?;
    let sessions = state.service.sessions(&tenant_id, &user_id).await?;
    Ok(Json(SessionListResponse {
        count: sessions.len(),
        sessions,
    }))
}

async fn session_messages_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SessionMessagesResponse>, ApiError> {
    let (tenant_id, user_id) = caller(&headers)?;
    let key = SessionKey::new(tenant_id, user_id, session_id);

    let session = state
        .service
        .store()
        .session(&key)
        .await?
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                format!("Session not found: {}", key.session_id),
            )
        })?;
    let messages = state.service.history(&key).await?;

    Ok(Json(SessionMessagesResponse { session, messages }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GatewayState, state_from_parts};
    use axum::body::Body;
    use axum::http::Request;
    use deskpilot_config::AppConfig;
    use deskpilot_core::error::ProviderError;
    use deskpilot_core::message::MessageToolCall;
    use deskpilot_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use deskpilot_tools::{InMemoryRecordSource, LookupSettings};
    use http_body_util::BodyExt;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tower::ServiceExt;

    /// Replays queued responses; errors once the queue runs dry.
    struct QueueProvider {
        replies: Mutex<VecDeque<Result<Message, u16>>>,
    }

    impl QueueProvider {
        fn new(replies: Vec<Result<Message, u16>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Provider for QueueProvider {
        fn name(&self) -> &str {
            "queue"
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(message)) => Ok(ProviderResponse {
                    message,
                    usage: None,
                    model: request.model,
                }),
                Some(Err(status_code)) => Err(scripted_failure(status_code)),
                None => Err(scripted_failure(500)),
            }
        }
    }

    fn scripted_failure(status_code: u16) -> ProviderError {
        ProviderError::ApiError {
            status_code,
            message: "scripted failure".into(),
        }
    }

    async fn app(provider: Arc<QueueProvider>) -> (Router, Arc<GatewayState>) {
        let config = AppConfig::default();
        let provider: Arc<dyn Provider> = provider;
        let tools = deskpilot_tools::default_registry(
            Arc::new(InMemoryRecordSource::with_demo_data().await),
            LookupSettings {
                provider: provider.clone(),
                model: "lookup-model".into(),
                timeout: Duration::from_secs(5),
            },
        );
        let state = Arc::new(state_from_parts(
            &config,
            provider,
            Arc::new(deskpilot_store::InMemoryStore::new()),
            tools,
        ));
        (v1_router(state.clone()), state)
    }

    fn turn_request(assistant: &str, session: &str, message: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/assistants/{assistant}/sessions/{session}/turns"))
            .header("content-type", "application/json")
            .header("X-Tenant-Id", "demo")
            .header("X-User-Id", "alice")
            .body(Body::from(
                serde_json::json!({ "message": message }).to_string(),
            ))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8_lossy(&body).into_owned()
    }

    /// Concatenate the `content` of every chunk event in an SSE body.
    fn chunk_text(sse: &str) -> String {
        sse.split("\n\n")
            .filter(|frame| frame.contains("event: chunk"))
            .filter_map(|frame| frame.lines().find_map(|l| l.strip_prefix("data: ")))
            .map(|data| {
                let value: serde_json::Value = serde_json::from_str(data).unwrap();
                value["content"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn turn_streams_chunks_then_done() {
        let answer = "Two VIP customers: Northwind Traders and Kestrel Logistics.";
        let provider = QueueProvider::new(vec![
            Ok(Message::assistant_tool_request(
                "",
                vec![MessageToolCall {
                    id: "call_1".into(),
                    name: "search_records".into(),
                    arguments: r#"{"tag":"vip"}"#.into(),
                }],
            )),
            Ok(Message::assistant(answer)),
        ]);
        let (app, _) = app(provider).await;

        let response = app
            .oneshot(turn_request("ops", "s1", "List VIP customers"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        assert!(content_type.contains("text/event-stream"));

        let text = body_text(response).await;
        assert_eq!(chunk_text(&text), answer);
        assert_eq!(text.matches("event: done").count(), 1);
        assert!(text.trim_end().ends_with("data: {}"));
    }

    #[tokio::test]
    async fn missing_tenant_header_is_bad_request() {
        let (app, _) = app(QueueProvider::new(vec![])).await;
        let req = Request::builder()
            .method("POST")
            .uri("/assistants/ops/sessions/s1/turns")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"message":"hi"}"#))
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_assistant_is_not_found() {
        let (app, _) = app(QueueProvider::new(vec![])).await;
        let response = app
            .oneshot(turn_request("billing", "s1", "hi"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let error: ErrorResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(error.status, 404);
        assert!(error.error.contains("billing"));
    }

    #[tokio::test]
    async fn empty_message_is_bad_request() {
        let (app, _) = app(QueueProvider::new(vec![])).await;
        let response = app.oneshot(turn_request("ops", "s1", "  ")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn service_failure_is_one_json_error() {
        let (app, _) = app(QueueProvider::new(vec![Err(500), Err(500)])).await;
        let response = app.oneshot(turn_request("ops", "s1", "hi")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let text = body_text(response).await;
        assert!(!text.contains("event:"));
        let error: ErrorResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(error.status, 502);
    }

    #[tokio::test]
    async fn sessions_and_history_after_a_turn() {
        let provider = QueueProvider::new(vec![Ok(Message::assistant("Hello!"))]);
        let (app, _) = app(provider).await;

        let response = app
            .clone()
            .oneshot(turn_request("support", "chat-9", "Where is my order?"))
            .await
            .unwrap();
        body_text(response).await;

        let req = Request::builder()
            .uri("/sessions")
            .header("X-Tenant-Id", "demo")
            .header("X-User-Id", "alice")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let list: SessionListResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(list.count, 1);
        assert_eq!(list.sessions[0].title.as_deref(), Some("Where is my order?"));

        let req = Request::builder()
            .uri("/sessions/chat-9/messages")
            .header("X-Tenant-Id", "demo")
            .header("X-User-Id", "alice")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        let detail: SessionMessagesResponse =
            serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(detail.messages.len(), 2);
        assert_eq!(detail.messages[1].content, "Hello!");

        // Another user in the same tenant sees nothing.
        let req = Request::builder()
            .uri("/sessions/chat-9/messages")
            .header("X-Tenant-Id", "demo")
            .header("X-User-Id", "bob")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn catalogue_endpoints() {
        let (app, _) = app(QueueProvider::new(vec![])).await;

        let req = Request::builder().uri("/tools").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        let list: ToolListResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(list.count, 4);
        assert!(list.tools.iter().any(|t| t.name == "web_lookup"));

        let req = Request::builder()
            .uri("/assistants")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        let list: AssistantListResponse =
            serde_json::from_str(&body_text(response).await).unwrap();
        let support = list
            .assistants
            .iter()
            .find(|a| a.name == "support")
            .unwrap();
        assert!(!support.tools.contains(&"update_record".to_string()));
    }
}
