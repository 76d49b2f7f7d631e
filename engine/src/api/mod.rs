//! HTTP surface
//!
//! # Endpoints
//!
//! - POST /chat - Run (sync) or submit (async) a turn
//! - GET /conversations - Twenty most recently updated conversations
//! - GET /conversation/:id - Full stored conversation
//! - GET / - Liveness check
//!
//! Errors are reported as `{"error": <hint>}`. The hint never carries the
//! underlying cause, which is logged instead.

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sdk::errors::{OrchestratorError, OrchestratorErrorExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{ChatMode, ServerConfig};
use crate::executor::TurnExecutor;
use crate::runner::AsyncTurnRunner;
use crate::store::ConversationStore;

/// Listing size for `GET /conversations`
const RECENT_CONVERSATIONS: usize = 20;

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<TurnExecutor>,
    pub runner: AsyncTurnRunner,
    pub store: Arc<dyn ConversationStore>,
    pub mode: ChatMode,
}

impl AppState {
    pub fn new(executor: Arc<TurnExecutor>, mode: ChatMode) -> Self {
        Self {
            store: Arc::clone(executor.store()),
            runner: AsyncTurnRunner::new(Arc::clone(&executor)),
            executor,
            mode,
        }
    }
}

/// `POST /chat` body
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Synchronous `POST /chat` answer
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<sdk::types::Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_file: Option<String>,
    pub conversation_id: String,
}

/// Error rendered as `{"error": hint}`
#[derive(Debug)]
pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrchestratorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {:?}", self.0);
        }

        (status, Json(json!({ "error": self.0.user_hint() }))).into_response()
    }
}

/// Build the router with CORS and request tracing
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/chat", post(chat_handler))
        .route("/conversations", get(conversations_handler))
        .route("/conversation/:id", get(conversation_handler))
        .with_state(state)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

/// Bind `host:port` and serve until Ctrl-C
pub async fn serve(config: &ServerConfig, state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(
        mode = ?state.mode,
        "Orchestrator listening on http://{}",
        listener.local_addr().context("Failed to get local address")?
    );

    let app = router(state, &config.cors_origins);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await
        .context("Server error")?;

    Ok(())
}

async fn index_handler() -> &'static str {
    "OK"
}

async fn chat_handler(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = body
        .ok()
        .and_then(|Json(request)| request.message.map(|m| (m, request.conversation_id)));

    let Some((message, conversation_id)) = request else {
        return Err(OrchestratorError::InvalidRequest("'message' key is required".to_string()).into());
    };

    tracing::info!("Received user message: {:?}", message);

    match state.mode {
        ChatMode::Async => {
            let receipt = state
                .runner
                .submit(conversation_id.as_deref(), &message)
                .await?;

            Ok((
                StatusCode::ACCEPTED,
                Json(json!({
                    "status": "processing",
                    "conversation_id": receipt.conversation_id,
                })),
            )
                .into_response())
        }
        ChatMode::Sync => {
            let result = state
                .executor
                .execute_turn(conversation_id.as_deref(), &message)
                .await?;

            Ok(Json(ChatResponse {
                reply: result.payload.reply,
                plan: result.payload.plan,
                code_file: result.payload.code_file,
                conversation_id: result.conversation_id,
            })
            .into_response())
        }
    }
}

async fn conversations_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let recent = state.store.list_recent(RECENT_CONVERSATIONS).await?;
    Ok(Json(recent).into_response())
}

async fn conversation_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let conversation = state.store.load(&id).await?;
    Ok(Json(conversation).into_response())
}
