//! HTTP proxy for the chat widget.
//!
//! Exposes the widget-facing endpoints:
//! - POST /api/chat - validate, sanitize, walk the model chain, reply
//! - OPTIONS /api/chat - CORS preflight
//! - GET /api/health - configuration status
//!
//! Stateless per request: no shared mutable state, no in-memory rate
//! limiting (quota handling is delegated to the upstream API and relayed).
//! Raw upstream detail is logged here and never propagated to clients.

pub mod chain;
pub mod context;
pub mod gemini;
pub mod suggest;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::sanitize::{parse_chat_request, sanitize_text, RequestRejection};
use crate::types::{ChatErrorBody, ChatReply, HistoryItem};

pub use chain::{run_chain, ChainResult, DEFAULT_MODEL_CHAIN};
pub use gemini::{GeminiClient, GenerativeBackend};
pub use suggest::{KeywordSuggester, SuggestionStrategy};

/// Origin granted CORS access when the request's own origin is not allowed.
pub const DEFAULT_ORIGIN: &str = "https://michaelsorrell.com";

/// Reply used when the upstream withholds output on content-policy grounds.
/// Delivered as a normal 200 turn, not an error.
pub const SAFETY_REFUSAL_REPLY: &str =
    "I'd rather not answer that one. Feel free to ask me about Michael's \
professional background instead.";

// ============================================================================
// Server State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    /// `None` when no API credential is configured; every chat request then
    /// answers 503 before any upstream call.
    pub backend: Option<Arc<dyn GenerativeBackend>>,
    pub models: Vec<String>,
    pub suggester: Arc<dyn SuggestionStrategy>,
    pub allowed_origins: Vec<String>,
    pub default_origin: String,
}

impl AppState {
    pub fn new(backend: Option<Arc<dyn GenerativeBackend>>) -> Self {
        Self {
            backend,
            models: DEFAULT_MODEL_CHAIN.iter().map(|m| m.to_string()).collect(),
            suggester: Arc::new(KeywordSuggester),
            allowed_origins: Vec::new(),
            default_origin: DEFAULT_ORIGIN.to_string(),
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }
}

// ============================================================================
// Routes
// ============================================================================

/// Create the router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler).options(preflight_handler))
        .route("/api/health", get(health_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            common_headers,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server.
pub async fn run(host: &str, port: u16, state: AppState) -> Result<()> {
    let app = create_router(state);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    info!("chat proxy listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// CORS and caching headers applied to every response, preflight included.
///
/// The request origin is echoed back only when allow-listed or local; any
/// other origin gets the fixed default instead of a grant.
async fn common_headers(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let mut response = next.run(request).await;

    let allow_origin = resolve_allow_origin(origin.as_deref(), &state);
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_str(&allow_origin)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_ORIGIN)),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn resolve_allow_origin(origin: Option<&str>, state: &AppState) -> String {
    match origin {
        Some(origin) if crate::sanitize::origin_allowed(origin, &state.allowed_origins) => {
            origin.to_string()
        }
        _ => state.default_origin.clone(),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn preflight_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "configured": state.backend.is_some(),
        "models": state.models,
    }))
}

async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Request body must be valid JSON"),
    };

    let request = match parse_chat_request(&value) {
        Ok(request) => request,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, rejection.to_string());
        }
    };

    let message = sanitize_text(&request.message);
    if message.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            RequestRejection::EmptyMessage.to_string(),
        );
    }

    let history: Vec<HistoryItem> = request
        .history
        .iter()
        .map(|item| HistoryItem {
            role: item.role,
            content: sanitize_text(&item.content),
        })
        .filter(|item| !item.content.is_empty())
        .collect();

    let Some(backend) = &state.backend else {
        warn!("chat request received but no API credential is configured");
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Chat service is not configured");
    };

    let upstream_request =
        gemini::GenerateRequest::new(context::build_conversation(&message, &history));

    match run_chain(backend.as_ref(), &state.models, &upstream_request).await {
        ChainResult::Reply(reply) => {
            let suggestions = state.suggester.suggest(&reply, &message, &history);
            (
                StatusCode::OK,
                Json(ChatReply { reply, suggestions }),
            )
                .into_response()
        }
        ChainResult::SafetyRefusal => (
            StatusCode::OK,
            Json(ChatReply {
                reply: SAFETY_REFUSAL_REPLY.to_string(),
                suggestions: Vec::new(),
            }),
        )
            .into_response(),
        ChainResult::AuthError => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Chat service authentication failed")
        }
        ChainResult::UpstreamRejected => error_response(
            StatusCode::BAD_GATEWAY,
            "The chat service could not process this request",
        ),
        ChainResult::AllRateLimited {
            retry_after_ms,
            attempted,
        } => envelope_response(
            StatusCode::TOO_MANY_REQUESTS,
            ChatErrorBody {
                error: "Too many requests right now. Please try again shortly.".to_string(),
                retry_after_ms,
                attempted_models: Some(attempted),
            },
        ),
        ChainResult::Exhausted {
            timed_out,
            attempted,
        } => {
            let status = if timed_out {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            envelope_response(
                status,
                ChatErrorBody {
                    error: "The chat service is currently unavailable. Please try again."
                        .to_string(),
                    retry_after_ms: None,
                    attempted_models: Some(attempted),
                },
            )
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    envelope_response(
        status,
        ChatErrorBody {
            error: message.into(),
            ..Default::default()
        },
    )
}

fn envelope_response(status: StatusCode, body: ChatErrorBody) -> Response {
    (status, Json(body)).into_response()
}
