use crate::error::GatewayError;
use crate::logging::SharedLogger;
use crate::proxy::{Completion, Gateway};

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/models", get(handle_models))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state
        .gateway
        .handle_chat_completion(&body, authorization(&headers))
        .await
    {
        Ok(Completion::Json(resp)) => Json(resp).into_response(),
        Ok(Completion::Stream(frames)) => {
            let events = frames.map(|frame| Ok::<_, Infallible>(Event::default().data(frame.data())));
            Sse::new(events).keep_alive(KeepAlive::default()).into_response()
        }
        Err(e) => rejected(&state, e),
    }
}

async fn handle_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match state.gateway.admit(authorization(&headers)) {
        Ok(_) => Json(state.gateway.list_models()).into_response(),
        Err(e) => rejected(&state, e),
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "configured": state.gateway.is_configured(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn rejected(state: &AppState, error: GatewayError) -> Response {
    match error {
        GatewayError::MissingApiKey | GatewayError::InvalidApiKey | GatewayError::NotConfigured => {
            tracing::debug!(%error, "Rejected request");
        }
        _ => {
            tracing::warn!(status = error.status().as_u16(), %error, "Request failed");
            state.logger.error("server", format!("{} {}", error.status(), error));
        }
    }
    error.into_response()
}
