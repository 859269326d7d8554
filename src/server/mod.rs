//! HTTP surface: one handler per route, each with a default mode.

mod handlers;

use crate::ai::Dispatcher;
use crate::config::Config;
use crate::models::Mode;
use crate::{Error, Result};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{body::Bytes, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Base64 images travel inline, so allow bodies well above axum's 2 MB default.
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Advertised methods, written out instead of tower-http's comma-only join.
const ALLOW_METHODS: &str = "POST, GET, OPTIONS";

/// Route table: path and the mode used when the body names none.
pub const ROUTES: [(&str, Mode); 6] = [
    ("/", Mode::Preset),
    ("/api/gpt", Mode::Preset),
    ("/api/raw", Mode::Raw),
    ("/api/translate", Mode::TranslateKo),
    ("/api/vision", Mode::VisionFirefly),
    ("/api/firefly", Mode::Firefly),
];

/// Read-only state shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// `None` when the provider credential is missing; POSTs then fail with 500.
    pub dispatcher: Option<Arc<Dispatcher>>,
}

impl AppState {
    pub fn new(config: Config, dispatcher: Option<Dispatcher>) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher: dispatcher.map(Arc::new),
        }
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let dispatcher = Dispatcher::from_config(&config)?;
        if dispatcher.is_none() {
            tracing::warn!(
                "{} is not set; proxied requests will fail until it is configured",
                config.provider.key_name()
            );
        }
        Ok(Self::new(config, dispatcher))
    }
}

/// Error reply rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidRequest(message) => Self::bad_request(message),
            Error::Upstream(message) => Self::new(StatusCode::BAD_GATEWAY, message),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new();

    for (path, mode) in ROUTES {
        router = router.route(
            path,
            any(
                move |State(state): State<AppState>,
                      method: Method,
                      headers: HeaderMap,
                      body: Bytes| async move {
                    handle(state, path, mode, method, headers, body).await
                },
            ),
        );
    }

    router
        .fallback(|| async { ApiError::new(StatusCode::NOT_FOUND, "Not found") })
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        ))
        .with_state(state)
}

async fn handle(
    state: AppState,
    route: &'static str,
    default_mode: Mode,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match method {
        Method::GET => Json(json!({
            "ok": true,
            "route": route,
            "mode": default_mode,
            "modes": Mode::ALL,
            "provider": state.config.provider.name(),
            "model": state.config.default_model,
        }))
        .into_response(),
        // Preflights are answered by the CORS layer; this covers direct calls.
        Method::OPTIONS => StatusCode::OK.into_response(),
        Method::POST => match handlers::proxy(&state, route, default_mode, &headers, &body).await {
            Ok(response) => response,
            Err(err) => err.into_response(),
        },
        _ => ApiError::new(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response(),
    }
}
