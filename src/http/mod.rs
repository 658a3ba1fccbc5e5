pub mod agendas;
pub mod appointments;
pub mod booking;
pub mod clients;
pub mod dto;
pub mod error;
pub mod events;

pub use error::{ApiError, ApiResult};

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, FromRequestParts, MatchedPath, Request};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::audit::AuditSink;
use crate::auth::{AuthError, TokenInfo, TokenValidator, bearer_token};
use crate::engine::Engine;
use crate::limits::MAX_BODY_BYTES;

/// Shared handles every handler needs.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub validator: Arc<dyn TokenValidator>,
    pub audit: Arc<dyn AuditSink>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/v1/public/appointments",
            post(booking::create_public_appointment).options(preflight),
        )
        .route("/v1/agendas", post(agendas::create).get(agendas::list))
        .route(
            "/v1/agendas/:id",
            get(agendas::get_one)
                .put(agendas::update)
                .delete(agendas::delete),
        )
        .route("/v1/agendas/:id/slots", get(agendas::slots))
        .route("/v1/clients", post(clients::create).get(clients::list))
        .route("/v1/events", get(events::stream))
        .route(
            "/v1/appointments",
            post(appointments::create).get(appointments::list),
        )
        .route(
            "/v1/appointments/:id",
            get(appointments::get_one)
                .patch(appointments::update)
                .delete(appointments::delete),
        )
        .layer(middleware::from_fn(track_metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "agendad" }))
}

/// Plain `OPTIONS` without CORS request headers; real pre-flights are
/// answered by the CORS layer.
async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let method = req.method().to_string();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        crate::observability::HTTP_REQUESTS_TOTAL,
        "route" => route.clone(),
        "method" => method.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        crate::observability::HTTP_REQUEST_DURATION_SECONDS,
        "route" => route,
        "method" => method
    )
    .record(started.elapsed().as_secs_f64());
    response
}

/// Validate the bearer credential of a request.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> ApiResult<TokenInfo> {
    let result = match bearer_token(headers) {
        Ok(token) => state.validator.validate(token).await,
        Err(e) => Err(e),
    };
    result.map_err(|e| {
        let reason = match &e {
            AuthError::Missing => "missing",
            AuthError::Invalid => "invalid",
            AuthError::Upstream(_) | AuthError::Config(_) => "upstream",
        };
        metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL, "reason" => reason)
            .increment(1);
        tracing::debug!(reason, "bearer authentication failed");
        ApiError::from(e)
    })
}

/// Bearer-authenticated caller of a management route.
pub struct Authenticated(pub TokenInfo);

impl Authenticated {
    pub fn organization_id(&self) -> ulid::Ulid {
        self.0.organization_id
    }

    pub fn require_read(&self) -> ApiResult<()> {
        if self.0.can_read() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("token lacks read:appointments".into()))
        }
    }

    pub fn require_write(&self) -> ApiResult<()> {
        if self.0.can_write() {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "token lacks write:appointments or admin:all".into(),
            ))
        }
    }
}

#[async_trait::async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(state, &parts.headers).await.map(Authenticated)
    }
}

/// `{ "data": ... }` with the given status.
pub fn data<T: serde::Serialize>(status: StatusCode, value: T) -> Response {
    (status, Json(json!({ "data": value }))).into_response()
}
