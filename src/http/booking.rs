use std::net::SocketAddr;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use ulid::Ulid;

use crate::audit::{RequestLog, truncate_body};
use crate::auth::TokenInfo;
use crate::engine::BookingRequest;
use crate::limits::MAX_BODY_BYTES;
use crate::model::now_ms;

use super::dto::{AppointmentView, PublicBookingBody};
use super::{ApiError, ApiResult, AppState, authenticate};

pub const PUBLIC_APPOINTMENTS_PATH: &str = "/v1/public/appointments";

/// `POST /v1/public/appointments`.
///
/// Runs authentication, scope check, validation and the atomic booking, then
/// writes one request-log row whatever the outcome. A failing audit write is
/// logged and never changes the response. The body is read here rather than
/// by an extractor so an oversized one is still answered and logged.
pub async fn create_public_appointment(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let started = Instant::now();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            tracing::debug!("public booking body rejected: {e}");
            Err(ApiError::validation(format!(
                "request body is unreadable or larger than {MAX_BODY_BYTES} bytes"
            )))
        }
    };
    let mut caller: Option<TokenInfo> = None;
    let outcome = book(&state, &headers, &body, &mut caller).await;
    let body = body.unwrap_or_default();

    let (status, response_body, error_message) = match &outcome {
        Ok(view) => (
            StatusCode::CREATED,
            serde_json::to_string(&serde_json::json!({ "data": view })).ok(),
            None,
        ),
        Err(e) => (e.status(), None, Some(e.to_string())),
    };

    let entry = RequestLog {
        id: Ulid::new(),
        token_id: caller.as_ref().map(|c| c.token_id.clone()),
        organization_id: caller.as_ref().map(|c| c.organization_id),
        endpoint: PUBLIC_APPOINTMENTS_PATH.into(),
        method: "POST".into(),
        status_code: status.as_u16(),
        ip_address: client_ip(&headers, connect.as_ref().map(|c| c.0)),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        request_body: (!body.is_empty()).then(|| truncate_body(&String::from_utf8_lossy(&body))),
        response_body: response_body.as_deref().map(truncate_body),
        error_message,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        created_at: now_ms(),
    };
    if let Err(e) = state.audit.record(&entry).await {
        metrics::counter!(crate::observability::AUDIT_FAILURES_TOTAL).increment(1);
        tracing::warn!(request_id = %entry.id, "failed to write request log: {e}");
    }

    match outcome {
        Ok(view) => super::data(StatusCode::CREATED, view),
        Err(e) => e.into_response(),
    }
}

async fn book(
    state: &AppState,
    headers: &HeaderMap,
    body: &ApiResult<Bytes>,
    caller: &mut Option<TokenInfo>,
) -> ApiResult<AppointmentView> {
    let token = authenticate(state, headers).await?;
    let token = caller.insert(token);
    if !token.can_write() {
        return Err(ApiError::Forbidden(
            "token lacks write:appointments or admin:all".into(),
        ));
    }

    let body = match body {
        Ok(bytes) => bytes,
        Err(e) => return Err(ApiError::validation(e.to_string())),
    };
    if body.is_empty() {
        return Err(ApiError::validation("request body is required"));
    }
    let parsed: PublicBookingBody = serde_json::from_slice(body)
        .map_err(|e| ApiError::validation(format!("invalid JSON body: {e}")))?;
    let valid = parsed.validate()?;

    let appointment = state
        .engine
        .book_public(
            token.organization_id,
            BookingRequest {
                agenda_id: valid.agenda_id,
                span: valid.span,
                client_phone: valid.client_phone,
                client_name: valid.client_name,
                client_email: valid.client_email,
                title: valid.title,
                description: valid.description,
            },
        )
        .await
        .map_err(|e| match e {
            crate::engine::EngineError::NotFound(_) => ApiError::NotFound("agenda not found".into()),
            other => ApiError::from(other),
        })?;
    Ok(AppointmentView::from(&appointment))
}

/// First hop of `X-Forwarded-For`, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_owned())
        .filter(|ip| !ip.is_empty())
        .or_else(|| peer.map(|p| p.ip().to_string()))
}
