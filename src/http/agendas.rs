use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use ulid::Ulid;

use crate::model::{Agenda, AgendaSettings};

use super::dto::{AgendaView, CreateAgendaBody, SlotView, SlotsQuery};
use super::{ApiError, ApiResult, AppState, Authenticated, data};

/// Agenda `id`, if it belongs to the caller's organization.
fn owned_agenda(state: &AppState, auth: &Authenticated, id: Ulid) -> ApiResult<Agenda> {
    state
        .engine
        .get_agenda(&id)
        .filter(|a| a.organization_id == auth.organization_id())
        .ok_or_else(|| ApiError::NotFound("agenda not found".into()))
}

pub async fn create(
    State(state): State<AppState>,
    auth: Authenticated,
    body: Result<Json<CreateAgendaBody>, JsonRejection>,
) -> ApiResult<Response> {
    auth.require_write()?;
    let Json(body) = body?;
    let agenda = state
        .engine
        .create_agenda(body.user_id, auth.organization_id(), body.settings)
        .await?;
    Ok(data(StatusCode::CREATED, AgendaView::from(&agenda)))
}

pub async fn list(State(state): State<AppState>, auth: Authenticated) -> ApiResult<Response> {
    auth.require_read()?;
    let agendas: Vec<AgendaView> = state
        .engine
        .list_agendas(auth.organization_id())
        .iter()
        .map(AgendaView::from)
        .collect();
    Ok(data(StatusCode::OK, agendas))
}

pub async fn get_one(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<Ulid>,
) -> ApiResult<Response> {
    auth.require_read()?;
    let agenda = owned_agenda(&state, &auth, id)?;
    Ok(data(StatusCode::OK, AgendaView::from(&agenda)))
}

pub async fn update(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<Ulid>,
    body: Result<Json<AgendaSettings>, JsonRejection>,
) -> ApiResult<Response> {
    auth.require_write()?;
    let Json(settings) = body?;
    owned_agenda(&state, &auth, id)?;
    let agenda = state.engine.update_agenda(id, settings).await?;
    Ok(data(StatusCode::OK, AgendaView::from(&agenda)))
}

pub async fn delete(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<Ulid>,
) -> ApiResult<StatusCode> {
    auth.require_write()?;
    owned_agenda(&state, &auth, id)?;
    state.engine.delete_agenda(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v1/agendas/:id/slots?date=YYYY-MM-DD`
pub async fn slots(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<Ulid>,
    query: Result<Query<SlotsQuery>, QueryRejection>,
) -> ApiResult<Response> {
    auth.require_read()?;
    let Query(query) = query?;
    let date = query.date()?;
    owned_agenda(&state, &auth, id)?;
    let slots: Vec<SlotView> = state
        .engine
        .available_slots(id, date)
        .await?
        .iter()
        .map(SlotView::from)
        .collect();
    Ok(data(StatusCode::OK, slots))
}
