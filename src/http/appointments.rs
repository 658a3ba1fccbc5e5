use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use ulid::Ulid;

use crate::model::Appointment;

use super::dto::{AppointmentQuery, AppointmentView, CreateAppointmentBody, UpdateAppointmentBody};
use super::{ApiError, ApiResult, AppState, Authenticated, data};

/// Appointment `id`, if it belongs to the caller's organization.
async fn owned_appointment(state: &AppState, auth: &Authenticated, id: Ulid) -> ApiResult<Appointment> {
    state
        .engine
        .get_appointment(id)
        .await
        .filter(|a| a.organization_id == Some(auth.organization_id()))
        .ok_or_else(|| ApiError::NotFound("appointment not found".into()))
}

pub async fn create(
    State(state): State<AppState>,
    auth: Authenticated,
    body: Result<Json<CreateAppointmentBody>, JsonRejection>,
) -> ApiResult<Response> {
    auth.require_write()?;
    let Json(body) = body?;
    let org = auth.organization_id();
    if let Some(agenda_id) = body.agenda_id
        && state
            .engine
            .get_agenda(&agenda_id)
            .is_none_or(|a| a.organization_id != org)
    {
        return Err(ApiError::NotFound("agenda not found".into()));
    }
    if let Some(client_id) = body.client_id
        && state
            .engine
            .get_client(&client_id)
            .is_none_or(|c| c.organization_id != org)
    {
        return Err(ApiError::NotFound("client not found".into()));
    }
    let appointment = state.engine.create_appointment(body.into_input(org)?).await?;
    Ok(data(StatusCode::CREATED, AppointmentView::from(&appointment)))
}

pub async fn list(
    State(state): State<AppState>,
    auth: Authenticated,
    query: Result<Query<AppointmentQuery>, QueryRejection>,
) -> ApiResult<Response> {
    auth.require_read()?;
    let Query(query) = query?;
    let filter = query.into_filter(auth.organization_id())?;
    let appointments: Vec<AppointmentView> = state
        .engine
        .list_appointments(&filter)
        .await
        .iter()
        .map(AppointmentView::from)
        .collect();
    Ok(data(StatusCode::OK, appointments))
}

pub async fn get_one(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<Ulid>,
) -> ApiResult<Response> {
    auth.require_read()?;
    let appointment = owned_appointment(&state, &auth, id).await?;
    Ok(data(StatusCode::OK, AppointmentView::from(&appointment)))
}

pub async fn update(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<Ulid>,
    body: Result<Json<UpdateAppointmentBody>, JsonRejection>,
) -> ApiResult<Response> {
    auth.require_write()?;
    let Json(body) = body?;
    owned_appointment(&state, &auth, id).await?;
    if let Some(client_id) = body.client_id
        && state
            .engine
            .get_client(&client_id)
            .is_none_or(|c| c.organization_id != auth.organization_id())
    {
        return Err(ApiError::NotFound("client not found".into()));
    }
    let updated = state.engine.update_appointment(id, body.into_patch()?).await?;
    Ok(data(StatusCode::OK, AppointmentView::from(&updated)))
}

pub async fn delete(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<Ulid>,
) -> ApiResult<StatusCode> {
    auth.require_write()?;
    owned_appointment(&state, &auth, id).await?;
    state.engine.delete_appointment(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
