use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;

use crate::model::NewClient;

use super::dto::{ClientQuery, ClientView, CreateClientBody};
use super::{ApiError, ApiResult, AppState, Authenticated, data};

pub async fn create(
    State(state): State<AppState>,
    auth: Authenticated,
    body: Result<Json<CreateClientBody>, JsonRejection>,
) -> ApiResult<Response> {
    auth.require_write()?;
    let Json(body) = body?;
    let client = state
        .engine
        .create_client(NewClient {
            organization_id: auth.organization_id(),
            name: body.name,
            phone: body.phone,
            email: body.email,
            cpf: body.cpf,
            city: body.city,
        })
        .await?;
    Ok(data(StatusCode::CREATED, ClientView::from(&client)))
}

/// `GET /v1/clients` lists the organization; `?phone=` looks one up.
pub async fn list(
    State(state): State<AppState>,
    auth: Authenticated,
    query: Result<Query<ClientQuery>, QueryRejection>,
) -> ApiResult<Response> {
    auth.require_read()?;
    let Query(query) = query?;
    let org = auth.organization_id();
    match query.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(phone) => {
            let client = state
                .engine
                .find_client_by_phone(org, phone)
                .ok_or_else(|| ApiError::NotFound("client not found".into()))?;
            Ok(data(StatusCode::OK, ClientView::from(&client)))
        }
        None => {
            let clients: Vec<ClientView> = state
                .engine
                .list_clients(org)
                .iter()
                .map(ClientView::from)
                .collect();
            Ok(data(StatusCode::OK, clients))
        }
    }
}
