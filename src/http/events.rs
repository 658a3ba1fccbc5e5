use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::Stream;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use crate::model::Event;

use super::dto::{AgendaView, AppointmentView, ClientView};
use super::{ApiResult, AppState, Authenticated};

/// `GET /v1/events`: server-sent change events of the caller's organization,
/// for clients that cache listings.
pub async fn stream(
    State(state): State<AppState>,
    auth: Authenticated,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    auth.require_read()?;
    let organization_id = auth.organization_id();
    let rx = state.engine.notify.subscribe(organization_id);
    tracing::debug!(%organization_id, "event stream opened");

    let events = futures::stream::unfold(rx, |mut rx| async move {
        let sse = match rx.recv().await {
            Ok(event) => to_sse(&event),
            // The subscriber fell behind; it should refetch everything.
            Err(RecvError::Lagged(missed)) => SseEvent::default()
                .event("lagged")
                .data(json!({ "missed": missed }).to_string()),
            Err(RecvError::Closed) => return None,
        };
        Some((Ok(sse), rx))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &Event) -> SseEvent {
    let (name, data) = match event {
        Event::AgendaCreated { agenda } => ("agenda_created", json!(AgendaView::from(agenda))),
        Event::AgendaUpdated { agenda } => ("agenda_updated", json!(AgendaView::from(agenda))),
        Event::AgendaDeleted { id } => ("agenda_deleted", json!({ "id": id })),
        Event::ClientCreated { client } => ("client_created", json!(ClientView::from(client))),
        Event::AppointmentCreated { appointment } => (
            "appointment_created",
            json!(AppointmentView::from(appointment)),
        ),
        Event::AppointmentUpdated { appointment } => (
            "appointment_updated",
            json!(AppointmentView::from(appointment)),
        ),
        Event::AppointmentDeleted { id, user_id } => (
            "appointment_deleted",
            json!({ "id": id, "user_id": user_id }),
        ),
    };
    SseEvent::default().event(name).data(data.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn deletes_carry_only_ids() {
        let id = Ulid::new();
        let rendered = format!(
            "{:?}",
            to_sse(&Event::AppointmentDeleted {
                id,
                user_id: Ulid::nil()
            })
        );
        assert!(rendered.contains("appointment_deleted"));
        assert!(rendered.contains(&id.to_string()));
    }
}
