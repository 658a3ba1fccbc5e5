use ulid::Ulid;

use crate::limits::{MAX_PHONE_DIGITS, MAX_TITLE_LEN, MIN_PHONE_DIGITS};
use crate::model::*;

use super::conflict::{check_no_conflict, validate_span};
use super::mutations::ensure_room;
use super::{Engine, EngineError};

const DEFAULT_BOOKING_TITLE: &str = "Agendamento";

/// A validated booking arriving from the public endpoint.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub agenda_id: Ulid,
    pub span: Span,
    pub client_phone: String,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl Engine {
    /// Book on an agenda of `organization_id`.
    ///
    /// The conflict check, client resolution and insert all run under the
    /// agenda owner's schedule lock, so two identical concurrent requests
    /// produce one appointment and one `Conflict`.
    pub async fn book_public(
        &self,
        organization_id: Ulid,
        request: BookingRequest,
    ) -> Result<Appointment, EngineError> {
        validate_span(&request.span)?;
        let title = request
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_BOOKING_TITLE)
            .to_string();
        if title.len() > MAX_TITLE_LEN {
            return Err(EngineError::LimitExceeded("title too long"));
        }
        let phone = normalize_phone(&request.client_phone);
        if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&phone.len()) {
            return Err(EngineError::validation(format!(
                "client_phone must have {MIN_PHONE_DIGITS} to {MAX_PHONE_DIGITS} digits"
            )));
        }

        let agenda = self
            .agendas
            .get(&request.agenda_id)
            .map(|a| a.value().clone())
            .filter(|a| a.organization_id == organization_id)
            .ok_or(EngineError::NotFound(request.agenda_id))?;
        if !agenda.settings.is_active {
            return Err(EngineError::validation("agenda is not accepting bookings"));
        }

        let _gate = self.write_gate.read().await;
        let schedule = self.schedule_for(agenda.user_id);
        let mut guard = schedule.write().await;
        // The agenda may have been deleted or deactivated while we waited.
        let agenda = self
            .agendas
            .get(&agenda.id)
            .map(|a| a.value().clone())
            .filter(|a| a.organization_id == organization_id && a.user_id == agenda.user_id)
            .ok_or(EngineError::NotFound(request.agenda_id))?;
        if !agenda.settings.is_active {
            return Err(EngineError::validation("agenda is not accepting bookings"));
        }
        ensure_room(&guard)?;
        check_no_conflict(&guard, Some(agenda.id), &request.span, None)?;

        let client_id = {
            let _directory = self.directory_write.lock().await;
            let existing = self
                .client_phones
                .get(&(organization_id, phone.clone()))
                .map(|id| *id.value());
            match existing {
                Some(id) => Some(id),
                None => match request.client_name.as_deref().map(str::trim) {
                    Some(name) if !name.is_empty() => {
                        let client = self
                            .insert_client_locked(NewClient {
                                organization_id,
                                name: name.to_string(),
                                phone: phone.clone(),
                                email: request.client_email.clone(),
                                cpf: None,
                                city: None,
                            })
                            .await?;
                        Some(client.id)
                    }
                    _ => None,
                },
            }
        };

        let now = now_ms();
        let appointment = Appointment {
            id: Ulid::new(),
            user_id: agenda.user_id,
            organization_id: Some(organization_id),
            agenda_id: Some(agenda.id),
            title,
            description: request.description,
            span: request.span,
            client_id,
            status: AppointmentStatus::Scheduled,
            appointment_type: None,
            location: None,
            notes: None,
            reminder_sent: false,
            reminder_sent_at: None,
            metadata: serde_json::json!({ "source": "public_api", "client_phone": phone }),
            created_at: now,
            updated_at: now,
        };
        let event = Event::AppointmentCreated {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::APPOINTMENTS_CREATED_TOTAL, "path" => "public")
            .increment(1);
        tracing::info!(
            appointment_id = %appointment.id,
            agenda_id = %agenda.id,
            %organization_id,
            client = ?client_id,
            "public booking created"
        );
        Ok(appointment)
    }
}
