use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_span};
use super::{Engine, EngineError};

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_opt_len(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    value.map_or(Ok(()), |v| check_len(v, max, what))
}

pub(super) fn validate_agenda_settings(settings: &AgendaSettings) -> Result<(), EngineError> {
    if settings.name.trim().is_empty() {
        return Err(EngineError::validation("agenda name is required"));
    }
    check_len(&settings.name, MAX_NAME_LEN, "agenda name too long")?;
    if !(MIN_SLOT_MINUTES..=MAX_SLOT_MINUTES).contains(&settings.slot_duration_minutes) {
        return Err(EngineError::validation(format!(
            "slot duration must be between {MIN_SLOT_MINUTES} and {MAX_SLOT_MINUTES} minutes"
        )));
    }
    if settings.breaks.len() > MAX_BREAKS_PER_AGENDA {
        return Err(EngineError::LimitExceeded("too many breaks"));
    }
    if settings.utc_offset_minutes.abs() > 14 * 60 {
        return Err(EngineError::validation("utc offset out of range"));
    }
    for day in &settings.working_hours {
        if day.enabled && day.start >= day.end {
            return Err(EngineError::validation(format!(
                "working hours for {} must start before they end",
                day.weekday
            )));
        }
    }
    for b in &settings.breaks {
        if b.start >= b.end {
            return Err(EngineError::validation("break must start before it ends"));
        }
    }
    Ok(())
}

/// Per-owner cap, checked under the owner's write lock.
pub(super) fn ensure_room(schedule: &ScheduleState) -> Result<(), EngineError> {
    if schedule.appointments.len() >= MAX_APPOINTMENTS_PER_OWNER {
        return Err(EngineError::LimitExceeded("too many appointments for user"));
    }
    Ok(())
}

fn validate_new_appointment(input: &NewAppointment) -> Result<Span, EngineError> {
    if input.title.trim().is_empty() {
        return Err(EngineError::validation("title is required"));
    }
    check_len(&input.title, MAX_TITLE_LEN, "title too long")?;
    check_opt_len(input.description.as_deref(), MAX_TEXT_LEN, "description too long")?;
    check_opt_len(input.notes.as_deref(), MAX_TEXT_LEN, "notes too long")?;
    check_opt_len(input.location.as_deref(), MAX_NAME_LEN, "location too long")?;
    check_opt_len(
        input.appointment_type.as_deref(),
        MAX_NAME_LEN,
        "appointment type too long",
    )?;
    let span = Span::checked(input.start, input.end)
        .ok_or_else(|| EngineError::validation("start_time must be before end_time"))?;
    validate_span(&span)?;
    Ok(span)
}

impl Engine {
    // ── Agendas ──────────────────────────────────────────────

    pub async fn create_agenda(
        &self,
        user_id: Ulid,
        organization_id: Ulid,
        settings: AgendaSettings,
    ) -> Result<Agenda, EngineError> {
        validate_agenda_settings(&settings)?;
        let _gate = self.write_gate.read().await;
        // The owner's schedule lock orders this against appointment writes
        // that bind the same user to an organization.
        let schedule = self.schedule_for(user_id);
        let _schedule = schedule.write().await;
        self.check_owner_org(user_id, Some(organization_id))?;
        let _directory = self.directory_write.lock().await;
        if self.agendas.len() >= MAX_AGENDAS {
            return Err(EngineError::LimitExceeded("too many agendas"));
        }
        let now = now_ms();
        let agenda = Agenda {
            id: Ulid::new(),
            user_id,
            organization_id,
            settings,
            created_at: now,
            updated_at: now,
        };
        let event = Event::AgendaCreated {
            agenda: agenda.clone(),
        };
        self.persist_directory(organization_id, &event).await?;
        tracing::info!(agenda_id = %agenda.id, %user_id, "agenda created");
        Ok(agenda)
    }

    pub async fn update_agenda(
        &self,
        id: Ulid,
        settings: AgendaSettings,
    ) -> Result<Agenda, EngineError> {
        validate_agenda_settings(&settings)?;
        let _gate = self.write_gate.read().await;
        let _directory = self.directory_write.lock().await;
        let mut agenda = self
            .agendas
            .get(&id)
            .map(|a| a.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        agenda.settings = settings;
        agenda.updated_at = now_ms();
        let event = Event::AgendaUpdated {
            agenda: agenda.clone(),
        };
        self.persist_directory(agenda.organization_id, &event).await?;
        Ok(agenda)
    }

    /// Refused while any non-cancelled appointment still sits on the agenda.
    pub async fn delete_agenda(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        let (owner, organization_id) = self
            .agendas
            .get(&id)
            .map(|a| (a.user_id, a.organization_id))
            .ok_or(EngineError::NotFound(id))?;
        let schedule = self.schedule_for(owner);
        let guard = schedule.read().await;
        if guard
            .appointments
            .iter()
            .any(|a| a.agenda_id == Some(id) && a.status.blocks_time())
        {
            return Err(EngineError::HasAppointments(id));
        }
        let _directory = self.directory_write.lock().await;
        self.persist_directory(organization_id, &Event::AgendaDeleted { id })
            .await?;
        tracing::info!(agenda_id = %id, "agenda deleted");
        Ok(())
    }

    // ── Clients ──────────────────────────────────────────────

    pub async fn create_client(&self, input: NewClient) -> Result<Client, EngineError> {
        let _gate = self.write_gate.read().await;
        let _directory = self.directory_write.lock().await;
        self.insert_client_locked(input).await
    }

    /// Caller holds `directory_write`.
    pub(super) async fn insert_client_locked(&self, input: NewClient) -> Result<Client, EngineError> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::validation("client name is required"));
        }
        check_len(&name, MAX_NAME_LEN, "client name too long")?;
        let phone = normalize_phone(&input.phone);
        if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&phone.len()) {
            return Err(EngineError::validation("client phone is invalid"));
        }
        check_opt_len(input.email.as_deref(), MAX_NAME_LEN, "email too long")?;
        check_opt_len(input.city.as_deref(), MAX_NAME_LEN, "city too long")?;
        if let Some(existing) = self.client_phones.get(&(input.organization_id, phone.clone())) {
            return Err(EngineError::DuplicateClient(*existing.value()));
        }

        let now = now_ms();
        let client = Client {
            id: Ulid::new(),
            organization_id: input.organization_id,
            name,
            phone,
            email: input.email,
            cpf: input.cpf,
            city: input.city,
            created_at: now,
            updated_at: now,
        };
        let event = Event::ClientCreated {
            client: client.clone(),
        };
        self.persist_directory(client.organization_id, &event).await?;
        tracing::info!(client_id = %client.id, organization_id = %client.organization_id, "client created");
        Ok(client)
    }

    // ── Appointments ─────────────────────────────────────────

    /// Check the owner's schedule and insert, atomically under its write lock.
    pub async fn create_appointment(&self, input: NewAppointment) -> Result<Appointment, EngineError> {
        let span = validate_new_appointment(&input)?;
        if let Some(client_id) = input.client_id
            && !self.clients.contains_key(&client_id)
        {
            return Err(EngineError::NotFound(client_id));
        }

        let _gate = self.write_gate.read().await;
        let schedule = self.schedule_for(input.user_id);
        let mut guard = schedule.write().await;
        // Looked up under the owner lock: `delete_agenda` holds that lock
        // while it checks for appointments and removes the agenda.
        if let Some(agenda_id) = input.agenda_id {
            let owner = self
                .agendas
                .get(&agenda_id)
                .map(|a| a.user_id)
                .ok_or(EngineError::NotFound(agenda_id))?;
            if owner != input.user_id {
                return Err(EngineError::validation("agenda belongs to another user"));
            }
        }
        self.check_owner_org(input.user_id, input.organization_id)?;
        ensure_room(&guard)?;
        check_no_conflict(&guard, None, &span, None)?;

        let now = now_ms();
        let appointment = Appointment {
            id: Ulid::new(),
            user_id: input.user_id,
            organization_id: input.organization_id,
            agenda_id: input.agenda_id,
            title: input.title.trim().to_string(),
            description: input.description,
            span,
            client_id: input.client_id,
            status: input.status.unwrap_or(AppointmentStatus::Scheduled),
            appointment_type: input.appointment_type,
            location: input.location,
            notes: input.notes,
            reminder_sent: false,
            reminder_sent_at: None,
            metadata: input.metadata.unwrap_or_else(|| serde_json::json!({})),
            created_at: now,
            updated_at: now,
        };
        let event = Event::AppointmentCreated {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::APPOINTMENTS_CREATED_TOTAL, "path" => "repository")
            .increment(1);
        tracing::info!(appointment_id = %appointment.id, user_id = %appointment.user_id, "appointment created");
        Ok(appointment)
    }

    /// Apply a partial update. Moving either bound re-checks the owner's
    /// schedule excluding the appointment itself; so does bringing a
    /// cancelled appointment back to an active status.
    pub async fn update_appointment(
        &self,
        id: Ulid,
        patch: AppointmentPatch,
    ) -> Result<Appointment, EngineError> {
        check_opt_len(patch.title.as_deref(), MAX_TITLE_LEN, "title too long")?;
        check_opt_len(patch.description.as_deref(), MAX_TEXT_LEN, "description too long")?;
        check_opt_len(patch.notes.as_deref(), MAX_TEXT_LEN, "notes too long")?;
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(EngineError::validation("title is required"));
        }
        if let Some(client_id) = patch.client_id
            && !self.clients.contains_key(&client_id)
        {
            return Err(EngineError::NotFound(client_id));
        }

        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_appointment_write(&id).await?;
        let current = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;

        let span = Span::checked(
            patch.start.unwrap_or(current.span.start),
            patch.end.unwrap_or(current.span.end),
        )
        .ok_or_else(|| EngineError::validation("start_time must be before end_time"))?;
        let status = patch.status.unwrap_or(current.status);
        let reinstated = !current.status.blocks_time() && status.blocks_time();
        if (patch.touches_time() || reinstated) && status.blocks_time() {
            validate_span(&span)?;
            check_no_conflict(&guard, None, &span, Some(id))?;
        }

        let mut updated = current;
        updated.span = span;
        updated.status = status;
        if let Some(title) = patch.title {
            updated.title = title.trim().to_string();
        }
        if patch.description.is_some() {
            updated.description = patch.description;
        }
        if patch.client_id.is_some() {
            updated.client_id = patch.client_id;
        }
        if patch.appointment_type.is_some() {
            updated.appointment_type = patch.appointment_type;
        }
        if patch.location.is_some() {
            updated.location = patch.location;
        }
        if patch.notes.is_some() {
            updated.notes = patch.notes;
        }
        if let Some(metadata) = patch.metadata {
            updated.metadata = metadata;
        }
        updated.updated_at = now_ms();

        let event = Event::AppointmentUpdated {
            appointment: updated.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(appointment_id = %id, status = %updated.status, "appointment updated");
        Ok(updated)
    }

    pub async fn cancel_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.update_appointment(
            id,
            AppointmentPatch {
                status: Some(AppointmentStatus::Cancelled),
                ..Default::default()
            },
        )
        .await
    }

    /// Hard delete. Returns the owning user.
    pub async fn delete_appointment(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_appointment_write(&id).await?;
        let user_id = guard.user_id;
        let event = Event::AppointmentDeleted { id, user_id };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(appointment_id = %id, %user_id, "appointment deleted");
        Ok(user_id)
    }

    pub async fn mark_reminder_sent(&self, id: Ulid, at: Ms) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_appointment_write(&id).await?;
        let mut updated = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        updated.reminder_sent = true;
        updated.reminder_sent_at = Some(at);
        updated.updated_at = at;
        let event = Event::AppointmentUpdated {
            appointment: updated,
        };
        self.persist_and_apply(&mut guard, &event).await
    }
}
