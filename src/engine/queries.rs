use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::agenda_slots;
use super::{Engine, EngineError, SharedSchedule};

impl Engine {
    pub async fn get_appointment(&self, id: Ulid) -> Option<Appointment> {
        let user_id = self.owner_of(&id)?;
        let schedule = self.existing_schedule(&user_id)?;
        let guard = schedule.read().await;
        guard.get(id).cloned()
    }

    /// Appointments matching `filter`, ordered by start ascending.
    pub async fn list_appointments(&self, filter: &AppointmentFilter) -> Vec<Appointment> {
        let schedules: Vec<SharedSchedule> = match filter.user_id {
            Some(user_id) => self.existing_schedule(&user_id).into_iter().collect(),
            None => self.schedules.iter().map(|e| e.value().clone()).collect(),
        };
        let mut out = Vec::new();
        for schedule in schedules {
            let guard = schedule.read().await;
            out.extend(guard.appointments.iter().filter(|a| filter.matches(a)).cloned());
        }
        out.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id)));
        out
    }

    pub fn get_agenda(&self, id: &Ulid) -> Option<Agenda> {
        self.agendas.get(id).map(|a| a.value().clone())
    }

    pub fn list_agendas(&self, organization_id: Ulid) -> Vec<Agenda> {
        let mut agendas: Vec<Agenda> = self
            .agendas
            .iter()
            .filter(|a| a.organization_id == organization_id)
            .map(|a| a.value().clone())
            .collect();
        agendas.sort_by(|a, b| a.settings.name.cmp(&b.settings.name));
        agendas
    }

    pub fn get_client(&self, id: &Ulid) -> Option<Client> {
        self.clients.get(id).map(|c| c.value().clone())
    }

    pub fn find_client_by_phone(&self, organization_id: Ulid, phone: &str) -> Option<Client> {
        let client_id = self
            .client_phones
            .get(&(organization_id, normalize_phone(phone)))
            .map(|id| *id.value())?;
        self.get_client(&client_id)
    }

    pub fn list_clients(&self, organization_id: Ulid) -> Vec<Client> {
        let mut clients: Vec<Client> = self
            .clients
            .iter()
            .filter(|c| c.organization_id == organization_id)
            .map(|c| c.value().clone())
            .collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name));
        clients
    }

    /// Free booking slots on `agenda_id` for one local calendar day.
    pub async fn available_slots(
        &self,
        agenda_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        let agenda = self.get_agenda(&agenda_id).ok_or(EngineError::NotFound(agenda_id))?;
        let booked: Vec<Span> = match self.existing_schedule(&agenda.user_id) {
            Some(schedule) => {
                let guard = schedule.read().await;
                guard
                    .appointments
                    .iter()
                    .filter(|a| a.agenda_id == Some(agenda_id) && a.status.blocks_time())
                    .map(|a| a.span)
                    .collect()
            }
            None => Vec::new(),
        };
        agenda_slots(&agenda, date, &booked, now_ms())
    }

    /// Upcoming appointments inside the reminder lead window that have not
    /// been reminded yet. Schedules busy with a writer are picked up next tick.
    pub fn collect_due_reminders(&self, now: Ms, lead: Ms) -> Vec<Ulid> {
        let window = Span::new(now, now + lead.max(1));
        let mut due = Vec::new();
        for entry in self.schedules.iter() {
            if let Ok(guard) = entry.value().try_read() {
                due.extend(
                    guard
                        .overlapping(&window)
                        .filter(|a| a.status.is_upcoming() && !a.reminder_sent)
                        .filter(|a| window.contains_instant(a.span.start))
                        .map(|a| a.id),
                );
            }
        }
        due
    }
}
