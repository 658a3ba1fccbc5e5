//! JSON shapes of the HTTP surface. Instants travel as RFC 3339 strings and
//! are converted to `Ms` here, at the boundary.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

use super::error::ApiError;

fn instant(field: &str, raw: &str) -> Result<Ms, ApiError> {
    parse_instant(raw).ok_or_else(|| {
        ApiError::validation(format!("{field} must be an ISO-8601 instant with offset"))
    })
}

fn opt_instant(field: &str, raw: Option<&str>) -> Result<Option<Ms>, ApiError> {
    raw.map(|r| instant(field, r)).transpose()
}

fn opt_ulid(field: &str, raw: Option<&str>) -> Result<Option<Ulid>, ApiError> {
    raw.map(|r| {
        r.trim()
            .parse::<Ulid>()
            .map_err(|_| ApiError::validation(format!("{field} is not a valid id")))
    })
    .transpose()
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

// ── Public booking ───────────────────────────────────────────────

/// Body of `POST /v1/public/appointments`. Every field is optional at the
/// serde level so a missing one is reported by name with a 400.
#[derive(Debug, Default, Deserialize)]
pub struct PublicBookingBody {
    pub agenda_id: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub client_email: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// A public booking with every required field present and parsed.
#[derive(Debug)]
pub struct ValidBooking {
    pub agenda_id: Ulid,
    pub span: Span,
    pub client_phone: String,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl PublicBookingBody {
    pub fn validate(self) -> Result<ValidBooking, ApiError> {
        let missing: Vec<&str> = [
            ("agenda_id", &self.agenda_id),
            ("start_time", &self.start_time),
            ("end_time", &self.end_time),
            ("client_phone", &self.client_phone),
        ]
        .into_iter()
        .filter(|(_, v)| !present(v))
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(ApiError::validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let (Some(agenda_id), Some(start_time), Some(end_time), Some(client_phone)) =
            (self.agenda_id, self.start_time, self.end_time, self.client_phone)
        else {
            return Err(ApiError::validation("missing required fields"));
        };
        let agenda_id = opt_ulid("agenda_id", Some(&agenda_id))?
            .ok_or_else(|| ApiError::validation("agenda_id is required"))?;
        let start = instant("start_time", &start_time)?;
        let end = instant("end_time", &end_time)?;
        let span = Span::checked(start, end)
            .ok_or_else(|| ApiError::validation("start_time must be before end_time"))?;

        Ok(ValidBooking {
            agenda_id,
            span,
            client_phone,
            client_name: self.client_name,
            client_email: self.client_email,
            title: self.title,
            description: self.description,
        })
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentView {
    pub id: Ulid,
    pub user_id: Ulid,
    pub organization_id: Option<Ulid>,
    pub agenda_id: Option<Ulid>,
    pub title: String,
    pub description: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub client_id: Option<Ulid>,
    pub status: AppointmentStatus,
    pub appointment_type: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub reminder_sent: bool,
    pub reminder_sent_at: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Appointment> for AppointmentView {
    fn from(a: &Appointment) -> Self {
        Self {
            id: a.id,
            user_id: a.user_id,
            organization_id: a.organization_id,
            agenda_id: a.agenda_id,
            title: a.title.clone(),
            description: a.description.clone(),
            start_time: format_instant(a.span.start),
            end_time: format_instant(a.span.end),
            client_id: a.client_id,
            status: a.status,
            appointment_type: a.appointment_type.clone(),
            location: a.location.clone(),
            notes: a.notes.clone(),
            reminder_sent: a.reminder_sent,
            reminder_sent_at: a.reminder_sent_at.map(format_instant),
            metadata: a.metadata.clone(),
            created_at: format_instant(a.created_at),
            updated_at: format_instant(a.updated_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentBody {
    pub user_id: Ulid,
    pub agenda_id: Option<Ulid>,
    pub title: String,
    pub description: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub client_id: Option<Ulid>,
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl CreateAppointmentBody {
    pub fn into_input(self, organization_id: Ulid) -> Result<NewAppointment, ApiError> {
        Ok(NewAppointment {
            user_id: self.user_id,
            organization_id: Some(organization_id),
            agenda_id: self.agenda_id,
            title: self.title,
            description: self.description,
            start: instant("start_time", &self.start_time)?,
            end: instant("end_time", &self.end_time)?,
            client_id: self.client_id,
            status: self.status,
            appointment_type: self.appointment_type,
            location: self.location,
            notes: self.notes,
            metadata: self.metadata,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAppointmentBody {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub client_id: Option<Ulid>,
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl UpdateAppointmentBody {
    pub fn into_patch(self) -> Result<AppointmentPatch, ApiError> {
        Ok(AppointmentPatch {
            title: self.title,
            description: self.description,
            start: opt_instant("start_time", self.start_time.as_deref())?,
            end: opt_instant("end_time", self.end_time.as_deref())?,
            client_id: self.client_id,
            status: self.status,
            appointment_type: self.appointment_type,
            location: self.location,
            notes: self.notes,
            metadata: self.metadata,
        })
    }
}

/// Query string of `GET /v1/appointments`.
#[derive(Debug, Default, Deserialize)]
pub struct AppointmentQuery {
    /// Comma-separated statuses.
    pub status: Option<String>,
    pub user_id: Option<String>,
    pub agenda_id: Option<String>,
    pub client_id: Option<String>,
    pub appointment_type: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub search: Option<String>,
    /// Also list appointments without an agenda.
    #[serde(default)]
    pub include_unassigned: bool,
}

impl AppointmentQuery {
    pub fn into_filter(self, organization_id: Ulid) -> Result<AppointmentFilter, ApiError> {
        let statuses = match self.status.as_deref() {
            Some(raw) => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse::<AppointmentStatus>().map_err(ApiError::Validation))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        Ok(AppointmentFilter {
            user_id: opt_ulid("user_id", self.user_id.as_deref())?,
            organization_id: Some(organization_id),
            agenda_id: opt_ulid("agenda_id", self.agenda_id.as_deref())?,
            statuses,
            client_id: opt_ulid("client_id", self.client_id.as_deref())?,
            appointment_type: self.appointment_type.filter(|t| !t.trim().is_empty()),
            start_from: opt_instant("start_date", self.start_date.as_deref())?,
            end_until: opt_instant("end_date", self.end_date.as_deref())?,
            search: self.search.filter(|s| !s.trim().is_empty()),
            require_agenda: !self.include_unassigned,
        })
    }
}

// ── Agendas ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateAgendaBody {
    pub user_id: Ulid,
    #[serde(flatten)]
    pub settings: AgendaSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaView {
    pub id: Ulid,
    pub user_id: Ulid,
    pub organization_id: Ulid,
    #[serde(flatten)]
    pub settings: AgendaSettings,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Agenda> for AgendaView {
    fn from(a: &Agenda) -> Self {
        Self {
            id: a.id,
            user_id: a.user_id,
            organization_id: a.organization_id,
            settings: a.settings.clone(),
            created_at: format_instant(a.created_at),
            updated_at: format_instant(a.updated_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: String,
}

impl SlotsQuery {
    pub fn date(&self) -> Result<NaiveDate, ApiError> {
        NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .map_err(|_| ApiError::validation("date must be YYYY-MM-DD"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotView {
    pub start_time: String,
    pub end_time: String,
}

impl From<&Span> for SlotView {
    fn from(s: &Span) -> Self {
        Self {
            start_time: format_instant(s.start),
            end_time: format_instant(s.end),
        }
    }
}

// ── Clients ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateClientBody {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub cpf: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientQuery {
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientView {
    pub id: Ulid,
    pub organization_id: Ulid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub cpf: Option<String>,
    pub city: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Client> for ClientView {
    fn from(c: &Client) -> Self {
        Self {
            id: c.id,
            organization_id: c.organization_id,
            name: c.name.clone(),
            phone: c.phone.clone(),
            email: c.email.clone(),
            cpf: c.cpf.clone(),
            city: c.city.clone(),
            created_at: format_instant(c.created_at),
            updated_at: format_instant(c.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_body() -> PublicBookingBody {
        PublicBookingBody {
            agenda_id: Some(Ulid::new().to_string()),
            start_time: Some("2025-03-10T09:00:00-03:00".into()),
            end_time: Some("2025-03-10T10:00:00-03:00".into()),
            client_phone: Some("+55 11 98888-7777".into()),
            ..Default::default()
        }
    }

    #[test]
    fn booking_body_lists_missing_fields() {
        let body = PublicBookingBody {
            agenda_id: Some(Ulid::new().to_string()),
            start_time: Some("  ".into()),
            ..Default::default()
        };
        let err = body.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("start_time"));
        assert!(msg.contains("end_time"));
        assert!(msg.contains("client_phone"));
        assert!(!msg.contains("agenda_id"));
    }

    #[test]
    fn booking_body_parses_offsets() {
        let valid = full_body().validate().unwrap();
        assert_eq!(valid.span.start, parse_instant("2025-03-10T12:00:00Z").unwrap());
        assert_eq!(valid.span.duration_ms(), HOUR_MS);
    }

    #[test]
    fn booking_body_rejects_bad_values() {
        let mut body = full_body();
        body.agenda_id = Some("agenda-1".into());
        assert!(matches!(body.validate(), Err(ApiError::Validation(_))));

        let mut body = full_body();
        body.end_time = body.start_time.clone();
        assert!(matches!(body.validate(), Err(ApiError::Validation(_))));

        let mut body = full_body();
        body.start_time = Some("10/03/2025 09:00".into());
        assert!(matches!(body.validate(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn query_builds_typed_filter() {
        let org = Ulid::new();
        let query = AppointmentQuery {
            status: Some("scheduled,confirmed".into()),
            search: Some("retorno".into()),
            start_date: Some("2025-03-01T00:00:00Z".into()),
            ..Default::default()
        };
        let filter = query.into_filter(org).unwrap();
        assert_eq!(
            filter.statuses,
            vec![AppointmentStatus::Scheduled, AppointmentStatus::Confirmed]
        );
        assert_eq!(filter.organization_id, Some(org));
        assert!(filter.require_agenda);
        assert!(filter.start_from.is_some());

        let bad = AppointmentQuery {
            status: Some("archived".into()),
            ..Default::default()
        };
        assert!(bad.into_filter(org).is_err());
    }
}
