use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC). The only time type inside the engine.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span from untrusted bounds. `None` unless `start < end`.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Boundary-exclusive overlap: spans that only touch do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Same start, end pushed out by `buffer` (post-appointment buffer time).
    pub fn extended_by(&self, buffer: Ms) -> Span {
        Span::new(self.start, self.end + buffer.max(0))
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl AppointmentStatus {
    /// Everything except `cancelled` takes part in conflict checks.
    pub fn blocks_time(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }

    /// Appointments still ahead of the customer (reminder candidates).
    pub fn is_upcoming(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "cancelled" | "canceled" => Ok(AppointmentStatus::Cancelled),
            "completed" => Ok(AppointmentStatus::Completed),
            "no_show" | "no-show" => Ok(AppointmentStatus::NoShow),
            other => Err(format!("unknown appointment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    /// Owning user; the default conflict scope.
    pub user_id: Ulid,
    pub organization_id: Option<Ulid>,
    pub agenda_id: Option<Ulid>,
    pub title: String,
    pub description: Option<String>,
    pub span: Span,
    pub client_id: Option<Ulid>,
    pub status: AppointmentStatus,
    pub appointment_type: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub reminder_sent: bool,
    pub reminder_sent_at: Option<Ms>,
    #[serde(with = "json_text")]
    pub metadata: serde_json::Value,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Per-owner schedule. Appointments are kept sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    pub user_id: Ulid,
    pub appointments: Vec<Appointment>,
}

impl ScheduleState {
    pub fn new(user_id: Ulid) -> Self {
        Self {
            user_id,
            appointments: Vec::new(),
        }
    }

    /// Insert appointment maintaining sort order by span.start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove_appointment(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    /// Replace a stored appointment, re-sorting if its start moved.
    pub fn replace_appointment(&mut self, appointment: Appointment) {
        self.remove_appointment(appointment.id);
        self.insert_appointment(appointment);
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    /// Appointments whose span overlaps the query window, any status.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }
}

// ── Clients & agendas ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Ulid,
    pub organization_id: Ulid,
    pub name: String,
    /// Digits only; unique within the organization.
    pub phone: String,
    pub email: Option<String>,
    pub cpf: Option<String>,
    pub city: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingDay {
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub enabled: bool,
}

/// Recurring break, e.g. lunch, on the listed weekdays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgendaBreak {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub weekdays: Vec<Weekday>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgendaSettings {
    pub name: String,
    pub working_hours: Vec<WorkingDay>,
    pub slot_duration_minutes: u32,
    pub breaks: Vec<AgendaBreak>,
    pub min_advance_hours: u32,
    pub max_advance_days: u32,
    pub buffer_minutes: u32,
    /// Offset of the wall clock the working hours are written in.
    pub utc_offset_minutes: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agenda {
    pub id: Ulid,
    pub user_id: Ulid,
    pub organization_id: Ulid,
    pub settings: AgendaSettings,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Agenda {
    pub fn buffer_ms(&self) -> Ms {
        Ms::from(self.settings.buffer_minutes) * MINUTE_MS
    }

    pub fn slot_ms(&self) -> Ms {
        Ms::from(self.settings.slot_duration_minutes) * MINUTE_MS
    }

    pub fn working_day(&self, weekday: Weekday) -> Option<&WorkingDay> {
        self.settings
            .working_hours
            .iter()
            .find(|d| d.weekday == weekday && d.enabled)
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    AgendaCreated { agenda: Agenda },
    AgendaUpdated { agenda: Agenda },
    AgendaDeleted { id: Ulid },
    ClientCreated { client: Client },
    AppointmentCreated { appointment: Appointment },
    AppointmentUpdated { appointment: Appointment },
    AppointmentDeleted { id: Ulid, user_id: Ulid },
}

// ── Inputs ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub user_id: Ulid,
    pub organization_id: Option<Ulid>,
    pub agenda_id: Option<Ulid>,
    pub title: String,
    pub description: Option<String>,
    pub start: Ms,
    pub end: Ms,
    pub client_id: Option<Ulid>,
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewAppointment {
    pub fn new(user_id: Ulid, title: impl Into<String>, start: Ms, end: Ms) -> Self {
        Self {
            user_id,
            organization_id: None,
            agenda_id: None,
            title: title.into(),
            description: None,
            start,
            end,
            client_id: None,
            status: None,
            appointment_type: None,
            location: None,
            notes: None,
            metadata: None,
        }
    }
}

/// Partial update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct AppointmentPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub client_id: Option<Ulid>,
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl AppointmentPatch {
    pub fn touches_time(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewClient {
    pub organization_id: Ulid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub cpf: Option<String>,
    pub city: Option<String>,
}

/// Supported listing filters. Empty `statuses` means any status.
#[derive(Debug, Clone)]
pub struct AppointmentFilter {
    pub user_id: Option<Ulid>,
    pub organization_id: Option<Ulid>,
    pub agenda_id: Option<Ulid>,
    pub statuses: Vec<AppointmentStatus>,
    pub client_id: Option<Ulid>,
    pub appointment_type: Option<String>,
    /// Keep appointments starting at or after this instant.
    pub start_from: Option<Ms>,
    /// Keep appointments ending at or before this instant.
    pub end_until: Option<Ms>,
    /// Case-insensitive substring of title or description.
    pub search: Option<String>,
    /// Only appointments attached to an agenda.
    pub require_agenda: bool,
}

impl Default for AppointmentFilter {
    fn default() -> Self {
        Self {
            user_id: None,
            organization_id: None,
            agenda_id: None,
            statuses: Vec::new(),
            client_id: None,
            appointment_type: None,
            start_from: None,
            end_until: None,
            search: None,
            require_agenda: true,
        }
    }
}

impl AppointmentFilter {
    pub fn matches(&self, a: &Appointment) -> bool {
        if self.require_agenda && a.agenda_id.is_none() {
            return false;
        }
        if self.user_id.is_some_and(|u| u != a.user_id) {
            return false;
        }
        if self.organization_id.is_some() && self.organization_id != a.organization_id {
            return false;
        }
        if self.agenda_id.is_some() && self.agenda_id != a.agenda_id {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&a.status) {
            return false;
        }
        if self.client_id.is_some() && self.client_id != a.client_id {
            return false;
        }
        if let Some(kind) = &self.appointment_type
            && a.appointment_type.as_deref() != Some(kind.as_str())
        {
            return false;
        }
        if self.start_from.is_some_and(|t| a.span.start < t) {
            return false;
        }
        if self.end_until.is_some_and(|t| a.span.end > t) {
            return false;
        }
        if let Some(needle) = &self.search {
            let needle = needle.to_lowercase();
            let in_title = a.title.to_lowercase().contains(&needle);
            let in_description = a
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle));
            if !in_title && !in_description {
                return false;
            }
        }
        true
    }
}

// ── Helpers ──────────────────────────────────────────────────────

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Parse an RFC 3339 / ISO-8601 instant with offset into UTC milliseconds.
pub fn parse_instant(s: &str) -> Option<Ms> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

pub fn format_instant(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Strip everything but digits so "+55 (11) 98888-7777" and "5511988887777" match.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// JSON values travel through the WAL as text; bincode cannot self-describe them.
mod json_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &serde_json::Value, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<serde_json::Value, D::Error> {
        let text = String::deserialize(d)?;
        serde_json::from_str(&text).map_err(serde::de::Error::custom)
    }
}
