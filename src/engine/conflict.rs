use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Boundary within which appointments must not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictScope {
    /// Every appointment of one owning user.
    Owner(Ulid),
    /// Appointments booked on one agenda.
    Agenda(Ulid),
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("appointment too long"));
    }
    Ok(())
}

/// First non-cancelled appointment in `schedule` overlapping `span`.
///
/// `agenda` narrows the scan to one agenda of the owner; `exclude` skips the
/// appointment being rescheduled.
pub fn find_conflict(
    schedule: &ScheduleState,
    agenda: Option<Ulid>,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    schedule
        .overlapping(span)
        .filter(|a| a.status.blocks_time())
        .filter(|a| Some(a.id) != exclude)
        .find(|a| agenda.is_none() || a.agenda_id == agenda)
        .map(|a| a.id)
}

pub(crate) fn check_no_conflict(
    schedule: &ScheduleState,
    agenda: Option<Ulid>,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(schedule, agenda, span, exclude) {
        Some(id) => {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
            tracing::debug!(user_id = %schedule.user_id, conflicting = %id, "schedule conflict");
            Err(EngineError::Conflict(id))
        }
        None => Ok(()),
    }
}

impl Engine {
    /// Id of an existing appointment in `scope` overlapping `span`, if any.
    ///
    /// An agenda scope that does not resolve is an error, never "free".
    pub async fn check_conflict(
        &self,
        scope: ConflictScope,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Option<Ulid>, EngineError> {
        let (user_id, agenda) = match scope {
            ConflictScope::Owner(user_id) => (user_id, None),
            ConflictScope::Agenda(agenda_id) => {
                let owner = self
                    .agendas
                    .get(&agenda_id)
                    .map(|a| a.user_id)
                    .ok_or(EngineError::NotFound(agenda_id))?;
                (owner, Some(agenda_id))
            }
        };
        let Some(schedule) = self.existing_schedule(&user_id) else {
            return Ok(None);
        };
        let guard = schedule.read().await;
        Ok(find_conflict(&guard, agenda, &span, exclude))
    }
}
