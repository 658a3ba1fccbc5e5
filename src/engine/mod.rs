mod availability;
mod booking;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{agenda_slots, merge_overlapping, subtract_intervals};
pub use booking::BookingRequest;
pub use conflict::{ConflictScope, find_conflict};
pub use error::{CONFLICT_MESSAGE, EngineError};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSchedule = Arc<RwLock<ScheduleState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, flush and
/// fsync once, then answer every sender in the batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-buffered bytes do not leak
    // into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed to control path")));
        }
    }
}

/// In-process scheduling store: agendas, clients and one lock-guarded
/// schedule per owning user. Every mutation is WAL-logged before it is
/// applied.
pub struct Engine {
    /// Owning user id → that user's appointments.
    pub(super) schedules: DashMap<Ulid, SharedSchedule>,
    pub(super) agendas: DashMap<Ulid, Agenda>,
    pub(super) clients: DashMap<Ulid, Client>,
    /// (organization id, normalised phone) → client id
    pub(super) client_phones: DashMap<(Ulid, String), Ulid>,
    /// Reverse lookup: appointment id → owning user id
    pub(super) appointment_owner: DashMap<Ulid, Ulid>,
    /// Owning user id → the one organization that user belongs to.
    /// Bound by the first agenda or org-tagged appointment of the user.
    pub(super) owner_orgs: DashMap<Ulid, Ulid>,
    /// Serialises agenda and client writes.
    pub(super) directory_write: Mutex<()>,
    /// Held shared by every mutation, exclusively by compaction.
    /// Lock order: gate, schedule, directory.
    pub(super) write_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

/// Apply an appointment event to a schedule (caller holds the lock).
fn apply_to_schedule(
    schedule: &mut ScheduleState,
    event: &Event,
    owners: &DashMap<Ulid, Ulid>,
    owner_orgs: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::AppointmentCreated { appointment } | Event::AppointmentUpdated { appointment } => {
            schedule.replace_appointment(appointment.clone());
            owners.insert(appointment.id, appointment.user_id);
            if let Some(org) = appointment.organization_id {
                owner_orgs.entry(appointment.user_id).or_insert(org);
            }
        }
        Event::AppointmentDeleted { id, .. } => {
            schedule.remove_appointment(*id);
            owners.remove(id);
        }
        // Agenda and client events never touch a schedule.
        Event::AgendaCreated { .. }
        | Event::AgendaUpdated { .. }
        | Event::AgendaDeleted { .. }
        | Event::ClientCreated { .. } => {}
    }
}

/// Owning user of an appointment event.
fn event_owner(event: &Event) -> Option<Ulid> {
    match event {
        Event::AppointmentCreated { appointment } | Event::AppointmentUpdated { appointment } => {
            Some(appointment.user_id)
        }
        Event::AppointmentDeleted { user_id, .. } => Some(*user_id),
        _ => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            schedules: DashMap::new(),
            agendas: DashMap::new(),
            clients: DashMap::new(),
            client_phones: DashMap::new(),
            appointment_owner: DashMap::new(),
            owner_orgs: DashMap::new(),
            directory_write: Mutex::new(()),
            write_gate: RwLock::new(()),
            wal_tx,
            notify,
        };

        // Sole owner of every Arc during replay, so try_write never contends.
        // blocking_write would panic inside the runtime.
        for event in &events {
            match event_owner(event) {
                Some(user_id) => {
                    let schedule = engine.schedule_for(user_id);
                    let Ok(mut guard) = schedule.try_write() else {
                        return Err(io::Error::other("replay: schedule lock contended"));
                    };
                    apply_to_schedule(
                        &mut guard,
                        event,
                        &engine.appointment_owner,
                        &engine.owner_orgs,
                    );
                }
                None => engine.apply_directory_event(event),
            }
        }
        tracing::info!(
            events = events.len(),
            agendas = engine.agendas.len(),
            clients = engine.clients.len(),
            appointments = engine.appointment_owner.len(),
            "replayed WAL"
        );

        Ok(engine)
    }

    /// Agenda and client events live in plain maps, no schedule lock needed.
    fn apply_directory_event(&self, event: &Event) {
        match event {
            Event::AgendaCreated { agenda } | Event::AgendaUpdated { agenda } => {
                self.owner_orgs
                    .entry(agenda.user_id)
                    .or_insert(agenda.organization_id);
                self.agendas.insert(agenda.id, agenda.clone());
            }
            Event::AgendaDeleted { id } => {
                self.agendas.remove(id);
            }
            Event::ClientCreated { client } => {
                self.client_phones
                    .insert((client.organization_id, client.phone.clone()), client.id);
                self.clients.insert(client.id, client.clone());
            }
            Event::AppointmentCreated { .. }
            | Event::AppointmentUpdated { .. }
            | Event::AppointmentDeleted { .. } => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    /// Get or lazily create the schedule of a user.
    pub(super) fn schedule_for(&self, user_id: Ulid) -> SharedSchedule {
        self.schedules
            .entry(user_id)
            .or_insert_with(|| Arc::new(RwLock::new(ScheduleState::new(user_id))))
            .clone()
    }

    pub(super) fn existing_schedule(&self, user_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(user_id).map(|e| e.value().clone())
    }

    pub fn owner_of(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_owner.get(appointment_id).map(|e| *e.value())
    }

    /// Organization a user's schedule is bound to, if any.
    pub fn organization_of_owner(&self, user_id: &Ulid) -> Option<Ulid> {
        self.owner_orgs.get(user_id).map(|e| *e.value())
    }

    /// A schedule belongs to one organization; writing into it from another
    /// would let that tenant block time it cannot see.
    pub(super) fn check_owner_org(
        &self,
        user_id: Ulid,
        organization_id: Option<Ulid>,
    ) -> Result<(), EngineError> {
        match (organization_id, self.organization_of_owner(&user_id)) {
            (Some(org), Some(bound)) if org != bound => Err(EngineError::validation(
                "user belongs to another organization",
            )),
            _ => Ok(()),
        }
    }

    /// WAL-append + apply + notify for appointment events. Subscribers of
    /// the owner and of the appointment's organization both hear it.
    pub(super) async fn persist_and_apply(
        &self,
        schedule: &mut ScheduleState,
        event: &Event,
    ) -> Result<(), EngineError> {
        let organization_id = match event {
            Event::AppointmentCreated { appointment } | Event::AppointmentUpdated { appointment } => {
                appointment.organization_id
            }
            Event::AppointmentDeleted { id, .. } => {
                schedule.get(*id).and_then(|a| a.organization_id)
            }
            _ => None,
        };
        self.wal_append(event).await?;
        apply_to_schedule(schedule, event, &self.appointment_owner, &self.owner_orgs);
        self.notify.send(schedule.user_id, event);
        if let Some(org) = organization_id {
            self.notify.send(org, event);
        }
        Ok(())
    }

    /// WAL-append + apply + notify for agenda and client events.
    pub(super) async fn persist_directory(
        &self,
        organization_id: Ulid,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_directory_event(event);
        self.notify.send(organization_id, event);
        Ok(())
    }

    /// Lookup appointment → owner, acquire the owner's schedule write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ScheduleState>, EngineError> {
        let user_id = self
            .owner_of(appointment_id)
            .ok_or(EngineError::NotFound(*appointment_id))?;
        let schedule = self
            .existing_schedule(&user_id)
            .ok_or(EngineError::NotFound(*appointment_id))?;
        Ok(schedule.write_owned().await)
    }

    /// Rewrite the WAL with only the events needed to rebuild current state.
    /// The exclusive gate keeps every mutation out until the writer has
    /// swapped files.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;
        let schedules: Vec<SharedSchedule> =
            self.schedules.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(schedules.len());
        for schedule in schedules {
            guards.push(schedule.read_owned().await);
        }

        let mut events: Vec<Event> = self
            .agendas
            .iter()
            .map(|e| Event::AgendaCreated {
                agenda: e.value().clone(),
            })
            .collect();
        events.extend(self.clients.iter().map(|e| Event::ClientCreated {
            client: e.value().clone(),
        }));
        for guard in &guards {
            events.extend(guard.appointments.iter().map(|a| Event::AppointmentCreated {
                appointment: a.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
