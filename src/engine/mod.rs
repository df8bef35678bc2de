mod availability;
mod conflict;
mod error;
mod ledger;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{free_windows, is_available, merge_overlapping, subtract_windows, MissingRecordPolicy};
pub use conflict::{check_candidate, list_unavailable, Candidate, CheckSettings, DaySchedule, Rejection, Slot, Verdict};
pub use error::EngineError;
pub use ledger::is_blocked;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

/// One employee's slice of the schedule.
#[derive(Debug, Clone)]
pub struct EmployeeState {
    pub employee: Employee,
    pub availability: Option<EmployeeAvailability>,
    pub off_requests: Vec<OffRequest>,
    /// Sorted by `(date, start_time)`.
    pub bookings: Vec<Booking>,
}

impl EmployeeState {
    pub fn new(employee: Employee) -> Self {
        Self {
            employee,
            availability: None,
            off_requests: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert keeping `(date, start_time)` order.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.date, booking.start_time);
        let pos = self
            .bookings
            .partition_point(|b| (b.date, b.start_time) <= key);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Bookings on `date`, cancelled ones included.
    pub fn bookings_on(&self, date: NaiveDate) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.date < date);
        let hi = self.bookings.partition_point(|b| b.date <= date);
        &self.bookings[lo..hi]
    }

    pub fn day_schedule(&self, date: NaiveDate) -> DaySchedule {
        DaySchedule {
            employee_id: self.employee.id,
            availability: self.availability.clone(),
            off_requests: self.off_requests.clone(),
            bookings: self.bookings_on(date).to_vec(),
        }
    }
}

pub type SharedEmployeeState = Arc<RwLock<EmployeeState>>;

// ── Group-commit journal channel ─────────────────────────

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

/// Owns the journal. Each wake-up takes one command plus whatever else is
/// already queued; all queued appends share a single fsync, and any
/// non-append command runs after that flush.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(first) = rx.recv().await {
        let mut batch: Vec<PendingAppend> = Vec::new();
        let mut deferred: Option<WalCommand> = None;

        let mut next = Some(first);
        while let Some(cmd) = next.take() {
            match cmd {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
            next = rx.try_recv().ok();
        }

        if !batch.is_empty() {
            metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
            let started = Instant::now();
            let result = flush_batch(&mut wal, &batch);
            metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            if let Err(ref e) = result {
                warn!("journal flush failed for {} events: {e}", batch.len());
            }
            for (_, tx) in batch {
                let _ = tx.send(match &result {
                    Ok(()) => Ok(()),
                    Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
                });
            }
        }

        if let Some(cmd) = deferred {
            match cmd {
                WalCommand::Compact { events, response } => {
                    let result = Wal::write_compact_file(wal.path(), &events)
                        .and_then(|()| wal.swap_compact_file());
                    let _ = response.send(result);
                }
                WalCommand::AppendsSinceCompact { response } => {
                    let _ = response.send(wal.appends_since_compact());
                }
                WalCommand::Append { .. } => {}
            }
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't ride
    // along with the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

/// Journaled store of record for the schedule.
pub struct Engine {
    pub(super) employees: DashMap<EmployeeId, SharedEmployeeState>,
    pub(super) contracts: DashMap<ClientId, Vec<ClientContract>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking / off-request id → employee id.
    pub(super) entity_to_employee: DashMap<Ulid, EmployeeId>,
}

/// Apply an event to one employee's state. Caller holds the lock.
///
/// A reassigned booking touches two employees; call once for each.
fn apply_to_employee(es: &mut EmployeeState, event: &Event, entity_map: &DashMap<Ulid, EmployeeId>) {
    let me = es.employee.id;
    match event {
        Event::EmployeeUpdated { employee } => {
            es.employee = employee.clone();
        }
        Event::AvailabilitySet { availability } => {
            es.availability = Some(availability.clone());
        }
        Event::AvailabilityCleared { .. } => {
            es.availability = None;
        }
        Event::OffRequestSubmitted { request } => {
            es.off_requests.push(request.clone());
            entity_map.insert(request.id, me);
        }
        Event::OffRequestDecided {
            id,
            status,
            decided_at,
            decided_by,
            ..
        } => {
            if let Some(r) = es.off_requests.iter_mut().find(|r| r.id == *id) {
                r.status = *status;
                r.decided_at = Some(*decided_at);
                r.decided_by = *decided_by;
            }
        }
        Event::OffRequestWithdrawn { id, .. } => {
            es.off_requests.retain(|r| r.id != *id);
            entity_map.remove(id);
        }
        Event::BookingCreated { booking } => {
            es.insert_booking(booking.clone());
            entity_map.insert(booking.id, me);
        }
        Event::BookingUpdated { booking, .. } => {
            es.remove_booking(booking.id);
            if booking.employee_id == me {
                es.insert_booking(booking.clone());
                entity_map.insert(booking.id, me);
            }
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(pos) = es.bookings.iter().position(|b| b.id == *id) {
                es.bookings[pos].status = *status;
            }
        }
        // Roster inserts and contracts live outside employee state.
        Event::EmployeeAdded { .. } | Event::ContractSaved { .. } => {}
    }
}

fn upsert_contract(contracts: &DashMap<ClientId, Vec<ClientContract>>, contract: &ClientContract) {
    let mut list = contracts.entry(contract.client_id).or_default();
    match list.iter_mut().find(|c| c.id == contract.id) {
        Some(existing) => *existing = contract.clone(),
        None => list.push(contract.clone()),
    }
}

impl Engine {
    /// Replay the journal at `wal_path` and start its writer task.
    /// Must be called inside a Tokio runtime.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            employees: DashMap::new(),
            contracts: DashMap::new(),
            wal_tx,
            notify,
            entity_to_employee: DashMap::new(),
        };

        // Nothing else holds these locks yet, so try_write always succeeds.
        for event in &events {
            match event {
                Event::EmployeeAdded { employee } => {
                    let es = EmployeeState::new(employee.clone());
                    engine.employees.insert(employee.id, Arc::new(RwLock::new(es)));
                }
                Event::ContractSaved { contract } => upsert_contract(&engine.contracts, contract),
                other => {
                    for employee_id in other.employees() {
                        let Some(state) = engine.get_employee_state(&employee_id) else {
                            warn!("replay: event for unknown employee {employee_id}");
                            continue;
                        };
                        match state.try_write() {
                            Ok(mut guard) => apply_to_employee(&mut guard, other, &engine.entity_to_employee),
                            Err(_) => warn!("replay: employee {employee_id} locked"),
                        }
                    }
                }
            }
        }

        tracing::info!(
            "replayed {} events: {} employees, {} clients with contracts",
            events.len(),
            engine.employees.len(),
            engine.contracts.len()
        );
        Ok(engine)
    }

    /// Hand an event to the group-commit writer and wait for its fsync.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_employee_state(&self, id: &EmployeeId) -> Option<SharedEmployeeState> {
        self.employees.get(id).map(|e| e.value().clone())
    }

    pub fn get_employee_for_entity(&self, entity_id: &Ulid) -> Option<EmployeeId> {
        self.entity_to_employee.get(entity_id).map(|e| *e.value())
    }

    /// Journal, apply to every given state, then notify.
    pub(super) async fn persist_and_apply(
        &self,
        states: &mut [&mut EmployeeState],
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        for es in states.iter_mut() {
            apply_to_employee(es, event, &self.entity_to_employee);
        }
        self.notify.send(event);
        Ok(())
    }

    /// Resolve an entity to its employee and take that employee's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(EmployeeId, tokio::sync::OwnedRwLockWriteGuard<EmployeeState>), EngineError> {
        let employee_id = self
            .get_employee_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let state = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        Ok((employee_id, state.write_owned().await))
    }
}
