use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_booking;
use super::ledger::{check_decision, normalize};
use super::{upsert_contract, Engine, EngineError, EmployeeState, WalCommand};

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn validate_availability(availability: &EmployeeAvailability) -> Result<(), EngineError> {
    if availability.start_time >= availability.end_time {
        return Err(EngineError::InvalidInput("availability ends before it starts"));
    }
    if availability.exceptions.len() > MAX_DATE_OVERRIDES
        || availability.monthly_availability.len() > MAX_DATE_OVERRIDES
    {
        return Err(EngineError::LimitExceeded("too many date overrides"));
    }
    if availability.exceptions.values().any(|r| r.len() > MAX_REASON_LEN) {
        return Err(EngineError::LimitExceeded("reason too long"));
    }
    Ok(())
}

fn booking_status_name(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Scheduled => "scheduled",
        BookingStatus::InProgress => "in-progress",
        BookingStatus::Completed => "completed",
        BookingStatus::Cancelled => "cancelled",
    }
}

fn check_booking_transition(booking: &Booking, to: BookingStatus) -> Result<(), EngineError> {
    use BookingStatus::*;
    let allowed = matches!(
        (booking.status, to),
        (Scheduled, InProgress) | (InProgress, Completed) | (Scheduled, Cancelled) | (InProgress, Cancelled)
    );
    if !allowed {
        return Err(EngineError::InvalidTransition {
            id: booking.id,
            from: booking_status_name(booking.status),
            to: booking_status_name(to),
        });
    }
    Ok(())
}

impl Engine {
    // ── Roster ───────────────────────────────────────────

    pub async fn add_employee(&self, id: EmployeeId, name: String) -> Result<(), EngineError> {
        validate_name(&name)?;
        if self.employees.len() >= MAX_EMPLOYEES {
            return Err(EngineError::LimitExceeded("too many employees"));
        }
        if self.employees.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let employee = Employee { id, name, active: true };
        let event = Event::EmployeeAdded { employee: employee.clone() };
        self.wal_append(&event).await?;
        self.employees
            .insert(id, Arc::new(RwLock::new(EmployeeState::new(employee))));
        self.notify.send(&event);
        info!("employee {id} added");
        Ok(())
    }

    pub async fn update_employee(&self, id: EmployeeId, name: String, active: bool) -> Result<(), EngineError> {
        validate_name(&name)?;
        let state = self.get_employee_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = state.write().await;
        let event = Event::EmployeeUpdated {
            employee: Employee { id, name, active },
        };
        self.persist_and_apply(&mut [&mut *guard], &event).await
    }

    // ── Availability ─────────────────────────────────────

    pub async fn set_availability(&self, availability: EmployeeAvailability) -> Result<(), EngineError> {
        validate_availability(&availability)?;
        let id = availability.employee_id;
        let state = self.get_employee_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = state.write().await;
        let event = Event::AvailabilitySet { availability };
        self.persist_and_apply(&mut [&mut *guard], &event).await
    }

    pub async fn clear_availability(&self, employee_id: EmployeeId) -> Result<(), EngineError> {
        let state = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let mut guard = state.write().await;
        if guard.availability.is_none() {
            return Ok(());
        }
        let event = Event::AvailabilityCleared { employee_id };
        self.persist_and_apply(&mut [&mut *guard], &event).await
    }

    /// Mark one date unavailable. Needs an existing availability record.
    pub async fn add_exception(&self, employee_id: EmployeeId, date: NaiveDate, reason: String) -> Result<(), EngineError> {
        self.edit_availability(employee_id, |a| {
            a.exceptions.insert(date, reason);
        })
        .await
    }

    pub async fn remove_exception(&self, employee_id: EmployeeId, date: NaiveDate) -> Result<(), EngineError> {
        self.edit_availability(employee_id, |a| {
            a.exceptions.remove(&date);
        })
        .await
    }

    /// Set (`Some`) or clear (`None`) the explicit answer for one date.
    pub async fn set_monthly_override(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
        available: Option<bool>,
    ) -> Result<(), EngineError> {
        self.edit_availability(employee_id, |a| match available {
            Some(v) => {
                a.monthly_availability.insert(date, v);
            }
            None => {
                a.monthly_availability.remove(&date);
            }
        })
        .await
    }

    async fn edit_availability(
        &self,
        employee_id: EmployeeId,
        edit: impl FnOnce(&mut EmployeeAvailability),
    ) -> Result<(), EngineError> {
        let state = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let mut guard = state.write().await;
        let mut availability = guard
            .availability
            .clone()
            .ok_or(EngineError::NotFound(employee_id))?;
        edit(&mut availability);
        validate_availability(&availability)?;
        let event = Event::AvailabilitySet { availability };
        self.persist_and_apply(&mut [&mut *guard], &event).await
    }

    // ── Off-requests ─────────────────────────────────────

    /// File a request as pending. Returns it in normalized form.
    pub async fn submit_off_request(&self, mut request: OffRequest) -> Result<OffRequest, EngineError> {
        normalize(&mut request)?;
        if self.entity_to_employee.contains_key(&request.id) {
            return Err(EngineError::AlreadyExists(request.id));
        }
        let employee_id = request.employee_id;
        let state = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let mut guard = state.write().await;
        if guard.off_requests.len() >= MAX_OFF_REQUESTS_PER_EMPLOYEE {
            return Err(EngineError::LimitExceeded("too many off-requests"));
        }

        let event = Event::OffRequestSubmitted { request: request.clone() };
        self.persist_and_apply(&mut [&mut *guard], &event).await?;
        info!(
            "off-request {} for {employee_id}: {}..{}",
            request.id, request.start_date, request.end_date
        );
        Ok(request)
    }

    pub async fn approve_off_request(&self, id: OffRequestId, by: Option<Ulid>) -> Result<EmployeeId, EngineError> {
        self.decide_off_request(id, OffRequestStatus::Approved, Utc::now(), by).await
    }

    pub async fn reject_off_request(&self, id: OffRequestId, by: Option<Ulid>) -> Result<EmployeeId, EngineError> {
        self.decide_off_request(id, OffRequestStatus::Rejected, Utc::now(), by).await
    }

    /// Replay a decision made elsewhere, keeping its original timestamp.
    pub(crate) async fn restore_off_request_decision(
        &self,
        id: OffRequestId,
        status: OffRequestStatus,
        decided_at: DateTime<Utc>,
        by: Option<Ulid>,
    ) -> Result<EmployeeId, EngineError> {
        self.decide_off_request(id, status, decided_at, by).await
    }

    async fn decide_off_request(
        &self,
        id: OffRequestId,
        status: OffRequestStatus,
        decided_at: DateTime<Utc>,
        by: Option<Ulid>,
    ) -> Result<EmployeeId, EngineError> {
        let (employee_id, mut guard) = self.resolve_entity_write(&id).await?;
        let request = guard
            .off_requests
            .iter()
            .find(|r| r.id == id)
            .ok_or(EngineError::NotFound(id))?;
        check_decision(request, status)?;

        let event = Event::OffRequestDecided {
            id,
            employee_id,
            status,
            decided_at,
            decided_by: by,
        };
        self.persist_and_apply(&mut [&mut *guard], &event).await?;
        info!("off-request {id} {status:?}");
        Ok(employee_id)
    }

    /// Employees may pull back a request until it is decided.
    pub async fn withdraw_off_request(&self, id: OffRequestId) -> Result<EmployeeId, EngineError> {
        let (employee_id, mut guard) = self.resolve_entity_write(&id).await?;
        let request = guard
            .off_requests
            .iter()
            .find(|r| r.id == id)
            .ok_or(EngineError::NotFound(id))?;
        if request.status != OffRequestStatus::Pending {
            return Err(EngineError::InvalidTransition {
                id,
                from: if request.status == OffRequestStatus::Approved { "approved" } else { "rejected" },
                to: "withdrawn",
            });
        }
        let event = Event::OffRequestWithdrawn { id, employee_id };
        self.persist_and_apply(&mut [&mut *guard], &event).await?;
        Ok(employee_id)
    }

    // ── Bookings ─────────────────────────────────────────

    /// Store a booking. Conflict checking is the caller's job.
    pub async fn create_booking(&self, booking: Booking) -> Result<(), EngineError> {
        validate_booking(&booking)?;
        if self.entity_to_employee.contains_key(&booking.id) {
            return Err(EngineError::AlreadyExists(booking.id));
        }
        let employee_id = booking.employee_id;
        let state = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let mut guard = state.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_EMPLOYEE {
            return Err(EngineError::LimitExceeded("too many bookings for employee"));
        }

        debug!(
            "booking {} for {employee_id} on {} at {}",
            booking.id, booking.date, booking.start_time
        );
        let event = Event::BookingCreated { booking };
        self.persist_and_apply(&mut [&mut *guard], &event).await
    }

    /// Replace a booking's fields, possibly moving it to another employee.
    pub async fn update_booking(&self, booking: Booking) -> Result<(), EngineError> {
        validate_booking(&booking)?;
        let previous_employee_id = self
            .get_employee_for_entity(&booking.id)
            .ok_or(EngineError::NotFound(booking.id))?;
        let previous = self
            .get_employee_state(&previous_employee_id)
            .ok_or(EngineError::NotFound(previous_employee_id))?;

        let event = Event::BookingUpdated {
            booking: booking.clone(),
            previous_employee_id,
        };

        if previous_employee_id == booking.employee_id {
            let mut guard = previous.write().await;
            if !guard.bookings.iter().any(|b| b.id == booking.id) {
                return Err(EngineError::NotFound(booking.id));
            }
            return self.persist_and_apply(&mut [&mut *guard], &event).await;
        }

        let next = self
            .get_employee_state(&booking.employee_id)
            .ok_or(EngineError::NotFound(booking.employee_id))?;
        // Lock in id order so concurrent reassignments can't deadlock.
        let (mut old_guard, mut new_guard) = if previous_employee_id < booking.employee_id {
            let a = previous.write_owned().await;
            let b = next.write_owned().await;
            (a, b)
        } else {
            let b = next.write_owned().await;
            let a = previous.write_owned().await;
            (a, b)
        };
        if !old_guard.bookings.iter().any(|b| b.id == booking.id) {
            return Err(EngineError::NotFound(booking.id));
        }
        if new_guard.bookings.len() >= MAX_BOOKINGS_PER_EMPLOYEE {
            return Err(EngineError::LimitExceeded("too many bookings for employee"));
        }
        info!(
            "booking {} reassigned {previous_employee_id} -> {}",
            booking.id, booking.employee_id
        );
        self.persist_and_apply(&mut [&mut *old_guard, &mut *new_guard], &event)
            .await
    }

    pub async fn start_booking(&self, id: BookingId) -> Result<EmployeeId, EngineError> {
        self.transition_booking(id, BookingStatus::InProgress).await
    }

    pub async fn complete_booking(&self, id: BookingId) -> Result<EmployeeId, EngineError> {
        self.transition_booking(id, BookingStatus::Completed).await
    }

    pub async fn cancel_booking(&self, id: BookingId) -> Result<EmployeeId, EngineError> {
        self.transition_booking(id, BookingStatus::Cancelled).await
    }

    async fn transition_booking(&self, id: BookingId, to: BookingStatus) -> Result<EmployeeId, EngineError> {
        let (employee_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .ok_or(EngineError::NotFound(id))?;
        check_booking_transition(booking, to)?;

        let event = Event::BookingStatusChanged { id, employee_id, status: to };
        self.persist_and_apply(&mut [&mut *guard], &event).await?;
        Ok(employee_id)
    }

    // ── Contracts ────────────────────────────────────────

    /// Insert or replace a contract by id.
    pub async fn save_contract(&self, contract: ClientContract) -> Result<(), EngineError> {
        if let Some(end) = contract.end_date
            && end < contract.start_date
        {
            return Err(EngineError::InvalidInput("contract ends before it starts"));
        }
        let is_new = self
            .contracts
            .get(&contract.client_id)
            .is_none_or(|list| list.iter().all(|c| c.id != contract.id));
        if is_new
            && self
                .contracts
                .get(&contract.client_id)
                .is_some_and(|list| list.len() >= MAX_CONTRACTS_PER_CLIENT)
        {
            return Err(EngineError::LimitExceeded("too many contracts for client"));
        }

        let event = Event::ContractSaved {
            contract: contract.clone(),
        };
        self.wal_append(&event).await?;
        upsert_contract(&self.contracts, &contract);
        self.notify.send(&event);
        debug!("contract {} saved for client {}", contract.id, contract.client_id);
        Ok(())
    }

    // ── Journal maintenance ──────────────────────────────

    /// Rewrite the journal with only the events that recreate current state.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let states: Vec<_> = self.employees.iter().map(|e| e.value().clone()).collect();
        for state in states {
            let guard = state.read().await;
            events.push(Event::EmployeeAdded {
                employee: guard.employee.clone(),
            });
            if let Some(availability) = &guard.availability {
                events.push(Event::AvailabilitySet {
                    availability: availability.clone(),
                });
            }
            for request in &guard.off_requests {
                events.push(Event::OffRequestSubmitted {
                    request: request.clone(),
                });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }
        for entry in self.contracts.iter() {
            for contract in entry.value() {
                events.push(Event::ContractSaved {
                    contract: contract.clone(),
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("journal compacted to {count} events");
        Ok(())
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
