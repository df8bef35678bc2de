use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::free_windows;
use super::conflict::{check_candidate, list_unavailable, Candidate, CheckSettings, Slot, Verdict};
use super::{DaySchedule, Engine, EngineError};

impl Engine {
    /// Roster sorted by name.
    pub async fn list_employees(&self) -> Vec<Employee> {
        let states: Vec<_> = self.employees.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for state in states {
            out.push(state.read().await.employee.clone());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn get_availability(&self, employee_id: EmployeeId) -> Result<Option<EmployeeAvailability>, EngineError> {
        let state = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let guard = state.read().await;
        Ok(guard.availability.clone())
    }

    pub async fn get_off_requests(&self, employee_id: EmployeeId) -> Result<Vec<OffRequest>, EngineError> {
        let state = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let guard = state.read().await;
        Ok(guard.off_requests.clone())
    }

    /// One employee's bookings on `date`, cancelled ones included.
    pub async fn get_bookings_on(&self, employee_id: EmployeeId, date: NaiveDate) -> Result<Vec<Booking>, EngineError> {
        let state = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let guard = state.read().await;
        Ok(guard.bookings_on(date).to_vec())
    }

    /// Every booking on `date` across the roster.
    pub async fn get_bookings_on_date(&self, date: NaiveDate) -> Vec<Booking> {
        let states: Vec<_> = self.employees.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for state in states {
            out.extend_from_slice(state.read().await.bookings_on(date));
        }
        out.sort_by_key(|b| (b.start_time, b.employee_id));
        out
    }

    pub async fn get_booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        let employee_id = self.get_employee_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        let state = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let guard = state.read().await;
        guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub fn get_contracts(&self, client_id: ClientId) -> Vec<ClientContract> {
        self.contracts
            .get(&client_id)
            .map(|list| list.value().clone())
            .unwrap_or_default()
    }

    /// Clients with at least one contract, sorted.
    pub fn contract_clients(&self) -> Vec<ClientId> {
        let mut clients: Vec<ClientId> = self.contracts.iter().map(|e| *e.key()).collect();
        clients.sort();
        clients
    }

    pub async fn day_schedule(&self, employee_id: EmployeeId, date: NaiveDate) -> Result<DaySchedule, EngineError> {
        let state = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let guard = state.read().await;
        Ok(guard.day_schedule(date))
    }

    /// Day schedules of every active employee.
    pub async fn day_schedules(&self, date: NaiveDate) -> Vec<DaySchedule> {
        let states: Vec<_> = self.employees.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for state in states {
            let guard = state.read().await;
            if guard.employee.active {
                out.push(guard.day_schedule(date));
            }
        }
        out
    }

    /// Run the conflict checker against the current stored schedule.
    pub async fn check(&self, candidate: &Candidate, settings: &CheckSettings) -> Result<Verdict, EngineError> {
        let day = self.day_schedule(candidate.employee_id, candidate.slot.date).await?;
        Ok(check_candidate(&day, candidate, settings))
    }

    pub async fn unavailable_employees(
        &self,
        slot: &Slot,
        exclude_booking_id: Option<Ulid>,
        settings: &CheckSettings,
    ) -> HashSet<EmployeeId> {
        let days = self.day_schedules(slot.date).await;
        list_unavailable(&days, slot, exclude_booking_id, settings)
    }

    pub async fn free_windows(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
        settings: &CheckSettings,
    ) -> Result<Vec<Window>, EngineError> {
        let state = self
            .get_employee_state(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let guard = state.read().await;
        if guard.off_requests.iter().any(|r| r.blocks(date)) {
            return Ok(Vec::new());
        }
        Ok(free_windows(
            guard.availability.as_ref(),
            guard.bookings_on(date),
            date,
            settings.missing_record,
        ))
    }
}
