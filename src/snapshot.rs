use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::{Engine, EngineError};
use crate::model::*;

/// Whole-schedule JSON document used by `import` and `export`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub employees: Vec<Employee>,
    #[serde(default)]
    pub availability: Vec<EmployeeAvailability>,
    #[serde(default)]
    pub off_requests: Vec<OffRequest>,
    #[serde(default)]
    pub bookings: Vec<Booking>,
    #[serde(default)]
    pub contracts: Vec<ClientContract>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub employees: usize,
    pub availability: usize,
    pub off_requests: usize,
    pub bookings: usize,
    pub contracts: usize,
    /// Records already present and left alone.
    pub skipped: usize,
}

impl Snapshot {
    pub async fn capture(engine: &Engine) -> Result<Self, EngineError> {
        let mut snapshot = Snapshot {
            employees: engine.list_employees().await,
            ..Snapshot::default()
        };
        for employee in &snapshot.employees {
            let id = employee.id;
            if let Some(a) = engine.get_availability(id).await? {
                snapshot.availability.push(a);
            }
            snapshot.off_requests.extend(engine.get_off_requests(id).await?);
            let state = engine.get_employee_state(&id).ok_or(EngineError::NotFound(id))?;
            snapshot.bookings.extend(state.read().await.bookings.iter().cloned());
        }
        for client_id in engine.contract_clients() {
            snapshot.contracts.extend(engine.get_contracts(client_id));
        }
        Ok(snapshot)
    }

    /// Load into `engine`. Existing ids are skipped, so re-importing an
    /// export is harmless. Decided off-requests keep their decision, and
    /// bookings keep their status.
    pub async fn restore(self, engine: &Engine) -> Result<ImportReport, EngineError> {
        let mut report = ImportReport::default();

        for employee in self.employees {
            let id = employee.id;
            match engine.add_employee(id, employee.name.clone()).await {
                Ok(()) => report.employees += 1,
                Err(EngineError::AlreadyExists(_)) => report.skipped += 1,
                Err(e) => return Err(e),
            }
            if !employee.active {
                engine.update_employee(id, employee.name, false).await?;
            }
        }

        for availability in self.availability {
            engine.set_availability(availability).await?;
            report.availability += 1;
        }

        for request in self.off_requests {
            let (status, decided_at, decided_by) = (request.status, request.decided_at, request.decided_by);
            let filed = match engine.submit_off_request(request).await {
                Ok(filed) => filed,
                Err(EngineError::AlreadyExists(_)) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if status != OffRequestStatus::Pending {
                let decided_at = decided_at.unwrap_or_else(Utc::now);
                engine
                    .restore_off_request_decision(filed.id, status, decided_at, decided_by)
                    .await?;
            }
            report.off_requests += 1;
        }

        for booking in self.bookings {
            let (id, status) = (booking.id, booking.status);
            let scheduled = Booking {
                status: BookingStatus::Scheduled,
                ..booking
            };
            match engine.create_booking(scheduled).await {
                Ok(()) => report.bookings += 1,
                Err(EngineError::AlreadyExists(_)) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
            match status {
                BookingStatus::Scheduled => {}
                BookingStatus::InProgress => {
                    engine.start_booking(id).await?;
                }
                BookingStatus::Completed => {
                    engine.start_booking(id).await?;
                    engine.complete_booking(id).await?;
                }
                BookingStatus::Cancelled => {
                    engine.cancel_booking(id).await?;
                }
            }
        }

        for contract in self.contracts {
            engine.save_contract(contract).await?;
            report.contracts += 1;
        }

        info!(
            "imported {} employees, {} bookings, {} off-requests ({} skipped)",
            report.employees, report.bookings, report.off_requests, report.skipped
        );
        Ok(report)
    }
}
