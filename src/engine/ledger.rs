use chrono::{Datelike, NaiveDate};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// First approved request of `employee_id` that takes them off on `date`.
pub fn is_blocked(requests: &[OffRequest], employee_id: EmployeeId, date: NaiveDate) -> Option<&OffRequest> {
    requests
        .iter()
        .find(|r| r.employee_id == employee_id && r.blocks(date))
}

/// Bring a freshly submitted request into canonical shape.
///
/// Single-day collapses to its start, full-month stretches to the whole month,
/// non-consecutive gets sorted unique `selected_dates` with bounds derived from
/// them. Other types drop any `selected_dates`.
pub(super) fn normalize(request: &mut OffRequest) -> Result<(), EngineError> {
    if request.reason.len() > MAX_REASON_LEN {
        return Err(EngineError::LimitExceeded("reason too long"));
    }
    match request.duration_type {
        DurationType::SingleDay => {
            request.end_date = request.start_date;
            request.selected_dates.clear();
        }
        DurationType::MultiDay => {
            request.selected_dates.clear();
        }
        DurationType::FullMonth => {
            let first = request
                .start_date
                .with_day(1)
                .ok_or(EngineError::InvalidInput("bad month start"))?;
            request.start_date = first;
            request.end_date = last_day_of_month(first);
            request.selected_dates.clear();
        }
        DurationType::NonConsecutive => {
            if request.selected_dates.len() > MAX_SELECTED_DATES {
                return Err(EngineError::LimitExceeded("too many selected dates"));
            }
            request.selected_dates.sort();
            request.selected_dates.dedup();
            let (Some(&first), Some(&last)) = (request.selected_dates.first(), request.selected_dates.last())
            else {
                return Err(EngineError::InvalidInput("non-consecutive request needs selected dates"));
            };
            request.start_date = first;
            request.end_date = last;
        }
    }
    if request.end_date < request.start_date {
        return Err(EngineError::InvalidInput("off-request ends before it starts"));
    }
    if (request.end_date - request.start_date).num_days() >= MAX_OFF_REQUEST_DAYS {
        return Err(EngineError::LimitExceeded("off-request spans too many days"));
    }
    request.status = OffRequestStatus::Pending;
    request.decided_at = None;
    request.decided_by = None;
    Ok(())
}

/// Pending is the only state a decision can leave.
pub(super) fn check_decision(request: &OffRequest, to: OffRequestStatus) -> Result<(), EngineError> {
    if request.status != OffRequestStatus::Pending || to == OffRequestStatus::Pending {
        return Err(EngineError::InvalidTransition {
            id: request.id,
            from: status_name(request.status),
            to: status_name(to),
        });
    }
    Ok(())
}

fn status_name(status: OffRequestStatus) -> &'static str {
    match status {
        OffRequestStatus::Pending => "pending",
        OffRequestStatus::Approved => "approved",
        OffRequestStatus::Rejected => "rejected",
    }
}
