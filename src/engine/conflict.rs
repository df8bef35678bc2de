use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use tracing::debug;

use crate::limits::*;
use crate::model::*;

use super::availability::{is_available, MissingRecordPolicy};
use super::ledger::is_blocked;
use super::EngineError;

/// Why a booking cannot go ahead. A value, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingField(&'static str),
    TimeOff { request_id: OffRequestId },
    NotWorkingDay,
    OutsideWorkingHours,
    Overlap { booking_id: BookingId },
    NoActiveContract { client_id: ClientId },
    /// A read from the store failed; the check fails closed.
    CouldNotValidate,
    /// Validation passed but the write failed; nothing was persisted.
    CouldNotSave,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingField(field) => write!(f, "{field} is required"),
            Rejection::TimeOff { .. } => write!(f, "employee has approved time off on this date"),
            Rejection::NotWorkingDay => write!(f, "employee not scheduled to work this day"),
            Rejection::OutsideWorkingHours => {
                write!(f, "booking falls outside the employee's working hours")
            }
            Rejection::Overlap { .. } => write!(f, "overlaps with an existing booking"),
            Rejection::NoActiveContract { .. } => write!(f, "client has no active contract"),
            Rejection::CouldNotValidate => write!(f, "could not validate booking, please retry"),
            Rejection::CouldNotSave => write!(f, "could not save booking, please retry"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_ok(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }

    pub fn reason(&self) -> Option<&Rejection> {
        match self {
            Verdict::Accepted => None,
            Verdict::Rejected(r) => Some(r),
        }
    }

    /// Run the next check only if this one passed.
    pub fn and_then(self, next: impl FnOnce() -> Verdict) -> Verdict {
        match self {
            Verdict::Accepted => next(),
            rejected => rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckSettings {
    pub missing_record: MissingRecordPolicy,
    /// Also require the booking to sit inside the employee's start/end time.
    pub enforce_working_hours: bool,
}

/// Date, start and length of a prospective booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub duration_minutes: u32,
}

impl Slot {
    pub fn window(&self) -> Window {
        Window::starting_at(self.start_time, self.duration_minutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub employee_id: EmployeeId,
    pub slot: Slot,
    /// The booking being edited, so it never conflicts with itself.
    pub exclude_booking_id: Option<BookingId>,
}

/// Everything the checker needs about one employee on one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySchedule {
    pub employee_id: EmployeeId,
    pub availability: Option<EmployeeAvailability>,
    pub off_requests: Vec<OffRequest>,
    /// Bookings of this employee; other dates are ignored.
    pub bookings: Vec<Booking>,
}

impl DaySchedule {
    /// An employee with no availability record, time off, or bookings.
    pub fn empty(employee_id: EmployeeId) -> Self {
        Self {
            employee_id,
            availability: None,
            off_requests: Vec::new(),
            bookings: Vec::new(),
        }
    }
}

/// Approved time off, then availability, then (optionally) working hours,
/// then overlap with live bookings. First failure wins.
pub fn check_candidate(day: &DaySchedule, candidate: &Candidate, settings: &CheckSettings) -> Verdict {
    let slot = &candidate.slot;

    if let Some(request) = is_blocked(&day.off_requests, candidate.employee_id, slot.date) {
        debug!(employee = %candidate.employee_id, request = %request.id, "blocked by time off");
        return Verdict::Rejected(Rejection::TimeOff { request_id: request.id });
    }

    if !is_available(day.availability.as_ref(), slot.date, settings.missing_record) {
        return Verdict::Rejected(Rejection::NotWorkingDay);
    }

    let window = slot.window();
    if settings.enforce_working_hours
        && let Some(record) = &day.availability
        && !(record.start_time < record.end_time && record.working_window().contains_window(&window))
    {
        return Verdict::Rejected(Rejection::OutsideWorkingHours);
    }

    let clash = day.bookings.iter().find(|b| {
        b.employee_id == candidate.employee_id
            && b.date == slot.date
            && !b.is_cancelled()
            && Some(b.id) != candidate.exclude_booking_id
            && b.window().overlaps(&window)
    });
    if let Some(existing) = clash {
        debug!(employee = %candidate.employee_id, booking = %existing.id, "overlaps existing booking");
        return Verdict::Rejected(Rejection::Overlap { booking_id: existing.id });
    }

    Verdict::Accepted
}

/// Employees to grey out in the assignment selector for `slot`.
pub fn list_unavailable(
    days: &[DaySchedule],
    slot: &Slot,
    exclude_booking_id: Option<BookingId>,
    settings: &CheckSettings,
) -> HashSet<EmployeeId> {
    days.iter()
        .filter(|day| {
            let candidate = Candidate {
                employee_id: day.employee_id,
                slot: *slot,
                exclude_booking_id,
            };
            !check_candidate(day, &candidate, settings).is_ok()
        })
        .map(|day| day.employee_id)
        .collect()
}

pub(crate) fn validate_booking(booking: &Booking) -> Result<(), EngineError> {
    if booking.duration_minutes < MIN_BOOKING_MINUTES || booking.duration_minutes > MAX_BOOKING_MINUTES {
        return Err(EngineError::LimitExceeded("booking duration out of range"));
    }
    if let Some(ref notes) = booking.notes
        && notes.len() > MAX_NOTES_LEN
    {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}
