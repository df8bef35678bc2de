use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type EmployeeId = Ulid;
pub type ClientId = Ulid;
pub type BookingId = Ulid;
pub type OffRequestId = Ulid;
pub type ContractId = Ulid;

/// Minutes since local midnight.
pub type Minutes = i32;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Local wall-clock time, `HH:mm` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self((hour * 60 + minute) as u16))
        } else {
            None
        }
    }

    pub fn minutes(self) -> Minutes {
        self.0 as Minutes
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid time of day: {s}"))?;
        if h.len() != 2 || m.len() != 2 {
            return Err(format!("invalid time of day: {s}"));
        }
        let hour = h.parse().map_err(|_| format!("invalid hour: {s}"))?;
        let minute = m.parse().map_err(|_| format!("invalid minute: {s}"))?;
        TimeOfDay::new(hour, minute).ok_or_else(|| format!("time of day out of range: {s}"))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

/// Half-open minute window `[start, end)` on a single calendar date.
/// `end` may run past midnight; windows are only ever compared within one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Minutes,
    pub end: Minutes,
}

impl Window {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: TimeOfDay, duration_minutes: u32) -> Self {
        let start = start.minutes();
        Self::new(start, start + duration_minutes as Minutes)
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Empty windows overlap nothing.
    pub fn overlaps(&self, other: &Window) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }

    pub fn contains_window(&self, other: &Window) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Roster ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub active: bool,
}

// ── Availability ─────────────────────────────────────────────────

/// Recurring weekly pattern plus date-keyed overrides. One per employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeAvailability {
    pub employee_id: EmployeeId,
    pub available_days: HashSet<Weekday>,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    /// Dates marked unavailable regardless of the weekly pattern.
    #[serde(default)]
    pub exceptions: BTreeMap<NaiveDate, String>,
    /// Explicit per-date answers; beats both exceptions and the weekly pattern.
    #[serde(default)]
    pub monthly_availability: BTreeMap<NaiveDate, bool>,
}

impl EmployeeAvailability {
    pub fn weekly(employee_id: EmployeeId, days: &[Weekday], start_time: TimeOfDay, end_time: TimeOfDay) -> Self {
        Self {
            employee_id,
            available_days: days.iter().copied().collect(),
            start_time,
            end_time,
            exceptions: BTreeMap::new(),
            monthly_availability: BTreeMap::new(),
        }
    }

    pub fn working_window(&self) -> Window {
        Window::new(self.start_time.minutes(), self.end_time.minutes())
    }
}

// ── Off-requests ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffRequestStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationType {
    SingleDay,
    MultiDay,
    /// A hand-picked set of dates; `start_date`/`end_date` are only its bounds.
    NonConsecutive,
    FullMonth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffRequest {
    pub id: OffRequestId,
    pub employee_id: EmployeeId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub selected_dates: Vec<NaiveDate>,
    pub reason: String,
    pub duration_type: DurationType,
    pub status: OffRequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decided_by: Option<Ulid>,
}

impl OffRequest {
    /// True if this request's dates include `date`, whatever its status.
    pub fn covers(&self, date: NaiveDate) -> bool {
        match self.duration_type {
            DurationType::NonConsecutive => self.selected_dates.binary_search(&date).is_ok(),
            _ => self.start_date <= date && date <= self.end_date,
        }
    }

    /// Only approved requests take an employee off the schedule.
    pub fn blocks(&self, date: NaiveDate) -> bool {
        self.status == OffRequestStatus::Approved && self.covers(date)
    }
}

/// Last calendar day of `date`'s month.
pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (y, m) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|first_of_next| first_of_next.pred_opt())
        .unwrap_or(date)
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStatus::Scheduled => write!(f, "scheduled"),
            BookingStatus::InProgress => write!(f, "in-progress"),
            BookingStatus::Completed => write!(f, "completed"),
            BookingStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Billable work; needs an active client contract.
    Cleaning,
    /// Non-billable site visit.
    Visit,
}

impl ServiceType {
    pub fn is_billable(self) -> bool {
        matches!(self, ServiceType::Cleaning)
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cleaning" => Ok(ServiceType::Cleaning),
            "visit" => Ok(ServiceType::Visit),
            _ => Err(format!("invalid service type: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub client_id: ClientId,
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub duration_minutes: u32,
    pub status: BookingStatus,
    pub service_type: ServiceType,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Booking {
    pub fn window(&self) -> Window {
        Window::starting_at(self.start_time, self.duration_minutes)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == BookingStatus::Cancelled
    }
}

// ── Contracts ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContract {
    pub id: ContractId,
    pub client_id: ClientId,
    pub status: ContractStatus,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl ClientContract {
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.status == ContractStatus::Active
            && self.start_date <= date
            && self.end_date.is_none_or(|end| date <= end)
    }
}

/// Journal record format. Flat, one variant per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    EmployeeAdded {
        employee: Employee,
    },
    EmployeeUpdated {
        employee: Employee,
    },
    AvailabilitySet {
        availability: EmployeeAvailability,
    },
    AvailabilityCleared {
        employee_id: EmployeeId,
    },
    OffRequestSubmitted {
        request: OffRequest,
    },
    OffRequestDecided {
        id: OffRequestId,
        employee_id: EmployeeId,
        status: OffRequestStatus,
        decided_at: DateTime<Utc>,
        decided_by: Option<Ulid>,
    },
    OffRequestWithdrawn {
        id: OffRequestId,
        employee_id: EmployeeId,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingUpdated {
        booking: Booking,
        previous_employee_id: EmployeeId,
    },
    BookingStatusChanged {
        id: BookingId,
        employee_id: EmployeeId,
        status: BookingStatus,
    },
    ContractSaved {
        contract: ClientContract,
    },
}

impl Event {
    /// Employees whose schedule this event touches.
    pub fn employees(&self) -> Vec<EmployeeId> {
        match self {
            Event::EmployeeAdded { employee } | Event::EmployeeUpdated { employee } => vec![employee.id],
            Event::AvailabilitySet { availability } => vec![availability.employee_id],
            Event::AvailabilityCleared { employee_id }
            | Event::OffRequestDecided { employee_id, .. }
            | Event::OffRequestWithdrawn { employee_id, .. }
            | Event::BookingStatusChanged { employee_id, .. } => vec![*employee_id],
            Event::OffRequestSubmitted { request } => vec![request.employee_id],
            Event::BookingCreated { booking } => vec![booking.employee_id],
            Event::BookingUpdated {
                booking,
                previous_employee_id,
            } => {
                if booking.employee_id == *previous_employee_id {
                    vec![booking.employee_id]
                } else {
                    vec![*previous_employee_id, booking.employee_id]
                }
            }
            Event::ContractSaved { .. } => Vec::new(),
        }
    }
}
