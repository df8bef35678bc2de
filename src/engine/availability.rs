use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::model::*;

/// What to answer for an employee nobody has configured availability for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MissingRecordPolicy {
    /// No record means always available.
    #[default]
    Open,
    /// No record means never available.
    Closed,
}

// ── Availability Algorithm ────────────────────────────────────────

/// Is the employee generally working on `date`?
///
/// First match wins: monthly override, then exceptions (unavailable), then the
/// weekly pattern. A missing record defers to `missing`.
pub fn is_available(
    record: Option<&EmployeeAvailability>,
    date: NaiveDate,
    missing: MissingRecordPolicy,
) -> bool {
    let Some(record) = record else {
        return missing == MissingRecordPolicy::Open;
    };
    if let Some(&explicit) = record.monthly_availability.get(&date) {
        return explicit;
    }
    if record.exceptions.contains_key(&date) {
        return false;
    }
    record.available_days.contains(&date.weekday())
}

/// Open slots inside the employee's working window on `date`, with every
/// non-cancelled booking on that date carved out. Empty on non-working days.
pub fn free_windows(
    record: Option<&EmployeeAvailability>,
    bookings: &[Booking],
    date: NaiveDate,
    missing: MissingRecordPolicy,
) -> Vec<Window> {
    if !is_available(record, date, missing) {
        return Vec::new();
    }
    let working = match record {
        Some(r) if r.start_time < r.end_time => r.working_window(),
        Some(_) => return Vec::new(),
        None => Window::new(0, MINUTES_PER_DAY),
    };

    let mut taken: Vec<Window> = bookings
        .iter()
        .filter(|b| b.date == date && !b.is_cancelled())
        .map(Booking::window)
        .filter(|w| !w.is_empty())
        .collect();
    taken.sort_by_key(|w| w.start);
    let taken = merge_overlapping(&taken);

    subtract_windows(&[working], &taken)
}

/// Merge sorted overlapping/adjacent windows into disjoint windows.
pub fn merge_overlapping(sorted: &[Window]) -> Vec<Window> {
    let mut merged: Vec<Window> = Vec::new();
    for &w in sorted {
        if let Some(last) = merged.last_mut()
            && w.start <= last.end
        {
            last.end = last.end.max(w.end);
            continue;
        }
        merged.push(w);
    }
    merged
}

/// `base` minus `to_remove`; both sorted and disjoint.
pub fn subtract_windows(base: &[Window], to_remove: &[Window]) -> Vec<Window> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut cursor = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > cursor {
                result.push(Window::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
            j += 1;
        }

        if cursor < b.end {
            result.push(Window::new(cursor, b.end));
        }
    }

    result
}
