use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use futures::future::try_join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::contract::{can_schedule_for_client, needs_contract};
use crate::engine::{check_candidate, list_unavailable, Candidate, CheckSettings, DaySchedule, Rejection, Slot, Verdict};
use crate::limits::{MAX_BOOKING_MINUTES, MIN_BOOKING_MINUTES};
use crate::model::*;
use crate::observability;
use crate::store::{ScheduleStore, StoreError};

/// Booking form fields as the user has filled them in so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingDraft {
    /// Set when editing an existing booking.
    pub booking_id: Option<BookingId>,
    pub client_id: Option<ClientId>,
    pub employee_id: Option<EmployeeId>,
    pub date: Option<NaiveDate>,
    pub start_time: Option<TimeOfDay>,
    pub duration_minutes: Option<u32>,
    pub service_type: Option<ServiceType>,
    pub notes: Option<String>,
}

impl BookingDraft {
    /// Date, start and a usable duration, if all are filled in.
    pub fn slot(&self) -> Option<Slot> {
        let duration_minutes = self
            .duration_minutes
            .filter(|d| (MIN_BOOKING_MINUTES..=MAX_BOOKING_MINUTES).contains(d))?;
        Some(Slot {
            date: self.date?,
            start_time: self.start_time?,
            duration_minutes,
        })
    }

    /// Presence check for the fields the conflict checker needs.
    /// An out-of-range duration counts as not filled in.
    pub fn into_candidate(&self) -> Result<Candidate, Rejection> {
        let employee_id = self.employee_id.ok_or(Rejection::MissingField("employee"))?;
        let date = self.date.ok_or(Rejection::MissingField("date"))?;
        let start_time = self.start_time.ok_or(Rejection::MissingField("start time"))?;
        let duration_minutes = self
            .duration_minutes
            .filter(|d| (MIN_BOOKING_MINUTES..=MAX_BOOKING_MINUTES).contains(d))
            .ok_or(Rejection::MissingField("duration"))?;
        Ok(Candidate {
            employee_id,
            slot: Slot {
                date,
                start_time,
                duration_minutes,
            },
            exclude_booking_id: self.booking_id,
        })
    }

    /// Full presence check, producing the booking that would be saved.
    pub fn into_booking(&self, status: BookingStatus) -> Result<Booking, Rejection> {
        let client_id = self.client_id.ok_or(Rejection::MissingField("client"))?;
        let candidate = self.into_candidate()?;
        let service_type = self.service_type.ok_or(Rejection::MissingField("service type"))?;
        Ok(Booking {
            id: self.booking_id.unwrap_or_else(ulid::Ulid::new),
            client_id,
            employee_id: candidate.employee_id,
            date: candidate.slot.date,
            start_time: candidate.slot.start_time,
            duration_minutes: candidate.slot.duration_minutes,
            status,
            service_type,
            notes: self.notes.clone(),
        })
    }
}

// ── Form state machine ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormState {
    Editing,
    Validating,
    /// Still open; the first failing reason is shown.
    Rejected(Rejection),
    /// Saved and closed.
    Accepted(Booking),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormClosed;

impl fmt::Display for FormClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "booking form already submitted")
    }
}

impl std::error::Error for FormClosed {}

#[derive(Debug, Clone)]
pub struct BookingForm {
    draft: BookingDraft,
    state: FormState,
    /// Status of the booking being edited, kept on save.
    existing_status: Option<BookingStatus>,
}

impl Default for BookingForm {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingForm {
    pub fn new() -> Self {
        Self {
            draft: BookingDraft::default(),
            state: FormState::Editing,
            existing_status: None,
        }
    }

    /// Open the form on an existing booking. It will not conflict with itself.
    pub fn edit_existing(booking: &Booking) -> Self {
        Self {
            draft: BookingDraft {
                booking_id: Some(booking.id),
                client_id: Some(booking.client_id),
                employee_id: Some(booking.employee_id),
                date: Some(booking.date),
                start_time: Some(booking.start_time),
                duration_minutes: Some(booking.duration_minutes),
                service_type: Some(booking.service_type),
                notes: booking.notes.clone(),
            },
            state: FormState::Editing,
            existing_status: Some(booking.status),
        }
    }

    pub fn draft(&self) -> &BookingDraft {
        &self.draft
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, FormState::Accepted(_))
    }

    /// Change fields. A rejected form goes back to editing.
    pub fn edit(&mut self, change: impl FnOnce(&mut BookingDraft)) -> Result<&BookingDraft, FormClosed> {
        if !self.is_open() {
            return Err(FormClosed);
        }
        let booking_id = self.draft.booking_id;
        change(&mut self.draft);
        self.draft.booking_id = booking_id;
        self.state = FormState::Editing;
        Ok(&self.draft)
    }
}

// ── Controller ───────────────────────────────────────────

/// Identifies one refresh; only the newest may publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

/// Live validation result for the form as it was at `token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub token: RequestToken,
    /// Employees to grey out in the selector.
    pub unavailable: HashSet<EmployeeId>,
    /// Verdict for the chosen employee, when one is chosen.
    pub verdict: Option<Verdict>,
}

pub struct BookingController<S> {
    store: S,
    settings: CheckSettings,
    latest: AtomicU64,
    feedback: watch::Sender<Option<Feedback>>,
}

impl<S: ScheduleStore> BookingController<S> {
    pub fn new(store: S, settings: CheckSettings) -> Self {
        Self {
            store,
            settings,
            latest: AtomicU64::new(0),
            feedback: watch::channel(None).0,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &CheckSettings {
        &self.settings
    }

    /// Latest published feedback.
    pub fn subscribe(&self) -> watch::Receiver<Option<Feedback>> {
        self.feedback.subscribe()
    }

    fn next_token(&self) -> RequestToken {
        RequestToken(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_latest(&self, token: RequestToken) -> bool {
        self.latest.load(Ordering::SeqCst) == token.0
    }

    /// Recompute live feedback for `draft`. Returns `None` when a newer
    /// refresh started while this one was fetching, or when the draft has
    /// no usable slot yet.
    pub async fn refresh(&self, draft: &BookingDraft) -> Option<Feedback> {
        let token = self.next_token();
        let slot = draft.slot()?;
        let started = Instant::now();

        let (unavailable, verdict) = match self.day_schedules(slot.date).await {
            Ok(days) => {
                let unavailable = list_unavailable(&days, &slot, draft.booking_id, &self.settings);
                let verdict = match draft.employee_id {
                    None => None,
                    Some(employee_id) => {
                        let candidate = Candidate {
                            employee_id,
                            slot,
                            exclude_booking_id: draft.booking_id,
                        };
                        // Off the active roster: read the employee directly, as submit does.
                        let fetched = match days.iter().find(|d| d.employee_id == employee_id) {
                            Some(day) => Ok(check_candidate(day, &candidate, &self.settings)),
                            None => self
                                .employee_day(employee_id, slot.date)
                                .await
                                .map(|day| check_candidate(&day, &candidate, &self.settings)),
                        };
                        Some(fetched.unwrap_or_else(|e| {
                            warn!("refresh could not read schedule for {employee_id}: {e}");
                            metrics::counter!(observability::STORE_FAILURES_TOTAL, "op" => "read").increment(1);
                            Verdict::Rejected(Rejection::CouldNotValidate)
                        }))
                    }
                };
                (unavailable, verdict)
            }
            Err(e) => {
                warn!("refresh could not read schedule: {e}");
                metrics::counter!(observability::STORE_FAILURES_TOTAL, "op" => "read").increment(1);
                (HashSet::new(), Some(Verdict::Rejected(Rejection::CouldNotValidate)))
            }
        };
        record_validation("refresh", verdict.as_ref(), started);

        let feedback = Feedback {
            token,
            unavailable,
            verdict,
        };
        let published = self.feedback.send_if_modified(|current| {
            if self.is_latest(token) {
                *current = Some(feedback.clone());
                true
            } else {
                false
            }
        });
        if !published {
            debug!("discarding stale refresh {token:?}");
            metrics::counter!(observability::STALE_RESULTS_DISCARDED_TOTAL).increment(1);
            return None;
        }
        Some(feedback)
    }

    async fn day_schedules(&self, date: NaiveDate) -> Result<Vec<DaySchedule>, StoreError> {
        let (employees, bookings) = tokio::try_join!(self.store.employees(), self.store.bookings_on_date(date))?;

        let mut by_employee: HashMap<EmployeeId, Vec<Booking>> = HashMap::new();
        for booking in bookings {
            by_employee.entry(booking.employee_id).or_default().push(booking);
        }

        let fetches = employees.into_iter().filter(|e| e.active).map(|e| {
            let bookings = by_employee.remove(&e.id).unwrap_or_default();
            async move {
                let (availability, off_requests) =
                    tokio::try_join!(self.store.availability(e.id), self.store.off_requests(e.id))?;
                Ok::<_, StoreError>(DaySchedule {
                    employee_id: e.id,
                    availability,
                    off_requests,
                    bookings,
                })
            }
        });
        try_join_all(fetches).await
    }

    async fn employee_day(&self, employee_id: EmployeeId, date: NaiveDate) -> Result<DaySchedule, StoreError> {
        let (availability, off_requests, bookings) = tokio::try_join!(
            self.store.availability(employee_id),
            self.store.off_requests(employee_id),
            self.store.bookings_on(employee_id, date),
        )?;
        Ok(DaySchedule {
            employee_id,
            availability,
            off_requests,
            bookings,
        })
    }

    /// Validate against fresh reads and save. The form stays open with
    /// the first failing reason on any failure; nothing is persisted then.
    pub async fn submit(&self, form: &mut BookingForm) -> Result<Booking, Rejection> {
        if let FormState::Accepted(booking) = &form.state {
            return Ok(booking.clone());
        }
        form.state = FormState::Validating;
        let started = Instant::now();

        let status = form.existing_status.unwrap_or(BookingStatus::Scheduled);
        let booking = match form.draft.into_booking(status) {
            Ok(b) => b,
            Err(rejection) => return Err(self.reject(form, rejection, started)),
        };
        let candidate = Candidate {
            employee_id: booking.employee_id,
            slot: Slot {
                date: booking.date,
                start_time: booking.start_time,
                duration_minutes: booking.duration_minutes,
            },
            exclude_booking_id: form.draft.booking_id,
        };

        let gated = needs_contract(booking.service_type);
        let fetched = tokio::try_join!(
            self.employee_day(booking.employee_id, booking.date),
            async {
                if gated {
                    self.store.contracts(booking.client_id).await
                } else {
                    Ok(Vec::new())
                }
            },
        );
        let (day, contracts) = match fetched {
            Ok(parts) => parts,
            Err(e) => {
                warn!("submit could not read schedule for {}: {e}", booking.employee_id);
                metrics::counter!(observability::STORE_FAILURES_TOTAL, "op" => "read").increment(1);
                return Err(self.reject(form, Rejection::CouldNotValidate, started));
            }
        };

        let verdict = check_candidate(&day, &candidate, &self.settings).and_then(|| {
            if gated {
                can_schedule_for_client(&contracts, booking.client_id, booking.date)
            } else {
                Verdict::Accepted
            }
        });
        if let Verdict::Rejected(rejection) = verdict {
            return Err(self.reject(form, rejection, started));
        }

        if let Err(e) = self.store.save_booking(booking.clone()).await {
            warn!("saving booking {} failed: {e}", booking.id);
            metrics::counter!(observability::STORE_FAILURES_TOTAL, "op" => "write").increment(1);
            return Err(self.reject(form, Rejection::CouldNotSave, started));
        }

        record_validation("submit", Some(&Verdict::Accepted), started);
        metrics::counter!(observability::BOOKINGS_SAVED_TOTAL).increment(1);
        info!(
            "booking {} saved for {} on {} at {}",
            booking.id, booking.employee_id, booking.date, booking.start_time
        );
        form.state = FormState::Accepted(booking.clone());
        Ok(booking)
    }

    fn reject(&self, form: &mut BookingForm, rejection: Rejection, started: Instant) -> Rejection {
        let verdict = Verdict::Rejected(rejection.clone());
        record_validation("submit", Some(&verdict), started);
        debug!("submit rejected: {rejection}");
        form.state = FormState::Rejected(rejection.clone());
        rejection
    }
}

fn record_validation(stage: &'static str, verdict: Option<&Verdict>, started: Instant) {
    let outcome = match verdict {
        None | Some(Verdict::Accepted) => "accepted",
        Some(Verdict::Rejected(_)) => "rejected",
    };
    metrics::counter!(observability::VALIDATIONS_TOTAL, "stage" => stage, "outcome" => outcome).increment(1);
    metrics::histogram!(observability::VALIDATION_DURATION_SECONDS, "stage" => stage)
        .record(started.elapsed().as_secs_f64());
    if let Some(Verdict::Rejected(rejection)) = verdict {
        metrics::counter!(
            observability::REJECTIONS_TOTAL,
            "reason" => observability::rejection_label(rejection)
        )
        .increment(1);
    }
}

/// Feed drafts in as the user types; a refresh runs once input has been
/// quiet for `debounce`. Refreshes run in their own tasks so slow fetches
/// never hold up newer input. Dropping the sender flushes the last draft.
pub fn spawn_debouncer<S>(
    controller: Arc<BookingController<S>>,
    debounce: Duration,
) -> (mpsc::Sender<BookingDraft>, JoinHandle<()>)
where
    S: ScheduleStore + 'static,
{
    let (tx, mut rx) = mpsc::channel::<BookingDraft>(64);
    let handle = tokio::spawn(async move {
        while let Some(mut draft) = rx.recv().await {
            let mut closed = false;
            loop {
                tokio::select! {
                    next = rx.recv() => match next {
                        Some(newer) => draft = newer,
                        None => {
                            closed = true;
                            break;
                        }
                    },
                    _ = tokio::time::sleep(debounce) => break,
                }
            }
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                controller.refresh(&draft).await;
            });
            if closed {
                break;
            }
        }
    });
    (tx, handle)
}

/// Controller plus debouncer built from `config`: its check settings and
/// its debounce period.
pub fn spawn_live_validation<S>(
    store: S,
    config: &Config,
) -> (Arc<BookingController<S>>, mpsc::Sender<BookingDraft>, JoinHandle<()>)
where
    S: ScheduleStore + 'static,
{
    let controller = Arc::new(BookingController::new(store, config.check_settings()));
    let (tx, handle) = spawn_debouncer(Arc::clone(&controller), config.debounce());
    debug!("live validation debounced at {:?}", config.debounce());
    (controller, tx, handle)
}
