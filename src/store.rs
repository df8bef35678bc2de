use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;

#[derive(Debug)]
pub enum StoreError {
    /// The backing store could not be reached or answered badly.
    Unavailable(String),
    /// The store of record refused the operation.
    Engine(EngineError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            StoreError::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Engine(e) => Some(e),
            StoreError::Unavailable(_) => None,
        }
    }
}

impl From<EngineError> for StoreError {
    fn from(e: EngineError) -> Self {
        StoreError::Engine(e)
    }
}

/// Everything the booking form reads and writes.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn employees(&self) -> Result<Vec<Employee>, StoreError>;
    async fn availability(&self, employee_id: EmployeeId) -> Result<Option<EmployeeAvailability>, StoreError>;
    async fn off_requests(&self, employee_id: EmployeeId) -> Result<Vec<OffRequest>, StoreError>;
    async fn bookings_on(&self, employee_id: EmployeeId, date: NaiveDate) -> Result<Vec<Booking>, StoreError>;
    async fn bookings_on_date(&self, date: NaiveDate) -> Result<Vec<Booking>, StoreError>;
    async fn contracts(&self, client_id: ClientId) -> Result<Vec<ClientContract>, StoreError>;
    /// Create, or replace a booking with the same id.
    async fn save_booking(&self, booking: Booking) -> Result<(), StoreError>;
}

#[async_trait]
impl ScheduleStore for Engine {
    async fn employees(&self) -> Result<Vec<Employee>, StoreError> {
        Ok(self.list_employees().await)
    }

    async fn availability(&self, employee_id: EmployeeId) -> Result<Option<EmployeeAvailability>, StoreError> {
        Ok(self.get_availability(employee_id).await?)
    }

    async fn off_requests(&self, employee_id: EmployeeId) -> Result<Vec<OffRequest>, StoreError> {
        Ok(self.get_off_requests(employee_id).await?)
    }

    async fn bookings_on(&self, employee_id: EmployeeId, date: NaiveDate) -> Result<Vec<Booking>, StoreError> {
        Ok(self.get_bookings_on(employee_id, date).await?)
    }

    async fn bookings_on_date(&self, date: NaiveDate) -> Result<Vec<Booking>, StoreError> {
        Ok(self.get_bookings_on_date(date).await)
    }

    async fn contracts(&self, client_id: ClientId) -> Result<Vec<ClientContract>, StoreError> {
        Ok(self.get_contracts(client_id))
    }

    async fn save_booking(&self, booking: Booking) -> Result<(), StoreError> {
        if self.get_employee_for_entity(&booking.id).is_some() {
            self.update_booking(booking).await?;
        } else {
            self.create_booking(booking).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: ScheduleStore + ?Sized> ScheduleStore for Arc<S> {
    async fn employees(&self) -> Result<Vec<Employee>, StoreError> {
        (**self).employees().await
    }

    async fn availability(&self, employee_id: EmployeeId) -> Result<Option<EmployeeAvailability>, StoreError> {
        (**self).availability(employee_id).await
    }

    async fn off_requests(&self, employee_id: EmployeeId) -> Result<Vec<OffRequest>, StoreError> {
        (**self).off_requests(employee_id).await
    }

    async fn bookings_on(&self, employee_id: EmployeeId, date: NaiveDate) -> Result<Vec<Booking>, StoreError> {
        (**self).bookings_on(employee_id, date).await
    }

    async fn bookings_on_date(&self, date: NaiveDate) -> Result<Vec<Booking>, StoreError> {
        (**self).bookings_on_date(date).await
    }

    async fn contracts(&self, client_id: ClientId) -> Result<Vec<ClientContract>, StoreError> {
        (**self).contracts(client_id).await
    }

    async fn save_booking(&self, booking: Booking) -> Result<(), StoreError> {
        (**self).save_booking(booking).await
    }
}

// ── Read-through cache ───────────────────────────────────

/// One cached read per key. Every invalidation bumps the key's generation,
/// and a miss only fills the entry if the generation it saw before going to
/// the inner store is still current afterwards.
struct Slots<K, V> {
    entries: DashMap<K, V>,
    generations: DashMap<K, u64>,
}

impl<K: Eq + Hash + Copy, V: Clone> Slots<K, V> {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    /// Call before reading the inner store.
    fn generation(&self, key: K) -> u64 {
        *self.generations.entry(key).or_insert(0)
    }

    /// The generation guard is held across the insert, so an invalidation
    /// either waits and removes the entry or bumps first and blocks the fill.
    fn fill(&self, key: K, seen: u64, value: V) -> bool {
        match self.generations.get(&key) {
            Some(current) if *current == seen => {
                self.entries.insert(key, value);
                true
            }
            _ => false,
        }
    }

    fn invalidate(&self, key: &K) {
        if let Some(mut generation) = self.generations.get_mut(key) {
            *generation += 1;
        }
        self.entries.remove(key);
    }

    fn clear(&self) {
        for mut generation in self.generations.iter_mut() {
            *generation += 1;
        }
        self.entries.clear();
    }
}

/// Caches the slow-moving reads (availability, off-requests, contracts) in
/// front of another store. Bookings always go to the inner store.
///
/// Writes through this cache invalidate what they touch. Writes made
/// elsewhere are only seen after `follow` is wired to a change feed.
pub struct CachedStore<S> {
    inner: S,
    availability: Slots<EmployeeId, Option<EmployeeAvailability>>,
    off_requests: Slots<EmployeeId, Vec<OffRequest>>,
    contracts: Slots<ClientId, Vec<ClientContract>>,
}

impl<S: ScheduleStore> CachedStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            availability: Slots::new(),
            off_requests: Slots::new(),
            contracts: Slots::new(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Drop whatever `event` makes stale.
    pub fn invalidate(&self, event: &Event) {
        match event {
            Event::AvailabilitySet { availability } => {
                self.availability.invalidate(&availability.employee_id);
            }
            Event::AvailabilityCleared { employee_id } => {
                self.availability.invalidate(employee_id);
            }
            Event::OffRequestSubmitted { request } => {
                self.off_requests.invalidate(&request.employee_id);
            }
            Event::OffRequestDecided { employee_id, .. } | Event::OffRequestWithdrawn { employee_id, .. } => {
                self.off_requests.invalidate(employee_id);
            }
            Event::ContractSaved { contract } => {
                self.contracts.invalidate(&contract.client_id);
            }
            Event::EmployeeAdded { .. }
            | Event::EmployeeUpdated { .. }
            | Event::BookingCreated { .. }
            | Event::BookingUpdated { .. }
            | Event::BookingStatusChanged { .. } => {}
        }
    }

    pub fn clear(&self) {
        self.availability.clear();
        self.off_requests.clear();
        self.contracts.clear();
    }

    /// Invalidate from a change feed until it closes. A lagged receiver
    /// may have missed anything, so it clears the whole cache.
    pub fn follow(self: &Arc<Self>, mut rx: broadcast::Receiver<Event>) -> JoinHandle<()>
    where
        S: 'static,
    {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => cache.invalidate(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("cache feed lagged by {n} events, clearing");
                        cache.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("cache feed closed");
        })
    }
}

fn hit() {
    metrics::counter!(observability::CACHE_HITS_TOTAL).increment(1);
}

fn miss() {
    metrics::counter!(observability::CACHE_MISSES_TOTAL).increment(1);
}

#[async_trait]
impl<S: ScheduleStore> ScheduleStore for CachedStore<S> {
    async fn employees(&self) -> Result<Vec<Employee>, StoreError> {
        self.inner.employees().await
    }

    async fn availability(&self, employee_id: EmployeeId) -> Result<Option<EmployeeAvailability>, StoreError> {
        if let Some(cached) = self.availability.get(&employee_id) {
            hit();
            return Ok(cached);
        }
        miss();
        let seen = self.availability.generation(employee_id);
        let fresh = self.inner.availability(employee_id).await?;
        self.availability.fill(employee_id, seen, fresh.clone());
        Ok(fresh)
    }

    async fn off_requests(&self, employee_id: EmployeeId) -> Result<Vec<OffRequest>, StoreError> {
        if let Some(cached) = self.off_requests.get(&employee_id) {
            hit();
            return Ok(cached);
        }
        miss();
        let seen = self.off_requests.generation(employee_id);
        let fresh = self.inner.off_requests(employee_id).await?;
        if !self.off_requests.fill(employee_id, seen, fresh.clone()) {
            debug!("off-requests for {employee_id} changed mid-read, not caching");
        }
        Ok(fresh)
    }

    async fn bookings_on(&self, employee_id: EmployeeId, date: NaiveDate) -> Result<Vec<Booking>, StoreError> {
        self.inner.bookings_on(employee_id, date).await
    }

    async fn bookings_on_date(&self, date: NaiveDate) -> Result<Vec<Booking>, StoreError> {
        self.inner.bookings_on_date(date).await
    }

    async fn contracts(&self, client_id: ClientId) -> Result<Vec<ClientContract>, StoreError> {
        if let Some(cached) = self.contracts.get(&client_id) {
            hit();
            return Ok(cached);
        }
        miss();
        let seen = self.contracts.generation(client_id);
        let fresh = self.inner.contracts(client_id).await?;
        self.contracts.fill(client_id, seen, fresh.clone());
        Ok(fresh)
    }

    async fn save_booking(&self, booking: Booking) -> Result<(), StoreError> {
        self.inner.save_booking(booking).await
    }
}
