use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{EmployeeId, Event};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for applied events: one firehose plus one channel per employee.
pub struct NotifyHub {
    all: broadcast::Sender<Event>,
    per_employee: DashMap<EmployeeId, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            per_employee: DashMap::new(),
        }
    }

    /// Every event, in apply order.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Events touching one employee's schedule. Creates the channel if needed.
    pub fn subscribe(&self, employee_id: EmployeeId) -> broadcast::Receiver<Event> {
        self.per_employee
            .entry(employee_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Fan an event out. No-op where nobody is listening.
    pub fn send(&self, event: &Event) {
        let _ = self.all.send(event.clone());
        for employee_id in event.employees() {
            if let Some(sender) = self.per_employee.get(&employee_id) {
                let _ = sender.send(event.clone());
            }
        }
    }

    /// Drop channels whose receivers are all gone.
    pub fn prune(&self) {
        self.per_employee.retain(|_, sender| sender.receiver_count() > 0);
    }
}
