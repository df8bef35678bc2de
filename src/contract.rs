use chrono::NaiveDate;

use crate::engine::{Rejection, Verdict};
use crate::model::{ClientContract, ClientId, ServiceType};

/// Billable work needs a contract that is active on the booking date.
/// Fails closed: no contracts, or none active, rejects.
pub fn can_schedule_for_client(contracts: &[ClientContract], client_id: ClientId, on: NaiveDate) -> Verdict {
    let active = contracts
        .iter()
        .any(|c| c.client_id == client_id && c.is_active_on(on));
    if active {
        Verdict::Accepted
    } else {
        Verdict::Rejected(Rejection::NoActiveContract { client_id })
    }
}

/// Whether the gate applies at all. Visits are never gated.
pub fn needs_contract(service_type: ServiceType) -> bool {
    service_type.is_billable()
}
