use std::net::SocketAddr;

use crate::engine::Rejection;

// ── Validation ──────────────────────────────────────────────────

/// Counter: candidate checks run. Labels: stage (refresh|submit), outcome.
pub const VALIDATIONS_TOTAL: &str = "tidyslot_validations_total";

/// Histogram: end-to-end validation latency in seconds, fetches included.
pub const VALIDATION_DURATION_SECONDS: &str = "tidyslot_validation_duration_seconds";

/// Counter: rejections by reason label.
pub const REJECTIONS_TOTAL: &str = "tidyslot_rejections_total";

/// Counter: store reads or writes that failed and blocked a submission.
pub const STORE_FAILURES_TOTAL: &str = "tidyslot_store_failures_total";

/// Counter: refresh results dropped because newer input superseded them.
pub const STALE_RESULTS_DISCARDED_TOTAL: &str = "tidyslot_stale_results_discarded_total";

/// Counter: bookings persisted after passing validation.
pub const BOOKINGS_SAVED_TOTAL: &str = "tidyslot_bookings_saved_total";

// ── Cache ───────────────────────────────────────────────────────

pub const CACHE_HITS_TOTAL: &str = "tidyslot_cache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "tidyslot_cache_misses_total";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tidyslot_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "tidyslot_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op without a port.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short, stable label for a rejection.
pub fn rejection_label(rejection: &Rejection) -> &'static str {
    match rejection {
        Rejection::MissingField(_) => "missing_field",
        Rejection::TimeOff { .. } => "time_off",
        Rejection::NotWorkingDay => "not_working_day",
        Rejection::OutsideWorkingHours => "outside_working_hours",
        Rejection::Overlap { .. } => "overlap",
        Rejection::NoActiveContract { .. } => "no_active_contract",
        Rejection::CouldNotValidate => "could_not_validate",
        Rejection::CouldNotSave => "could_not_save",
    }
}
