use std::net::SocketAddr;

use crate::protocol::Request;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "innkeep_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "innkeep_request_duration_seconds";

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: bookings admitted as pending.
pub const BOOKINGS_ADMITTED_TOTAL: &str = "innkeep_bookings_admitted_total";

/// Counter: admissions rejected because the unit was taken.
pub const ADMISSION_CONFLICTS_TOTAL: &str = "innkeep_admission_conflicts_total";

/// Counter: bookings moved to completed by the sweeper.
pub const BOOKINGS_COMPLETED_TOTAL: &str = "innkeep_bookings_completed_total";

/// Gauge: registered units.
pub const UNITS_REGISTERED: &str = "innkeep_units_registered";

// ── Connection and storage metrics ──────────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "innkeep_connections_active";
pub const CONNECTIONS_TOTAL: &str = "innkeep_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "innkeep_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "innkeep_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op when `port` is `None`.
pub fn init(port: Option<u16>) -> anyhow::Result<()> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://{addr}/metrics");
    Ok(())
}

/// Short label for a request, used as the `op` metric label.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::RegisterUnit { .. } => "register_unit",
        Request::UpdateUnit { .. } => "update_unit",
        Request::GetUnit { .. } => "get_unit",
        Request::ListUnits { .. } => "list_units",
        Request::IsAvailable { .. } => "is_available",
        Request::FilterAvailable { .. } => "filter_available",
        Request::UnavailableCalendar { .. } => "unavailable_calendar",
        Request::BlockingRanges { .. } => "blocking_ranges",
        Request::AdmitBooking { .. } => "admit_booking",
        Request::TransitionBooking { .. } => "transition_booking",
        Request::GetBooking { .. } => "get_booking",
        Request::BookingsForUnit { .. } => "bookings_for_unit",
        Request::BookingsForUser { .. } => "bookings_for_user",
        Request::BookingsForHost { .. } => "bookings_for_host",
        Request::CreateBlockedDate { .. } => "create_blocked_date",
        Request::RemoveBlockedDate { .. } => "remove_blocked_date",
        Request::BlockedDates { .. } => "blocked_dates",
        Request::Listen { .. } => "listen",
        Request::Unlisten { .. } => "unlisten",
        Request::UnlistenAll => "unlisten_all",
    }
}
