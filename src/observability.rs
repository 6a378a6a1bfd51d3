use std::net::SocketAddr;

use crate::model::Event;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total mutations applied. Labels: event.
pub const MUTATIONS_TOTAL: &str = "headroom_mutations_total";

/// Counter: capacity-cache recomputations. Labels: kind (allocated/utilized).
pub const RECOMPUTES_TOTAL: &str = "headroom_capacity_recomputes_total";

/// Counter: conflict scans executed.
pub const CONFLICT_SCANS_TOTAL: &str = "headroom_conflict_scans_total";

/// Counter: over-commitment conflicts reported by scans.
pub const CONFLICTS_FOUND_TOTAL: &str = "headroom_conflicts_found_total";

/// Counter: timesheet state-machine guard rejections (boolean-false outcomes).
pub const GUARD_REJECTIONS_TOTAL: &str = "headroom_guard_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: persons with live state in the engine.
pub const PERSONS_TRACKED: &str = "headroom_persons_tracked";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "headroom_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "headroom_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map an Event variant to a short label for metrics.
pub fn event_label(event: &Event) -> &'static str {
    match event {
        Event::AllocationCreated { .. } => "allocation_created",
        Event::AllocationUpdated { .. } => "allocation_updated",
        Event::AllocationConfirmed { .. } => "allocation_confirmed",
        Event::AllocationCompleted { .. } => "allocation_completed",
        Event::AllocationCancelled { .. } => "allocation_cancelled",
        Event::AllocationRemoved { .. } => "allocation_removed",
        Event::CapacityGenerated { .. } => "capacity_generated",
        Event::LeaveMarked { .. } => "leave_marked",
        Event::WorkingDayMarked { .. } => "working_day_marked",
        Event::TimesheetCreated { .. } => "timesheet_created",
        Event::TimesheetUpdated { .. } => "timesheet_updated",
        Event::TimesheetSubmitted { .. } => "timesheet_submitted",
        Event::TimesheetApproved { .. } => "timesheet_approved",
        Event::TimesheetRejected { .. } => "timesheet_rejected",
        Event::TimesheetInvoiced { .. } => "timesheet_invoiced",
        Event::TimesheetRemoved { .. } => "timesheet_removed",
    }
}
