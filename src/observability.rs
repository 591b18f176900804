use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "tablebook_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "tablebook_request_duration_seconds";

/// Counter: booking rule rejections. Labels: op, kind.
pub const RULE_REJECTIONS_TOTAL: &str = "tablebook_rule_rejections_total";

/// Counter: reservations written. Labels: op, status.
pub const RESERVATIONS_WRITTEN_TOTAL: &str = "tablebook_reservations_written_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tablebook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tablebook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tablebook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tablebook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tablebook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a request to a short label for metrics.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::CreateTable { .. } => "create_table",
        Request::RemoveTable { .. } => "remove_table",
        Request::ListTables { .. } => "list_tables",
        Request::GetConfig { .. } => "get_config",
        Request::UpdateConfig { .. } => "update_config",
        Request::CreateReservation { .. } => "create_reservation",
        Request::UpdateReservation { .. } => "update_reservation",
        Request::ApproveReservation { .. } => "approve_reservation",
        Request::RejectReservation { .. } => "reject_reservation",
        Request::CancelReservation { .. } => "cancel_reservation",
        Request::CompleteReservation { .. } => "complete_reservation",
        Request::GetReservation { .. } => "get_reservation",
        Request::ListReservations { .. } => "list_reservations",
        Request::ListPendingApprovals { .. } => "list_pending_approvals",
        Request::Subscribe { .. } => "subscribe",
    }
}
