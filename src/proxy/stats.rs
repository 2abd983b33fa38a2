//! Per-route success/failure accounting.

use tracing::warn;

use crate::catalog::RouteStore;
use crate::observability::metrics;
use crate::proxy::context::OriginOutcome;

/// Fold one more sample into a running mean, rounding half up.
///
/// `old_success_count` is the number of samples already in `old_avg`.
pub fn moving_average(old_avg: u64, old_success_count: u64, elapsed_ms: u64) -> u64 {
    let n = old_success_count as u128;
    let total = old_avg as u128 * n + elapsed_ms as u128;
    let denom = n + 1;
    ((total * 2 + denom) / (denom * 2)) as u64
}

/// Persist the origin outcome of one request.
///
/// Requests that never reached the origin (rejections, cache hits) leave the
/// counters untouched. Store failures are logged and swallowed; the response
/// has already been produced.
pub async fn record(store: &dyn RouteStore, route_id: &str, outcome: Option<OriginOutcome>) {
    let result = match outcome {
        Some(OriginOutcome::Success { elapsed_ms }) => store.record_success(route_id, elapsed_ms).await,
        Some(OriginOutcome::Failure) => {
            metrics::record_origin_failure(route_id);
            store.record_fail(route_id).await
        }
        None => return,
    };
    if let Err(e) = result {
        warn!(route = %route_id, error = %e, "Failed to record route statistics");
    }
}
