//! Histogram metrics

use super::labels;
use metrics::histogram;
use std::time::Duration;

/// Time from the first authentication message to AuthenticationOk
pub fn auth_duration(mechanism: &'static str, elapsed: Duration) {
    histogram!("pgwire_auth_duration_seconds", labels::MECHANISM => mechanism)
        .record(elapsed.as_secs_f64());
}

/// Time from receiving a Query to sending CommandComplete or ErrorResponse
pub fn query_duration(status: &'static str, elapsed: Duration) {
    histogram!("pgwire_query_duration_seconds", labels::STATUS => status)
        .record(elapsed.as_secs_f64());
}

/// Rows returned by one query
pub fn query_rows(rows: u64) {
    histogram!("pgwire_query_rows").record(rows as f64);
}
