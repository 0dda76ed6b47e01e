//! Counter metrics

use super::labels;
use metrics::counter;

/// Connection accepted by the listener
pub fn connection_accepted() {
    counter!("pgwire_connections_accepted_total").increment(1);
}

/// Connection refused because the limit was reached
pub fn connection_rejected() {
    counter!("pgwire_connections_rejected_total").increment(1);
}

/// Session finished its startup phase on the given transport
pub fn session_started(transport: &'static str) {
    counter!("pgwire_sessions_started_total", "transport" => transport).increment(1);
}

/// SSLRequest answered
pub fn tls_negotiated(accepted: bool) {
    let outcome = if accepted { "accepted" } else { "declined" };
    counter!("pgwire_tls_requests_total", labels::STATUS => outcome).increment(1);
}

/// Authentication exchange started
pub fn auth_attempted(mechanism: &'static str) {
    counter!("pgwire_auth_attempted_total", labels::MECHANISM => mechanism).increment(1);
}

/// Authentication exchange succeeded
pub fn auth_successful(mechanism: &'static str) {
    counter!("pgwire_auth_successful_total", labels::MECHANISM => mechanism).increment(1);
}

/// Authentication exchange failed
pub fn auth_failed(mechanism: &'static str, reason: &'static str) {
    counter!(
        "pgwire_auth_failed_total",
        labels::MECHANISM => mechanism,
        labels::REASON => reason
    )
    .increment(1);
}

/// Query finished with the given status
pub fn query_completed(status: &'static str) {
    counter!("pgwire_queries_total", labels::STATUS => status).increment(1);
}

/// Rows streamed to a client
pub fn rows_sent(count: u64) {
    counter!("pgwire_rows_sent_total").increment(count);
}

/// Cancel request received
pub fn cancel_requested(matched: bool) {
    let outcome = if matched { "matched" } else { "unmatched" };
    counter!("pgwire_cancel_requests_total", labels::STATUS => outcome).increment(1);
}

/// Error reported to a client or closing a session
pub fn error(category: &'static str) {
    counter!("pgwire_errors_total", labels::CATEGORY => category).increment(1);
}
