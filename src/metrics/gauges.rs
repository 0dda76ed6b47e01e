//! Gauge metrics

use metrics::gauge;

/// A session task started
pub fn session_opened() {
    gauge!("pgwire_active_sessions").increment(1.0);
}

/// A session task ended
pub fn session_closed() {
    gauge!("pgwire_active_sessions").decrement(1.0);
}
