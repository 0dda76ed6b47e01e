//! Metrics emitted through the `metrics` facade
//!
//! The library only records; installing an exporter (Prometheus, statsd, ...)
//! is left to the embedding process. Without a recorder every call is a no-op.
//!
//! Naming follows `pgwire_<area>_<what>_<unit>`:
//! * counters: connections, authentications, queries, rows, errors
//! * histograms: authentication and query durations
//! * gauges: active sessions

pub mod counters;
pub mod gauges;
pub mod histograms;
pub mod labels;
