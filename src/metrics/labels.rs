//! Label keys and fixed label values

/// Authentication mechanism label key
pub const MECHANISM: &str = "mechanism";

/// Outcome label key
pub const STATUS: &str = "status";

/// Error category label key
pub const CATEGORY: &str = "category";

/// Failure reason label key
pub const REASON: &str = "reason";

/// Trust authentication
pub const MECHANISM_TRUST: &str = "trust";

/// Cleartext password authentication
pub const MECHANISM_CLEARTEXT: &str = "cleartext";

/// SCRAM-SHA-256 authentication
pub const MECHANISM_SCRAM: &str = "scram-sha-256";

/// Query finished and all rows were sent
pub const STATUS_SUCCESS: &str = "success";

/// Query failed with an engine error
pub const STATUS_ERROR: &str = "error";

/// Query stopped by a cancel request
pub const STATUS_CANCELLED: &str = "cancelled";

/// Connection accepted over plain TCP
pub const TRANSPORT_PLAIN: &str = "plain";

/// Connection upgraded to TLS
pub const TRANSPORT_TLS: &str = "tls";
