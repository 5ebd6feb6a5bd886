//! Realtime Database metrics collection.
//!
//! Provides standardized metrics for monitoring database operations:
//! - Request counters by operation and status
//! - Latency histograms
//! - Token refresh counters

use metrics::{counter, histogram};

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// Total database requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "firekv_requests_total";

    /// Total access-token refreshes by outcome.
    pub const TOKEN_REFRESH_TOTAL: &str = "firekv_token_refresh_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "firekv_latency_seconds";
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record metrics for a completed database request.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    let status_str = status.to_string();

    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status_str
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record a token refresh attempt.
pub fn record_token_refresh(outcome: &'static str) {
    counter!(
        names::TOKEN_REFRESH_TOTAL,
        "outcome" => outcome
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::REQUESTS_TOTAL.contains("requests"));
        assert!(names::TOKEN_REFRESH_TOTAL.contains("token_refresh"));
        assert!(names::LATENCY_SECONDS.contains("latency"));
    }
}
