//! Matching-specific metrics.

use metrics::{counter, histogram};
use std::time::Duration;

/// Matching metrics recorder
pub struct MatchingMetrics;

impl MatchingMetrics {
    /// Record the outcome of one project recompute
    pub fn record_run(status: &'static str, duration: Duration) {
        counter!("matching_runs_total", "status" => status).increment(1);
        histogram!("matching_run_duration_seconds", "status" => status)
            .record(duration.as_secs_f64());
    }

    pub fn record_neighbor_query(status: &'static str) {
        counter!("matching_neighbor_queries_total", "status" => status).increment(1);
    }

    pub fn record_candidates(count: usize) {
        histogram!("matching_candidates_per_project").record(count as f64);
    }

    pub fn record_write(upserted: usize, errors: usize) {
        counter!("matching_records_upserted_total").increment(upserted as u64);
        if errors > 0 {
            counter!("matching_write_errors_total").increment(errors as u64);
        }
    }

    pub fn record_stale_deleted(count: u64) {
        counter!("matching_records_deleted_total").increment(count);
    }
}
