//! Scanner metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! binary installs a recorder.

use std::time::Duration;

#[derive(Debug)]
pub struct Metrics;

impl Metrics {
    // --- Metric Names ---
    /// Ranges fully committed (events stored, cursor advanced).
    /// Labels: `chain_id`
    pub const RANGES_PROCESSED_TOTAL: &'static str = "feescan_ranges_processed_total";

    /// Events newly inserted (duplicates excluded).
    /// Labels: `chain_id`
    pub const EVENTS_INSERTED_TOTAL: &'static str = "feescan_events_inserted_total";

    /// Ranges abandoned because one of their logs could not be decoded.
    /// Labels: `chain_id`
    pub const MALFORMED_RANGES_TOTAL: &'static str = "feescan_malformed_ranges_total";

    /// Failed scan iterations.
    /// Labels: `chain_id`, `kind`
    pub const SCAN_ERRORS_TOTAL: &'static str = "feescan_scan_errors_total";

    /// Last committed cursor.
    /// Labels: `chain_id`
    pub const CURSOR_BLOCK: &'static str = "feescan_cursor_block";

    /// Last observed chain head.
    /// Labels: `chain_id`
    pub const HEAD_BLOCK: &'static str = "feescan_head_block";

    /// Time spent fetching, decoding and storing one range.
    /// Labels: `chain_id`
    pub const RANGE_DURATION_SECONDS: &'static str = "feescan_range_duration_seconds";

    pub fn init(chain_id: u64) {
        Self::describe();
        Self::zero(chain_id);
    }

    fn describe() {
        metrics::describe_counter!(
            Self::RANGES_PROCESSED_TOTAL,
            metrics::Unit::Count,
            "Total number of block ranges committed",
        );
        metrics::describe_counter!(
            Self::EVENTS_INSERTED_TOTAL,
            metrics::Unit::Count,
            "Total number of FeesCollected events inserted",
        );
        metrics::describe_counter!(
            Self::MALFORMED_RANGES_TOTAL,
            metrics::Unit::Count,
            "Total number of ranges rejected because of a malformed log",
        );
        metrics::describe_counter!(
            Self::SCAN_ERRORS_TOTAL,
            metrics::Unit::Count,
            "Total number of failed scan iterations",
        );
        metrics::describe_gauge!(
            Self::CURSOR_BLOCK,
            "Last block whose range is fully stored",
        );
        metrics::describe_gauge!(Self::HEAD_BLOCK, "Last observed chain head");
        metrics::describe_histogram!(
            Self::RANGE_DURATION_SECONDS,
            metrics::Unit::Seconds,
            "Duration of a committed range",
        );
    }

    fn zero(chain_id: u64) {
        let chain_id = chain_id.to_string();
        metrics::counter!(Self::RANGES_PROCESSED_TOTAL, "chain_id" => chain_id.clone()).increment(0);
        metrics::counter!(Self::EVENTS_INSERTED_TOTAL, "chain_id" => chain_id.clone()).increment(0);
        metrics::counter!(Self::MALFORMED_RANGES_TOTAL, "chain_id" => chain_id).increment(0);
    }

    pub fn record_range(chain_id: u64, end_block: u64, inserted: u64, elapsed: Duration) {
        let chain_id = chain_id.to_string();
        metrics::counter!(Self::RANGES_PROCESSED_TOTAL, "chain_id" => chain_id.clone()).increment(1);
        metrics::counter!(Self::EVENTS_INSERTED_TOTAL, "chain_id" => chain_id.clone())
            .increment(inserted);
        metrics::gauge!(Self::CURSOR_BLOCK, "chain_id" => chain_id.clone()).set(end_block as f64);
        metrics::histogram!(Self::RANGE_DURATION_SECONDS, "chain_id" => chain_id)
            .record(elapsed.as_secs_f64());
    }

    pub fn record_head(chain_id: u64, head: u64) {
        metrics::gauge!(Self::HEAD_BLOCK, "chain_id" => chain_id.to_string()).set(head as f64);
    }

    pub fn record_error(chain_id: u64, kind: &'static str) {
        let chain_id = chain_id.to_string();
        if kind == "malformed_log" {
            metrics::counter!(Self::MALFORMED_RANGES_TOTAL, "chain_id" => chain_id.clone())
                .increment(1);
        }
        metrics::counter!(Self::SCAN_ERRORS_TOTAL, "chain_id" => chain_id, "kind" => kind)
            .increment(1);
    }
}
