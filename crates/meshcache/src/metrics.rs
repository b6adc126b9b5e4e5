//! Cache metrics recorded through the `metrics` facade.
//!
//! No exporter is installed here; the embedding process decides where the
//! counters go. Without a recorder every call is a no-op.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_INVALIDATIONS_TOTAL: &str = "cache_invalidations_total";
    pub const CACHE_LRU_EVICTIONS_TOTAL: &str = "cache_lru_evictions_total";
    pub const CACHE_EVENTS_RECEIVED_TOTAL: &str = "cache_events_received_total";
}

/// Record a cache hit.
pub fn record_cache_hit() {
    counter!(names::CACHE_HITS_TOTAL).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record keys removed by an invalidation (`kind` is the event type).
pub fn record_invalidation(kind: &'static str, origin: &'static str, count: u64) {
    counter!(names::CACHE_INVALIDATIONS_TOTAL, "kind" => kind, "origin" => origin)
        .increment(count);
}

/// Record entries evicted by the LRU strategy.
pub fn record_lru_evictions(count: u64) {
    counter!(names::CACHE_LRU_EVICTIONS_TOTAL).increment(count);
}

/// Record an inbound invalidation event by outcome.
pub fn record_event_received(outcome: &'static str) {
    counter!(names::CACHE_EVENTS_RECEIVED_TOTAL, "outcome" => outcome).increment(1);
}
