//! Metric instrument factories for instructpad.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"instructpad"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for instructpad instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("instructpad")
}

/// Counter: claim requests by final outcome.
/// Labels: `script`, `outcome` ("claimed" | "nothing_new" | "conflict_exhausted").
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("instructpad.claims")
        .with_description("Claim requests by outcome")
        .build()
}

/// Counter: conditional writes lost to a version conflict.
/// Labels: `operation` ("claim" | "finalize").
pub fn write_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("instructpad.write_conflicts")
        .with_description("Conditional writes lost to version conflicts")
        .build()
}

/// Counter: status transitions committed to the store.
/// Labels: `from`, `to`.
pub fn status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("instructpad.status_transitions")
        .with_description("Committed work item status transitions")
        .build()
}

/// Counter: aggregation reads by report kind.
/// Labels: `kind` ("progress" | "leaderboard" | "scripts").
pub fn aggregation_reads() -> Counter<u64> {
    meter()
        .u64_counter("instructpad.aggregation_reads")
        .with_description("Aggregation reads issued by the reporting layer")
        .build()
}

/// Counter: scan cursor operations.
/// Labels: `operation` ("open" | "fetch" | "close").
pub fn cursor_operations() -> Counter<u64> {
    meter()
        .u64_counter("instructpad.cursor_operations")
        .with_description("Scan cursor operations")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("instructpad.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
