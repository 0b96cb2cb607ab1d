//! # instructpad
//!
//! Claim protocol and reporting for a shared pool of annotatable
//! instruction records.
//!
//! A document store holds the pool; concurrent annotators claim one record
//! at a time, edit it, and finalize it as accepted or unusable. Hand-off
//! safety rides entirely on the store's per-document optimistic concurrency,
//! exposed here through the [`store::DocumentStore`] contract. The read side
//! serves progress fractions, a masked leaderboard, and accepted-item
//! export. OpenTelemetry observability throughout.

pub mod anonymize;
pub mod claim;
pub mod config;
pub mod error;
pub mod model;
pub mod report;
pub mod status;
pub mod store;
pub mod telemetry;
