//! Observability module
//!
//! Structured logging setup and log-safety helpers.

pub mod telemetry;
