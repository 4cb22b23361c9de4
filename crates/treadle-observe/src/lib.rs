//! Observability setup for Treadle: structured logging and optional
//! OpenTelemetry trace export.

pub mod tracing_setup;
