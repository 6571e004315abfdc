//! Observability for Tollgate: tracing initialization and routing span
//! attribute conventions.

pub mod route_attrs;
pub mod tracing_setup;
