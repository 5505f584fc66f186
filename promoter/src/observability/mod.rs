//! Observability utilities.

mod tracing;

pub use tracing::{init_tracing, CheckSpanAttributes, SpanTimer, TracingFormat, DEFAULT_DIRECTIVE};
