//! Observability: structured logging setup and the component diagnostic sink

pub mod diagnostics;
pub mod logging;

pub use diagnostics::{DiagnosticSink, TracingSink};
pub use logging::{LogFormat, init_default_logging, init_logging};

// Span macros for structured logging
pub use logging::{lifecycle_span, session_span};
