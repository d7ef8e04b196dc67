//! Diagnostic sink shared by the link, session and reporter components
//!
//! Components never log directly: they hand a level, a component tag and a
//! message to a [`DiagnosticSink`]. The default sink forwards to `tracing`;
//! tests swap in a recording sink.

use tracing::Level;

/// Receives free-form diagnostics from components
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, level: Level, tag: &str, message: &str);
}

/// Forwards diagnostics to the global tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, level: Level, tag: &str, message: &str) {
        match level {
            Level::ERROR => tracing::error!(component = tag, "{message}"),
            Level::WARN => tracing::warn!(component = tag, "{message}"),
            Level::INFO => tracing::info!(component = tag, "{message}"),
            Level::DEBUG => tracing::debug!(component = tag, "{message}"),
            _ => tracing::trace!(component = tag, "{message}"),
        }
    }
}
