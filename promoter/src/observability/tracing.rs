//! Subscriber setup and span helpers for scheduled checks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "promoter=info";

/// Output format for [`init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`.
///
/// Returns false if a global subscriber was already installed.
pub fn init_tracing(format: TracingFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match format {
        TracingFormat::Pretty => builder.try_init().is_ok(),
        TracingFormat::Json => builder.json().try_init().is_ok(),
    }
}

/// Attributes describing one scheduled check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckSpanAttributes {
    /// Work category, e.g. `resource` or `environment`.
    pub category: String,
    /// The item checked.
    pub item_id: String,
    /// Owning application.
    pub application: Option<String>,
    /// How the check ended.
    pub outcome: Option<String>,
    /// Duration in milliseconds.
    pub duration_ms: Option<u64>,
}

impl CheckSpanAttributes {
    /// Creates attributes for a check of `item_id`.
    #[must_use]
    pub fn new(category: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            item_id: item_id.into(),
            ..Default::default()
        }
    }

    /// Sets the application.
    #[must_use]
    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    /// Sets the outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Flattens the attributes into dotted keys.
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("check.category".to_string(), self.category.clone());
        attrs.insert("check.item_id".to_string(), self.item_id.clone());
        if let Some(ref v) = self.application {
            attrs.insert("check.application".to_string(), v.clone());
        }
        if let Some(ref v) = self.outcome {
            attrs.insert("check.outcome".to_string(), v.clone());
        }
        if let Some(v) = self.duration_ms {
            attrs.insert("check.duration_ms".to_string(), v.to_string());
        }
        attrs
    }

    /// Logs the check at debug level.
    pub fn record(&self) {
        tracing::debug!(
            category = %self.category,
            item_id = %self.item_id,
            application = ?self.application,
            outcome = ?self.outcome,
            duration_ms = ?self.duration_ms,
            "Check finished"
        );
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in whole milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!(span = %self.name, duration_ms = elapsed, "Span finished");
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_span_attributes() {
        let attrs = CheckSpanAttributes::new("resource", "ec2:cluster:test:keeldemo")
            .with_application("keeldemo")
            .with_outcome("timed_out")
            .with_duration_ms(120_000)
            .to_attributes();

        assert_eq!(attrs.get("check.category"), Some(&"resource".to_string()));
        assert_eq!(attrs.get("check.outcome"), Some(&"timed_out".to_string()));
        assert_eq!(attrs.get("check.duration_ms"), Some(&"120000".to_string()));
    }

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("resource_check");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(timer.name(), "resource_check");
        assert!(timer.finish() >= 5);
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        let _ = init_tracing(TracingFormat::Pretty);
        assert!(!init_tracing(TracingFormat::Json));
    }
}
