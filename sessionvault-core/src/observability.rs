/*!
Observability for the persistence pipeline.

Structured logging goes through `tracing`; [`init_observability`] installs a
subscriber for binaries that do not bring their own. With the `metrics`
feature enabled, pipeline counters are kept in a Prometheus registry that can
be scraped through [`PersistMetrics::gather_metrics`].
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{PersistError, Result};

/// Filter applied when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "sessionvault=info";

#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<PersistMetrics>> = OnceLock::new();

/// Prometheus metrics for persist and restore activity
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct PersistMetrics {
    pub persist_total: Counter,
    pub persist_failures_total: Counter,
    pub restored_records_total: Counter,
    pub unreadable_payloads_total: Counter,
    pub discarded_restores_total: Counter,
    pub payload_size_bytes: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn counter(registry: &Registry, name: &str, help: &str) -> Result<Counter> {
    let counter = Counter::new(name, help)
        .map_err(|e| PersistError::storage(format!("Failed to create {name} metric: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| PersistError::storage(format!("Failed to register {name}: {e}")))?;
    Ok(counter)
}

#[cfg(feature = "metrics")]
impl PersistMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let persist_total = counter(
            &registry,
            "sessionvault_persist_total",
            "Payloads committed to storage",
        )?;
        let persist_failures_total = counter(
            &registry,
            "sessionvault_persist_failures_total",
            "Persist attempts that failed before commit",
        )?;
        let restored_records_total = counter(
            &registry,
            "sessionvault_restored_records_total",
            "Records handed back to a live store",
        )?;
        let unreadable_payloads_total = counter(
            &registry,
            "sessionvault_unreadable_payloads_total",
            "Payloads discarded because they could not be decrypted or decoded",
        )?;
        let discarded_restores_total = counter(
            &registry,
            "sessionvault_discarded_restores_total",
            "Restores dropped because a deletion was requested first",
        )?;

        let payload_size_bytes = Histogram::with_opts(
            HistogramOpts::new(
                "sessionvault_payload_size_bytes",
                "Size of committed encrypted payloads in bytes",
            )
            .buckets(prometheus::exponential_buckets(256.0, 4.0, 8).map_err(|e| {
                PersistError::storage(format!("Failed to build payload size buckets: {e}"))
            })?),
        )
        .map_err(|e| {
            PersistError::storage(format!("Failed to create payload_size_bytes metric: {e}"))
        })?;
        registry
            .register(Box::new(payload_size_bytes.clone()))
            .map_err(|e| {
                PersistError::storage(format!("Failed to register payload_size_bytes: {e}"))
            })?;

        Ok(Self {
            persist_total,
            persist_failures_total,
            restored_records_total,
            unreadable_payloads_total,
            discarded_restores_total,
            payload_size_bytes,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    ///
    /// Returns `None` if the registry could not be built; the failure is
    /// logged once.
    pub fn global() -> Option<&'static PersistMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to initialize metrics");
                    None
                }
            })
            .as_ref()
    }

    pub fn record_commit(&self, payload_bytes: usize) {
        self.persist_total.inc();
        self.payload_size_bytes.observe(payload_bytes as f64);
    }

    pub fn record_commit_failure(&self) {
        self.persist_failures_total.inc();
    }

    pub fn record_restored(&self, records: usize) {
        self.restored_records_total.inc_by(records as f64);
    }

    pub fn record_unreadable_payload(&self) {
        self.unreadable_payloads_total.inc();
    }

    pub fn record_discarded_restore(&self) {
        self.discarded_restores_total.inc();
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| PersistError::storage(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| PersistError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Apply `update` to the global metrics, if they are available
#[cfg(feature = "metrics")]
pub(crate) fn with_metrics(update: impl FnOnce(&PersistMetrics)) {
    if let Some(metrics) = PersistMetrics::global() {
        update(metrics);
    }
}

/// Initialize the global tracing subscriber
///
/// # Arguments
/// * `json` - Emit JSON lines instead of human-readable output
///
/// # Errors
/// Fails if the filter directive is invalid or a global subscriber is
/// already installed.
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _ = PersistMetrics::global();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_LOG_FILTER)
            .map_err(|e| PersistError::validation(format!("Invalid log filter: {e}")))?,
    };

    let installed = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };
    installed.map_err(|e| {
        PersistError::worker(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("Sessionvault observability initialized");
    Ok(())
}

/// Initialize observability with JSON output
pub fn init_default_observability() -> Result<()> {
    init_observability(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Whichever call wins, at most one subscriber is installed
        let first = init_observability(false);
        let second = init_default_observability();
        assert!(first.is_err() || second.is_err());
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_recording() {
        let metrics = PersistMetrics::global().unwrap();
        metrics.record_commit(1024);
        metrics.record_commit_failure();
        metrics.record_restored(7);
        metrics.record_unreadable_payload();
        metrics.record_discarded_restore();

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("sessionvault_persist_total"));
        assert!(text.contains("sessionvault_restored_records_total"));
        assert!(text.contains("sessionvault_payload_size_bytes"));
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_with_metrics_reaches_global() {
        let before = PersistMetrics::global().unwrap().discarded_restores_total.get();
        with_metrics(|m| m.record_discarded_restore());
        let after = PersistMetrics::global().unwrap().discarded_restores_total.get();
        assert!(after >= before + 1.0);
    }
}
