//! Prometheus metrics
//!
//! Kept in an explicit [`Registry`] owned by the process rather than the
//! crate-global default registry.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Reconcile outcome label values.
pub mod results {
    /// Reconcile returned an action
    pub const SUCCESS: &str = "success";
    /// Reconcile lost a status write race
    pub const CONFLICT: &str = "conflict";
    /// Reconcile returned an error
    pub const ERROR: &str = "error";
}

/// Controller metrics
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_duration_seconds: HistogramVec,
    certificates_issued_total: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Registers all metrics in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("command_issuer_reconcile_total", "Reconciliations by controller and result"),
            &["controller", "result"],
        )?;
        registry.register(Box::new(reconcile_total.clone()))?;

        let reconcile_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "command_issuer_reconcile_duration_seconds",
                "Time spent in one reconciliation",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
            &["controller"],
        )?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;

        let certificates_issued_total = IntCounter::new(
            "command_issuer_certificates_issued_total",
            "Certificates written to CertificateRequest status",
        )?;
        registry.register(Box::new(certificates_issued_total.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_duration_seconds,
            certificates_issued_total,
        })
    }

    /// Records one reconcile pass.
    pub fn record_reconcile(&self, controller: &str, result: &str, duration: Duration) {
        self.reconcile_total.with_label_values(&[controller, result]).inc();
        self.reconcile_duration_seconds
            .with_label_values(&[controller])
            .observe(duration.as_secs_f64());
    }

    /// Counts a certificate written to a request.
    pub fn record_certificate_issued(&self) {
        self.certificates_issued_total.inc();
    }

    /// Certificates issued so far.
    pub fn certificates_issued(&self) -> u64 {
        self.certificates_issued_total.get()
    }

    /// Text exposition of all metrics.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
