use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct IdentityMetrics {
    registry: Registry,
    login_attempts: IntCounterVec,
    oauth_exchanges: IntCounterVec,
    audit_write_failures: IntCounter,
}

impl IdentityMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let login_attempts = IntCounterVec::new(
            Opts::new(
                "identity_login_attempts_total",
                "Count of login attempts grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(login_attempts.clone()))?;

        let oauth_exchanges = IntCounterVec::new(
            Opts::new(
                "identity_oauth_exchanges_total",
                "Count of OAuth authorization-code exchanges",
            ),
            &["provider", "outcome"],
        )?;
        registry.register(Box::new(oauth_exchanges.clone()))?;

        let audit_write_failures = IntCounter::new(
            "identity_audit_write_failures_total",
            "Audit records that could not be persisted",
        )?;
        registry.register(Box::new(audit_write_failures.clone()))?;

        Ok(Self {
            registry,
            login_attempts,
            oauth_exchanges,
            audit_write_failures,
        })
    }

    pub fn login_attempt(&self, outcome: &str) {
        self.login_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn oauth_exchange(&self, provider: &str, outcome: &str) {
        self.oauth_exchanges
            .with_label_values(&[provider, outcome])
            .inc();
    }

    pub fn audit_write_failure(&self) {
        self.audit_write_failures.inc();
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}
