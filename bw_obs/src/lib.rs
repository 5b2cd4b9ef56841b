//! ABOUTME: Observability services including health checks and metrics
//! ABOUTME: Collection cycle counters and the readiness gate behind /readyz

use actix_web::{
    dev::{ServiceRequest, ServiceResponse},
    middleware::Logger,
    web, App, HttpResponse, Result as ActixResult,
};
use bw_core::Result;
use prometheus_client::{
    encoding::{text::encode, EncodeLabelSet},
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};
use serde_json::json;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

/// Readiness gate that can be toggled to indicate service readiness
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    ready: Arc<AtomicBool>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CycleLabels {
    /// `completed`, `skipped`, or `aborted`
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RepositoryLabels {
    pub repository: String,
    /// `reconciled`, `cancelled`, or a failure kind
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RepositoryNameLabel {
    pub repository: String,
}

/// Metrics registry for Prometheus
#[derive(Debug)]
pub struct Metrics {
    registry: Arc<Mutex<Registry>>,
    http_requests_total: Counter,
    http_request_duration_seconds: Histogram,
    cycles: Family<CycleLabels, Counter>,
    cycle_duration_seconds: Histogram,
    repository_outcomes: Family<RepositoryLabels, Counter>,
    archives_inserted: Counter,
    last_success: Family<RepositoryNameLabel, Gauge>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("borgwatch");

        let http_requests_total = Counter::default();
        registry.register(
            "http_requests",
            "Total number of HTTP requests",
            http_requests_total.clone(),
        );

        let http_request_duration_seconds =
            Histogram::new([0.01, 0.05, 0.1, 0.5, 1.0, 2.5].into_iter());
        registry.register(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_request_duration_seconds.clone(),
        );

        let cycles = Family::<CycleLabels, Counter>::default();
        registry.register("cycles", "Collection cycles by outcome", cycles.clone());

        let cycle_duration_seconds =
            Histogram::new([1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0].into_iter());
        registry.register(
            "cycle_duration_seconds",
            "Wall time of completed collection cycles",
            cycle_duration_seconds.clone(),
        );

        let repository_outcomes = Family::<RepositoryLabels, Counter>::default();
        registry.register(
            "repository_outcomes",
            "Per-repository results within collection cycles",
            repository_outcomes.clone(),
        );

        let archives_inserted = Counter::default();
        registry.register(
            "archives_inserted",
            "Archives newly recorded in the store",
            archives_inserted.clone(),
        );

        let last_success = Family::<RepositoryNameLabel, Gauge>::default();
        registry.register(
            "repository_last_success_timestamp_seconds",
            "Unix time of the last successful reconciliation",
            last_success.clone(),
        );

        Self {
            registry: Arc::new(Mutex::new(registry)),
            http_requests_total,
            http_request_duration_seconds,
            cycles,
            cycle_duration_seconds,
            repository_outcomes,
            archives_inserted,
            last_success,
        }
    }

    pub fn inc_requests(&self) {
        self.http_requests_total.inc();
    }

    pub fn observe_duration(&self, duration: f64) {
        self.http_request_duration_seconds.observe(duration);
    }

    pub fn record_cycle(&self, outcome: &str, duration_seconds: Option<f64>) {
        self.cycles
            .get_or_create(&CycleLabels {
                outcome: outcome.to_string(),
            })
            .inc();
        if let Some(duration) = duration_seconds {
            self.cycle_duration_seconds.observe(duration);
        }
    }

    pub fn record_repository(&self, repository: &str, outcome: &str) {
        self.repository_outcomes
            .get_or_create(&RepositoryLabels {
                repository: repository.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_success(&self, repository: &str, inserted: u64, at_unix_seconds: i64) {
        self.archives_inserted.inc_by(inserted);
        self.last_success
            .get_or_create(&RepositoryNameLabel {
                repository: repository.to_string(),
            })
            .set(at_unix_seconds);
    }

    pub fn encode(&self) -> Result<String> {
        let registry = self.registry.lock().map_err(|e| {
            bw_core::Error::Config(format!("Failed to lock metrics registry: {}", e))
        })?;

        let mut buffer = String::new();
        encode(&mut buffer, &registry)
            .map_err(|e| bw_core::Error::Config(format!("Failed to encode metrics: {}", e)))?;

        Ok(buffer)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Application state for observability endpoints
#[derive(Debug, Clone)]
pub struct ObsState {
    pub readiness: ReadinessGate,
    pub metrics: Arc<Metrics>,
}

impl ObsState {
    pub fn new() -> Self {
        Self {
            readiness: ReadinessGate::new(),
            metrics: Arc::new(Metrics::new()),
        }
    }
}

impl Default for ObsState {
    fn default() -> Self {
        Self::new()
    }
}

async fn health() -> ActixResult<HttpResponse> {
    tracing::debug!("Health check requested");
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok"
    })))
}

async fn readiness(state: web::Data<ObsState>) -> ActixResult<HttpResponse> {
    let is_ready = state.readiness.is_ready();
    tracing::debug!("Readiness check requested, ready: {}", is_ready);

    if is_ready {
        Ok(HttpResponse::Ok().json(json!({
            "status": "ready"
        })))
    } else {
        Ok(HttpResponse::ServiceUnavailable().json(json!({
            "status": "not ready"
        })))
    }
}

async fn metrics(state: web::Data<ObsState>) -> ActixResult<HttpResponse> {
    match state.metrics.encode() {
        Ok(metrics_text) => Ok(HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4; charset=utf-8")
            .body(metrics_text)),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": "Failed to encode metrics"
            })))
        }
    }
}

/// Register `/healthz`, `/readyz`, and `/metrics`; expects `web::Data<ObsState>` in app data
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/healthz", web::get().to(health))
        .route("/readyz", web::get().to(readiness))
        .route("/metrics", web::get().to(metrics));
}

/// Standalone observability app
pub fn create_service(
    state: ObsState,
) -> App<
    impl actix_web::dev::ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl actix_web::body::MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    App::new()
        .app_data(web::Data::new(state))
        .wrap(Logger::default())
        .configure(configure)
}
