//! ABOUTME: Middleware that counts requests and records their latency
//! ABOUTME: Feeds the shared Prometheus registry served at /metrics

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use bw_obs::Metrics;
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::{rc::Rc, sync::Arc, time::Instant};
use tracing::debug;

/// Request metrics middleware transform
pub struct RequestMetrics {
    metrics: Arc<Metrics>,
}

impl RequestMetrics {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestMetrics
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestMetricsMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestMetricsMiddleware {
            service: Rc::new(service),
            metrics: self.metrics.clone(),
        }))
    }
}

pub struct RequestMetricsMiddleware<S> {
    service: Rc<S>,
    metrics: Arc<Metrics>,
}

impl<S, B> Service<ServiceRequest> for RequestMetricsMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let metrics = self.metrics.clone();

        Box::pin(async move {
            let started = Instant::now();
            let path = req.path().to_string();
            let result = service.call(req).await;

            let elapsed = started.elapsed().as_secs_f64();
            metrics.inc_requests();
            metrics.observe_duration(elapsed);
            debug!(path = %path, elapsed, "Request handled");

            result
        })
    }
}
