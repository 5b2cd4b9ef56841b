//! ABOUTME: HTTP middleware for the read API
//! ABOUTME: Request counting and latency recording into the metrics registry

pub mod request_metrics;

pub use request_metrics::RequestMetrics;
