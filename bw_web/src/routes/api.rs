//! ABOUTME: Read-only endpoints for dashboard consumers
//! ABOUTME: Stats, repositories with health, recent archives, and the daily trend

use crate::{
    error::ApiResult,
    models::{ArchivesQuery, TrendQuery},
    AppState,
};
use actix_web::{get, web, HttpResponse};
use bw_collector::read::{DEFAULT_ARCHIVE_LIMIT, DEFAULT_TREND_DAYS};
use bw_core::utc_now;
use tracing::{debug, warn};

/// Totals across repositories and the latest stats snapshot for each
#[get("/stats")]
pub async fn stats(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let overview = state.read.get_stats(utc_now()).await.map_err(|e| {
        warn!("Failed to load stats: {}", e);
        e
    })?;
    Ok(HttpResponse::Ok().json(overview))
}

/// Every repository with its health classification
#[get("/repositories")]
pub async fn repositories(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let repositories = state.read.get_repositories(utc_now()).await?;
    debug!(count = repositories.len(), "Listing repositories");
    Ok(HttpResponse::Ok().json(repositories))
}

/// Most recent archives across all repositories
#[get("/archives")]
pub async fn archives(
    state: web::Data<AppState>,
    query: web::Query<ArchivesQuery>,
) -> ApiResult<HttpResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_ARCHIVE_LIMIT);
    let archives = state.read.get_archives(limit).await?;
    Ok(HttpResponse::Ok().json(archives))
}

#[get("/trend")]
pub async fn trend(
    state: web::Data<AppState>,
    query: web::Query<TrendQuery>,
) -> ApiResult<HttpResponse> {
    let days = query.days.unwrap_or(DEFAULT_TREND_DAYS);
    let points = state.read.get_trend(days, utc_now()).await?;
    Ok(HttpResponse::Ok().json(points))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(stats)
        .service(repositories)
        .service(archives)
        .service(trend);
}
