//! ABOUTME: Web API layer serving the read model over HTTP
//! ABOUTME: Mounts /api routes next to the health, readiness, and metrics endpoints

use actix_web::{web, App, HttpServer};
use bw_collector::ReadModel;
use bw_core::Result;
use bw_db::Db;
use bw_obs::ObsState;

pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;

#[cfg(test)]
mod tests;

/// Application state shared across all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub read: ReadModel,
    pub obs: ObsState,
}

impl AppState {
    pub fn new(db: Db, obs: ObsState) -> Self {
        Self {
            read: ReadModel::new(db),
            obs,
        }
    }
}

/// Create the main web application service factory
pub fn create_app(
    state: AppState,
) -> App<
    impl actix_web::dev::ServiceFactory<
        actix_web::dev::ServiceRequest,
        Config = (),
        Response = actix_web::dev::ServiceResponse<impl actix_web::body::MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let metrics = state.obs.metrics.clone();

    App::new()
        .app_data(web::Data::new(state.obs.clone()))
        .app_data(web::Data::new(state))
        .app_data(web::QueryConfig::default().error_handler(error::query_error_handler))
        .wrap(middleware::RequestMetrics::new(metrics))
        .wrap(actix_web::middleware::Logger::default())
        .configure(bw_obs::configure)
        .service(web::scope("/api").configure(routes::api::configure))
}

/// Start the web server
pub async fn start_server(bind_addr: &str, state: AppState) -> Result<()> {
    tracing::info!("Starting web server on {}", bind_addr);

    HttpServer::new(move || create_app(state.clone()))
        .bind(bind_addr)
        .map_err(|e| bw_core::Error::Config(format!("Failed to bind web server: {}", e)))?
        .run()
        .await
        .map_err(|e| bw_core::Error::Config(format!("Web server error: {}", e)))?;

    Ok(())
}
