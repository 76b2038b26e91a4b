//! This module contains the drain API server. Endpoints are stored in submodules, separated
//! by the resource on which they act.
mod node;
mod ping;

use crate::{
    config::ServerConfig,
    constants::{
        HEALTH_CHECK_ROUTE, METRICS_ENDPOINT, NODE_CORDON_ENDPOINT, NODE_DRAIN_ENDPOINT,
        NODE_UNCORDON_ENDPOINT,
    },
    error::{self, Result},
    metrics::{self, DrainMetrics},
    telemetry,
};
use drain::NodeDrainClient;

use actix_web::{
    web::{self, Data},
    App, HttpServer,
};
use snafu::ResultExt;
use tokio::time::Duration;
use tracing::{event, Level};
use tracing_actix_web::TracingLogger;

// The set of API endpoints for which `tracing::Span`s will not be recorded.
pub const NO_TELEMETRY_ENDPOINTS: &[&str] = &[HEALTH_CHECK_ROUTE];

#[derive(Clone)]
/// Settings that are applied to the apiserver. These settings are provided to each HTTP route
/// via actix's application data system.
pub struct APIServerSettings<T: NodeDrainClient> {
    pub drain_client: T,
    pub metrics: DrainMetrics,
    /// Applied to drain requests whose policy leaves the global timeout unbounded.
    pub default_drain_timeout: Option<Duration>,
}

/// Registers every route of the apiserver.
pub fn configure<T: 'static + NodeDrainClient>(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource(NODE_DRAIN_ENDPOINT).route(web::post().to(node::drain_node::<T>)))
        .service(web::resource(NODE_CORDON_ENDPOINT).route(web::post().to(node::cordon::<T>)))
        .service(
            web::resource(NODE_UNCORDON_ENDPOINT).route(web::post().to(node::uncordon::<T>)),
        )
        .route(
            METRICS_ENDPOINT,
            web::get().to(metrics::vending_metrics::<T>),
        )
        .route(HEALTH_CHECK_ROUTE, web::get().to(ping::health_check));
}

/// Runs the apiserver using the given settings.
pub async fn run_server<T: 'static + NodeDrainClient>(
    settings: APIServerSettings<T>,
    config: &ServerConfig,
) -> Result<()> {
    let server_addr = config.bind_address();
    event!(Level::INFO, %server_addr, "Starting drain apiserver.");

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::<telemetry::DrainApiserverRootSpanBuilder>::new())
            .app_data(Data::new(settings.clone()))
            .configure(configure::<T>)
    })
    .bind(server_addr)
    .context(error::HttpServerSnafu)?
    .run()
    .await
    .context(error::HttpServerSnafu)?;

    event!(Level::INFO, "Drain apiserver exited.");
    Ok(())
}
