//! API module providing the HTTP surface of the authorization server.
//!
//! - `auth` - Bearer token extractor for resource endpoints
//! - `cors` - Cross-origin policy
//! - `health` - Health check endpoint (/healthz)
//! - `user` - Principal diagnostic endpoint (/user/principal)
//! - `openapi` - OpenAPI/Utoipa configuration
//!
//! The OAuth2 endpoints themselves live in [`crate::oauth2`] and are nested
//! under `/oauth`.

pub mod auth;
pub mod cors;
pub mod health;
pub mod openapi;
pub mod user;

pub use health::MISC_TAG;
pub use user::USER_TAG;

use std::net::SocketAddr;

use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

use crate::config::CorsConfig;
use crate::oauth2::{self, OAuth2State};

/// Assemble every route with its middleware.
///
/// CORS is the outermost layer so preflight requests are answered before any
/// handler asks for credentials.
pub fn build_router(state: OAuth2State, cors: &CorsConfig) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .nest("/oauth", oauth2::router(state.clone()))
        .nest("/user", user::router(state))
        .routes(routes!(health::health))
        .split_for_parts();

    router
        .merge(Redoc::with_url("/api-docs", api))
        .layer(TraceLayer::new_for_http())
        .layer(cors::cors_layer(cors))
}

/// Starts the web server with all configured routes.
#[tracing::instrument(skip(state, cors))]
pub async fn start_webserver(
    state: OAuth2State,
    cors: &CorsConfig,
    listen_addr: SocketAddr,
) -> color_eyre::Result<()> {
    let router = build_router(state, cors);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Server running");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
