//! # portfolio-server
//!
//! HTTP backend for the portfolio site. It relays the identity provider's
//! OIDC metadata to the browser and protects `/api` routes with bearer tokens
//! verified by [`portfolio_auth`].
//!
//! ## Routes
//!
//! | Route | Auth | Purpose |
//! |-------|------|---------|
//! | `GET /` | none | Liveness banner |
//! | `GET /auth/.well-known/openid-configuration` | none | Discovery pass-through |
//! | `GET /auth/jwks` | none | Key set pass-through |
//! | `GET /api/me` | bearer | Verified claims of the caller |
//!
//! ## Lifecycle
//!
//! [`serve`] builds the verifier, warms its key cache, optionally starts a
//! background refresher, and runs until the shutdown token is cancelled.

#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod proxy;
pub mod state;

pub use auth::AuthRejection;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use proxy::{ProxyError, Upstream, UpstreamClient};
pub use state::AppState;

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::get,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

/// Text served at `/`
pub const BANNER: &str = "Portfolio backend running";

/// Routes with their handlers and the bearer middleware, without outer layers
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/me", get(auth::me))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .route("/", get(|| async { BANNER }))
        .route(
            "/auth/.well-known/openid-configuration",
            get(proxy::discovery),
        )
        .route("/auth/jwks", get(proxy::jwks))
        .merge(protected)
        .with_state(state)
}

/// Full application: routes plus CORS and request tracing
///
/// # Errors
///
/// Returns [`ServerError::InvalidCorsOrigin`] if an origin is not a valid header value.
pub fn app(config: &ServerConfig, state: AppState) -> ServerResult<Router> {
    Ok(router(state)
        .layer(cors_layer(&config.cors_origins)?)
        .layer(TraceLayer::new_for_http()))
}

/// CORS for the SPA: any origin when `origins` is empty
///
/// # Errors
///
/// Returns [`ServerError::InvalidCorsOrigin`] if an origin is not a valid header value.
pub fn cors_layer(origins: &[String]) -> ServerResult<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return Ok(cors.allow_origin(Any));
    }

    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o).map_err(|_| ServerError::InvalidCorsOrigin(o.clone())))
        .collect::<ServerResult<Vec<_>>>()?;
    Ok(cors.allow_origin(origins))
}

/// Bind `config.bind` and serve until `shutdown` is cancelled
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the socket cannot be
/// bound, or the server fails.
pub async fn serve(config: ServerConfig, shutdown: CancellationToken) -> ServerResult<()> {
    let listener = TcpListener::bind(config.bind)
        .await
        .map_err(|source| ServerError::Bind {
            addr: config.bind,
            source,
        })?;
    serve_on(listener, config, shutdown).await
}

/// Serve on an already bound listener until `shutdown` is cancelled
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the server fails.
pub async fn serve_on(
    listener: TcpListener,
    config: ServerConfig,
    shutdown: CancellationToken,
) -> ServerResult<()> {
    let state = AppState::from_config(&config)?;
    let keys = state.verifier.key_store().clone();

    info!(
        issuer_domain = %config.issuer_domain,
        jwks_uri = %config.verifier.jwks_uri,
        "Using identity provider"
    );

    let app = app(&config, state)?;

    // A cold cache is filled on the first request, so this is best effort
    // and runs alongside the listener.
    let warm_up = {
        let keys = Arc::clone(&keys);
        let stop = shutdown.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = stop.cancelled() => debug!("Initial key fetch abandoned on shutdown"),
                result = keys.refresh() => match result {
                    Ok(count) => info!(keys = count, "Signing keys loaded"),
                    Err(e) => warn!(error = %e, "Initial key fetch failed, will retry on demand"),
                },
            }
        })
    };

    let refresher = config
        .key_refresh_interval
        .map(|period| keys.spawn_refresher(period, shutdown.child_token()));

    match listener.local_addr() {
        Ok(addr) => info!(%addr, "Server running"),
        Err(e) => warn!(error = %e, "Server running on unknown address"),
    }

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .map_err(ServerError::Serve);

    shutdown.cancel();
    if let Err(e) = warm_up.await {
        warn!(error = %e, "Initial key fetch did not stop cleanly");
    }
    if let Some(handle) = refresher
        && let Err(e) = handle.await
    {
        warn!(error = %e, "Key refresher did not stop cleanly");
    }

    info!("Server stopped");
    result
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
pub fn install_signal_handlers(shutdown: &CancellationToken) {
    let on_interrupt = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }
        info!("Ctrl+C received, initiating shutdown");
        on_interrupt.cancel();
    });

    #[cfg(unix)]
    {
        let on_terminate = shutdown.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("SIGTERM received, initiating shutdown");
                    on_terminate.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
            }
        });
    }
}
