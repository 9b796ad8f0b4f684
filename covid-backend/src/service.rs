//! HTTP service: route table and server lifecycle

use axum::http::HeaderValue;
use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use axum::routing::get;
use axum::{Router, middleware};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::module::handler;
use crate::module::stats::SnapshotStore;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Build the statistics API router. Every response, errors included,
/// carries `Access-Control-Allow-Origin: *`.
pub fn build_router(store: Arc<SnapshotStore>) -> Router {
    Router::new()
        .route("/ping", get(handler::ping))
        .route("/v1", get(handler::all_countries))
        .route("/v1/{country}", get(handler::country))
        .fallback(handler::not_found)
        .with_state(store)
        .layer(middleware::from_fn(handler::answer_preflight))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(TraceLayer::new_for_http())
}

pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Serve `router` until `shutdown` turns true (or its sender is dropped).
///
/// In-flight requests then get `grace` to finish; after that the server
/// task is aborted and the listener closed.
pub async fn run_server(
    listener: TcpListener,
    router: Router,
    shutdown: watch::Receiver<bool>,
    grace: Duration,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Statistics API listening on http://{}", addr);
    }

    let signal = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(stop_requested(signal))
            .await
    });

    tokio::select! {
        result = &mut server => return Ok(result??),
        _ = stop_requested(shutdown) => {}
    }

    tracing::info!("Statistics API stopping");
    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => {
            result??;
            tracing::info!("Statistics API stopped");
            Ok(())
        }
        Err(_) => {
            tracing::warn!("In-flight requests still running after {:?}, closing listener", grace);
            server.abort();
            Ok(())
        }
    }
}

/// Resolves once the flag is set or every sender is gone.
async fn stop_requested(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
