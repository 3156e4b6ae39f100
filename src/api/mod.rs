mod error;
mod response;
mod routes;

pub use error::ApiError;
pub use response::{CommandRequest, RestoreResponse};
pub use routes::SessionToken;

use crate::core::Dispatcher;
use crate::storage::SessionStore;
use anyhow::{Context, Result};
use axum::routing::{delete, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// HTTP surface over the dispatcher. The session token is read from a
/// header; issuing it is out of scope here.
pub struct WebApi<S: SessionStore> {
    dispatcher: Arc<Dispatcher<S>>,
    host: String,
    port: u16,
}

impl<S: SessionStore + 'static> WebApi<S> {
    pub fn new(dispatcher: Arc<Dispatcher<S>>, host: String, port: u16) -> Self {
        Self {
            dispatcher,
            host,
            port,
        }
    }

    pub fn router(dispatcher: Arc<Dispatcher<S>>) -> Router {
        Router::new()
            .route(
                "/api/v1/exercises/:id/command",
                post(routes::run_command::<S>).delete(routes::delete_history::<S>),
            )
            .route(
                "/api/v1/exercises/:id/restore",
                post(routes::restore_sandbox::<S>),
            )
            .route("/api/v1/session", delete(routes::delete_session::<S>))
            .layer(TraceLayer::new_for_http())
            .with_state(dispatcher)
    }

    pub async fn start(self) -> Result<()> {
        let app = Self::router(self.dispatcher);
        let addr = format!("{}:{}", self.host, self.port);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        info!("API listening on {}", addr);
        axum::serve(listener, app).await?;

        Ok(())
    }
}
