//! HTTP surface: routes, handlers, error mapping and the listener.

mod error;
mod handlers;
mod openapi;
mod router;
mod state;

pub use error::{ApiError, ServerError};
pub use router::build_router;
pub use state::AppState;

use std::net::SocketAddr;

use tokio::sync::watch;

/// Serves the conversion API until the shutdown signal flips to `true`.
pub struct ApiServer {
    addr: SocketAddr,
    state: AppState,
    shutdown_rx: watch::Receiver<bool>,
}

impl ApiServer {
    #[must_use]
    pub fn new(bind: &str, port: u16, state: AppState, shutdown_rx: watch::Receiver<bool>) -> Self {
        let addr: SocketAddr = format!("{bind}:{port}").parse().unwrap_or_else(|e| {
            tracing::warn!("invalid bind '{bind}': {e}, falling back to 0.0.0.0:{port}");
            SocketAddr::from(([0, 0, 0, 0], port))
        });
        Self {
            addr,
            state,
            shutdown_rx,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind and serve. In-flight requests finish before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or the server hits a
    /// fatal I/O error.
    pub async fn serve(self) -> Result<(), ServerError> {
        let router = build_router(self.state);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::Bind(self.addr.to_string(), e))?;
        tracing::info!("listening on {}", self.addr);

        let mut shutdown_rx = self.shutdown_rx;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while !*shutdown_rx.borrow_and_update() {
                    if shutdown_rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                tracing::info!("shutting down, waiting for in-flight requests");
            })
            .await
            .map_err(|e| ServerError::Server(format!("{e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::engine::EngineHandle;

    fn state() -> AppState {
        AppState::new(ServiceConfig::default(), EngineHandle::new())
    }

    #[test]
    fn invalid_bind_falls_back() {
        let (_tx, rx) = watch::channel(false);
        let server = ApiServer::new("not_an_ip", 9999, state(), rx);
        assert_eq!(server.addr().port(), 9999);
        assert!(server.addr().ip().is_unspecified());
    }

    #[tokio::test]
    async fn shuts_down_on_signal() {
        let (tx, rx) = watch::channel(false);
        let server = ApiServer::new("127.0.0.1", 0, state(), rx);
        let task = tokio::spawn(server.serve());
        tx.send(true).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
