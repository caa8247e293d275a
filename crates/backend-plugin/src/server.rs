use std::net::SocketAddr;
use std::time::Duration;

use error_stack::Report;
use poem::get;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::post;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use crate::error::BackendError;
use crate::handlers;
use crate::handlers::SharedBackend;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Plugin routes bound to `backend`.
pub fn routes(backend: SharedBackend) -> impl Endpoint {
    Route::new()
        .at("/create", post(handlers::create))
        .at("/delete", post(handlers::delete).delete(handlers::delete))
        .at("/status", get(handlers::status).post(handlers::status))
        .at("/getLogs", get(handlers::get_logs).post(handlers::get_logs))
        .data(backend)
        .with(Tracing)
}

/// HTTP server exposing one backend
pub struct PluginServer {
    backend: SharedBackend,
    listen_addr: SocketAddr,
}

impl PluginServer {
    pub fn new(backend: SharedBackend, listen_addr: SocketAddr) -> Self {
        Self {
            backend,
            listen_addr,
        }
    }

    /// Serve until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// - [`BackendError::Configuration`] if the listener cannot bind or the server fails
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Report<BackendError>> {
        info!(
            backend = self.backend.name(),
            "Starting backend plugin on {}", self.listen_addr
        );

        let app = routes(self.backend);
        let server = Server::new(TcpListener::bind(self.listen_addr));

        match server
            .run_with_graceful_shutdown(app, shutdown.cancelled_owned(), Some(SHUTDOWN_GRACE))
            .await
        {
            Ok(()) => {
                info!("Backend plugin stopped");
                Ok(())
            }
            Err(e) => {
                error!("Backend plugin server failed: {e}");
                Err(Report::new(BackendError::Configuration {
                    message: format!("server failed: {e}"),
                }))
            }
        }
    }
}
