use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use poem::get;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::post;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use relay_comm::ClientConfig;
use relay_comm::RelayClient;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use crate::auth::BearerAuthMiddleware;
use crate::config::GatewaySettings;
use crate::error::GatewayError;
use crate::handlers;
use crate::handlers::GatewayState;
use crate::handlers::SharedState;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Gateway routes. With `require_auth`, requests lacking a bearer token are rejected.
pub fn routes(state: SharedState, require_auth: bool) -> impl Endpoint {
    Route::new()
        .at("/create", post(handlers::create))
        .at("/delete", post(handlers::delete).delete(handlers::delete))
        .at("/status", get(handlers::status).post(handlers::status))
        .at("/getLogs", get(handlers::get_logs).post(handlers::get_logs))
        .at("/pinglink", post(handlers::ping_link).get(handlers::ping_link))
        .at("/updateCache", post(handlers::update_cache))
        .data(state)
        .with_if(require_auth, BearerAuthMiddleware)
        .with(Tracing)
}

/// HTTP relay in front of one backend plugin
pub struct GatewayServer {
    settings: GatewaySettings,
}

impl GatewayServer {
    pub fn new(settings: GatewaySettings) -> Self {
        Self { settings }
    }

    /// Serve until `shutdown` is cancelled; in-flight plugin calls are aborted with it.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Configuration`] if the plugin client cannot be built
    /// - [`GatewayError::Server`] if the listener fails
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Report<GatewayError>> {
        let config = ClientConfig::new(self.settings.plugin_url.clone())
            .with_request_timeout(self.settings.request_timeout);
        let plugin = RelayClient::new(config).change_context(GatewayError::Configuration {
            message: "failed to build backend plugin client".to_string(),
        })?;

        let state = Arc::new(GatewayState::new(
            plugin,
            self.settings.export_pod_data,
            shutdown.clone(),
        ));
        let app = routes(state, self.settings.require_auth);

        info!(
            plugin_url = %self.settings.plugin_url,
            export_pod_data = self.settings.export_pod_data,
            "Starting gateway on {}", self.settings.listen_addr
        );
        let server = Server::new(TcpListener::bind(self.settings.listen_addr));

        match server
            .run_with_graceful_shutdown(app, shutdown.cancelled_owned(), Some(SHUTDOWN_GRACE))
            .await
        {
            Ok(()) => {
                info!("Gateway stopped");
                Ok(())
            }
            Err(e) => {
                error!("Gateway server failed: {e}");
                Err(Report::new(GatewayError::Server {
                    message: format!("server failed: {e}"),
                }))
            }
        }
    }
}
