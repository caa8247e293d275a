//! Gateway between the provider and one backend plugin.
//!
//! Decodes every request locally, enriches create requests, relays them to
//! the plugin and passes the plugin's answer back. The only state is the
//! [`cache::StatusCache`] of pods the provider has reported as gone.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod handlers;
pub mod server;

pub use config::GatewayArgs;
pub use config::GatewaySettings;
pub use error::GatewayError;
pub use handlers::GatewayState;
pub use server::routes;
pub use server::GatewayServer;
