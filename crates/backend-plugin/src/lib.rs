//! Backend plugin: turns enriched pod descriptions into remote jobs and
//! reports their state in container-status terms.
//!
//! The HTTP surface (`/create`, `/delete`, `/status`, `/getLogs`) is shared
//! by every backend; [`Backend`] is the only seam a new backend implements.

pub mod backend;
pub mod config;
pub mod error;
pub mod handlers;
pub mod runner;
pub mod server;
pub mod slurm;

use std::sync::Arc;

pub use backend::Backend;
pub use config::BackendKind;
pub use config::PluginSettings;
pub use error::BackendError;
pub use error::BackendResult;
pub use server::routes;
pub use server::PluginServer;

/// Instantiate the backend selected in the settings.
pub fn build_backend(settings: &PluginSettings) -> Arc<dyn Backend> {
    match settings.backend {
        BackendKind::Slurm => Arc::new(slurm::SlurmBackend::new(settings.slurm.clone())),
    }
}
