//! Virtual node agent: tracks the pods bound to its node, creates and
//! deletes them through the gateway and folds remote status back into the
//! pod objects.

pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use domain::Provider;
pub use domain::ProviderError;
pub use domain::ProviderOptions;
pub use domain::ProviderResult;
pub use infrastructure::gateway_client::GatewayClient;
