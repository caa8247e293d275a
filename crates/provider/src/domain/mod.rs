pub mod error;
pub mod mock;
pub mod phase;
pub mod pod_store;
pub mod provider;
pub mod reconcile;

pub use error::ProviderError;
pub use error::ProviderResult;
pub use provider::Provider;
pub use provider::ProviderOptions;
