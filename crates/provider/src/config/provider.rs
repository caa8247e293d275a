use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use clap::Parser;
use error_stack::Report;
use error_stack::ResultExt;
use relay_comm::ClientConfig;

use crate::domain::ProviderError;
use crate::domain::ProviderOptions;
use crate::domain::ProviderResult;

/// How to reach the gateway.
#[derive(Args, Clone, Debug)]
pub struct GatewayArgs {
    #[arg(
        long,
        env = "INTERLINKURL",
        default_value = "http://127.0.0.1",
        help = "Gateway base url, http:// or https://"
    )]
    pub gateway_url: String,

    #[arg(long, env = "INTERLINKPORT", default_value_t = 3000)]
    pub gateway_port: u16,

    #[arg(
        long,
        env = "VK_TOKEN_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "File holding the bearer token sent to the gateway"
    )]
    pub token_file: Option<PathBuf>,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl GatewayArgs {
    /// Client config for the gateway, with the port applied.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::Configuration`] if the url is not http or https
    pub fn client_config(&self) -> ProviderResult<ClientConfig> {
        let base_url = relay_comm::normalize_endpoint(&self.gateway_url, Some(self.gateway_port))
            .change_context(ProviderError::Configuration {
                message: "invalid gateway endpoint".to_string(),
            })?;

        let mut config = ClientConfig::new(base_url)
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs));
        if let Some(token_file) = &self.token_file {
            config = config.with_token_file(token_file);
        }
        Ok(config)
    }
}

#[derive(Parser, Clone, Debug)]
pub struct ProviderArgs {
    #[arg(long, env = "NODENAME", help = "Name of the virtual node this agent serves")]
    pub node_name: String,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file, in-cluster config when unset"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(long, env = "WATCH_NAMESPACE", help = "Only watch pods in this namespace")]
    pub namespace: Option<String>,

    #[command(flatten)]
    pub gateway: GatewayArgs,

    #[arg(long, env = "STATUS_INTERVAL_SECS", default_value_t = 5)]
    pub status_interval_secs: u64,

    #[arg(
        long,
        env = "DEPENDENCY_WAIT_SECS",
        default_value_t = 18000,
        help = "How long a pod may wait for its ConfigMaps and Secrets"
    )]
    pub dependency_wait_secs: u64,

    #[arg(long, env = "DEPENDENCY_RETRY_INTERVAL_MS", default_value_t = 1000)]
    pub dependency_retry_interval_ms: u64,

    #[arg(long, env = "LOG_PATH", value_hint = clap::ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,

    #[arg(long, short, help = "Log at debug level unless RUST_LOG is set")]
    pub verbose: bool,
}

#[derive(Parser, Clone, Debug)]
pub struct LogsArgs {
    /// Pod name
    pub pod: String,

    /// Container name
    pub container: String,

    #[arg(long, short, default_value = "default")]
    pub namespace: String,

    #[arg(long, env = "KUBECONFIG", value_hint = clap::ValueHint::FilePath)]
    pub kubeconfig: Option<PathBuf>,

    #[command(flatten)]
    pub gateway: GatewayArgs,

    #[arg(long, help = "Only the last N lines")]
    pub tail: Option<usize>,

    #[arg(long, help = "Only the last N bytes")]
    pub limit_bytes: Option<usize>,
}

/// Resolved provider settings.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub node_name: String,
    pub kubeconfig: Option<PathBuf>,
    pub namespace: Option<String>,
    pub gateway: ClientConfig,
    pub status_interval: Duration,
    pub options: ProviderOptions,
    pub log_file: Option<PathBuf>,
    pub verbose: bool,
}

impl ProviderSettings {
    /// # Errors
    ///
    /// - [`ProviderError::Configuration`] if the gateway endpoint is invalid
    ///   or an interval is zero
    pub fn resolve(args: ProviderArgs) -> ProviderResult<Self> {
        if args.node_name.trim().is_empty() {
            return Err(Report::new(ProviderError::Configuration {
                message: "node name must not be empty".to_string(),
            }));
        }
        if args.status_interval_secs == 0 || args.dependency_retry_interval_ms == 0 {
            return Err(Report::new(ProviderError::Configuration {
                message: "status and retry intervals must be positive".to_string(),
            }));
        }

        Ok(Self {
            gateway: args.gateway.client_config()?,
            node_name: args.node_name,
            kubeconfig: args.kubeconfig,
            namespace: args.namespace,
            status_interval: Duration::from_secs(args.status_interval_secs),
            options: ProviderOptions {
                dependency_wait: Duration::from_secs(args.dependency_wait_secs),
                retry_interval: Duration::from_millis(args.dependency_retry_interval_ms),
            },
            log_file: args.log_file,
            verbose: args.verbose,
        })
    }
}
