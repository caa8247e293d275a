use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;

use crate::error::GatewayError;
use crate::error::GatewayResult;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_PLUGIN_URL: &str = "http://127.0.0.1";
const DEFAULT_PLUGIN_PORT: u16 = 4000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "gateway", about = "Relay between the provider and a backend plugin", version)]
pub struct GatewayArgs {
    #[arg(long, env = "GATEWAY_CONFIG", value_hint = clap::ValueHint::FilePath, help = "YAML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "GATEWAY_LISTEN_ADDR", help = "Address to listen on, e.g. 0.0.0.0:3000")]
    pub listen_addr: Option<SocketAddr>,

    #[arg(long, env = "PLUGIN_URL", help = "Backend plugin base url, http:// or https://")]
    pub plugin_url: Option<String>,

    #[arg(long, env = "PLUGIN_PORT")]
    pub plugin_port: Option<u16>,

    #[arg(
        long,
        env = "EXPORT_POD_DATA",
        help = "Attach per-container ConfigMaps, Secrets and emptyDirs to create requests"
    )]
    pub export_pod_data: Option<bool>,

    #[arg(long, env = "GATEWAY_REQUIRE_AUTH", help = "Reject requests without a bearer token")]
    pub require_auth: Option<bool>,

    #[arg(long, env = "GATEWAY_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    #[arg(long, short, help = "Log at debug level")]
    pub verbose: bool,

    #[arg(long, conflicts_with = "verbose", help = "Only log errors")]
    pub errors_only: bool,

    #[arg(long, env = "GATEWAY_LOG_FILE", value_hint = clap::ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,
}

/// YAML file layout; flags win over file values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayFileConfig {
    pub listen_addr: Option<SocketAddr>,
    pub plugin_url: Option<String>,
    pub plugin_port: Option<u16>,
    pub export_pod_data: Option<bool>,
    pub require_auth: Option<bool>,
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub verbose_logging: bool,
    #[serde(default)]
    pub errors_only_logging: bool,
    pub log_file: Option<PathBuf>,
}

impl GatewayFileConfig {
    pub fn from_file(path: &Path) -> GatewayResult<Self> {
        let content = std::fs::read_to_string(path).change_context(GatewayError::Configuration {
            message: format!("failed to read {}", path.display()),
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> GatewayResult<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            Report::new(GatewayError::Configuration {
                message: format!("invalid gateway configuration: {e}"),
            })
        })
    }
}

/// Effective gateway settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub listen_addr: SocketAddr,
    /// Normalized plugin base url with port
    pub plugin_url: String,
    pub export_pod_data: bool,
    pub require_auth: bool,
    pub request_timeout: Duration,
    pub log_level: LevelFilter,
    pub log_file: Option<PathBuf>,
}

impl GatewaySettings {
    pub fn load(args: GatewayArgs) -> GatewayResult<Self> {
        let file = match &args.config {
            Some(path) => GatewayFileConfig::from_file(path)?,
            None => GatewayFileConfig::default(),
        };
        Self::resolve(args, file)
    }

    pub fn resolve(args: GatewayArgs, file: GatewayFileConfig) -> GatewayResult<Self> {
        let listen_addr = match args.listen_addr.or(file.listen_addr) {
            Some(addr) => addr,
            None => DEFAULT_LISTEN_ADDR.parse().map_err(|e| {
                Report::new(GatewayError::Configuration {
                    message: format!("invalid default listen address: {e}"),
                })
            })?,
        };

        let plugin_url = args
            .plugin_url
            .or(file.plugin_url)
            .unwrap_or_else(|| DEFAULT_PLUGIN_URL.to_string());
        let plugin_port = args.plugin_port.or(file.plugin_port).or(Some(DEFAULT_PLUGIN_PORT));
        let plugin_url = relay_comm::normalize_endpoint(&plugin_url, plugin_port).change_context(
            GatewayError::Configuration {
                message: "invalid backend plugin endpoint".to_string(),
            },
        )?;

        let log_level = if args.verbose || file.verbose_logging {
            LevelFilter::DEBUG
        } else if args.errors_only || file.errors_only_logging {
            LevelFilter::ERROR
        } else {
            LevelFilter::INFO
        };

        Ok(Self {
            listen_addr,
            plugin_url,
            export_pod_data: args.export_pod_data.or(file.export_pod_data).unwrap_or(false),
            require_auth: args.require_auth.or(file.require_auth).unwrap_or(false),
            request_timeout: Duration::from_secs(
                args.request_timeout_secs
                    .or(file.request_timeout_secs)
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            log_level,
            log_file: args.log_file.or(file.log_file),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_fill_gaps_and_flags_win() {
        let file = GatewayFileConfig::from_yaml(
            "pluginUrl: http://plugin.local\npluginPort: 4001\nexportPodData: true\nerrorsOnlyLogging: true\n",
        )
        .expect("valid yaml");
        let args = GatewayArgs {
            plugin_port: Some(5000),
            ..Default::default()
        };

        let settings = GatewaySettings::resolve(args, file).expect("settings");

        assert_eq!(settings.plugin_url, "http://plugin.local:5000");
        assert!(settings.export_pod_data);
        assert_eq!(settings.log_level, LevelFilter::ERROR);
        assert_eq!(settings.listen_addr.port(), 3000);
    }

    #[test]
    fn url_port_takes_precedence_over_port_setting() {
        let args = GatewayArgs {
            plugin_url: Some("https://plugin.local:9443/".to_string()),
            ..Default::default()
        };
        let settings =
            GatewaySettings::resolve(args, GatewayFileConfig::default()).expect("settings");
        assert_eq!(settings.plugin_url, "https://plugin.local:9443");
    }

    #[test]
    fn unix_socket_endpoint_is_rejected() {
        let args = GatewayArgs {
            plugin_url: Some("unix:///var/run/plugin.sock".to_string()),
            ..Default::default()
        };
        let err = GatewaySettings::resolve(args, GatewayFileConfig::default())
            .expect_err("unix sockets are not supported");
        assert!(matches!(
            err.current_context(),
            GatewayError::Configuration { .. }
        ));
    }

    #[test]
    fn verbose_and_errors_only_conflict() {
        let result = GatewayArgs::try_parse_from(["gateway", "--verbose", "--errors-only"]);
        assert!(result.is_err());
    }
}
