use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use clap::Parser;
use clap::ValueEnum;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;

use crate::error::BackendError;
use crate::error::BackendResult;
use crate::slurm::SlurmConfig;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:4000";

/// Backend implementation served by the plugin process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Slurm,
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "backend-plugin", about = "Batch-scheduler backend plugin", version)]
pub struct PluginArgs {
    #[arg(long, env = "PLUGIN_CONFIG", value_hint = clap::ValueHint::FilePath, help = "YAML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "PLUGIN_LISTEN_ADDR", help = "Address to listen on, e.g. 0.0.0.0:4000")]
    pub listen_addr: Option<SocketAddr>,

    #[arg(long, value_enum, env = "PLUGIN_BACKEND")]
    pub backend: Option<BackendKind>,

    #[arg(long, env = "PLUGIN_DATA_ROOT", help = "Directory holding per-pod job files")]
    pub data_root: Option<PathBuf>,

    #[arg(long, env = "SBATCH_PATH")]
    pub sbatch_path: Option<PathBuf>,

    #[arg(long, env = "SQUEUE_PATH")]
    pub squeue_path: Option<PathBuf>,

    #[arg(long, env = "SCANCEL_PATH")]
    pub scancel_path: Option<PathBuf>,

    #[arg(long, env = "SINGULARITY_PATH")]
    pub singularity_path: Option<PathBuf>,

    #[arg(long, env = "PLUGIN_LOG_FILE", value_hint = clap::ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,

    #[arg(long, short, help = "Log at debug level")]
    pub verbose: bool,
}

/// YAML file layout; every field is optional and overridden by flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginFileConfig {
    pub listen_addr: Option<SocketAddr>,
    pub backend: Option<BackendKind>,
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub slurm: SlurmFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlurmFileConfig {
    pub data_root: Option<PathBuf>,
    pub sbatch_path: Option<PathBuf>,
    pub squeue_path: Option<PathBuf>,
    pub scancel_path: Option<PathBuf>,
    pub singularity_path: Option<PathBuf>,
}

impl PluginFileConfig {
    pub fn from_file(path: &Path) -> BackendResult<Self> {
        let content = std::fs::read_to_string(path).change_context(BackendError::Configuration {
            message: format!("failed to read {}", path.display()),
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> BackendResult<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            Report::new(BackendError::Configuration {
                message: format!("invalid plugin configuration: {e}"),
            })
        })
    }
}

/// Effective plugin settings after merging flags, file and defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSettings {
    pub listen_addr: SocketAddr,
    pub backend: BackendKind,
    pub log_file: Option<PathBuf>,
    pub verbose: bool,
    pub slurm: SlurmConfig,
}

impl PluginSettings {
    /// Read the YAML file named by `--config`, if any, then merge.
    pub fn load(args: PluginArgs) -> BackendResult<Self> {
        let file = match &args.config {
            Some(path) => PluginFileConfig::from_file(path)?,
            None => PluginFileConfig::default(),
        };
        Self::resolve(args, file)
    }

    pub fn resolve(args: PluginArgs, file: PluginFileConfig) -> BackendResult<Self> {
        let listen_addr = match args.listen_addr.or(file.listen_addr) {
            Some(addr) => addr,
            None => DEFAULT_LISTEN_ADDR.parse().map_err(|e| {
                Report::new(BackendError::Configuration {
                    message: format!("invalid default listen address: {e}"),
                })
            })?,
        };

        let defaults = SlurmConfig::default();
        let slurm = SlurmConfig {
            data_root: args
                .data_root
                .or(file.slurm.data_root)
                .unwrap_or(defaults.data_root),
            sbatch: args
                .sbatch_path
                .or(file.slurm.sbatch_path)
                .unwrap_or(defaults.sbatch),
            squeue: args
                .squeue_path
                .or(file.slurm.squeue_path)
                .unwrap_or(defaults.squeue),
            scancel: args
                .scancel_path
                .or(file.slurm.scancel_path)
                .unwrap_or(defaults.scancel),
            singularity: args
                .singularity_path
                .or(file.slurm.singularity_path)
                .unwrap_or(defaults.singularity),
        };

        Ok(Self {
            listen_addr,
            backend: args.backend.or(file.backend).unwrap_or_default(),
            log_file: args.log_file.or(file.log_file),
            verbose: args.verbose,
            slurm,
        })
    }
}
