use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::provider::LogsArgs;
use crate::config::provider::ProviderArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the node agent
    Run(Box<ProviderArgs>),
    /// Print a container's log through the gateway
    Logs(Box<LogsArgs>),
}
