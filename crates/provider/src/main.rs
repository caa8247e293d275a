use std::io::Write;
use std::sync::Arc;

use anyhow::anyhow;
use anyhow::Result;
use api_types::LogOptions;
use clap::Parser;
use provider::app::Application;
use provider::config::Cli;
use provider::config::Commands;
use provider::config::LogsArgs;
use provider::config::ProviderArgs;
use provider::config::ProviderSettings;
use provider::infrastructure::k8s::KubeCluster;
use provider::infrastructure::kube_client;
use provider::GatewayClient;
use provider::Provider;
use provider::ProviderOptions;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use utils::version;

fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_agent(*args).await,
        Commands::Logs(args) => print_logs(*args).await,
    }
}

async fn run_agent(args: ProviderArgs) -> Result<()> {
    let settings = ProviderSettings::resolve(args).map_err(|e| anyhow!("{e:?}"))?;
    let level = if settings.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let _guard = utils::logging::init(level, settings.log_file.as_deref())?;

    tracing::info!("Starting provider {}", &**version::VERSION);

    let app = Application::build(settings).await?;
    app.run().await
}

async fn print_logs(args: LogsArgs) -> Result<()> {
    let _guard = utils::logging::init(LevelFilter::WARN, None)?;

    let client = kube_client::connect(args.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow!("{e:?}"))?;
    let gateway_config = args
        .gateway
        .client_config()
        .map_err(|e| anyhow!("{e:?}"))?;
    let gateway = GatewayClient::new(gateway_config).map_err(|e| anyhow!("{e:?}"))?;

    let shutdown = CancellationToken::new();
    let provider = Arc::new(Provider::new(
        Arc::new(KubeCluster::new(client)),
        gateway,
        ProviderOptions::default(),
        shutdown.clone(),
    ));

    let opts = LogOptions {
        tail: args.tail,
        limit_bytes: args.limit_bytes,
        ..Default::default()
    };
    let log = provider
        .container_logs(&args.namespace, &args.pod, &args.container, opts, &shutdown)
        .await
        .map_err(|e| anyhow!("{e:?}"))?;

    std::io::stdout().write_all(&log)?;
    Ok(())
}
