use anyhow::anyhow;
use anyhow::Result;
use clap::Parser;
use gateway::GatewayArgs;
use gateway::GatewayServer;
use gateway::GatewaySettings;
use tokio_util::sync::CancellationToken;
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

    let args = GatewayArgs::parse();
    let settings = GatewaySettings::load(args).map_err(|e| anyhow!("{e:?}"))?;
    let _guard = utils::logging::init(settings.log_level, settings.log_file.as_deref())?;

    tracing::info!("Starting gateway {}", &**version::VERSION);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        utils::shutdown::wait_for_signal().await;
        signal_token.cancel();
    });

    GatewayServer::new(settings)
        .run(shutdown)
        .await
        .map_err(|e| anyhow!("{e:?}"))?;

    Ok(())
}
