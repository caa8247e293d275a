use anyhow::anyhow;
use anyhow::Result;
use backend_plugin::config::PluginArgs;
use backend_plugin::PluginServer;
use backend_plugin::PluginSettings;
use clap::Parser;
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

    let args = PluginArgs::parse();
    let settings = PluginSettings::load(args).map_err(|e| anyhow!("{e:?}"))?;

    let level = if settings.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let _guard = utils::logging::init(level, settings.log_file.as_deref())?;

    tracing::info!("Starting backend plugin {}", &**version::VERSION);

    let backend = backend_plugin::build_backend(&settings);
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        utils::shutdown::wait_for_signal().await;
        signal_token.cancel();
    });

    PluginServer::new(backend, settings.listen_addr)
        .run(shutdown)
        .await
        .map_err(|e| anyhow!("{e:?}"))?;

    Ok(())
}
