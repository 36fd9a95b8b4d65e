use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use gatehouse::config::{Config, ConfigWatcher};
use gatehouse::Server;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "gatehouse")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "GATEHOUSE_CONFIG")]
    config: PathBuf,

    /// Override the listen port from the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Reload the configuration when the file changes
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatehouse=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("gatehouse v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(port) = args.port {
        config.listen.port = port;
    }

    let server = Arc::new(Server::new(&config)?);
    let listener = TcpListener::bind(config.listen.address()).await?;

    // Held for the lifetime of the process; dropping it stops the watch.
    let _watcher = if args.watch {
        let (watcher, mut updates) = ConfigWatcher::new(&args.config);
        let watcher = watcher.run()?;
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            while let Some(next) = updates.recv().await {
                if next.listen.port != config.listen.port || next.listen.host != config.listen.host {
                    info!("Listen address changes take effect on restart");
                }
                if let Err(e) = server.reload(&next) {
                    error!("Rejected new configuration: {}. Keeping current configuration.", e);
                }
            }
        });
        Some(watcher)
    } else {
        None
    };

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received ctrl-c, shutting down");
        }
        shutdown.cancel();
    });

    server.serve(listener).await?;
    info!("Shutdown complete");
    Ok(())
}
