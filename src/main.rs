//! Web UI Socket Client
//!
//! Connects to the web UI backend as a signed-in user and logs the live
//! user count and model usage broadcasts until interrupted.

use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use webui_socket::config::CONFIG_FILE;
use webui_socket::{init_socket, ClientConfig, Stores};

/// Web UI Socket Client
///
/// Real-time connection to the web UI backend
#[derive(Parser, Debug)]
#[command(name = "webui-socket")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Server origin, overrides the configuration file
    #[arg(long)]
    base_url: Option<String>,

    /// Session token sent with the handshake
    #[arg(long)]
    token: Option<String>,

    /// Id of the user opening the connection
    #[arg(long)]
    user_id: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Web UI socket client v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ClientConfig::load(&args.config)?;
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    let options = config.into_options()?;

    if args.token.is_none() {
        warn!("No token given, connecting anonymously");
    }

    let stores = Stores::new();
    let socket = init_socket(options, &stores, args.token.as_deref(), &args.user_id);
    info!("Connecting to {} as {}", socket.options().base_url, args.user_id);

    let mut user_count = stores.active_user_count.subscribe();
    tokio::spawn(async move {
        while user_count.changed().await.is_ok() {
            if let Some(count) = *user_count.borrow_and_update() {
                info!("Active users: {}", count);
            }
        }
    });

    let mut usage_pool = stores.usage_pool.subscribe();
    tokio::spawn(async move {
        while usage_pool.changed().await.is_ok() {
            let models = usage_pool.borrow_and_update().clone();
            info!("Models in use: [{}]", models.join(", "));
        }
    });

    tokio::select! {
        result = shutdown_signal() => {
            result?;
            info!("Initiating graceful shutdown...");
            socket.close();
            socket.closed().await;
        }
        _ = socket.closed() => {
            warn!("Connection gave up");
        }
    }

    info!("Client shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
    Ok(())
}
