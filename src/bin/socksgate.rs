use anyhow::Result;
use clap::{Parser, ValueEnum};
use socksgate::{ServerConfig, ShutdownPolicy, Socks5Server};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "A lightweight SOCKS5 CONNECT proxy", long_about = None)]
struct Args {
    /// Listener address
    #[arg(short, long, default_value = socksgate::server::DEFAULT_LISTEN_ADDR)]
    listen: String,

    /// Seconds allowed for resolving and connecting to a target, 0 disables
    #[arg(short = 't', long, default_value_t = 10)]
    connect_timeout: u64,

    /// What to do with open connections on shutdown
    #[arg(long, value_enum, default_value_t = OnShutdown::Drain)]
    shutdown: OnShutdown,

    /// Reply 0x07/0x08 to unsupported commands and address types
    #[arg(long)]
    strict: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OnShutdown {
    Drain,
    Abort,
}

impl From<OnShutdown> for ShutdownPolicy {
    fn from(value: OnShutdown) -> Self {
        match value {
            OnShutdown::Drain => ShutdownPolicy::Drain,
            OnShutdown::Abort => ShutdownPolicy::Abort,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let connect_timeout = match args.connect_timeout {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let config = ServerConfig::new(args.listen)
        .with_connect_timeout(connect_timeout)
        .with_shutdown_policy(args.shutdown.into())
        .with_strict_replies(args.strict);

    // Instantiate server
    let mut server = Socks5Server::new(config);

    // Bind up front so a bad address is fatal before anything else
    server.bind().await?;

    info!("Starting SOCKS5 proxy: {}", server.config().listen_addr);
    server.run_until(shutdown_signal()).await
}

/// shutdown_signal resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("received Ctrl+C, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C, shutting down");
    }
}
