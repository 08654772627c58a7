//! Basic SOCKS5 server example

use socksgate::{ServerConfig, ShutdownPolicy, Socks5Server};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::new("127.0.0.1:1080")
        .with_connect_timeout(Some(Duration::from_secs(5)))
        .with_shutdown_policy(ShutdownPolicy::Drain);

    let mut server = Socks5Server::new(config);
    println!("Starting SOCKS5 server on 127.0.0.1:1080");

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
