use crate::{
    auth,
    commands::{self, send_reply, strict_reply_code},
    error::Socks5Error,
    relay::{RelayStats, relay},
};
use anyhow::{Context, Result, bail};
use std::{fmt, future::Future, io, net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    select,
    task::{JoinError, JoinSet},
};
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Default SOCKS5 listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:1080";

/// Default deadline for resolving and connecting to a target
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after the process runs out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// ShutdownPolicy decides what happens to in-flight connections once the
/// server stops accepting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPolicy {
    /// Let running connections finish on their own
    #[default]
    Drain,
    /// Abort running connections, closing their sockets
    Abort,
}

/// ServerConfig holds everything a Socks5Server needs
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// None disables the deadline
    pub connect_timeout: Option<Duration>,
    pub shutdown: ShutdownPolicy,
    /// Answer unsupported commands and address types with 0x07/0x08
    /// instead of closing silently
    pub strict_replies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LISTEN_ADDR)
    }
}

impl ServerConfig {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            shutdown: ShutdownPolicy::default(),
            strict_replies: false,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown = policy;
        self
    }

    pub fn with_strict_replies(mut self, strict: bool) -> Self {
        self.strict_replies = strict;
        self
    }
}

/// Stage names the pipeline step a connection failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Negotiate,
    Authenticate,
    Request,
    Relay,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Negotiate => "negotiate",
            Stage::Authenticate => "authenticate",
            Stage::Request => "request",
            Stage::Relay => "relay",
        })
    }
}

/// StageError is a pipeline failure tagged with the stage it came from
#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: Socks5Error,
}

impl StageError {
    fn new(stage: Stage) -> impl FnOnce(Socks5Error) -> Self {
        move |source| Self { stage, source }
    }
}

/// Socks5Server accepts SOCKS5 clients and runs one task per connection
pub struct Socks5Server {
    config: Arc<ServerConfig>,
    listener: Option<TcpListener>,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new is a constructor for the Socks5Server type
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            listener: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// bind to the listen address and return the bound socket address
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_some() {
            bail!("listener already bound to {}", self.config.listen_addr);
        }

        // Instantiate tokio listener
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.listen_addr))?;
        let addr = listener.local_addr()?;

        info!("SOCKS5 proxy listening on {}", addr);

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run serves clients until an unrecoverable accept error
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// run_until serves clients until `shutdown` resolves, then closes the
    /// listener and drains or aborts in-flight connections per the
    /// configured ShutdownPolicy
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let Some(listener) = self.listener.take() else {
            bail!("listener unavailable");
        };

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        // Listen for connections to proxy
        loop {
            select! {
                biased;

                _ = &mut shutdown => {
                    info!("shutdown: closing listener");
                    break;
                }

                Some(res) = connections.join_next(), if !connections.is_empty() => {
                    log_task_result(res);
                }

                accepted = listener.accept() => match accepted {
                    Ok((inbound, peer_addr)) => {
                        let config = Arc::clone(&self.config);
                        let span = info_span!("conn", client = %peer_addr);
                        connections.spawn(connection_task(inbound, config).instrument(span));
                    }
                    Err(e) if is_transient_accept_error(&e) => {
                        warn!("accept error: {}", e);
                        if is_fd_exhaustion(&e) {
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                    Err(e) => {
                        error!("fatal accept error: {}", e);
                        return Err(e).context("failed to accept connection");
                    }
                },
            }
        }

        drop(listener);

        match self.config.shutdown {
            ShutdownPolicy::Drain => {
                info!("draining {} connection(s)", connections.len());
                while let Some(res) = connections.join_next().await {
                    log_task_result(res);
                }
            }
            ShutdownPolicy::Abort => {
                info!("aborting {} connection(s)", connections.len());
                connections.shutdown().await;
            }
        }

        info!("server stopped");
        Ok(())
    }
}

/// connection_task runs the pipeline and logs its outcome; nothing
/// escapes the connection
async fn connection_task(stream: TcpStream, config: Arc<ServerConfig>) {
    debug!("new client");

    if let Err(e) = handle_connection(stream, &config).await {
        error!(stage = %e.stage, error = %e.source, "failed");
    }
}

/// handle_connection runs the full SOCKS5 flow for one client:
/// negotiate, authenticate, request, relay. The client stream is dropped
/// on every exit path.
pub async fn handle_connection<S>(
    mut stream: S,
    config: &ServerConfig,
) -> Result<RelayStats, StageError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let method = auth::negotiate_methods(&mut stream)
        .await
        .map_err(StageError::new(Stage::Negotiate))?;

    auth::authenticate(&mut stream, method)
        .await
        .map_err(StageError::new(Stage::Authenticate))?;

    let request = match commands::parse_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            if config.strict_replies
                && let Some(code) = strict_reply_code(&e)
                && let Err(reply_err) = send_reply(&mut stream, code, None).await
            {
                debug!("failed to send {:?} reply: {}", code, reply_err);
            }
            return Err(StageError::new(Stage::Request)(e));
        }
    };

    info!("CONNECT {}", request);

    let outbound = commands::process_request(&mut stream, &request, config.connect_timeout)
        .await
        .map_err(StageError::new(Stage::Request))?;

    info!(stage = %Stage::Relay, "begin");

    let stats = relay(stream, outbound).await;

    info!(
        stage = %Stage::Relay,
        from_client = stats.client_to_upstream.bytes,
        from_server = stats.upstream_to_client.bytes,
        "end"
    );

    Ok(stats)
}

/// is_transient_accept_error reports whether the accept loop may keep going
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || is_fd_exhaustion(e)
}

// ENFILE / EMFILE
fn is_fd_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(23) | Some(24))
}

/// How a connection task left the JoinSet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Finished,
    Cancelled,
    Panicked,
}

fn task_outcome(res: &Result<(), JoinError>) -> TaskOutcome {
    match res {
        Ok(()) => TaskOutcome::Finished,
        Err(e) if e.is_panic() => TaskOutcome::Panicked,
        Err(_) => TaskOutcome::Cancelled,
    }
}

fn log_task_result(res: Result<(), JoinError>) {
    match (task_outcome(&res), res) {
        (TaskOutcome::Panicked, Err(e)) => error!("connection task panicked: {}", e),
        (TaskOutcome::Cancelled, _) => debug!("connection task cancelled"),
        _ => (),
    }
}
