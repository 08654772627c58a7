use std::io;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf, split},
    select,
    sync::watch,
};
use tracing::debug;

const RELAY_BUF_SIZE: usize = 16 * 1024;

/// Transfer describes how one relay direction ended
#[derive(Debug)]
pub struct Transfer {
    /// Bytes copied from source to destination
    pub bytes: u64,
    /// Why the copy stopped
    pub end: TransferEnd,
}

/// TransferEnd is the reason a relay direction stopped
#[derive(Debug)]
pub enum TransferEnd {
    /// Source reached EOF
    Eof,
    /// The opposite direction finished first
    PeerClosed,
    /// Read or write failed
    Error(io::Error),
}

/// RelayStats holds both directions once the relay is over
#[derive(Debug)]
pub struct RelayStats {
    pub client_to_upstream: Transfer,
    pub upstream_to_client: Transfer,
}

/// relay pumps bytes between client and upstream until one direction
/// terminates. The finished direction shuts down its destination and
/// tells the other direction to stop, so the engine returns once both
/// are done. Both streams are dropped (closed) on return.
pub async fn relay<C, U>(client: C, upstream: U) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send,
    U: AsyncRead + AsyncWrite + Send,
{
    let (client_rd, client_wr) = split(client);
    let (upstream_rd, upstream_wr) = split(upstream);

    let (closed_tx, closed_rx) = watch::channel(false);
    let closed_rx2 = closed_rx.clone();
    let closed_tx = &closed_tx;

    let outbound = async move {
        let transfer = pump(client_rd, upstream_wr, closed_rx).await;
        let _ = closed_tx.send(true);
        transfer
    };
    let inbound = async move {
        let transfer = pump(upstream_rd, client_wr, closed_rx2).await;
        let _ = closed_tx.send(true);
        transfer
    };

    let (client_to_upstream, upstream_to_client) = tokio::join!(outbound, inbound);

    debug!(
        "client -> upstream: {} bytes ({:?})",
        client_to_upstream.bytes, client_to_upstream.end
    );
    debug!(
        "upstream -> client: {} bytes ({:?})",
        upstream_to_client.bytes, upstream_to_client.end
    );

    RelayStats {
        client_to_upstream,
        upstream_to_client,
    }
}

/// pump copies from reader to writer until EOF, error, or the closed
/// signal, then shuts the writer down
async fn pump<R, W>(
    mut reader: ReadHalf<R>,
    mut writer: WriteHalf<W>,
    mut closed: watch::Receiver<bool>,
) -> Transfer
where
    R: AsyncRead,
    W: AsyncWrite,
{
    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    let mut bytes = 0u64;

    let end = loop {
        let step = async {
            let n = reader.read(&mut buf).await?;
            if n > 0 {
                writer.write_all(&buf[..n]).await?;
            }
            Ok::<usize, io::Error>(n)
        };

        select! {
            res = step => match res {
                Ok(0) => break TransferEnd::Eof,
                Ok(n) => bytes += n as u64,
                Err(e) => break TransferEnd::Error(e),
            },
            _ = closed.changed() => break TransferEnd::PeerClosed,
        }
    };

    let _ = writer.shutdown().await;

    Transfer { bytes, end }
}
