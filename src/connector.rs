use crate::address::{ConnectionRequest, TargetAddr};
use crate::error::DialError;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use std::{io, str};
use tokio::net::{TcpStream, lookup_host};
use tracing::debug;

/// connect opens a TCP connection to the request's target.
///
/// The optional deadline covers both name resolution and the connect
/// itself; when it passes the attempt fails with [`DialError::Timeout`].
pub async fn connect(
    request: &ConnectionRequest,
    deadline: Option<Duration>,
) -> Result<TcpStream, DialError> {
    within_deadline(deadline, dial(request)).await
}

/// within_deadline runs a dial attempt, turning an expired deadline into
/// DialError::Timeout
async fn within_deadline<F, T>(deadline: Option<Duration>, attempt: F) -> Result<T, DialError>
where
    F: Future<Output = Result<T, DialError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .map_err(|_| DialError::Timeout)?,
        None => attempt.await,
    }
}

/// dial resolves the target and tries each resolved address in turn
async fn dial(request: &ConnectionRequest) -> Result<TcpStream, DialError> {
    let addrs = match &request.target {
        TargetAddr::IPv4(ip) => vec![SocketAddr::new(IpAddr::V4(*ip), request.port)],
        TargetAddr::IPv6(ip) => vec![SocketAddr::new(IpAddr::V6(*ip), request.port)],
        TargetAddr::DomainName(domain) => {
            // A name that is not UTF-8 cannot be looked up
            let domain = str::from_utf8(domain)
                .map_err(|e| DialError::Resolution(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

            let resolved: Vec<SocketAddr> = lookup_host((domain, request.port))
                .await
                .map_err(DialError::Resolution)?
                .collect();

            debug!("resolved {} to {:?}", domain, resolved);
            resolved
        }
    };

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) => DialError::from_connect_error(e),
        None => DialError::NoAddresses(request.to_string()),
    })
}
