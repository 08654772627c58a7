use crate::address::{BoundAddress, ConnectionRequest, parse_address_from_stream};
use crate::connector;
use crate::error::{ProtocolError, Result, Socks5Error};
use crate::protocol::{AddressType, Command, RSV, ReplyCode, Version};
use std::net::IpAddr;
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tracing::{debug, warn};

/// parse_request reads a SOCKS5 request from the client and returns the
/// CONNECT target. Nothing is written to the stream on failure.
pub async fn parse_request<S>(stream: &mut S) -> Result<ConnectionRequest>
where
    S: AsyncRead + Unpin,
{
    // SOCKS5 request format
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    // Instantiate a request buffer & read
    let mut reqbuf = [0u8; 4];
    stream.read_exact(&mut reqbuf).await?;

    let [version, command, reserved, atyp] = reqbuf;

    // Ensure version is 0x05 -> SOCKS5
    if version != Version::SOCKS5 as u8 {
        return Err(ProtocolError::UnsupportedVersion(version).into());
    }

    // BIND and UDP ASSOCIATE are recognised but not served
    if Command::from_byte(command) != Some(Command::Connect) {
        return Err(ProtocolError::UnsupportedCommand(command).into());
    }

    if reserved != RSV {
        return Err(ProtocolError::InvalidReserved(reserved).into());
    }

    parse_address_from_stream(stream, atyp).await
}

/// Reply is a SOCKS5 reply. Without a bound address the reply carries an
/// all-zero IPv4 placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub code: ReplyCode,
    pub bound: Option<BoundAddress>,
}

impl Reply {
    pub fn new(code: ReplyCode, bound: Option<BoundAddress>) -> Self {
        Self { code, bound }
    }

    /// to_bytes serializes the reply in wire format
    pub fn to_bytes(&self) -> Vec<u8> {
        // SOCKS5 reply format
        // +----+-----+-------+------+----------+----------+
        // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
        // +----+-----+-------+------+----------+----------+
        // | 1  |  1  | X'00' |  1   | Variable |    2     |
        // +----+-----+-------+------+----------+----------+

        // Build initial reply vec
        let mut reply = Vec::with_capacity(22);
        reply.extend_from_slice(&[Version::SOCKS5 as u8, self.code as u8, RSV]);

        match self.bound {
            Some(BoundAddress {
                ip: IpAddr::V4(ip),
                port,
            }) => {
                reply.push(AddressType::IPv4 as u8);
                reply.extend_from_slice(&ip.octets());
                reply.extend_from_slice(&port.to_be_bytes());
            }
            Some(BoundAddress {
                ip: IpAddr::V6(ip),
                port,
            }) => {
                reply.push(AddressType::IPv6 as u8);
                reply.extend_from_slice(&ip.octets());
                reply.extend_from_slice(&port.to_be_bytes());
            }
            None => {
                reply.push(AddressType::IPv4 as u8);
                reply.extend_from_slice(&[0, 0, 0, 0]);
                reply.extend_from_slice(&[0, 0]);
            }
        }

        reply
    }
}

/// send_reply writes a complete reply; a short write is an error
pub async fn send_reply<S>(
    stream: &mut S,
    reply_code: ReplyCode,
    bound: Option<BoundAddress>,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let reply = Reply::new(reply_code, bound).to_bytes();
    stream.write_all(&reply).await?;
    stream.flush().await?;
    Ok(())
}

/// process_request dials the requested target and reports the outcome to
/// the client. On success the open upstream stream is returned; on any
/// failure the upstream stream (if any) has been dropped.
pub async fn process_request<S>(
    stream: &mut S,
    request: &ConnectionRequest,
    connect_timeout: Option<Duration>,
) -> Result<TcpStream>
where
    S: AsyncWrite + Unpin,
{
    let outbound = match connector::connect(request, connect_timeout).await {
        Ok(outbound) => outbound,
        Err(e) => {
            let code = e.reply_code();
            debug!("dial {} failed ({:?}): {}", request, code, e);
            if let Err(reply_err) = send_reply(stream, code, None).await {
                warn!("failed to send failure reply: {}", reply_err);
            }
            return Err(e.into());
        }
    };

    let bound = match outbound.local_addr() {
        Ok(addr) => BoundAddress::from(addr),
        Err(e) => {
            drop(outbound);
            if let Err(reply_err) = send_reply(stream, ReplyCode::ServerFailure, None).await {
                warn!("failed to send failure reply: {}", reply_err);
            }
            return Err(e.into());
        }
    };

    // Send OK reply; outbound is dropped with the error
    send_reply(stream, ReplyCode::Succeeded, Some(bound)).await?;

    Ok(outbound)
}

/// strict_reply_code returns the RFC 1928 reply for a request the parser
/// refused, when one is defined
pub fn strict_reply_code(err: &Socks5Error) -> Option<ReplyCode> {
    match err {
        Socks5Error::Protocol(ProtocolError::UnsupportedCommand(_)) => {
            Some(ReplyCode::CommandNotSupported)
        }
        Socks5Error::Protocol(ProtocolError::UnsupportedAddressType(_)) => {
            Some(ReplyCode::AddrTypeUnsupported)
        }
        _ => None,
    }
}
