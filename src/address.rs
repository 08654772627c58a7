use crate::error::{ProtocolError, Result};
use crate::protocol::AddressType;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// TargetAddr is the destination host named in a client request.
/// The variant carries the ATYP, so an address and a domain can never
/// both be present. Domain bytes are kept exactly as the client sent them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    IPv4(Ipv4Addr),
    DomainName(Vec<u8>),
    IPv6(Ipv6Addr),
}

impl TargetAddr {
    /// address_type returns the ATYP tag for this address
    pub fn address_type(&self) -> AddressType {
        match self {
            TargetAddr::IPv4(_) => AddressType::IPv4,
            TargetAddr::DomainName(_) => AddressType::DomainName,
            TargetAddr::IPv6(_) => AddressType::IPv6,
        }
    }

    /// host returns a printable host: the domain (invalid UTF-8 replaced),
    /// or the canonical text form of an IP address
    pub fn host(&self) -> String {
        match self {
            TargetAddr::IPv4(ip) => ip.to_string(),
            TargetAddr::DomainName(domain) => String::from_utf8_lossy(domain).into_owned(),
            TargetAddr::IPv6(ip) => ip.to_string(),
        }
    }
}

/// ConnectionRequest is a parsed CONNECT request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub target: TargetAddr,
    pub port: u16,
}

impl fmt::Display for ConnectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            TargetAddr::IPv6(ip) => write!(f, "[{ip}]:{}", self.port),
            other => write!(f, "{}:{}", other.host(), self.port),
        }
    }
}

/// BoundAddress is the local endpoint of the upstream connection,
/// reported back to the client in a success reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl BoundAddress {
    /// address_type returns IPv4 or IPv6 to match the address bytes
    pub fn address_type(&self) -> AddressType {
        match self.ip {
            IpAddr::V4(_) => AddressType::IPv4,
            IpAddr::V6(_) => AddressType::IPv6,
        }
    }
}

impl From<SocketAddr> for BoundAddress {
    fn from(addr: SocketAddr) -> Self {
        // Dual-stack sockets report v4 peers as ::ffff:a.b.c.d
        let ip = match addr.ip() {
            IpAddr::V6(v6) => v6
                .to_ipv4_mapped()
                .map(IpAddr::V4)
                .unwrap_or(IpAddr::V6(v6)),
            v4 => v4,
        };
        Self {
            ip,
            port: addr.port(),
        }
    }
}

/// parse_address_from_stream reads DST.ADDR for the given ATYP byte
/// followed by the big-endian DST.PORT
pub async fn parse_address_from_stream<S>(stream: &mut S, atyp: u8) -> Result<ConnectionRequest>
where
    S: AsyncRead + Unpin,
{
    let target = match AddressType::from_byte(atyp) {
        Some(AddressType::IPv4) => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            TargetAddr::IPv4(Ipv4Addr::from(addr))
        }
        Some(AddressType::DomainName) => {
            // First octet in DomainName contains the number of
            // octets to follow
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;

            if len[0] == 0 {
                return Err(ProtocolError::EmptyDomain.into());
            }

            // Read domain; it is only interpreted at resolution time
            let mut domain = vec![0u8; len[0] as usize];
            stream.read_exact(&mut domain).await?;

            TargetAddr::DomainName(domain)
        }
        Some(AddressType::IPv6) => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            TargetAddr::IPv6(Ipv6Addr::from(addr))
        }
        None => return Err(ProtocolError::UnsupportedAddressType(atyp).into()),
    };

    // Read port -> BigEndian (network order)
    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await?;
    let port = u16::from_be_bytes(port_buf);

    Ok(ConnectionRequest { target, port })
}
