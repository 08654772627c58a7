//! Error types for the proxy pipeline
//!
//! Every stage of a client connection returns [`Socks5Error`]. Outbound
//! connect failures are tagged as [`DialError`] where they happen so the
//! reply code never has to be recovered from an error message.

use crate::protocol::ReplyCode;
use std::io;
use thiserror::Error;

/// Malformed or unsupported bytes from the client
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid SOCKS version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("client offered no authentication methods")]
    NoMethods,

    #[error("no acceptable authentication methods")]
    NoAcceptableMethod,

    #[error("unsupported authentication method: {0:#04x}")]
    UnsupportedMethod(u8),

    #[error("unsupported command: {0:#04x}, only CONNECT is supported")]
    UnsupportedCommand(u8),

    #[error("invalid reserved byte: {0:#04x}")]
    InvalidReserved(u8),

    #[error("unsupported address type: {0:#04x}")]
    UnsupportedAddressType(u8),

    #[error("domain length is zero")]
    EmptyDomain,
}

/// Outbound connect failure, tagged by cause
#[derive(Error, Debug)]
pub enum DialError {
    #[error("connect deadline exceeded")]
    Timeout,

    #[error("failed to resolve host: {0}")]
    Resolution(#[source] io::Error),

    #[error("no addresses found for {0}")]
    NoAddresses(String),

    #[error("network is unreachable: {0}")]
    NetworkUnreachable(#[source] io::Error),

    #[error("no route to host: {0}")]
    HostUnreachable(#[source] io::Error),

    #[error("connection refused: {0}")]
    Refused(#[source] io::Error),

    #[error("permission denied: {0}")]
    PermissionDenied(#[source] io::Error),

    #[error("connect failed: {0}")]
    Other(#[source] io::Error),
}

impl DialError {
    /// from_connect_error tags an io::Error returned by a TCP connect attempt
    pub fn from_connect_error(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => DialError::Timeout,
            io::ErrorKind::NetworkUnreachable => DialError::NetworkUnreachable(err),
            io::ErrorKind::HostUnreachable => DialError::HostUnreachable(err),
            io::ErrorKind::ConnectionRefused => DialError::Refused(err),
            io::ErrorKind::PermissionDenied => DialError::PermissionDenied(err),
            _ => DialError::Other(err),
        }
    }

    /// reply_code maps the failure to the REP byte reported to the client
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            DialError::Timeout => ReplyCode::TtlExpired,
            DialError::Resolution(_) | DialError::NoAddresses(_) => ReplyCode::HostUnreachable,
            DialError::NetworkUnreachable(_) => ReplyCode::NetworkUnreachable,
            DialError::HostUnreachable(_) => ReplyCode::HostUnreachable,
            DialError::Refused(_) => ReplyCode::ConnectionRefused,
            DialError::PermissionDenied(_) => ReplyCode::ConnectionNotAllowed,
            DialError::Other(_) => ReplyCode::ServerFailure,
        }
    }
}

/// Error returned by every stage of the per-connection pipeline
#[derive(Error, Debug)]
pub enum Socks5Error {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("dial error: {0}")]
    Dial(#[from] DialError),
}

pub type Result<T, E = Socks5Error> = std::result::Result<T, E>;
