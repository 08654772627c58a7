//! A lightweight SOCKS5 CONNECT proxy library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT over IPv4, IPv6 and domain-name targets
//!     - No Authentication
//!     - Reply codes derived from tagged dial errors
//!     - Optional connect deadline (reply 0x06 on expiry)
//!     - Graceful drain or hard abort of in-flight connections on shutdown
//! - Not implemented: BIND, UDP ASSOCIATE, username/password and GSSAPI
//!   authentication
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//!
//! # Example
//! ```no_run
//! use socksgate::{ServerConfig, Socks5Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = Socks5Server::new(ServerConfig::new("127.0.0.1:1080"));
//!     server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await
//! }
//! ```

pub mod address;
pub mod auth;
pub mod commands;
pub mod connector;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;

// Re-export main types at crate root for convenience
pub use address::{BoundAddress, ConnectionRequest, TargetAddr};
pub use error::{DialError, ProtocolError, Socks5Error};
pub use protocol::{AddressType, AuthMethod, Command, ReplyCode, Version};
pub use server::{ServerConfig, ShutdownPolicy, Socks5Server};
