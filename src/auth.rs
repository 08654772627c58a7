use crate::error::{ProtocolError, Result};
use crate::protocol::{AuthMethod, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// negotiate_methods reads the client greeting, selects an authentication
/// method and writes the selection back to the client.
///
/// The selection is written even when nothing offered is acceptable, so the
/// client sees the 0xFF rejection before the connection closes.
pub async fn negotiate_methods<S>(stream: &mut S) -> Result<AuthMethod>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // ClientHello format
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+

    // Instantiate handshake buffer & read
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    // Parse version and client methods from handshake
    let version = buf[0];
    let n_methods = buf[1];

    // Ensure version is 0x05 -> SOCKS5
    if version != Version::SOCKS5 as u8 {
        return Err(ProtocolError::UnsupportedVersion(version).into());
    }

    if n_methods == 0 {
        return Err(ProtocolError::NoMethods.into());
    }

    let mut methods = vec![0u8; n_methods as usize];
    stream.read_exact(&mut methods).await?;

    // Retrieve desired method
    let method = select_auth_method(&methods);

    // ServerChoice method selection reply format
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+
    stream.write_all(&[Version::SOCKS5 as u8, method as u8]).await?;

    if method == AuthMethod::NoAcceptable {
        return Err(ProtocolError::NoAcceptableMethod.into());
    }

    Ok(method)
}

/// authenticate runs the sub-negotiation for the selected method.
/// No-auth exchanges no bytes.
pub async fn authenticate<S>(_stream: &mut S, method: AuthMethod) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match method {
        AuthMethod::NoAuth => Ok(()),
        // negotiate_methods fails before handing out NoAcceptable
        other => Err(ProtocolError::UnsupportedMethod(other as u8).into()),
    }
}

/// select_auth_method takes the methods offered by the client and
/// returns the server's choice
fn select_auth_method(client_methods: &[u8]) -> AuthMethod {
    // Preferred auth method order
    const PREFERRED_METHODS: &[AuthMethod] = &[AuthMethod::NoAuth];

    PREFERRED_METHODS
        .iter()
        .copied()
        .find(|&preferred| client_methods.contains(&(preferred as u8)))
        .unwrap_or(AuthMethod::NoAcceptable)
}
