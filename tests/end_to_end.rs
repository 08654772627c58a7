//! End-to-end tests for the SOCKS5 proxy over real loopback sockets.

use socksgate::{ServerConfig, ShutdownPolicy, Socks5Server};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

/// Start the proxy on an OS-assigned loopback port
async fn start_server(config: ServerConfig) -> Running {
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        ..config
    };
    let mut server = Socks5Server::new(config);
    let addr = server.bind().await.unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .run_until(async {
                let _ = stopped.await;
            })
            .await
    });

    Running { addr, stop, handle }
}

/// Echo server that copies every connection back to itself
async fn start_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((conn, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = conn.into_split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}

/// A loopback port with nothing listening on it
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn greet(stream: &mut TcpStream) {
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [0x05, 0x00]);
}

fn connect_ipv4(ip: [u8; 4], port: u16) -> Vec<u8> {
    let mut req = vec![0x05, 0x01, 0x00, 0x01];
    req.extend_from_slice(&ip);
    req.extend_from_slice(&port.to_be_bytes());
    req
}

/// Greet, CONNECT and return the 10 byte IPv4 reply
async fn open_tunnel(proxy: SocketAddr, target_port: u16) -> (TcpStream, [u8; 10]) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    greet(&mut stream).await;
    stream
        .write_all(&connect_ipv4([127, 0, 0, 1], target_port))
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    timeout(WAIT, stream.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    (stream, reply)
}

async fn assert_echo(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).await.unwrap();
    let mut back = vec![0u8; payload.len()];
    timeout(WAIT, stream.read_exact(&mut back))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(back, payload);
}

async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let res = timeout(WAIT, stream.read(&mut buf)).await.unwrap();
    // Either a clean EOF or a reset counts as closed
    assert!(matches!(res, Ok(0) | Err(_)), "{res:?}");
}

#[tokio::test]
async fn connect_success_replies_bound_address_and_relays() {
    let echo = start_echo().await;
    let server = start_server(ServerConfig::default()).await;

    let (mut stream, reply) = open_tunnel(server.addr, echo.port()).await;
    assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);
    assert_eq!(&reply[4..8], &[127, 0, 0, 1]);
    assert_ne!(u16::from_be_bytes([reply[8], reply[9]]), 0);

    assert_echo(&mut stream, b"GET / HTTP/1.0\r\n\r\n").await;

    drop(stream);
    let _ = server.stop.send(());
    timeout(WAIT, server.handle).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn refused_connect_replies_05_and_closes() {
    let port = closed_port().await;
    let server = start_server(ServerConfig::default()).await;

    let (mut stream, reply) = open_tunnel(server.addr, port).await;
    assert_eq!(reply, [0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    assert_closed(&mut stream).await;
}

#[tokio::test]
async fn domain_target_is_resolved() {
    let echo = start_echo().await;
    let server = start_server(ServerConfig::default()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    greet(&mut stream).await;

    let mut req = vec![0x05, 0x01, 0x00, 0x03, 9];
    req.extend_from_slice(b"localhost");
    req.extend_from_slice(&echo.port().to_be_bytes());
    stream.write_all(&req).await.unwrap();

    let mut head = [0u8; 4];
    timeout(WAIT, stream.read_exact(&mut head))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&head[..3], &[0x05, 0x00, 0x00]);
    let rest = match head[3] {
        0x01 => 4 + 2,
        0x04 => 16 + 2,
        other => panic!("unexpected ATYP {other:#04x}"),
    };
    let mut bound = vec![0u8; rest];
    stream.read_exact(&mut bound).await.unwrap();

    assert_echo(&mut stream, b"via name").await;
}

#[tokio::test]
async fn non_utf8_domain_replies_host_unreachable() {
    let server = start_server(ServerConfig::default()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    greet(&mut stream).await;
    stream
        .write_all(&[0x05, 0x01, 0x00, 0x03, 0x02, 0xC3, 0x28, 0x00, 0x50])
        .await
        .unwrap();

    let mut reply = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, [0x05, 0x04, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
}

#[tokio::test]
async fn no_acceptable_method_replies_ff_and_closes() {
    let server = start_server(ServerConfig::default()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [0x05, 0xFF]);
    assert_closed(&mut stream).await;
}

#[tokio::test]
async fn unsupported_command_closes_without_reply() {
    let server = start_server(ServerConfig::default()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    greet(&mut stream).await;
    // BIND
    stream
        .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
        .await
        .unwrap();
    assert_closed(&mut stream).await;
}

#[tokio::test]
async fn strict_mode_replies_command_not_supported() {
    let server = start_server(ServerConfig::default().with_strict_replies(true)).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    greet(&mut stream).await;
    // Header only: the server stops reading after CMD, and unread bytes
    // would turn its close into a reset
    stream.write_all(&[0x05, 0x03, 0x00, 0x01]).await.unwrap();

    let mut reply = [0u8; 10];
    timeout(WAIT, stream.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, [0x05, 0x07, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
}

#[tokio::test]
async fn connections_are_served_concurrently() {
    let echo = start_echo().await;
    let server = start_server(ServerConfig::default()).await;

    // An idle client must not hold up anyone else
    let mut idle = TcpStream::connect(server.addr).await.unwrap();
    idle.write_all(&[0x05]).await.unwrap();

    let mut tunnels = Vec::new();
    for _ in 0..8 {
        let (stream, reply) = open_tunnel(server.addr, echo.port()).await;
        assert_eq!(reply[1], 0x00);
        tunnels.push(stream);
    }
    for (i, stream) in tunnels.iter_mut().enumerate() {
        assert_echo(stream, format!("tunnel {i}").as_bytes()).await;
    }
}

#[tokio::test]
async fn drain_keeps_in_flight_connections() {
    let echo = start_echo().await;
    let server = start_server(ServerConfig::default().with_shutdown_policy(ShutdownPolicy::Drain)).await;

    let (mut stream, reply) = open_tunnel(server.addr, echo.port()).await;
    assert_eq!(reply[1], 0x00);

    server.stop.send(()).unwrap();

    // Wait for the listener to go away
    let mut refused = false;
    for _ in 0..50 {
        if TcpStream::connect(server.addr).await.is_err() {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(refused, "listener still accepting after shutdown");

    // The existing tunnel keeps working and holds the server open
    assert_echo(&mut stream, b"still here").await;
    assert!(!server.handle.is_finished());

    drop(stream);
    timeout(WAIT, server.handle).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn abort_closes_in_flight_connections() {
    let echo = start_echo().await;
    let server = start_server(ServerConfig::default().with_shutdown_policy(ShutdownPolicy::Abort)).await;

    let (mut stream, reply) = open_tunnel(server.addr, echo.port()).await;
    assert_eq!(reply[1], 0x00);
    assert_echo(&mut stream, b"before").await;

    server.stop.send(()).unwrap();
    timeout(WAIT, server.handle).await.unwrap().unwrap().unwrap();

    assert_closed(&mut stream).await;
}

#[tokio::test]
async fn binding_twice_fails() {
    let mut server = Socks5Server::new(ServerConfig::new("127.0.0.1:0"));
    server.bind().await.unwrap();
    assert!(server.bind().await.is_err());
}

#[tokio::test]
async fn bind_failure_is_reported() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();

    let mut server = Socks5Server::new(ServerConfig::new(addr.to_string()));
    let err = server.run().await.unwrap_err();
    assert!(err.to_string().contains("failed to bind"), "{err:#}");
}
