//! UDP/TCP DNS server implementation.

use anyhow::{Context, Result};
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::BinDecodable;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::handler::QueryHandler;

/// Maximum size of a DNS packet, with headroom for EDNS payloads.
const MAX_DNS_PACKET_SIZE: usize = 4096;

/// DNS server that listens on UDP or TCP and dispatches every query to a
/// handler. One transport per instance invocation; a bind or loop failure
/// is fatal and propagates out, terminating the process.
pub struct DnsServer {
    config: Arc<Config>,
    handler: Arc<dyn QueryHandler>,
}

impl DnsServer {
    pub fn new(config: Arc<Config>, handler: Arc<dyn QueryHandler>) -> Self {
        Self { config, handler }
    }

    /// Run the UDP DNS server on the configured address.
    pub async fn run_udp(&self) -> Result<()> {
        let addr = self.config.server.udp_listen;
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind UDP listener on {}", addr))?;
        info!("UDP DNS server listening on {}", addr);

        serve_udp(Arc::new(socket), self.handler.clone()).await
    }

    /// Run the TCP DNS server on the configured address.
    pub async fn run_tcp(&self) -> Result<()> {
        let addr = self.config.server.tcp_listen;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind TCP listener on {}", addr))?;
        info!("TCP DNS server listening on {}", addr);

        serve_tcp(listener, self.handler.clone()).await
    }
}

/// Receive loop for UDP. Each datagram is handled in its own task; a recv
/// failure on the socket itself is fatal.
async fn serve_udp(socket: Arc<UdpSocket>, handler: Arc<dyn QueryHandler>) -> Result<()> {
    let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = socket
            .recv_from(&mut buf)
            .await
            .context("UDP recv failed")?;
        let data = buf[..len].to_vec();
        let socket = socket.clone();
        let handler = handler.clone();

        tokio::spawn(async move {
            handle_udp_query(&socket, src, &data, handler.as_ref()).await;
        });
    }
}

/// Handle a single UDP DNS query. Always answers a parseable query; a
/// datagram that cannot be parsed carries no usable transaction ID, so it
/// is logged and dropped.
async fn handle_udp_query(
    socket: &UdpSocket,
    src: SocketAddr,
    data: &[u8],
    handler: &dyn QueryHandler,
) {
    debug!("Received UDP query from {} ({} bytes)", src, data.len());

    let request = match Message::from_bytes(data) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to parse DNS message from {}: {}", src, e);
            return;
        }
    };

    let response = handler.handle(request).await;

    let response_bytes = match response.to_vec() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to encode response for {}: {}", src, e);
            return;
        }
    };

    // The client may be gone by now; nothing more can be done for it.
    if let Err(e) = socket.send_to(&response_bytes, src).await {
        warn!("Failed to send UDP response to {}: {}", src, e);
        return;
    }

    debug!("Sent UDP response to {} ({} bytes)", src, response_bytes.len());
}

/// Accept loop for TCP. Each connection is handled in its own task; an
/// accept failure on the listener itself is fatal.
async fn serve_tcp(listener: TcpListener, handler: Arc<dyn QueryHandler>) -> Result<()> {
    loop {
        let (stream, src) = listener.accept().await.context("TCP accept failed")?;
        let handler = handler.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(stream, src, handler.as_ref()).await {
                warn!("Failed to handle TCP connection from {}: {}", src, e);
            }
        });
    }
}

/// Handle a TCP DNS connection. A connection may carry several queries in
/// sequence; each one still gets its own upstream exchange.
async fn handle_tcp_connection(
    mut stream: TcpStream,
    src: SocketAddr,
    handler: &dyn QueryHandler,
) -> Result<()> {
    debug!("TCP connection from {}", src);

    loop {
        // Read the 2-byte length prefix.
        let mut len_buf = [0u8; 2];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Client closed the connection.
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let len = u16::from_be_bytes(len_buf) as usize;
        if len == 0 {
            warn!("Invalid DNS message length from {}: {}", src, len);
            break;
        }

        let mut data = vec![0u8; len];
        stream.read_exact(&mut data).await?;

        let request = match Message::from_bytes(&data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Failed to parse DNS message from {}: {}", src, e);
                continue;
            }
        };

        let response = handler.handle(request).await;

        let response_bytes = response.to_vec()?;
        let len_bytes = (response_bytes.len() as u16).to_be_bytes();

        stream.write_all(&len_bytes).await?;
        stream.write_all(&response_bytes).await?;

        debug!("Sent TCP response to {} ({} bytes)", src, response_bytes.len());
    }

    Ok(())
}
