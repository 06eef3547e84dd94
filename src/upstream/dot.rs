//! DNS over TLS (DOT) client implementation.

use anyhow::Result;
use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::BinDecodable;
use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::trace;

use super::{UpstreamClient, UpstreamError};

/// DNS over TLS client.
///
/// Dials the resolver by IP address but verifies its certificate against a
/// configured hostname, so routing and identity stay decoupled. Every
/// exchange opens a fresh connection and drops it before returning.
pub struct DotClient {
    server: SocketAddr,
    server_name: ServerName<'static>,
    tls_connector: TlsConnector,
    timeout: Duration,
}

impl DotClient {
    /// Create a new DOT client trusting the default webpki roots.
    pub fn new(server: SocketAddr, hostname: String, timeout: Duration) -> Result<Self> {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_root_store(server, hostname, timeout, root_store)
    }

    /// Create a new DOT client with a caller-supplied root store.
    pub fn with_root_store(
        server: SocketAddr,
        hostname: String,
        timeout: Duration,
        root_store: RootCertStore,
    ) -> Result<Self> {
        let server_name = ServerName::try_from(hostname.clone())
            .map_err(|_| anyhow::anyhow!("Invalid server name: {}", hostname))?;

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(Self {
            server,
            server_name,
            tls_connector: TlsConnector::from(Arc::new(tls_config)),
            timeout,
        })
    }

    /// Dial the resolver and complete the TLS handshake, bounded by the
    /// configured timeout. Refused, timed out, and failed-handshake all
    /// count as the upstream being unreachable.
    async fn connect(&self) -> Result<tokio_rustls::client::TlsStream<TcpStream>, UpstreamError> {
        trace!("Connecting to DOT server {}", self.server);

        let dial = async {
            let tcp_stream = TcpStream::connect(self.server).await?;
            self.tls_connector
                .connect(self.server_name.clone(), tcp_stream)
                .await
        };

        match timeout(self.timeout, dial).await {
            Ok(Ok(tls_stream)) => Ok(tls_stream),
            Ok(Err(e)) => Err(UpstreamError::Unreachable(format!(
                "{}: {}",
                self.server, e
            ))),
            Err(_) => Err(UpstreamError::Unreachable(format!(
                "{}: connect timed out after {:?}",
                self.server, self.timeout
            ))),
        }
    }
}

#[async_trait]
impl UpstreamClient for DotClient {
    async fn exchange(&self, query: &Message) -> Result<Message, UpstreamError> {
        let mut tls_stream = self.connect().await?;

        let wire_format = query
            .to_vec()
            .map_err(|e| UpstreamError::Protocol(format!("failed to encode query: {}", e)))?;
        let len = u16::try_from(wire_format.len())
            .map_err(|_| UpstreamError::Protocol("query exceeds 64 KiB".to_string()))?;

        // One length-prefixed message out, one back (RFC 7766 framing).
        let roundtrip = async {
            tls_stream.write_all(&len.to_be_bytes()).await?;
            tls_stream.write_all(&wire_format).await?;
            tls_stream.flush().await?;

            trace!("Sent DOT query ({} bytes)", wire_format.len());

            let mut len_buf = [0u8; 2];
            tls_stream.read_exact(&mut len_buf).await?;
            let response_len = u16::from_be_bytes(len_buf) as usize;

            let mut response_buf = vec![0u8; response_len];
            tls_stream.read_exact(&mut response_buf).await?;

            trace!("Received DOT response ({} bytes)", response_len);
            Ok::<_, io::Error>(response_buf)
        };

        let response_buf = match timeout(self.timeout, roundtrip).await {
            Ok(Ok(buf)) => buf,
            Ok(Err(e)) => {
                return Err(UpstreamError::Unreachable(format!(
                    "{}: exchange failed: {}",
                    self.server, e
                )))
            }
            Err(_) => return Err(UpstreamError::Timeout),
        };

        // The stream drops here, closing the connection; it is never reused.
        Message::from_bytes(&response_buf).map_err(|e| UpstreamError::Protocol(e.to_string()))
    }
}
