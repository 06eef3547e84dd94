//! Upstream DNS client implementation (DOT).

mod dot;

pub use dot::DotClient;

use async_trait::async_trait;
use hickory_proto::op::Message;
use thiserror::Error;

/// Failure of a single upstream exchange.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The encrypted connection could not be established: refused,
    /// network error, TLS handshake or certificate failure, or the dial
    /// exceeded the configured timeout.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    /// The connection came up but the query/response exchange exceeded
    /// the configured timeout.
    #[error("upstream exchange timed out")]
    Timeout,

    /// A reply arrived but could not be interpreted as a DNS message.
    #[error("invalid upstream response: {0}")]
    Protocol(String),
}

/// Trait for upstream DNS clients.
///
/// One call performs one complete exchange: the query goes out and a single
/// reply comes back over a connection that lives no longer than the call.
/// No retries happen behind this trait.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send a DNS query and receive a response.
    async fn exchange(&self, query: &Message) -> Result<Message, UpstreamError>;
}
