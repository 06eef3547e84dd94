//! Query handler: bridges the listening transports to the upstream client.

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use tracing::warn;

use crate::upstream::UpstreamClient;

/// Maps one inbound DNS query to one outbound response.
///
/// The mapping is total: callers always get a message back, either the
/// upstream's answer or a synthesized SERVFAIL. A client must never be
/// left waiting on a dropped query.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn handle(&self, query: Message) -> Message;
}

/// Forwards every query to a single upstream over one fresh exchange.
pub struct Forwarder<C> {
    upstream: C,
}

impl<C: UpstreamClient> Forwarder<C> {
    pub fn new(upstream: C) -> Self {
        Self { upstream }
    }
}

#[async_trait]
impl<C: UpstreamClient> QueryHandler for Forwarder<C> {
    async fn handle(&self, query: Message) -> Message {
        match self.upstream.exchange(&query).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to resolve query {}: {}", query.id(), e);
                failure_response(&query)
            }
        }
    }
}

/// Create a SERVFAIL response for a request, preserving its transaction
/// ID, opcode, RD flag, and question section.
pub fn failure_response(request: &Message) -> Message {
    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(request.op_code());
    response.set_recursion_desired(request.recursion_desired());
    response.set_response_code(ResponseCode::ServFail);

    for query in request.queries() {
        response.add_query(query.clone());
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamError;
    use hickory_proto::op::{OpCode, Query};
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, RecordType, Record};
    use std::str::FromStr;

    fn create_test_query(domain: &str) -> Message {
        let mut message = Message::new();
        message.set_id(4711);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);

        let name = Name::from_str(domain).unwrap();
        message.add_query(Query::query(name, RecordType::A));

        message
    }

    /// Upstream double that either answers or fails with a fixed error.
    struct FakeUpstream {
        fail_with: Option<fn() -> UpstreamError>,
    }

    #[async_trait]
    impl UpstreamClient for FakeUpstream {
        async fn exchange(&self, query: &Message) -> Result<Message, UpstreamError> {
            if let Some(make_err) = self.fail_with {
                return Err(make_err());
            }

            let mut response = Message::new();
            response.set_id(query.id());
            response.set_message_type(MessageType::Response);
            for q in query.queries() {
                response.add_query(q.clone());
                response.add_answer(Record::from_rdata(
                    q.name().clone(),
                    60,
                    RData::A(A::new(192, 0, 2, 1)),
                ));
            }
            Ok(response)
        }
    }

    #[tokio::test]
    async fn passes_upstream_answer_through_unmodified() {
        let handler = Forwarder::new(FakeUpstream { fail_with: None });

        let response = handler.handle(create_test_query("example.com.")).await;

        assert_eq!(response.id(), 4711);
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert_eq!(
            response.answers()[0].data(),
            Some(&RData::A(A::new(192, 0, 2, 1)))
        );
    }

    #[tokio::test]
    async fn maps_every_upstream_error_to_servfail() {
        let failures: [fn() -> UpstreamError; 3] = [
            || UpstreamError::Unreachable("refused".to_string()),
            || UpstreamError::Timeout,
            || UpstreamError::Protocol("truncated".to_string()),
        ];

        for make_err in failures {
            let handler = Forwarder::new(FakeUpstream {
                fail_with: Some(make_err),
            });

            let query = create_test_query("example.com.");
            let response = handler.handle(query.clone()).await;

            assert_eq!(response.response_code(), ResponseCode::ServFail);
            assert_eq!(response.id(), query.id());
            assert_eq!(response.message_type(), MessageType::Response);
            assert_eq!(response.queries(), query.queries());
            assert!(response.answers().is_empty());
        }
    }

    #[test]
    fn failure_response_preserves_request_fields() {
        let request = create_test_query("example.com.");
        let response = failure_response(&request);

        assert_eq!(response.id(), request.id());
        assert_eq!(response.op_code(), request.op_code());
        assert!(response.recursion_desired());
        assert_eq!(response.response_code(), ResponseCode::ServFail);
        assert_eq!(response.queries().len(), 1);
    }
}
