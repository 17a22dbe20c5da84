//! End-to-end DNS routing tests: crafted wire-format questions with
//! controlled source addresses go through the full `RequestHandler`
//! pipeline and the serialized responses are inspected.

mod common;

use common::*;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use cdn_router::dns::DnsHandler;

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection.
///
/// Implements `ResponseHandler` so it can be passed to
/// `RequestHandler::handle_request()`. The response is serialized via
/// `MessageResponse::destructive_emit()` and stored as raw wire-format
/// bytes, which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Query construction and execution ---

fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

fn build_request(name: &str, record_type: RecordType, src: SocketAddr, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let mut decoder = BinDecoder::new(&bytes);
    let msg = MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest");
    Request::new(msg, src, Protocol::Udp)
}

/// Execute one query through the handler and return the parsed response.
async fn execute_query(
    handler: &DnsHandler,
    name: &str,
    record_type: RecordType,
    src: SocketAddr,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, src, id);
    let capture = TestResponseHandler::new();
    handler.handle_request(&request, capture.clone()).await;
    capture.into_message()
}

fn handler(states: &[(&str, bool)]) -> DnsHandler {
    DnsHandler::new(build_cell(states), 60)
}

fn extract_a(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

fn extract_aaaa(msg: &Message) -> Vec<Ipv6Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::AAAA(aaaa) => Some(Ipv6Addr::from(*aaaa)),
            _ => None,
        })
        .collect()
}

fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

// =========================================================================
// DNS delivery services
// =========================================================================

#[tokio::test]
async fn dns_ds_answers_with_zone_cache() {
    let handler = handler(&all_available());
    let msg = execute_query(&handler, "foo.ds1.cdn.test.", RecordType::A, client_v4(), 1).await;

    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(extract_a(&msg), ["10.0.0.1".parse::<Ipv4Addr>().unwrap()]);
    assert!(msg.authoritative());
    assert_eq!(msg.answers()[0].ttl(), 60);
}

#[tokio::test]
async fn dns_ds_answers_aaaa_for_v6_question() {
    let handler = handler(&all_available());
    let msg = execute_query(&handler, "foo.ds1.cdn.test.", RecordType::AAAA, client_v6(), 2).await;

    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(extract_aaaa(&msg), ["fd00::a1".parse::<Ipv6Addr>().unwrap()]);
}

#[tokio::test]
async fn any_question_gets_one_answer_per_family() {
    let handler = handler(&all_available());
    let msg = execute_query(&handler, "foo.ds1.cdn.test.", RecordType::ANY, client_v4(), 3).await;

    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(extract_a(&msg).len(), 1);
    assert_eq!(extract_aaaa(&msg).len(), 1);
}

#[tokio::test]
async fn unauthoritative_name_is_refused() {
    let handler = handler(&all_available());
    let msg = execute_query(&handler, "foo.other.tld.", RecordType::A, client_v4(), 4).await;

    assert_response_code(&msg, ResponseCode::Refused);
    assert!(msg.answers().is_empty());
}

#[tokio::test]
async fn client_outside_every_zone_gets_servfail() {
    let handler = handler(&all_available());
    let msg = execute_query(
        &handler,
        "foo.ds1.cdn.test.",
        RecordType::A,
        client_unzoned(),
        5,
    )
    .await;

    assert_response_code(&msg, ResponseCode::ServFail);
}

#[tokio::test]
async fn unavailable_only_cache_gets_servfail() {
    let handler = handler(&[("s1", false), ("s2", true)]);
    let msg = execute_query(&handler, "foo.ds1.cdn.test.", RecordType::A, client_v4(), 6).await;

    assert_response_code(&msg, ResponseCode::ServFail);
}

#[tokio::test]
async fn unhandled_question_type_is_refused() {
    let handler = handler(&all_available());
    let msg = execute_query(&handler, "foo.ds1.cdn.test.", RecordType::TXT, client_v4(), 7).await;

    assert_response_code(&msg, ResponseCode::Refused);
}

// =========================================================================
// HTTP delivery services over DNS
// =========================================================================

#[tokio::test]
async fn http_ds_first_hop_answers_with_router() {
    let handler = handler(&all_available());
    let msg = execute_query(&handler, "foo.ds2.cdn.test.", RecordType::A, client_v4(), 8).await;

    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(extract_a(&msg), ["10.9.9.9".parse::<Ipv4Addr>().unwrap()]);
}

#[tokio::test]
async fn http_ds_second_hop_answers_with_cache() {
    let handler = handler(&all_available());
    let msg = execute_query(&handler, "s2.ds2.cdn.test.", RecordType::A, client_v4(), 9).await;

    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(extract_a(&msg), ["10.0.0.2".parse::<Ipv4Addr>().unwrap()]);
}

#[tokio::test]
async fn http_ds_second_hop_without_family_is_refused() {
    // s2 has no IPv6 address.
    let handler = handler(&all_available());
    let msg = execute_query(&handler, "s2.ds2.cdn.test.", RecordType::AAAA, client_v6(), 10).await;

    assert_response_code(&msg, ResponseCode::Refused);
}

// =========================================================================
// Snapshot swap visibility
// =========================================================================

#[tokio::test]
async fn handler_sees_newly_published_snapshot() {
    let cell = build_cell(&[("s1", false), ("s2", true)]);
    let handler = DnsHandler::new(Arc::clone(&cell), 60);

    let msg = execute_query(&handler, "foo.ds1.cdn.test.", RecordType::A, client_v4(), 11).await;
    assert_response_code(&msg, ResponseCode::ServFail);

    // The monitor marks s1 available; the next request must see it.
    cell.set(build_snapshot(&all_available()));
    let msg = execute_query(&handler, "foo.ds1.cdn.test.", RecordType::A, client_v4(), 12).await;
    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(extract_a(&msg), ["10.0.0.1".parse::<Ipv4Addr>().unwrap()]);
}

// =========================================================================
// Header hygiene
// =========================================================================

#[tokio::test]
async fn response_echoes_request_id_and_clears_ra() {
    let handler = handler(&all_available());
    let msg = execute_query(&handler, "foo.ds1.cdn.test.", RecordType::A, client_v4(), 777).await;

    assert_eq!(msg.id(), 777);
    assert_eq!(msg.message_type(), MessageType::Response);
    assert!(!msg.recursion_available());
}

#[tokio::test]
async fn error_responses_are_not_authoritative() {
    let handler = handler(&all_available());
    let msg = execute_query(&handler, "foo.other.tld.", RecordType::A, client_v4(), 13).await;

    assert!(!msg.authoritative());
}
