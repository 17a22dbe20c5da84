//! DNS serving adapter.
//!
//! A thin translation layer between hickory's wire handling and the router
//! core: it derives the wanted address family from the question type, asks
//! the snapshot for a decision, and emits records or an error rcode. A
//! plain `RequestHandler` is used rather than an `Authority` because
//! decisions depend on the client's source address, not on zone data.

use async_trait::async_trait;
use hickory_proto::op::{Header, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error};

use crate::cell::SnapshotCell;
use crate::metrics::{self, RouteOutcome, Timer};
use crate::router::Decision;

/// IPv4-mapped IPv6 sources are IPv4 clients for zone lookup and family
/// selection.
pub(crate) fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => ip,
        },
        IpAddr::V4(_) => ip,
    }
}

/// The DNS-side request handler.
pub struct DnsHandler {
    cell: Arc<SnapshotCell>,
    ttl: u32,
}

impl DnsHandler {
    /// Create a handler reading snapshots from the given cell.
    pub fn new(cell: Arc<SnapshotCell>, ttl: u32) -> Self {
        Self { cell, ttl }
    }

    fn record(&self, name: Name, addr: IpAddr) -> Record {
        let rdata = match addr {
            IpAddr::V4(v4) => RData::A(A::from(v4)),
            IpAddr::V6(v6) => RData::AAAA(AAAA::from(v6)),
        };
        let mut record = Record::from_rdata(name, self.ttl, rdata);
        record.set_dns_class(DNSClass::IN);
        record
    }
}

#[async_trait]
impl RequestHandler for DnsHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let timer = Timer::start();

        // One snapshot for the whole request.
        let snapshot = self.cell.get();

        let info = match request.request_info() {
            Ok(info) => info,
            Err(e) => {
                debug!(client = %request.src(), error = %e, "malformed request");
                return send_error(request, &mut response_handle, ResponseCode::FormErr).await;
            }
        };
        let client_ip = canonical_ip(request.src().ip());
        let query_name = Name::from(info.query.name().clone());
        let qtype = info.query.query_type();

        // Wire-format names always carry the root label; make that
        // explicit for the core, which refuses names without it.
        let mut qname = query_name.to_string();
        if !qname.ends_with('.') {
            qname.push('.');
        }

        // ANY answers both families, one record each.
        let families: &[bool] = match qtype {
            RecordType::A => &[true],
            RecordType::AAAA => &[false],
            RecordType::ANY => &[true, false],
            _ => {
                debug!(client = %client_ip, qname, ?qtype, "unhandled query type, refusing");
                metrics::record_route("dns", RouteOutcome::Refused, timer.elapsed());
                return send_error(request, &mut response_handle, ResponseCode::Refused).await;
            }
        };

        let mut records = Vec::with_capacity(families.len());
        for &want_v4 in families {
            match snapshot.route_dns(client_ip, &qname, want_v4) {
                Decision::Answer(addr) => records.push(self.record(query_name.clone(), addr)),
                Decision::Refused => {
                    metrics::record_route("dns", RouteOutcome::Refused, timer.elapsed());
                    return send_error(request, &mut response_handle, ResponseCode::Refused).await;
                }
                Decision::ServFail => {
                    metrics::record_route("dns", RouteOutcome::ServFail, timer.elapsed());
                    return send_error(request, &mut response_handle, ResponseCode::ServFail).await;
                }
                Decision::Redirect { .. } => {
                    // route_dns never redirects; a builder or core bug if
                    // it ever does.
                    error!(client = %client_ip, qname, "DNS route returned a redirect, should never happen");
                    metrics::record_route("dns", RouteOutcome::ServFail, timer.elapsed());
                    return send_error(request, &mut response_handle, ResponseCode::ServFail).await;
                }
            }
        }

        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(!records.is_empty());
        header.set_recursion_available(false);

        let response = MessageResponseBuilder::from_message_request(request).build(
            header,
            records.iter(),
            std::iter::empty(),
            std::iter::empty(),
            std::iter::empty(),
        );

        metrics::record_route("dns", RouteOutcome::Answer, timer.elapsed());
        match response_handle.send_response(response).await {
            Ok(sent) => sent,
            Err(e) => {
                error!(client = %client_ip, error = %e, "failed to send DNS response");
                serve_failed()
            }
        }
    }
}

async fn send_error<R: ResponseHandler>(
    request: &Request,
    response_handle: &mut R,
    code: ResponseCode,
) -> ResponseInfo {
    let response =
        MessageResponseBuilder::from_message_request(request).error_msg(request.header(), code);
    match response_handle.send_response(response).await {
        Ok(sent) => sent,
        Err(e) => {
            error!(error = %e, "failed to send DNS error response");
            serve_failed()
        }
    }
}

fn serve_failed() -> ResponseInfo {
    let mut header = Header::new();
    header.set_response_code(ResponseCode::ServFail);
    header.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_ip_unwraps_mapped_v4() {
        let mapped: IpAddr = "::ffff:10.0.0.5".parse().unwrap();
        assert_eq!(canonical_ip(mapped), "10.0.0.5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_canonical_ip_leaves_native_addresses() {
        let v4: IpAddr = "10.0.0.5".parse().unwrap();
        let v6: IpAddr = "fd00::1".parse().unwrap();
        assert_eq!(canonical_ip(v4), v4);
        assert_eq!(canonical_ip(v6), v6);
    }
}
