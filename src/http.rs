//! HTTP serving adapter.
//!
//! For HTTP delivery services the client's first DNS answer is one of us;
//! it then issues a plain `GET`, and this handler 302s it to the cache the
//! core picks. Every path goes through the same fallback handler; there is
//! no other routing surface.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::cell::SnapshotCell;
use crate::dns::canonical_ip;
use crate::metrics::{self, RouteOutcome, Timer};
use crate::router::Decision;

const REFUSED_BODY: &str = "This server does not handle the requested domain.\n";

/// Shared state of the HTTP adapter.
#[derive(Clone)]
pub struct HttpState {
    /// The snapshot cell, read once per request.
    pub cell: Arc<SnapshotCell>,
}

/// Build the axum app serving the redirector on both the HTTP and HTTPS
/// listeners.
pub fn app(state: HttpState) -> Router {
    Router::new()
        .fallback(redirect)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The one handler: Host header in, 302/400/500 out.
async fn redirect(
    State(state): State<HttpState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let timer = Timer::start();
    let snapshot = state.cell.get();
    let client_ip = canonical_ip(peer.ip());
    let want_v4 = client_ip.is_ipv4();

    // The Host header as sent; a host with a port will not match any DS
    // and is refused downstream.
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host());
    let Some(host) = host else {
        debug!(client = %client_ip, "request without Host header");
        metrics::record_route("http", RouteOutcome::Refused, timer.elapsed());
        return (StatusCode::BAD_REQUEST, REFUSED_BODY).into_response();
    };

    // The core expects wire-form names, root label included.
    let fqdn = format!("{host}.");

    match snapshot.route_redirect(client_ip, &fqdn, want_v4) {
        Decision::Redirect { cache, ds, domain } => {
            let mut location = format!("http://{cache}.{ds}.{domain}{}", request.uri().path());
            if let Some(query) = request.uri().query() {
                location.push('?');
                location.push_str(query);
            }
            metrics::record_route("http", RouteOutcome::Redirect, timer.elapsed());
            (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
        }
        Decision::Refused => {
            metrics::record_route("http", RouteOutcome::Refused, timer.elapsed());
            (StatusCode::BAD_REQUEST, REFUSED_BODY).into_response()
        }
        Decision::ServFail | Decision::Answer(_) => {
            metrics::record_route("http", RouteOutcome::ServFail, timer.elapsed());
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
