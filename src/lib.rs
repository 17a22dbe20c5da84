//! cdn-router - An authoritative DNS server and HTTP redirector that routes
//! CDN clients to edge caches.
//!
//! Clients querying content hostnames are answered from an immutable
//! in-memory snapshot compiled from three inputs: the coverage-zone file
//! (client network → cache group), the CDN routing config (which FQDN
//! patterns belong to which delivery service, plus the cache and router
//! catalog), and the cache-state document from the health monitor. Two
//! background pollers keep the latter two fresh; serving threads read the
//! snapshot without locks and a rebuild swaps it atomically.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          cdn-router                            │
//! │                                                                │
//! │  ┌───────────────┐   rebuild   ┌──────────────────┐            │
//! │  │ Pollers       │────────────▶│ Snapshot cell    │            │
//! │  │ CrConfig      │             │ (atomic swap)    │            │
//! │  │ CrStates      │             └────────┬─────────┘            │
//! │  └───────┬───────┘                      │ read, lock-free      │
//! │          │ round-robin          ┌───────┴────────┐             │
//! │          ▼                      ▼                ▼             │
//! │   health monitors        ┌──────────┐     ┌───────────┐        │
//! │                          │ DNS      │     │ HTTP(S)   │        │
//! │                          │ :53      │     │ :80/:443  │        │
//! │                          └──────────┘     └───────────┘        │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Routing
//!
//! For a DNS delivery service one lookup suffices:
//!
//! ```text
//! foo.ds1.cdn.example  →  match DS  →  client zone via CZF
//!                      →  pick an available cache in that zone  →  A/AAAA
//! ```
//!
//! An HTTP delivery service takes two DNS hops with an HTTP 302 between
//! them:
//!
//! ```text
//! 1. foo.ds2.cdn.example    →  A of a content router (us)
//! 2. GET http://foo.ds2...  →  302 to http://cache.ds2.cdn.example/path
//! 3. cache.ds2.cdn.example  →  A of that cache
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use cdn_router::{RouterConfig, Server};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: RouterConfig = load_it_from_somewhere();
//!     let shutdown = CancellationToken::new();
//!     Server::new(config).run(shutdown).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod catalog;
pub mod cell;
pub mod certs;
pub mod config;
pub mod czf;
pub mod dns;
pub mod error;
pub mod http;
pub mod matcher;
pub mod metrics;
pub mod poller;
pub mod rebuild;
#[cfg(unix)]
pub mod reload;
pub mod router;
pub mod server;
pub mod snapshot;
pub mod telemetry;

// Re-export main types
pub use cell::SnapshotCell;
pub use config::{Config, RouterConfig, TelemetryConfig};
pub use error::RouterError;
pub use router::Decision;
pub use server::Server;
pub use snapshot::Snapshot;
