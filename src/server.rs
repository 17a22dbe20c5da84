//! Process wiring and lifecycle management.
//!
//! Brings up everything in dependency order: input files → snapshot →
//! serving surfaces (DNS over UDP/TCP, HTTP, optionally HTTPS) → pollers →
//! reload listener, then runs until the shutdown token fires.

use axum::Router;
use hickory_server::ServerFuture;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

use crate::catalog;
use crate::certs::{self, CertStore};
use crate::config::RouterConfig;
use crate::czf::{load_coverage_zone_file, CoverageZoneIndex};
use crate::dns::DnsHandler;
use crate::error::RouterError;
use crate::http::{self, HttpState};
use crate::poller::{CacheStatesPoll, Poller, RoutingConfigPoll};
use crate::rebuild::Rebuilder;
#[cfg(unix)]
use crate::reload;

/// TCP DNS connections are dropped after this long without a query.
const DNS_TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// The CDN traffic router process.
pub struct Server {
    config: RouterConfig,
}

impl Server {
    /// Create a server with the given configuration.
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// Run until the shutdown token fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), RouterError> {
        let config = self.config;

        if config.monitors.is_empty() {
            return Err(RouterError::Config("no monitors configured".to_string()));
        }

        // Initial inputs come from files; the pollers take over from the
        // monitors afterwards.
        let czf_file = load_coverage_zone_file(&config.czf_path)?;
        let czf = Arc::new(CoverageZoneIndex::from_file(&czf_file)?);
        let routing = catalog::load_routing_config(&config.routing_config_path)?;
        let states = catalog::load_cache_states(&config.cache_states_path)?;
        info!(
            czf_revision = %czf.revision,
            zones = czf.len(),
            "loaded input files"
        );

        let (rebuilder, cell) = Rebuilder::new(czf, routing, states)?;

        let cert_store = Arc::new(CertStore::new());
        if let Some(dir) = &config.cert_dir {
            cert_store.replace_all(certs::load_cert_dir(dir)?);
            info!(dir = %dir.display(), certs = cert_store.len(), "loaded certificates");
        }

        // DNS, UDP and TCP on the same address.
        let mut dns_server = ServerFuture::new(DnsHandler::new(Arc::clone(&cell), config.ttl));
        let udp_socket = UdpSocket::bind(config.dns_listen).await?;
        info!(addr = %config.dns_listen, "DNS UDP listening");
        dns_server.register_socket(udp_socket);
        let tcp_listener = TcpListener::bind(config.dns_listen).await?;
        info!(addr = %config.dns_listen, "DNS TCP listening");
        dns_server.register_listener(tcp_listener, DNS_TCP_TIMEOUT);

        let app = http::app(HttpState {
            cell: Arc::clone(&cell),
        });

        let http_listener = TcpListener::bind(config.http_listen).await?;
        info!(addr = %config.http_listen, "HTTP listening");
        let http_task = {
            let app = app.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let result = axum::serve(
                    http_listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
                if let Err(e) = result {
                    error!(error = %e, "HTTP server error");
                }
            })
        };

        let https_task = if config.cert_dir.is_some() {
            let tls_config = certs::server_config(Arc::clone(&cert_store))?;
            let acceptor = TlsAcceptor::from(Arc::new(tls_config));
            let listener = TcpListener::bind(config.https_listen).await?;
            info!(addr = %config.https_listen, "HTTPS listening");
            Some(tokio::spawn(serve_https(
                listener,
                acceptor,
                app,
                shutdown.clone(),
            )))
        } else {
            info!("no cert_dir configured, HTTPS disabled");
            None
        };

        let client = reqwest::Client::new();
        let mut routing_poller = Poller::new(
            Duration::from_millis(config.routing_config_poll_interval_ms),
            Box::new(RoutingConfigPoll::new(
                client.clone(),
                config.monitors.clone(),
                Arc::clone(&rebuilder),
            )),
        );
        routing_poller
            .start()
            .map_err(|e| RouterError::Config(format!("starting routing-config poller: {e}")))?;
        let mut states_poller = Poller::new(
            Duration::from_millis(config.cache_states_poll_interval_ms),
            Box::new(CacheStatesPoll::new(
                client,
                config.monitors.clone(),
                Arc::clone(&rebuilder),
            )),
        );
        states_poller
            .start()
            .map_err(|e| RouterError::Config(format!("starting cache-states poller: {e}")))?;

        #[cfg(unix)]
        let reload_task = tokio::spawn(reload::listen(
            config.clone(),
            Arc::clone(&rebuilder),
            Arc::clone(&cert_store),
            shutdown.clone(),
        ));

        info!("cdn-router ready to serve");

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested");
            }
            result = dns_server.block_until_done() => {
                if let Err(e) = result {
                    error!(error = %e, "DNS server error");
                }
                shutdown.cancel();
            }
        }

        // Stop the pollers first so nothing republishes mid-teardown.
        if let Err(e) = routing_poller.stop().await {
            warn!(error = %e, "stopping routing-config poller");
        }
        if let Err(e) = states_poller.stop().await {
            warn!(error = %e, "stopping cache-states poller");
        }

        let _ = dns_server.shutdown_gracefully().await;
        let _ = http_task.await;
        if let Some(task) = https_task {
            let _ = task.await;
        }
        #[cfg(unix)]
        let _ = reload_task.await;

        info!("cdn-router stopped");
        Ok(())
    }
}

/// Accept loop for the HTTPS listener: TLS handshake with SNI-resolved
/// certificates, then the same axum app as the HTTP listener.
async fn serve_https(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    shutdown: CancellationToken,
) {
    let mut make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => return,

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "HTTPS accept error");
                        continue;
                    }
                };
                let tower_service = match make_service.call(peer).await {
                    Ok(service) => service,
                    Err(infallible) => match infallible {},
                };
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(tls) => tls,
                        Err(e) => {
                            debug!(client = %peer, error = %e, "TLS handshake failed");
                            return;
                        }
                    };
                    let hyper_service = hyper::service::service_fn(
                        move |request: hyper::Request<hyper::body::Incoming>| {
                            tower_service.clone().oneshot(request)
                        },
                    );
                    let served = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(TokioIo::new(tls_stream), hyper_service)
                        .await;
                    if let Err(e) = served {
                        debug!(client = %peer, error = ?e, "HTTPS connection error");
                    }
                });
            }
        }
    }
}
