//! SIGHUP-driven reload of the input files and certificates.
//!
//! A reload re-reads whatever the configured paths point at now and swaps
//! the snapshot and the certificate map atomically. Any load error leaves
//! the previous state serving; the listening sockets and ports never
//! change without a restart.

#![cfg(unix)]

use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::catalog;
use crate::certs::{load_cert_dir, CertStore};
use crate::config::RouterConfig;
use crate::czf::{load_coverage_zone_file, CoverageZoneIndex};
use crate::error::RouterError;
use crate::metrics;
use crate::rebuild::Rebuilder;

/// Listen for SIGHUP until shutdown, reloading on each signal.
pub async fn listen(
    config: RouterConfig,
    rebuilder: Arc<Rebuilder>,
    certs: Arc<CertStore>,
    shutdown: CancellationToken,
) {
    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGHUP handler, reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => return,

            _ = hangups.recv() => match try_reload(&config, &rebuilder, &certs) {
                Ok(()) => {
                    metrics::record_reload(true);
                    info!("reloaded input files");
                }
                Err(e) => {
                    metrics::record_reload(false);
                    error!(error = %e, "reload failed, previous state left serving");
                }
            },
        }
    }
}

/// Re-read all inputs and republish. Nothing is swapped until everything
/// has loaded.
fn try_reload(
    config: &RouterConfig,
    rebuilder: &Rebuilder,
    certs: &CertStore,
) -> Result<(), RouterError> {
    let czf_file = load_coverage_zone_file(&config.czf_path)?;
    let czf = Arc::new(CoverageZoneIndex::from_file(&czf_file)?);
    let routing = catalog::load_routing_config(&config.routing_config_path)?;
    let states = catalog::load_cache_states(&config.cache_states_path)?;

    let new_certs = match &config.cert_dir {
        Some(dir) => Some(load_cert_dir(dir)?),
        None => None,
    };

    rebuilder.replace_inputs(czf, routing, states)?;
    if let Some(new_certs) = new_certs {
        certs.replace_all(new_certs);
    }
    Ok(())
}
