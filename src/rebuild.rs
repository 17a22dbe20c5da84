//! Snapshot rebuilds: retained inputs plus the cell swap.
//!
//! A snapshot compiles all three inputs together, so refreshing any one of
//! them needs the current versions of the other two. The rebuilder retains
//! the latest parsed copy of each input and re-runs the builder whenever
//! one changes, then publishes the result through the cell.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::{CacheStates, RoutingConfig};
use crate::cell::SnapshotCell;
use crate::czf::CoverageZoneIndex;
use crate::error::RouterError;
use crate::metrics;
use crate::snapshot::Snapshot;

struct Inputs {
    czf: Arc<CoverageZoneIndex>,
    routing: Arc<RoutingConfig>,
    states: Arc<CacheStates>,
}

/// Owns the retained inputs and the publishing side of the snapshot cell.
/// Pollers and the reload path are its only callers.
pub struct Rebuilder {
    cell: Arc<SnapshotCell>,
    inputs: Mutex<Inputs>,
}

impl Rebuilder {
    /// Compile the initial snapshot from the given inputs and return the
    /// rebuilder together with the cell it publishes to.
    pub fn new(
        czf: Arc<CoverageZoneIndex>,
        routing: RoutingConfig,
        states: CacheStates,
    ) -> Result<(Arc<Self>, Arc<SnapshotCell>), RouterError> {
        let inputs = Inputs {
            czf,
            routing: Arc::new(routing),
            states: Arc::new(states),
        };
        let snapshot = build_logged(&inputs)?;
        let cell = Arc::new(SnapshotCell::new(snapshot));
        let rebuilder = Arc::new(Self {
            cell: Arc::clone(&cell),
            inputs: Mutex::new(inputs),
        });
        Ok((rebuilder, cell))
    }

    /// Install a freshly polled routing config and republish.
    pub fn set_routing_config(&self, routing: RoutingConfig) -> Result<(), RouterError> {
        let mut inputs = self.inputs.lock();
        let candidate = Inputs {
            czf: Arc::clone(&inputs.czf),
            routing: Arc::new(routing),
            states: Arc::clone(&inputs.states),
        };
        self.commit(&mut inputs, candidate)
    }

    /// Install a freshly polled cache-state document and republish.
    pub fn set_cache_states(&self, states: CacheStates) -> Result<(), RouterError> {
        let mut inputs = self.inputs.lock();
        let candidate = Inputs {
            czf: Arc::clone(&inputs.czf),
            routing: Arc::clone(&inputs.routing),
            states: Arc::new(states),
        };
        self.commit(&mut inputs, candidate)
    }

    /// Replace all three inputs at once (the SIGHUP reload path) and
    /// republish.
    pub fn replace_inputs(
        &self,
        czf: Arc<CoverageZoneIndex>,
        routing: RoutingConfig,
        states: CacheStates,
    ) -> Result<(), RouterError> {
        let mut inputs = self.inputs.lock();
        let candidate = Inputs {
            czf,
            routing: Arc::new(routing),
            states: Arc::new(states),
        };
        self.commit(&mut inputs, candidate)
    }

    /// Build from the candidate inputs; retain them and publish only on
    /// success, so a bad document leaves both the retained inputs and the
    /// served snapshot untouched.
    fn commit(&self, inputs: &mut Inputs, candidate: Inputs) -> Result<(), RouterError> {
        let snapshot = build_logged(&candidate)?;
        *inputs = candidate;
        self.cell.set(snapshot);
        Ok(())
    }
}

/// Run the builder, log its per-entry errors, and record metrics. An `Err`
/// here means no snapshot was produced; the caller keeps serving the old
/// one.
fn build_logged(inputs: &Inputs) -> Result<Arc<Snapshot>, RouterError> {
    let (snapshot, errs) = Snapshot::build(Arc::clone(&inputs.czf), &inputs.routing, &inputs.states)?;
    for err in &errs {
        warn!(error = %err, "snapshot build entry error");
    }
    metrics::record_snapshot_build(errs.len());
    metrics::record_snapshot_counts(
        snapshot.ds_servers.len(),
        snapshot.server_available.len(),
        snapshot.czf.len(),
    );
    info!(
        cdn_domain = %snapshot.cdn_domain,
        delivery_services = snapshot.ds_servers.len(),
        entry_errors = errs.len(),
        "publishing snapshot"
    );
    Ok(Arc::new(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn routing(domain: &str) -> RoutingConfig {
        serde_json::from_value(json!({
            "config": {"domain_name": domain},
            "contentServers": {
                "s1": {"status": "REPORTED", "cacheGroup": "z1", "ip": "10.0.0.1",
                       "deliveryServices": {"ds1": []}}
            }
        }))
        .unwrap()
    }

    fn available(name: &str, avail: bool) -> CacheStates {
        serde_json::from_value(json!({"caches": {name: {"isAvailable": avail}}})).unwrap()
    }

    #[test]
    fn test_cache_state_update_republishes() {
        let (rebuilder, cell) =
            Rebuilder::new(Arc::default(), routing("cdn.test"), available("s1", false)).unwrap();
        assert!(!cell.get().is_available("s1"));

        rebuilder.set_cache_states(available("s1", true)).unwrap();
        assert!(cell.get().is_available("s1"));
    }

    #[test]
    fn test_routing_config_update_keeps_retained_states() {
        let (rebuilder, cell) =
            Rebuilder::new(Arc::default(), routing("cdn.test"), available("s1", true)).unwrap();

        rebuilder.set_routing_config(routing("next.test")).unwrap();
        let snapshot = cell.get();
        assert_eq!(snapshot.cdn_domain, "next.test");
        // The availability verdict from the retained states survives.
        assert!(snapshot.is_available("s1"));
    }

    #[test]
    fn test_bad_routing_config_keeps_old_snapshot() {
        let (rebuilder, cell) =
            Rebuilder::new(Arc::default(), routing("cdn.test"), available("s1", true)).unwrap();

        let bad: RoutingConfig = serde_json::from_value(json!({"config": {}})).unwrap();
        assert!(rebuilder.set_routing_config(bad).is_err());
        assert_eq!(cell.get().cdn_domain, "cdn.test");

        // The bad document was not retained either: later rebuilds still
        // use the last good routing config.
        rebuilder.set_cache_states(available("s1", false)).unwrap();
        assert_eq!(cell.get().cdn_domain, "cdn.test");
        assert!(!cell.get().is_available("s1"));
    }
}
