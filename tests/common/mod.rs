//! Shared fixtures for the routing integration tests.
//!
//! One CDN, domain `cdn.test`: a DNS delivery service `ds1` served by the
//! cache `s1`, an HTTP delivery service `ds2` served by `s2` and fronted
//! by the content router `r1`, and a single coverage zone `z1` covering
//! `10.0.0.0/24` and `fd00::/16`.

use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use cdn_router::catalog::{CacheStates, RoutingConfig};
use cdn_router::cell::SnapshotCell;
use cdn_router::czf::{CoverageZoneFile, CoverageZoneIndex};
use cdn_router::snapshot::Snapshot;

pub const CDN_DOMAIN: &str = "cdn.test";

/// A client inside zone z1.
pub fn client_v4() -> SocketAddr {
    SocketAddr::new("10.0.0.5".parse::<IpAddr>().unwrap(), 40000)
}

/// A v6 client inside zone z1.
pub fn client_v6() -> SocketAddr {
    SocketAddr::new("fd00::42".parse::<IpAddr>().unwrap(), 40000)
}

/// A client in no zone at all.
pub fn client_unzoned() -> SocketAddr {
    SocketAddr::new("192.168.0.5".parse::<IpAddr>().unwrap(), 40000)
}

pub fn coverage_zones() -> Arc<CoverageZoneIndex> {
    let file: CoverageZoneFile = serde_json::from_value(json!({
        "revision": "test-1",
        "customerName": "test",
        "coverageZones": {
            "z1": {"network": ["10.0.0.0/24"], "network6": ["fd00::/16"]}
        }
    }))
    .unwrap();
    Arc::new(CoverageZoneIndex::from_file(&file).unwrap())
}

pub fn routing_config() -> RoutingConfig {
    serde_json::from_value(json!({
        "config": {"domain_name": CDN_DOMAIN},
        "deliveryServices": {
            "ds1": {"matchsets": [
                {"protocol": "DNS", "matchlist": [{"match-type": "HOST", "regex": r".*\.ds1\..*"}]}
            ]},
            "ds2": {"matchsets": [
                {"protocol": "HTTP", "matchlist": [{"match-type": "HOST", "regex": r".*\.ds2\..*"}]}
            ]}
        },
        "contentServers": {
            "s1": {"status": "REPORTED", "cacheGroup": "z1",
                   "ip": "10.0.0.1", "ip6": "fd00::a1",
                   "deliveryServices": {"ds1": []}},
            "s2": {"status": "REPORTED", "cacheGroup": "z1",
                   "ip": "10.0.0.2",
                   "deliveryServices": {"ds2": []}}
        },
        "contentRouters": {
            "r1": {"status": "ONLINE", "location": "rtr", "ip": "10.9.9.9"}
        }
    }))
    .unwrap()
}

pub fn cache_states(entries: &[(&str, bool)]) -> CacheStates {
    let caches: serde_json::Map<String, serde_json::Value> = entries
        .iter()
        .map(|(name, avail)| (name.to_string(), json!({"isAvailable": avail})))
        .collect();
    serde_json::from_value(json!({ "caches": caches })).unwrap()
}

/// Build the fixture snapshot with the given availability verdicts.
pub fn build_snapshot(states: &[(&str, bool)]) -> Arc<Snapshot> {
    let (snapshot, errs) =
        Snapshot::build(coverage_zones(), &routing_config(), &cache_states(states)).unwrap();
    assert!(errs.is_empty(), "unexpected build errors: {errs:?}");
    Arc::new(snapshot)
}

/// Build a snapshot cell over the fixture snapshot.
pub fn build_cell(states: &[(&str, bool)]) -> Arc<SnapshotCell> {
    Arc::new(SnapshotCell::new(build_snapshot(states)))
}

/// Everything available: the happy-path states.
pub fn all_available() -> Vec<(&'static str, bool)> {
    vec![("s1", true), ("s2", true)]
}
