//! The CDN service catalog documents, as published by the health monitor.
//!
//! Two documents are consumed: the routing config (`/publish/CrConfig`),
//! which catalogs delivery services, content servers, and content routers,
//! and the cache-state document (`/publish/CrStates`), the monitor's
//! availability verdict per cache. Field names follow the monitor's publish
//! format.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::RouterError;

/// Server status marking a cache as in service and health-gated.
pub const STATUS_REPORTED: &str = "REPORTED";
/// Server status marking a cache as in service unconditionally.
pub const STATUS_ONLINE: &str = "ONLINE";

/// Match-set protocol for DNS delivery services.
pub const PROTOCOL_DNS: &str = "DNS";
/// Match-set protocol for HTTP delivery services.
pub const PROTOCOL_HTTP: &str = "HTTP";
/// The only match-list entry type we route on.
pub const MATCH_TYPE_HOST: &str = "HOST";

/// The routing-config document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Free-form CDN-wide settings; `domain_name` is the one we require.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,

    /// Delivery services by name.
    #[serde(default, rename = "deliveryServices")]
    pub delivery_services: HashMap<String, DeliveryService>,

    /// Edge caches by host name.
    #[serde(default, rename = "contentServers")]
    pub content_servers: HashMap<String, ContentServer>,

    /// Content routers (instances of this software) by host name.
    #[serde(default, rename = "contentRouters")]
    pub content_routers: HashMap<String, ContentRouter>,
}

impl RoutingConfig {
    /// The CDN's apex domain, the authoritative suffix for all routed names.
    pub fn cdn_domain(&self) -> Option<&str> {
        self.config.get("domain_name").and_then(|v| v.as_str())
    }
}

/// One delivery service: a set of host patterns plus the protocol by which
/// clients are directed to caches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryService {
    /// First label of the FQDN clients resolve for HTTP delivery services.
    #[serde(default, rename = "routingName")]
    pub routing_name: Option<String>,

    /// Pattern sets; entries can be null in published documents.
    #[serde(default, rename = "matchsets")]
    pub match_sets: Vec<Option<MatchSet>>,
}

/// A protocol-tagged list of host patterns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchSet {
    /// `"DNS"` or `"HTTP"`.
    #[serde(default)]
    pub protocol: String,

    /// The patterns in the set.
    #[serde(default, rename = "matchlist")]
    pub match_list: Vec<MatchItem>,
}

/// One host pattern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchItem {
    /// Entry type; only `"HOST"` entries are routed on.
    #[serde(default, rename = "match-type")]
    pub match_type: String,

    /// The pattern itself, in regex syntax.
    #[serde(default)]
    pub regex: String,
}

/// An edge cache as cataloged in the routing config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentServer {
    /// Lifecycle status (`REPORTED`, `ONLINE`, `OFFLINE`, `ADMIN_DOWN`, ...).
    #[serde(default, rename = "status")]
    pub server_status: Option<String>,

    /// Cache group the server belongs to.
    #[serde(default, rename = "cacheGroup")]
    pub cache_group: Option<String>,

    /// IPv4 address, possibly in CIDR notation.
    #[serde(default)]
    pub ip: Option<String>,

    /// IPv6 address, possibly in CIDR notation.
    #[serde(default)]
    pub ip6: Option<String>,

    /// Delivery services assigned to this server. Values are opaque; only
    /// the keys matter to routing.
    #[serde(default, rename = "deliveryServices")]
    pub delivery_services: HashMap<String, serde_json::Value>,
}

/// A content router as cataloged in the routing config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentRouter {
    /// Lifecycle status, same values as servers.
    #[serde(default, rename = "status")]
    pub server_status: Option<String>,

    /// Cache group the router is located in.
    #[serde(default)]
    pub location: Option<String>,

    /// IPv4 address, possibly in CIDR notation.
    #[serde(default)]
    pub ip: Option<String>,

    /// IPv6 address, possibly in CIDR notation.
    #[serde(default)]
    pub ip6: Option<String>,
}

/// The cache-state document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStates {
    /// Availability verdict per cache.
    #[serde(default)]
    pub caches: HashMap<String, CacheState>,
}

/// One cache's availability.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheState {
    /// Whether the monitor considers the cache able to serve.
    #[serde(rename = "isAvailable")]
    pub is_available: bool,
}

/// Load a routing-config document from disk.
pub fn load_routing_config(path: &Path) -> Result<RoutingConfig, RouterError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Load a cache-state document from disk.
pub fn load_cache_states(path: &Path) -> Result<CacheStates, RouterError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_routing_config_field_names() {
        let doc = json!({
            "config": {"domain_name": "cdn.test"},
            "deliveryServices": {
                "ds1": {
                    "routingName": "tr",
                    "matchsets": [
                        {"protocol": "DNS", "matchlist": [
                            {"match-type": "HOST", "regex": r".*\.ds1\..*"}
                        ]},
                        null
                    ]
                }
            },
            "contentServers": {
                "edge1": {
                    "status": "REPORTED",
                    "cacheGroup": "cg-east",
                    "ip": "10.0.0.1",
                    "ip6": "fd00::1",
                    "deliveryServices": {"ds1": ["edge1.ds1.cdn.test"]}
                }
            },
            "contentRouters": {
                "tr1": {"status": "ONLINE", "location": "cg-east", "ip": "10.9.9.9"}
            }
        });
        let cfg: RoutingConfig = serde_json::from_value(doc).unwrap();

        assert_eq!(cfg.cdn_domain(), Some("cdn.test"));
        let ds = &cfg.delivery_services["ds1"];
        assert_eq!(ds.routing_name.as_deref(), Some("tr"));
        assert_eq!(ds.match_sets.len(), 2);
        assert!(ds.match_sets[1].is_none());
        let ms = ds.match_sets[0].as_ref().unwrap();
        assert_eq!(ms.protocol, PROTOCOL_DNS);
        assert_eq!(ms.match_list[0].match_type, MATCH_TYPE_HOST);

        let sv = &cfg.content_servers["edge1"];
        assert_eq!(sv.server_status.as_deref(), Some(STATUS_REPORTED));
        assert_eq!(sv.cache_group.as_deref(), Some("cg-east"));
        assert!(sv.delivery_services.contains_key("ds1"));

        assert_eq!(cfg.content_routers["tr1"].location.as_deref(), Some("cg-east"));
    }

    #[test]
    fn test_cache_states_field_names() {
        let doc = json!({"caches": {"edge1": {"isAvailable": true}, "edge2": {"isAvailable": false}}});
        let states: CacheStates = serde_json::from_value(doc).unwrap();
        assert!(states.caches["edge1"].is_available);
        assert!(!states.caches["edge2"].is_available);
    }

    #[test]
    fn test_missing_domain_name() {
        let cfg: RoutingConfig = serde_json::from_value(json!({"config": {}})).unwrap();
        assert_eq!(cfg.cdn_domain(), None);
    }
}
