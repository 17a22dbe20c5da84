//! The routing snapshot: the immutable compiled form of the three inputs.
//!
//! A snapshot is built whole, published through the
//! [`SnapshotCell`](crate::cell::SnapshotCell), and never mutated afterward.
//! The builder is resilient by design: one malformed delivery service,
//! server, or router must not break the others, so per-entry problems are
//! accumulated as [`BuildError`]s while the rest of the snapshot is still
//! produced. Only a routing config with no `config.domain_name` fails the
//! build outright.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use thiserror::Error;

use crate::catalog::{
    CacheStates, ContentRouter, ContentServer, RoutingConfig, MATCH_TYPE_HOST, PROTOCOL_DNS,
    PROTOCOL_HTTP, STATUS_ONLINE, STATUS_REPORTED,
};
use crate::czf::CoverageZoneIndex;
use crate::error::RouterError;
use crate::matcher::{BadPattern, HostMatch, DEFAULT_HTTP_ROUTING_NAME};

/// A non-fatal problem found while compiling the snapshot. The offending
/// entry is dropped; everything else still serves.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A delivery service contained a null match set.
    #[error("ds '{ds}' has a null matchset, skipping")]
    NullMatchSet {
        /// Delivery service name.
        ds: String,
    },

    /// A match set declared a protocol we do not route.
    #[error("ds '{ds}' has unknown match protocol '{protocol}', skipping")]
    UnknownProtocol {
        /// Delivery service name.
        ds: String,
        /// The protocol string as published.
        protocol: String,
    },

    /// A match-list entry was not a HOST entry.
    #[error("ds '{ds}' has unknown match list type '{match_type}', skipping")]
    UnknownMatchType {
        /// Delivery service name.
        ds: String,
        /// The match type as published.
        match_type: String,
    },

    /// A host pattern failed to compile.
    #[error("ds '{ds}': {source}")]
    Pattern {
        /// Delivery service name.
        ds: String,
        /// The underlying pattern error.
        #[source]
        source: BadPattern,
    },

    /// A server or router had no status.
    #[error("{kind} '{name}' has nil status, skipping")]
    MissingStatus {
        /// `"server"` or `"router"`.
        kind: &'static str,
        /// Entry name.
        name: String,
    },

    /// A server or router had no cache group.
    #[error("{kind} '{name}' has nil cachegroup, skipping")]
    MissingCacheGroup {
        /// `"server"` or `"router"`.
        kind: &'static str,
        /// Entry name.
        name: String,
    },

    /// A server or router had neither an IPv4 nor an IPv6 address.
    #[error("{kind} '{name}' has nil ip and ip6, skipping")]
    MissingAddresses {
        /// `"server"` or `"router"`.
        kind: &'static str,
        /// Entry name.
        name: String,
    },

    /// An address failed to parse, or parsed to the wrong family.
    #[error("{kind} '{name}' {field} '{addr}' not {expected}, skipping")]
    BadAddress {
        /// `"server"` or `"router"`.
        kind: &'static str,
        /// Entry name.
        name: String,
        /// `"ip"` or `"ip6"`.
        field: &'static str,
        /// The address string as published.
        addr: String,
        /// `"valid"`, `"IPv4"`, or `"IPv6"`.
        expected: &'static str,
    },
}

/// A compiled matcher tagged with the delivery service that owns it.
#[derive(Debug, Clone)]
pub struct DsMatch {
    /// Owning delivery service.
    pub ds: String,
    /// The service's compiled host matchers.
    pub matchers: Vec<HostMatch>,
}

/// Find the first delivery service whose matchers accept `fqdn`.
pub fn match_ds<'a>(matches: &'a [DsMatch], fqdn: &str) -> Option<&'a str> {
    matches
        .iter()
        .find(|m| m.matchers.iter().any(|ma| ma.matches(fqdn)))
        .map(|m| m.ds.as_str())
}

/// A routable cache address: host name plus one already-parsed IP of the
/// family of the list it sits in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheAddr {
    /// Cache host name, the key into the availability map.
    pub host: String,
    /// The address to hand to clients.
    pub addr: IpAddr,
}

/// Per-family cache lists for one delivery service × cache group (or for
/// one cache group's routers).
#[derive(Debug, Clone, Default)]
pub struct FamilyServers {
    /// Caches answerable over IPv4.
    pub v4s: Vec<CacheAddr>,
    /// Caches answerable over IPv6.
    pub v6s: Vec<CacheAddr>,
}

impl FamilyServers {
    /// The list for the requested family.
    pub fn family(&self, want_v4: bool) -> &[CacheAddr] {
        if want_v4 {
            &self.v4s
        } else {
            &self.v6s
        }
    }

    fn is_empty(&self) -> bool {
        self.v4s.is_empty() && self.v6s.is_empty()
    }
}

/// The immutable routing snapshot.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Coverage-zone index shared with the rebuilder (the CZF changes far
    /// less often than the other inputs).
    pub czf: Arc<CoverageZoneIndex>,

    /// The CDN's apex domain, the authoritative suffix.
    pub cdn_domain: String,

    /// Matchers for DNS-protocol delivery services, in catalog order.
    pub dns_matches: Vec<DsMatch>,

    /// Matchers for the initial DNS hop of HTTP-protocol delivery services.
    pub http_dns_matches: Vec<DsMatch>,

    /// `cache.ds.cdn_domain` → cache name, for the second DNS hop of HTTP
    /// delivery services.
    pub http_second_matches: HashMap<String, String>,

    /// ds → cache group → in-service caches, split by family.
    pub ds_servers: HashMap<String, HashMap<String, FamilyServers>>,

    /// Cache group → in-service content routers, split by family.
    pub cg_routers: HashMap<String, FamilyServers>,

    /// All content routers across cache groups, flattened once at build
    /// time; HTTP first-hop answers draw from this pool.
    pub router_pool: FamilyServers,

    /// Cache name → IPv4 address, for second-hop answers. Unlike
    /// `ds_servers` this covers every cataloged server regardless of
    /// status.
    pub server_addr_v4: HashMap<String, Ipv4Addr>,

    /// Cache name → IPv6 address, same coverage as `server_addr_v4`.
    pub server_addr_v6: HashMap<String, Ipv6Addr>,

    /// The monitor's availability verdict per cache. A cache missing here
    /// is treated as unavailable.
    pub server_available: HashMap<String, bool>,
}

impl Snapshot {
    /// Compile a snapshot from the three parsed inputs.
    ///
    /// Returns the snapshot together with every per-entry error found along
    /// the way. The one fatal case is a routing config without
    /// `config.domain_name`.
    pub fn build(
        czf: Arc<CoverageZoneIndex>,
        routing: &RoutingConfig,
        states: &CacheStates,
    ) -> Result<(Self, Vec<BuildError>), RouterError> {
        let cdn_domain = routing
            .cdn_domain()
            .filter(|d| !d.is_empty())
            .ok_or(RouterError::MissingCdnDomain)?
            .to_string();

        let mut errs = Vec::new();
        let mut snapshot = Snapshot {
            czf,
            cdn_domain: cdn_domain.clone(),
            ..Snapshot::default()
        };

        build_matches(routing, &cdn_domain, &mut snapshot, &mut errs);
        build_ds_servers(&routing.content_servers, &mut snapshot, &mut errs);
        build_cg_routers(&routing.content_routers, &mut snapshot, &mut errs);
        build_second_matches(routing, &mut snapshot);

        snapshot.server_available = states
            .caches
            .iter()
            .map(|(name, state)| (name.clone(), state.is_available))
            .collect();

        Ok((snapshot, errs))
    }

    /// Whether the monitor currently considers the cache available.
    pub fn is_available(&self, cache: &str) -> bool {
        self.server_available.get(cache).copied().unwrap_or(false)
    }
}

fn serving_status(status: &str) -> bool {
    status == STATUS_REPORTED || status == STATUS_ONLINE
}

/// Compile each delivery service's match sets into matcher tables.
fn build_matches(
    routing: &RoutingConfig,
    cdn_domain: &str,
    snapshot: &mut Snapshot,
    errs: &mut Vec<BuildError>,
) {
    for (ds_name, ds) in &routing.delivery_services {
        let routing_name = ds
            .routing_name
            .as_deref()
            .unwrap_or(DEFAULT_HTTP_ROUTING_NAME);
        for match_set in &ds.match_sets {
            let Some(match_set) = match_set else {
                errs.push(BuildError::NullMatchSet {
                    ds: ds_name.clone(),
                });
                continue;
            };
            let is_http = match match_set.protocol.as_str() {
                PROTOCOL_DNS => false,
                PROTOCOL_HTTP => true,
                other => {
                    errs.push(BuildError::UnknownProtocol {
                        ds: ds_name.clone(),
                        protocol: other.to_string(),
                    });
                    continue;
                }
            };

            let mut matchers = Vec::with_capacity(match_set.match_list.len());
            for item in &match_set.match_list {
                if item.match_type != MATCH_TYPE_HOST {
                    errs.push(BuildError::UnknownMatchType {
                        ds: ds_name.clone(),
                        match_type: item.match_type.clone(),
                    });
                    continue;
                }
                let built = if is_http {
                    HostMatch::http(&item.regex, routing_name, cdn_domain)
                } else {
                    HostMatch::dns(&item.regex)
                };
                match built {
                    Ok(m) => matchers.push(m),
                    Err(source) => errs.push(BuildError::Pattern {
                        ds: ds_name.clone(),
                        source,
                    }),
                }
            }

            let entry = DsMatch {
                ds: ds_name.clone(),
                matchers,
            };
            if is_http {
                snapshot.http_dns_matches.push(entry);
            } else {
                snapshot.dns_matches.push(entry);
            }
        }
    }
}

/// Parse an address that may be published bare or in CIDR notation.
fn parse_ip_or_cidr(s: &str) -> Option<IpAddr> {
    s.parse::<IpAddr>()
        .ok()
        .or_else(|| s.parse::<ipnet::IpNet>().ok().map(|net| net.addr()))
}

fn checked_v4(
    kind: &'static str,
    name: &str,
    addr: &str,
    errs: &mut Vec<BuildError>,
) -> Option<Ipv4Addr> {
    match parse_ip_or_cidr(addr) {
        None => {
            errs.push(BuildError::BadAddress {
                kind,
                name: name.to_string(),
                field: "ip",
                addr: addr.to_string(),
                expected: "valid",
            });
            None
        }
        Some(IpAddr::V4(v4)) => Some(v4),
        Some(IpAddr::V6(_)) => {
            errs.push(BuildError::BadAddress {
                kind,
                name: name.to_string(),
                field: "ip",
                addr: addr.to_string(),
                expected: "IPv4",
            });
            None
        }
    }
}

fn checked_v6(
    kind: &'static str,
    name: &str,
    addr: &str,
    errs: &mut Vec<BuildError>,
) -> Option<Ipv6Addr> {
    match parse_ip_or_cidr(addr) {
        None => {
            errs.push(BuildError::BadAddress {
                kind,
                name: name.to_string(),
                field: "ip6",
                addr: addr.to_string(),
                expected: "valid",
            });
            None
        }
        Some(IpAddr::V6(v6)) => Some(v6),
        Some(IpAddr::V4(_)) => {
            errs.push(BuildError::BadAddress {
                kind,
                name: name.to_string(),
                field: "ip6",
                addr: addr.to_string(),
                expected: "IPv6",
            });
            None
        }
    }
}

/// Index in-service caches under every delivery service assigned to them,
/// and record every cataloged server's addresses for the second hop.
fn build_ds_servers(
    servers: &HashMap<String, ContentServer>,
    snapshot: &mut Snapshot,
    errs: &mut Vec<BuildError>,
) {
    for (name, server) in servers {
        let v4 = server
            .ip
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(|addr| checked_v4("server", name, addr, errs));
        let v6 = server
            .ip6
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(|addr| checked_v6("server", name, addr, errs));

        // Address maps cover all cataloged servers, in-service or not; the
        // second DNS hop answers for whatever name a redirect produced.
        if let Some(v4) = v4 {
            snapshot.server_addr_v4.insert(name.clone(), v4);
        }
        if let Some(v6) = v6 {
            snapshot.server_addr_v6.insert(name.clone(), v6);
        }

        let Some(status) = server.server_status.as_deref() else {
            errs.push(BuildError::MissingStatus {
                kind: "server",
                name: name.clone(),
            });
            continue;
        };
        let Some(cache_group) = server.cache_group.as_deref() else {
            errs.push(BuildError::MissingCacheGroup {
                kind: "server",
                name: name.clone(),
            });
            continue;
        };
        let has_ip = server.ip.as_deref().is_some_and(|s| !s.is_empty());
        let has_ip6 = server.ip6.as_deref().is_some_and(|s| !s.is_empty());
        if !has_ip && !has_ip6 {
            errs.push(BuildError::MissingAddresses {
                kind: "server",
                name: name.clone(),
            });
            continue;
        }
        if !serving_status(status) {
            continue;
        }

        for ds_name in server.delivery_services.keys() {
            let family = snapshot
                .ds_servers
                .entry(ds_name.clone())
                .or_default()
                .entry(cache_group.to_string())
                .or_default();
            if let Some(v4) = v4 {
                family.v4s.push(CacheAddr {
                    host: name.clone(),
                    addr: IpAddr::V4(v4),
                });
            }
            if let Some(v6) = v6 {
                family.v6s.push(CacheAddr {
                    host: name.clone(),
                    addr: IpAddr::V6(v6),
                });
            }
        }
    }
}

/// Index in-service content routers by cache group, and flatten them into
/// the build-time router pool.
fn build_cg_routers(
    routers: &HashMap<String, ContentRouter>,
    snapshot: &mut Snapshot,
    errs: &mut Vec<BuildError>,
) {
    for (name, router) in routers {
        let Some(status) = router.server_status.as_deref() else {
            errs.push(BuildError::MissingStatus {
                kind: "router",
                name: name.clone(),
            });
            continue;
        };
        let Some(location) = router.location.as_deref() else {
            errs.push(BuildError::MissingCacheGroup {
                kind: "router",
                name: name.clone(),
            });
            continue;
        };
        let has_ip = router.ip.as_deref().is_some_and(|s| !s.is_empty());
        let has_ip6 = router.ip6.as_deref().is_some_and(|s| !s.is_empty());
        if !has_ip && !has_ip6 {
            errs.push(BuildError::MissingAddresses {
                kind: "router",
                name: name.clone(),
            });
            continue;
        }
        if !serving_status(status) {
            continue;
        }

        let family = snapshot.cg_routers.entry(location.to_string()).or_default();
        if let Some(addr) = router.ip.as_deref().filter(|s| !s.is_empty()) {
            if let Some(v4) = checked_v4("router", name, addr, errs) {
                family.v4s.push(CacheAddr {
                    host: name.clone(),
                    addr: IpAddr::V4(v4),
                });
            }
        }
        if let Some(addr) = router.ip6.as_deref().filter(|s| !s.is_empty()) {
            if let Some(v6) = checked_v6("router", name, addr, errs) {
                family.v6s.push(CacheAddr {
                    host: name.clone(),
                    addr: IpAddr::V6(v6),
                });
            }
        }
    }

    for family in snapshot.cg_routers.values() {
        snapshot
            .router_pool
            .v4s
            .extend(family.v4s.iter().cloned());
        snapshot
            .router_pool
            .v6s
            .extend(family.v6s.iter().cloned());
    }
    snapshot
        .cg_routers
        .retain(|_, family| !family.is_empty());
}

/// Build the `cache.ds.cdn_domain` → cache map for the second DNS hop of
/// HTTP delivery services.
///
/// Collisions cannot happen for well-formed inputs (the cache name leads
/// the FQDN); if two entries ever did collide, the last writer wins.
fn build_second_matches(routing: &RoutingConfig, snapshot: &mut Snapshot) {
    for (server_name, server) in &routing.content_servers {
        for ds_name in server.delivery_services.keys() {
            let fqdn = format!("{server_name}.{ds_name}.{}", snapshot.cdn_domain);
            snapshot
                .http_second_matches
                .insert(fqdn, server_name.clone());
        }
    }
}
