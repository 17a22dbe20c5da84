//! The request-routing decision tree.
//!
//! Turning a client IP and a queried FQDN into a cache address (or a
//! refusal) walks the snapshot's tables in a fixed order: the second-hop
//! map first (a plain hash lookup, the cheapest), then the DNS delivery
//! service matchers, then the HTTP ones. The core is CPU-only and never
//! fails; every outcome is a [`Decision`].

use rand::Rng;
use std::net::IpAddr;
use tracing::{error, info, warn};

use crate::snapshot::{match_ds, CacheAddr, Snapshot};

/// The outcome of routing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Answer the DNS question with this address.
    Answer(IpAddr),

    /// Redirect the HTTP client to `http://{cache}.{ds}.{domain}{path}`.
    Redirect {
        /// Chosen cache host name.
        cache: String,
        /// Matched delivery service.
        ds: String,
        /// The CDN's apex domain.
        domain: String,
    },

    /// Not a name we are authoritative for, or no delivery service owns it.
    Refused,

    /// We own the name but cannot produce a usable answer.
    ServFail,
}

impl Snapshot {
    /// Route a DNS question.
    ///
    /// `qname` must carry its trailing dot, as wire-format questions do;
    /// names without one are refused.
    pub fn route_dns(&self, client_ip: IpAddr, qname: &str, want_v4: bool) -> Decision {
        let Some(fqdn) = qname.strip_suffix('.') else {
            info!(client = %client_ip, qname, "name missing trailing dot, refusing");
            return Decision::Refused;
        };
        if !fqdn.ends_with(self.cdn_domain.as_str()) {
            info!(client = %client_ip, fqdn, "not authoritative, refusing");
            return Decision::Refused;
        }

        let zone = self.czf.zone_for(client_ip).unwrap_or("");

        // Fastest lookup first: the second hop of an HTTP DS is a plain
        // hash probe.
        if let Some(cache) = self.http_second_matches.get(fqdn) {
            return self.second_hop(cache, want_v4);
        }
        if let Some(ds) = match_ds(&self.dns_matches, fqdn) {
            return self.dns_ds_answer(client_ip, zone, fqdn, ds, want_v4);
        }
        if let Some(ds) = match_ds(&self.http_dns_matches, fqdn) {
            return self.http_first_hop(client_ip, zone, fqdn, ds, want_v4);
        }

        info!(client = %client_ip, zone, fqdn, "no DS match, refusing");
        Decision::Refused
    }

    /// Route an HTTP request to a redirect target.
    ///
    /// Only HTTP-protocol delivery services are redirectable; a host that
    /// matches a DNS DS or a second-hop cache name is refused, as is
    /// anything outside the CDN domain.
    pub fn route_redirect(&self, client_ip: IpAddr, qname: &str, want_v4: bool) -> Decision {
        let Some(fqdn) = qname.strip_suffix('.') else {
            return Decision::Refused;
        };
        if !fqdn.ends_with(self.cdn_domain.as_str()) {
            info!(client = %client_ip, fqdn, "not authoritative, refusing");
            return Decision::Refused;
        }

        let zone = self.czf.zone_for(client_ip).unwrap_or("");

        let Some(ds) = match_ds(&self.http_dns_matches, fqdn) else {
            info!(client = %client_ip, zone, fqdn, "no HTTP DS match, refusing");
            return Decision::Refused;
        };

        match self.choose_cache(client_ip, zone, fqdn, ds, want_v4) {
            Ok(cache) => Decision::Redirect {
                cache: cache.host.clone(),
                ds: ds.to_string(),
                domain: self.cdn_domain.clone(),
            },
            Err(decision) => decision,
        }
    }

    /// Answer the second DNS hop of an HTTP DS: the queried name embeds the
    /// already-chosen cache, so this is an address lookup, not a selection.
    fn second_hop(&self, cache: &str, want_v4: bool) -> Decision {
        if want_v4 {
            if let Some(addr) = self.server_addr_v4.get(cache) {
                return Decision::Answer(IpAddr::V4(*addr));
            }
        } else if let Some(addr) = self.server_addr_v6.get(cache) {
            return Decision::Answer(IpAddr::V6(*addr));
        }
        let other_family = if want_v4 {
            self.server_addr_v6.contains_key(cache)
        } else {
            self.server_addr_v4.contains_key(cache)
        };
        if other_family {
            info!(cache, want_v4, "second-hop cache lacks requested family, refusing");
            Decision::Refused
        } else {
            // A second-hop name always comes from a cataloged server; if
            // the address tables have never heard of it, the builder broke
            // an invariant.
            error!(cache, "second-hop cache missing from server tables, should never happen");
            Decision::ServFail
        }
    }

    /// Answer a DNS-DS question with an available cache in the client's
    /// cache group.
    fn dns_ds_answer(
        &self,
        client_ip: IpAddr,
        zone: &str,
        fqdn: &str,
        ds: &str,
        want_v4: bool,
    ) -> Decision {
        match self.choose_cache(client_ip, zone, fqdn, ds, want_v4) {
            Ok(cache) => {
                info!(client = %client_ip, zone, fqdn, ds, cache = %cache.host, addr = %cache.addr, "answering");
                Decision::Answer(cache.addr)
            }
            Err(decision) => decision,
        }
    }

    /// The shared cache-selection path of the DNS-DS answer and the HTTP
    /// redirect: ds → client's cache group → available cache of the
    /// requested family.
    fn choose_cache<'a>(
        &'a self,
        client_ip: IpAddr,
        zone: &str,
        fqdn: &str,
        ds: &str,
        want_v4: bool,
    ) -> Result<&'a CacheAddr, Decision> {
        let Some(groups) = self.ds_servers.get(ds) else {
            // A matcher exists for every DS in the tables; the reverse can
            // fail only if the builder broke an invariant.
            error!(client = %client_ip, zone, fqdn, ds, "match without ds_servers entry, should never happen");
            return Err(Decision::ServFail);
        };
        let Some(family) = groups.get(zone) else {
            warn!(client = %client_ip, zone, fqdn, ds, "DS has no servers in the client's cache group");
            return Err(Decision::ServFail);
        };
        let Some(cache) = pick_available(family.family(want_v4), |host| self.is_available(host))
        else {
            warn!(client = %client_ip, zone, fqdn, ds, want_v4, "no available cache of requested family");
            return Err(Decision::ServFail);
        };
        Ok(cache)
    }

    /// Answer the first DNS hop of an HTTP DS with a content router, which
    /// the client will then reach over HTTP for its redirect. Routers are
    /// drawn from the all-cache-group pool; proximity is not used.
    fn http_first_hop(
        &self,
        client_ip: IpAddr,
        zone: &str,
        fqdn: &str,
        ds: &str,
        want_v4: bool,
    ) -> Decision {
        let routers = self.router_pool.family(want_v4);
        let Some(router) = pick_any(routers) else {
            warn!(client = %client_ip, zone, fqdn, ds, want_v4, "HTTP DS matched but no router of requested family");
            return Decision::ServFail;
        };
        info!(client = %client_ip, zone, fqdn, ds, router = %router.host, addr = %router.addr, "answering with router");
        Decision::Answer(router.addr)
    }
}

/// Pick an available cache: start at a uniformly random index and scan
/// forward with wrap-around until an available cache turns up. A singleton
/// list skips the RNG but not the availability check.
fn pick_available<F>(servers: &[CacheAddr], is_available: F) -> Option<&CacheAddr>
where
    F: Fn(&str) -> bool,
{
    if servers.is_empty() {
        return None;
    }
    let start = if servers.len() == 1 {
        0
    } else {
        rand::thread_rng().gen_range(0..servers.len())
    };
    (0..servers.len())
        .map(|offset| &servers[(start + offset) % servers.len()])
        .find(|server| is_available(&server.host))
}

/// Pick any server from the list. Routers have no health feed, so there is
/// nothing to scan for.
fn pick_any(servers: &[CacheAddr]) -> Option<&CacheAddr> {
    match servers.len() {
        0 => None,
        1 => Some(&servers[0]),
        len => Some(&servers[rand::thread_rng().gen_range(0..len)]),
    }
}
