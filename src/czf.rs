//! Coverage-zone file: maps client networks to cache groups.

use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::Path;

use crate::error::RouterError;

/// The coverage-zone file as published, CIDRs still in string form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageZoneFile {
    /// Revision identifier of the file.
    #[serde(default)]
    pub revision: String,
    /// Customer the file was generated for.
    #[serde(default, rename = "customerName")]
    pub customer_name: String,
    /// Zone name to networks and coordinates.
    #[serde(rename = "coverageZones")]
    pub coverage_zones: HashMap<String, CoverageZone>,
}

/// One zone's networks, pre-parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverageZone {
    /// IPv4 CIDRs belonging to the zone.
    #[serde(default)]
    pub network: Vec<String>,
    /// IPv6 CIDRs belonging to the zone.
    #[serde(default)]
    pub network6: Vec<String>,
    /// Geographic center of the zone.
    #[serde(default)]
    pub coordinates: LatLon,
}

/// Latitude/longitude pair.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LatLon {
    /// Latitude in degrees.
    #[serde(default)]
    pub latitude: f64,
    /// Longitude in degrees.
    #[serde(default)]
    pub longitude: f64,
}

/// Load a coverage-zone file from disk.
pub fn load_coverage_zone_file(path: &Path) -> Result<CoverageZoneFile, RouterError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// A zone's networks in numeric form.
#[derive(Debug, Clone, Default)]
struct ParsedZone {
    v4: Vec<Ipv4Net>,
    v6: Vec<Ipv6Net>,
    coordinates: LatLon,
}

/// Pre-parsed coverage zones, ready for request-path lookups.
///
/// Lookup is a linear scan over the CIDRs of the client's IP family. Zones
/// are meant to be disjoint; when they are not, whichever zone the scan
/// visits first wins.
#[derive(Debug, Clone, Default)]
pub struct CoverageZoneIndex {
    /// Revision of the source file, for logging.
    pub revision: String,
    zones: HashMap<String, ParsedZone>,
}

impl CoverageZoneIndex {
    /// Parse a coverage-zone document into an index.
    ///
    /// A malformed or family-mismatched CIDR fails the whole parse: the CZF
    /// is a single curated artifact, not self-service like the routing
    /// config, so a bad entry means a bad file.
    pub fn from_file(czf: &CoverageZoneFile) -> Result<Self, RouterError> {
        let mut zones = HashMap::with_capacity(czf.coverage_zones.len());
        for (name, zone) in &czf.coverage_zones {
            let mut parsed = ParsedZone {
                coordinates: zone.coordinates,
                ..ParsedZone::default()
            };
            for network in &zone.network {
                let net: Ipv4Net = network.parse().map_err(|e| RouterError::InvalidCidr {
                    zone: name.clone(),
                    network: network.clone(),
                    reason: format!("not an IPv4 CIDR: {e}"),
                })?;
                parsed.v4.push(net);
            }
            for network in &zone.network6 {
                let net: Ipv6Net = network.parse().map_err(|e| RouterError::InvalidCidr {
                    zone: name.clone(),
                    network: network.clone(),
                    reason: format!("not an IPv6 CIDR: {e}"),
                })?;
                parsed.v6.push(net);
            }
            zones.insert(name.clone(), parsed);
        }
        Ok(Self {
            revision: czf.revision.clone(),
            zones,
        })
    }

    /// Return the name of the first zone containing `ip`, if any.
    pub fn zone_for(&self, ip: IpAddr) -> Option<&str> {
        match ip {
            IpAddr::V4(v4) => self
                .zones
                .iter()
                .find(|(_, zone)| zone.v4.iter().any(|net| net.contains(&v4)))
                .map(|(name, _)| name.as_str()),
            IpAddr::V6(v6) => self
                .zones
                .iter()
                .find(|(_, zone)| zone.v6.iter().any(|net| net.contains(&v6)))
                .map(|(name, _)| name.as_str()),
        }
    }

    /// Number of zones in the index.
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Whether the index has no zones.
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
