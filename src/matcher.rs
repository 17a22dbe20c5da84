//! Host-pattern matchers for delivery services.
//!
//! Delivery services declare which FQDNs they own as regex-shaped patterns.
//! Almost all of them in practice are of the sentinel form `.*\.name\..*`,
//! which we compile down to a plain substring check instead of a regex.

use regex::Regex;
use thiserror::Error;

/// Sentinel prefix of the common wildcard-subdomain pattern form.
const WILDCARD_PREFIX: &str = r".*\.";
/// Sentinel suffix of the common wildcard-subdomain pattern form.
const WILDCARD_SUFFIX: &str = r"\..*";

/// Routing name used for HTTP delivery services that do not specify one.
pub const DEFAULT_HTTP_ROUTING_NAME: &str = "ccr";

/// A pattern failed to compile as a regular expression.
#[derive(Debug, Error)]
#[error("compiling regex '{pattern}': {source}")]
pub struct BadPattern {
    /// The pattern as it appeared in the routing config.
    pub pattern: String,
    /// The underlying regex error.
    #[source]
    pub source: regex::Error,
}

/// A compiled host matcher.
///
/// Construction order matters: the wildcard-subdomain sentinel form wins,
/// then a valid FQDN is taken as a literal, and only then is the pattern
/// compiled as a regex. A literal like `foo.bar.com` could in principle be
/// a regex wanting its dots to match anything, but that would be very
/// strange, so we assume it is not.
#[derive(Debug, Clone)]
pub enum HostMatch {
    /// Substring containment of the dotted pattern interior, e.g.
    /// `.*\.foo\.bar\..*` matches any name containing `.foo.bar.`.
    Contains(String),
    /// Exact equality.
    Literal(String),
    /// Full regular-expression match.
    Regex(Regex),
}

impl HostMatch {
    /// Build a matcher for a DNS delivery service pattern.
    pub fn dns(pattern: &str) -> Result<Self, BadPattern> {
        if let Some(interior) = wildcard_interior(pattern) {
            return Ok(HostMatch::Contains(format!(
                ".{}.",
                unescape_dots(interior)
            )));
        }
        if valid_fqdn(pattern) {
            return Ok(HostMatch::Literal(pattern.to_string()));
        }
        compile(pattern)
    }

    /// Build a matcher for an HTTP delivery service pattern.
    ///
    /// HTTP delivery services never accept arbitrary subdomains: the
    /// wildcard-subdomain form is rewritten to a literal
    /// `routing_name.interior.cdn_domain`, which is the one FQDN clients
    /// resolve for the first hop of an HTTP DS.
    pub fn http(pattern: &str, routing_name: &str, cdn_domain: &str) -> Result<Self, BadPattern> {
        if let Some(interior) = wildcard_interior(pattern) {
            return Ok(HostMatch::Literal(format!(
                "{}.{}.{}",
                routing_name,
                unescape_dots(interior),
                cdn_domain
            )));
        }
        if valid_fqdn(pattern) {
            return Ok(HostMatch::Literal(pattern.to_string()));
        }
        compile(pattern)
    }

    /// Whether the matcher accepts the given FQDN (no trailing dot).
    pub fn matches(&self, fqdn: &str) -> bool {
        match self {
            HostMatch::Contains(infix) => fqdn.contains(infix.as_str()),
            HostMatch::Literal(name) => fqdn == name,
            HostMatch::Regex(re) => re.is_match(fqdn),
        }
    }
}

fn compile(pattern: &str) -> Result<HostMatch, BadPattern> {
    match Regex::new(pattern) {
        Ok(re) => Ok(HostMatch::Regex(re)),
        Err(source) => Err(BadPattern {
            pattern: pattern.to_string(),
            source,
        }),
    }
}

/// Return the interior of a `.*\.X\..*` pattern, or `None` if the pattern
/// is not of that form.
fn wildcard_interior(pattern: &str) -> Option<&str> {
    pattern
        .strip_prefix(WILDCARD_PREFIX)
        .and_then(|rest| rest.strip_suffix(WILDCARD_SUFFIX))
}

/// The interior keeps the source's regex escapes; `\.` means a literal dot.
fn unescape_dots(interior: &str) -> String {
    interior.replace(r"\.", ".")
}

/// Whether `s` is a valid RFC 1035 §2.3.1 fully qualified domain name.
///
/// Labels must begin with a letter, contain only letters, digits, and
/// hyphens, and not end with a hyphen. A trailing dot is permitted but not
/// required.
pub fn valid_fqdn(s: &str) -> bool {
    let mut new_label = true;
    let mut prev = '\0';
    for ch in s.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' => new_label = false,
            '0'..='9' | '-' if !new_label => {}
            '.' if !new_label && prev != '-' => new_label = true,
            _ => return false,
        }
        prev = ch;
    }
    prev != '-'
}
