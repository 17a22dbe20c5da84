//! Error types for cdn-router.

use thiserror::Error;

/// Fatal errors: startup, input loading, and snapshot-replacing operations.
///
/// Per-entry problems inside a routing config never surface here; they are
/// collected as [`crate::snapshot::BuildError`] and the snapshot is still
/// published.
#[derive(Debug, Error)]
pub enum RouterError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decode error for an input document
    #[error("decoding: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The routing config lacks `config.domain_name`; the router cannot
    /// serve without knowing its authoritative suffix.
    #[error("routing config missing config.domain_name, cannot serve")]
    MissingCdnDomain,

    /// A coverage-zone CIDR failed to parse
    #[error("coverage zone '{zone}' network '{network}': {reason}")]
    InvalidCidr {
        /// Zone whose network list contains the bad entry.
        zone: String,
        /// The offending CIDR string.
        network: String,
        /// Why it was rejected.
        reason: String,
    },

    /// TLS certificate loading or key handling error
    #[error("certificate '{name}': {reason}")]
    Certificate {
        /// Certificate name (file stem) being loaded.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// TLS configuration error
    #[error("TLS config: {0}")]
    Tls(#[from] rustls::Error),
}
