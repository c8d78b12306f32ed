//! Hostname verification against certificate SAN entries
//!
//! The certificate provider hands this module the peer's Subject
//! Alternative Name entries; nothing else in the certificate is
//! consulted. Verification fails closed: no matching entry means
//! rejection, surfaced as a distinct security error that callers must not
//! downgrade.
//!
//! DNS matching follows the usual wildcard rules: a `*` may stand only
//! for the entire leftmost label, matches exactly one label, and never
//! matches an IP literal. IP literals are compared textually against
//! IP-typed entries only.

use selio_core::{TransportError, TransportResult};

/// One Subject Alternative Name entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanEntry {
    /// dNSName entry, possibly with a leading wildcard label
    Dns(String),
    /// iPAddress entry in textual form
    Ip(String),
}

/// What the certificate provider extracted from the peer certificate
#[derive(Debug, Clone, Default)]
pub struct PeerIdentity {
    pub san: Vec<SanEntry>,
}

impl PeerIdentity {
    pub fn new(san: Vec<SanEntry>) -> Self {
        Self { san }
    }
}

/// Check that `expected` (hostname or IP literal) is named by the peer's
/// SAN entries. Rejects with `HostnameMismatch` otherwise.
pub fn verify_hostname(expected: &str, identity: &PeerIdentity) -> TransportResult<()> {
    if expected.is_empty() {
        return Err(TransportError::HostnameMismatch);
    }

    let expected_is_ip = expected.parse::<std::net::IpAddr>().is_ok();

    let matched = identity.san.iter().any(|entry| match entry {
        SanEntry::Dns(pattern) => !expected_is_ip && match_dns_name(pattern, expected),
        SanEntry::Ip(literal) => expected_is_ip && literal == expected,
    });

    if matched {
        Ok(())
    } else {
        Err(TransportError::HostnameMismatch)
    }
}

/// Wildcard-aware dNSName comparison, ASCII case-insensitive.
fn match_dns_name(pattern: &str, host: &str) -> bool {
    let pattern = pattern.strip_suffix('.').unwrap_or(pattern);
    let host = host.strip_suffix('.').unwrap_or(host);
    if pattern.is_empty() || host.is_empty() {
        return false;
    }

    match pattern.strip_prefix("*.") {
        None => {
            // A wildcard anywhere but the whole leftmost label is invalid.
            if pattern.contains('*') {
                return false;
            }
            pattern.eq_ignore_ascii_case(host)
        }
        Some(parent) => {
            if parent.contains('*') {
                return false;
            }
            // The wildcard consumes exactly one label: the host must have
            // one more label than the parent, and never match the bare
            // parent domain itself.
            let (first, rest) = match host.split_once('.') {
                Some(parts) => parts,
                None => return false,
            };
            if first.is_empty() || first.contains('*') {
                return false;
            }
            // Refuse single-label parents ("*.com" must not match).
            if !parent.contains('.') {
                return false;
            }
            rest.eq_ignore_ascii_case(parent)
        }
    }
}
