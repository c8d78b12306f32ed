//! Cipher suites and platform compatibility
//!
//! The TLS 1.3 AEAD suites this layer can run, plus the static predicate
//! deciding whether a suite is usable on the current platform. The
//! predicate is evaluated once during negotiation, never per record: a
//! crypto provider with a key-strength ceiling (classic example: a
//! 128-bit policy limit) silently rules out the 256-bit suites up front.

use selio_core::{TransportError, TransportResult};

/// AEAD algorithm of a suite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadKind {
    Aes128Gcm,
    Aes256Gcm,
    ChaCha20Poly1305,
}

/// Hash algorithm of a suite (key-schedule / transcript hash)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Sha256,
    Sha384,
}

/// A TLS 1.3 cipher suite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuite {
    /// Wire identifier
    pub id: u16,
    pub name: &'static str,
    pub aead: AeadKind,
    pub hash: HashAlg,
    /// AEAD key length in bytes
    pub key_len: usize,
    /// Per-record nonce length in bytes
    pub iv_len: usize,
    /// Authentication tag length in bytes
    pub tag_len: usize,
}

pub const TLS_AES_128_GCM_SHA256: CipherSuite = CipherSuite {
    id: 0x1301,
    name: "TLS_AES_128_GCM_SHA256",
    aead: AeadKind::Aes128Gcm,
    hash: HashAlg::Sha256,
    key_len: 16,
    iv_len: 12,
    tag_len: 16,
};

pub const TLS_AES_256_GCM_SHA384: CipherSuite = CipherSuite {
    id: 0x1302,
    name: "TLS_AES_256_GCM_SHA384",
    aead: AeadKind::Aes256Gcm,
    hash: HashAlg::Sha384,
    key_len: 32,
    iv_len: 12,
    tag_len: 16,
};

pub const TLS_CHACHA20_POLY1305_SHA256: CipherSuite = CipherSuite {
    id: 0x1303,
    name: "TLS_CHACHA20_POLY1305_SHA256",
    aead: AeadKind::ChaCha20Poly1305,
    hash: HashAlg::Sha256,
    key_len: 32,
    iv_len: 12,
    tag_len: 16,
};

/// Suites this implementation knows, in preference order
pub const SUPPORTED_SUITES: [&CipherSuite; 3] = [
    &TLS_AES_128_GCM_SHA256,
    &TLS_AES_256_GCM_SHA384,
    &TLS_CHACHA20_POLY1305_SHA256,
];

/// What the platform crypto provider can do
///
/// Queried once from the provider, then treated as immutable for the
/// process lifetime.
#[derive(Debug, Clone, Copy)]
pub struct CryptoCapability {
    /// Strongest symmetric key the provider permits, in bits
    pub max_key_bits: u16,
    /// Whether the ChaCha20-Poly1305 construction is available
    pub chacha_supported: bool,
}

impl CryptoCapability {
    /// No policy restrictions.
    pub fn unrestricted() -> Self {
        Self {
            max_key_bits: 256,
            chacha_supported: true,
        }
    }

    /// Provider enforcing a key-strength ceiling.
    pub fn strength_limited(max_key_bits: u16) -> Self {
        Self {
            max_key_bits,
            chacha_supported: true,
        }
    }
}

impl CipherSuite {
    /// Symmetric key strength in bits.
    #[inline]
    pub fn key_bits(&self) -> u16 {
        (self.key_len * 8) as u16
    }

    /// Static compatibility predicate against the platform provider.
    pub fn is_supported(&self, capability: &CryptoCapability) -> bool {
        if self.key_bits() > capability.max_key_bits {
            return false;
        }
        if self.aead == AeadKind::ChaCha20Poly1305 && !capability.chacha_supported {
            return false;
        }
        true
    }

    /// Look up a known suite by wire id.
    pub fn by_id(id: u16) -> Option<&'static CipherSuite> {
        SUPPORTED_SUITES.iter().copied().find(|s| s.id == id)
    }
}

/// Pick the first offered suite that this implementation knows and the
/// platform can run.
///
/// Fails closed with `UnsupportedSuite` when nothing matches.
pub fn negotiate(
    offered: &[u16],
    capability: &CryptoCapability,
) -> TransportResult<&'static CipherSuite> {
    offered
        .iter()
        .filter_map(|&id| CipherSuite::by_id(id))
        .find(|suite| suite.is_supported(capability))
        .ok_or(TransportError::UnsupportedSuite)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_id() {
        assert_eq!(CipherSuite::by_id(0x1301), Some(&TLS_AES_128_GCM_SHA256));
        assert_eq!(CipherSuite::by_id(0x1302), Some(&TLS_AES_256_GCM_SHA384));
        assert_eq!(CipherSuite::by_id(0xbeef), None);
    }

    #[test]
    fn test_strength_ceiling_rejects_256bit_suites() {
        let limited = CryptoCapability::strength_limited(128);

        assert!(TLS_AES_128_GCM_SHA256.is_supported(&limited));
        assert!(!TLS_AES_256_GCM_SHA384.is_supported(&limited));
        assert!(!TLS_CHACHA20_POLY1305_SHA256.is_supported(&limited));

        let unrestricted = CryptoCapability::unrestricted();
        assert!(TLS_AES_256_GCM_SHA384.is_supported(&unrestricted));
    }

    #[test]
    fn test_chacha_availability() {
        let mut capability = CryptoCapability::unrestricted();
        capability.chacha_supported = false;
        assert!(!TLS_CHACHA20_POLY1305_SHA256.is_supported(&capability));
        assert!(TLS_AES_256_GCM_SHA384.is_supported(&capability));
    }

    #[test]
    fn test_negotiate_prefers_offer_order() {
        let capability = CryptoCapability::unrestricted();
        let suite = negotiate(&[0x1303, 0x1301], &capability).unwrap();
        assert_eq!(suite.id, 0x1303);
    }

    #[test]
    fn test_negotiate_skips_unusable() {
        let limited = CryptoCapability::strength_limited(128);
        // 256-bit suites offered first, but the ceiling forces AES-128.
        let suite = negotiate(&[0x1302, 0x1303, 0x1301], &limited).unwrap();
        assert_eq!(suite.id, 0x1301);
    }

    #[test]
    fn test_negotiate_fails_closed() {
        let limited = CryptoCapability::strength_limited(128);
        assert_eq!(
            negotiate(&[0x1302, 0x1303], &limited),
            Err(TransportError::UnsupportedSuite)
        );
        assert_eq!(
            negotiate(&[], &CryptoCapability::unrestricted()),
            Err(TransportError::UnsupportedSuite)
        );
    }
}
