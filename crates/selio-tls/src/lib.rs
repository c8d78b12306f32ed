//! # selio-tls
//!
//! TLS record layer for the selio transport: cipher-suite negotiation,
//! the record seal/open loop over pooled buffers, and SAN-based hostname
//! verification.
//!
//! The handshake itself (key exchange, certificate chain validation) is a
//! collaborator above this crate; it hands an established suite and key
//! material to [`record::RecordCipher`] and the peer's SAN entries to
//! [`verify::verify_hostname`].
//!
//! ## Modules
//!
//! - `suite` - cipher suite table, platform capability predicate, negotiation
//! - `record` - record framing and AEAD seal/open over pooled buffers
//! - `verify` - wildcard-aware hostname verification against SAN entries

pub mod record;
pub mod suite;
pub mod verify;

pub use record::{RecordBuf, RecordCipher};
pub use suite::{negotiate, AeadKind, CipherSuite, CryptoCapability, HashAlg};
pub use verify::{verify_hostname, PeerIdentity, SanEntry};
