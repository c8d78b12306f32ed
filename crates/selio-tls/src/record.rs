//! Record framing and AEAD seal/open
//!
//! Application bytes travel as TLS 1.3-style records:
//!
//! ```text
//! | type=23 | 0x0303 | length | ciphertext( plaintext ‖ inner-type ) | tag |
//! ```
//!
//! Each direction holds one `RecordCipher` carrying the negotiated suite,
//! its traffic key, the static IV, and a sequence number; the per-record
//! nonce is the IV XORed with the big-endian sequence. Destination
//! buffers come from the shared pool via a guard that recycles on every
//! exit path; a record whose ciphertext would not fit the pooled buffer
//! gets a one-off heap allocation instead - the pool is never resized.
//!
//! Sealing must consume the whole source buffer. Leftover source bytes
//! after the copy loop are a programming error, reported as an
//! `Invariant` failure rather than recoverable I/O.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::{AeadInPlace, Aes128Gcm, Aes256Gcm, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use sha2::{Digest, Sha256, Sha384};

use selio_core::{ByteBufferPool, IoBuffer, PoolGuard, TransportError, TransportResult};

use crate::suite::{AeadKind, CipherSuite, HashAlg};

/// Record header: type (1) + legacy version (2) + length (2)
pub const RECORD_HEADER_LEN: usize = 5;

/// Outer and inner content type for application data
pub const CONTENT_APPLICATION_DATA: u8 = 23;

/// Legacy version echoed in every record header
pub const LEGACY_RECORD_VERSION: u16 = 0x0303;

/// Largest plaintext a single record may carry
pub const MAX_PLAINTEXT: usize = 16 * 1024;

/// Destination of a seal/open operation
///
/// Pooled when the ciphertext fits a shared buffer, heap-allocated for
/// the single oversized operation otherwise.
pub enum RecordBuf<'p> {
    Pooled(PoolGuard<'p, IoBuffer>),
    Heap(IoBuffer),
}

impl<'p> RecordBuf<'p> {
    /// The produced bytes (a full record after seal, plaintext after open).
    pub fn payload(&self) -> &[u8] {
        self.io().readable()
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, RecordBuf::Pooled(_))
    }

    fn io(&self) -> &IoBuffer {
        match self {
            RecordBuf::Pooled(guard) => guard,
            RecordBuf::Heap(buf) => buf,
        }
    }

    fn io_mut(&mut self) -> &mut IoBuffer {
        match self {
            RecordBuf::Pooled(guard) => guard,
            RecordBuf::Heap(buf) => buf,
        }
    }
}

enum AeadState {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
}

impl AeadState {
    fn new(kind: AeadKind, key: &[u8]) -> TransportResult<Self> {
        let invalid = |_| TransportError::Crypto("invalid key length");
        Ok(match kind {
            AeadKind::Aes128Gcm => {
                AeadState::Aes128(Box::new(Aes128Gcm::new_from_slice(key).map_err(invalid)?))
            }
            AeadKind::Aes256Gcm => {
                AeadState::Aes256(Box::new(Aes256Gcm::new_from_slice(key).map_err(invalid)?))
            }
            AeadKind::ChaCha20Poly1305 => AeadState::ChaCha(Box::new(
                ChaCha20Poly1305::new_from_slice(key).map_err(invalid)?,
            )),
        })
    }

    /// Encrypt `buf` in place; returns the 16-byte tag (the finalization
    /// step that flushes the construction).
    fn seal(&self, nonce: &[u8; 12], aad: &[u8], buf: &mut [u8]) -> TransportResult<[u8; 16]> {
        let nonce = GenericArray::from_slice(nonce);
        let tag = match self {
            AeadState::Aes128(c) => c.encrypt_in_place_detached(nonce, aad, buf),
            AeadState::Aes256(c) => c.encrypt_in_place_detached(nonce, aad, buf),
            AeadState::ChaCha(c) => c.encrypt_in_place_detached(nonce, aad, buf),
        }
        .map_err(|_| TransportError::Crypto("record encryption failed"))?;
        let mut out = [0u8; 16];
        out.copy_from_slice(tag.as_slice());
        Ok(out)
    }

    /// Decrypt `buf` in place, verifying `tag`.
    fn open(
        &self,
        nonce: &[u8; 12],
        aad: &[u8],
        buf: &mut [u8],
        tag: &[u8],
    ) -> TransportResult<()> {
        if tag.len() != 16 {
            return Err(TransportError::Crypto("record truncated"));
        }
        let nonce = GenericArray::from_slice(nonce);
        let tag = GenericArray::from_slice(tag);
        match self {
            AeadState::Aes128(c) => c.decrypt_in_place_detached(nonce, aad, buf, tag),
            AeadState::Aes256(c) => c.decrypt_in_place_detached(nonce, aad, buf, tag),
            AeadState::ChaCha(c) => c.decrypt_in_place_detached(nonce, aad, buf, tag),
        }
        .map_err(|_| TransportError::Crypto("record authentication failed"))
    }
}

/// The header-writing step shared by seal and the AAD computation.
fn write_record_header(
    out: &mut [u8; RECORD_HEADER_LEN],
    content_type: u8,
    payload_len: usize,
) -> TransportResult<()> {
    if payload_len > MAX_PLAINTEXT + 256 {
        return Err(TransportError::Crypto("record payload too large"));
    }
    out[0] = content_type;
    out[1..3].copy_from_slice(&LEGACY_RECORD_VERSION.to_be_bytes());
    out[3..5].copy_from_slice(&(payload_len as u16).to_be_bytes());
    Ok(())
}

/// One direction of an established record stream
///
/// The suite is immutable once constructed; only the sequence number
/// advances, one step per sealed or opened record.
pub struct RecordCipher {
    suite: &'static CipherSuite,
    aead: AeadState,
    iv: [u8; 12],
    seq: u64,
}

impl RecordCipher {
    /// Build from raw traffic key material.
    pub fn new(suite: &'static CipherSuite, key: &[u8], iv: &[u8]) -> TransportResult<Self> {
        if key.len() != suite.key_len {
            return Err(TransportError::Crypto("invalid key length"));
        }
        if iv.len() != suite.iv_len {
            return Err(TransportError::Crypto("invalid iv length"));
        }
        let mut static_iv = [0u8; 12];
        static_iv.copy_from_slice(iv);
        Ok(Self {
            suite,
            aead: AeadState::new(suite.aead, key)?,
            iv: static_iv,
            seq: 0,
        })
    }

    /// Build from a shared secret, expanding key and IV with the suite's
    /// hash. Both directions derive deterministically from
    /// (secret, label).
    pub fn from_secret(
        suite: &'static CipherSuite,
        secret: &[u8],
        label: &str,
    ) -> TransportResult<Self> {
        let material = expand_secret(suite, secret, label, suite.key_len + suite.iv_len);
        Self::new(suite, &material[..suite.key_len], &material[suite.key_len..])
    }

    pub fn suite(&self) -> &'static CipherSuite {
        self.suite
    }

    /// Records processed so far in this direction.
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    fn nonce(&self) -> [u8; 12] {
        let mut nonce = self.iv;
        for (slot, byte) in nonce[4..].iter_mut().zip(self.seq.to_be_bytes()) {
            *slot ^= byte;
        }
        nonce
    }

    /// Pick the destination: pooled when the record fits, one-off heap
    /// allocation otherwise. The guard recycles on drop either way.
    fn destination<'p>(pool: &'p ByteBufferPool, needed: usize) -> RecordBuf<'p> {
        let guard = pool.borrow_guard();
        if guard.capacity() >= needed {
            RecordBuf::Pooled(guard)
        } else {
            RecordBuf::Heap(IoBuffer::with_capacity(needed))
        }
    }

    /// Seal the whole readable region of `src` into one record.
    ///
    /// The source is consumed as it is copied; bytes somehow left behind
    /// afterwards are an internal invariant failure, not an I/O error.
    pub fn seal_record<'p>(
        &mut self,
        src: &mut IoBuffer,
        pool: &'p ByteBufferPool,
    ) -> TransportResult<RecordBuf<'p>> {
        let plain_len = src.len();
        if plain_len > MAX_PLAINTEXT {
            return Err(TransportError::Crypto("record payload too large"));
        }

        let payload_len = plain_len + 1 + self.suite.tag_len;
        let mut header = [0u8; RECORD_HEADER_LEN];
        write_record_header(&mut header, CONTENT_APPLICATION_DATA, payload_len)?;

        let mut out = Self::destination(pool, RECORD_HEADER_LEN + payload_len);
        let io = out.io_mut();
        io.push_slice(&header);

        while !src.is_empty() {
            let copied = io.push_slice(src.readable());
            if copied == 0 {
                break;
            }
            src.advance_read(copied);
        }
        if !src.is_empty() {
            return Err(TransportError::Invariant("record source not fully consumed"));
        }
        io.push_slice(&[CONTENT_APPLICATION_DATA]);

        let nonce = self.nonce();
        let tag = self
            .aead
            .seal(&nonce, &header, &mut io.readable_mut()[RECORD_HEADER_LEN..])?;
        io.push_slice(&tag);

        self.seq += 1;
        Ok(out)
    }

    /// Open one full record, yielding its plaintext.
    pub fn open_record<'p>(
        &mut self,
        record: &[u8],
        pool: &'p ByteBufferPool,
    ) -> TransportResult<RecordBuf<'p>> {
        if record.len() < RECORD_HEADER_LEN {
            return Err(TransportError::Crypto("record truncated"));
        }
        let header: [u8; RECORD_HEADER_LEN] = record[..RECORD_HEADER_LEN].try_into().unwrap();
        if header[0] != CONTENT_APPLICATION_DATA {
            return Err(TransportError::Crypto("unexpected record type"));
        }
        let payload_len = u16::from_be_bytes([header[3], header[4]]) as usize;
        if record.len() != RECORD_HEADER_LEN + payload_len {
            return Err(TransportError::Crypto("record length mismatch"));
        }
        if payload_len < self.suite.tag_len + 1 {
            return Err(TransportError::Crypto("record truncated"));
        }

        let cipher_len = payload_len - self.suite.tag_len;
        let ciphertext = &record[RECORD_HEADER_LEN..RECORD_HEADER_LEN + cipher_len];
        let tag = &record[RECORD_HEADER_LEN + cipher_len..];

        let mut out = Self::destination(pool, cipher_len);
        let io = out.io_mut();
        io.push_slice(ciphertext);

        let nonce = self.nonce();
        self.aead.open(&nonce, &header, io.readable_mut(), tag)?;

        // Strip zero padding, then the inner content type byte.
        let inner_end = match io.readable().iter().rposition(|&b| b != 0) {
            Some(pos) => pos,
            None => return Err(TransportError::Crypto("missing inner content type")),
        };
        if io.readable()[inner_end] != CONTENT_APPLICATION_DATA {
            return Err(TransportError::Crypto("unexpected inner content type"));
        }
        io.truncate_readable(inner_end);

        self.seq += 1;
        Ok(out)
    }
}

/// Expand `secret` into `len` bytes of key material with the suite's
/// hash, bound to `label` so each direction gets distinct keys.
pub fn expand_secret(suite: &CipherSuite, secret: &[u8], label: &str, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter: u8 = 1;
    while out.len() < len {
        let block: Vec<u8> = match suite.hash {
            HashAlg::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(secret);
                hasher.update(label.as_bytes());
                hasher.update([counter]);
                hasher.finalize().to_vec()
            }
            HashAlg::Sha384 => {
                let mut hasher = Sha384::new();
                hasher.update(secret);
                hasher.update(label.as_bytes());
                hasher.update([counter]);
                hasher.finalize().to_vec()
            }
        };
        out.extend_from_slice(&block);
        counter = counter.wrapping_add(1);
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::{
        SUPPORTED_SUITES, TLS_AES_128_GCM_SHA256, TLS_AES_256_GCM_SHA384,
    };

    fn pair(suite: &'static CipherSuite) -> (RecordCipher, RecordCipher) {
        let secret = b"handshake-established-secret";
        (
            RecordCipher::from_secret(suite, secret, "client-to-server").unwrap(),
            RecordCipher::from_secret(suite, secret, "client-to-server").unwrap(),
        )
    }

    fn filled(data: &[u8]) -> IoBuffer {
        let mut buf = IoBuffer::with_capacity(data.len().max(1));
        assert_eq!(buf.push_slice(data), data.len());
        buf
    }

    #[test]
    fn test_round_trip_every_suite() {
        let pool = ByteBufferPool::new(8).unwrap();
        let payload = b"attack at dawn, quietly";

        for suite in SUPPORTED_SUITES {
            let (mut seal, mut open) = pair(suite);

            let mut src = filled(payload);
            let record = seal.seal_record(&mut src, &pool).unwrap();
            assert!(record.is_pooled());
            assert_eq!(src.len(), 0, "source fully consumed");

            let plain = open.open_record(record.payload(), &pool).unwrap();
            assert_eq!(plain.payload(), payload, "suite {}", suite.name);
        }
    }

    #[test]
    fn test_round_trip_multiple_records_advance_sequence() {
        let pool = ByteBufferPool::new(8).unwrap();
        let (mut seal, mut open) = pair(&TLS_AES_128_GCM_SHA256);

        for i in 0..10u8 {
            let payload = vec![i; 100];
            let mut src = filled(&payload);
            let record = seal.seal_record(&mut src, &pool).unwrap();
            let plain = open.open_record(record.payload(), &pool).unwrap();
            assert_eq!(plain.payload(), &payload[..]);
        }
        assert_eq!(seal.sequence(), 10);
        assert_eq!(open.sequence(), 10);
    }

    #[test]
    fn test_oversized_record_uses_heap_fallback() {
        let pool = ByteBufferPool::new(8).unwrap();
        let (mut seal, mut open) = pair(&TLS_AES_256_GCM_SHA384);

        // Larger than a pooled buffer: the destination must be a one-off
        // allocation and the round trip must still hold.
        let payload: Vec<u8> = (0..9000u32).map(|i| (i % 199) as u8).collect();
        let mut src = filled(&payload);
        let record = seal.seal_record(&mut src, &pool).unwrap();
        assert!(!record.is_pooled());

        let plain = open.open_record(record.payload(), &pool).unwrap();
        assert!(!plain.is_pooled());
        assert_eq!(plain.payload(), &payload[..]);
    }

    #[test]
    fn test_plaintext_limit_enforced() {
        let pool = ByteBufferPool::new(8).unwrap();
        let (mut seal, _) = pair(&TLS_AES_128_GCM_SHA256);

        let payload = vec![0u8; MAX_PLAINTEXT + 1];
        let mut src = filled(&payload);
        assert_eq!(
            seal.seal_record(&mut src, &pool).err(),
            Some(TransportError::Crypto("record payload too large"))
        );
    }

    #[test]
    fn test_tampered_record_rejected() {
        let pool = ByteBufferPool::new(8).unwrap();
        let (mut seal, mut open) = pair(&TLS_AES_128_GCM_SHA256);

        let mut src = filled(b"integrity matters");
        let record = seal.seal_record(&mut src, &pool).unwrap();

        let mut bytes = record.payload().to_vec();
        let flip = RECORD_HEADER_LEN + 3;
        bytes[flip] ^= 0x40;

        assert_eq!(
            open.open_record(&bytes, &pool).err(),
            Some(TransportError::Crypto("record authentication failed"))
        );
    }

    #[test]
    fn test_sequence_mismatch_rejected() {
        let pool = ByteBufferPool::new(8).unwrap();
        let (mut seal, mut open) = pair(&TLS_AES_128_GCM_SHA256);

        // Advance both directions in sync, then replay an old record.
        let mut src = filled(b"first");
        let r1 = seal.seal_record(&mut src, &pool).unwrap();
        open.open_record(r1.payload(), &pool).unwrap();

        let mut src = filled(b"second");
        let r2 = seal.seal_record(&mut src, &pool).unwrap();
        open.open_record(r2.payload(), &pool).unwrap();

        // Replaying record 2 under sequence 2 fails authentication.
        assert!(open.open_record(r2.payload(), &pool).is_err());
    }

    #[test]
    fn test_malformed_records_rejected() {
        let pool = ByteBufferPool::new(8).unwrap();
        let (_, mut open) = pair(&TLS_AES_128_GCM_SHA256);

        assert!(open.open_record(&[23, 3], &pool).is_err());

        // Correct header, payload shorter than a tag.
        let mut header = [0u8; RECORD_HEADER_LEN];
        write_record_header(&mut header, CONTENT_APPLICATION_DATA, 4).unwrap();
        let mut record = header.to_vec();
        record.extend_from_slice(&[0u8; 4]);
        assert!(open.open_record(&record, &pool).is_err());
    }

    #[test]
    fn test_key_material_validation() {
        assert!(RecordCipher::new(&TLS_AES_128_GCM_SHA256, &[0u8; 16], &[0u8; 12]).is_ok());
        assert_eq!(
            RecordCipher::new(&TLS_AES_128_GCM_SHA256, &[0u8; 15], &[0u8; 12]).err(),
            Some(TransportError::Crypto("invalid key length"))
        );
        assert_eq!(
            RecordCipher::new(&TLS_AES_128_GCM_SHA256, &[0u8; 16], &[0u8; 11]).err(),
            Some(TransportError::Crypto("invalid iv length"))
        );
    }

    #[test]
    fn test_expand_secret_is_deterministic_and_label_bound() {
        let suite = &TLS_AES_128_GCM_SHA256;
        let a = expand_secret(suite, b"secret", "read", 28);
        let b = expand_secret(suite, b"secret", "read", 28);
        let c = expand_secret(suite, b"secret", "write", 28);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 28);
    }
}
