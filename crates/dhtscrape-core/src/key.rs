//! Key Sampler — uniformly random DHT lookup keys.
//!
//! A key is 32 bytes from the OS entropy source, hashed with BLAKE3-256 and
//! wrapped as a multihash:
//!
//!   key = varint(0x1e) || varint(32) || BLAKE3(random[32])
//!
//! The canonical string form is base58btc of the multihash bytes, the same
//! encoding content identifiers use in logs.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

/// Multihash code for BLAKE3 with a 32-byte digest.
pub const BLAKE3_MULTIHASH_CODE: u64 = 0x1e;

/// Bytes of entropy drawn per key.
const ENTROPY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("entropy source failed: {0}")]
    Entropy(#[from] rand::Error),
    #[error("digest of {0} bytes does not fit a single-byte multihash length")]
    DigestTooLong(usize),
}

/// A content-addressed lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScrapeKey {
    multihash: Vec<u8>,
}

impl ScrapeKey {
    /// Raw multihash bytes, as handed to the DHT.
    pub fn as_bytes(&self) -> &[u8] {
        &self.multihash
    }

    /// Canonical base58btc form.
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.multihash).into_string()
    }

    /// The digest part, without the multihash prefix.
    pub fn digest(&self) -> &[u8] {
        &self.multihash[2..]
    }
}

impl fmt::Display for ScrapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

/// Draw a fresh random key.
///
/// Entropy failures are returned, not retried: the caller owns the decision.
pub fn sample_key() -> Result<ScrapeKey, KeyError> {
    let mut buf = [0u8; ENTROPY_LEN];
    OsRng.try_fill_bytes(&mut buf)?;
    key_from_entropy(&buf)
}

/// Hash the given entropy into a key. Deterministic.
pub fn key_from_entropy(entropy: &[u8]) -> Result<ScrapeKey, KeyError> {
    let digest = blake3::hash(entropy);
    encode_multihash(BLAKE3_MULTIHASH_CODE, digest.as_bytes())
}

fn encode_multihash(code: u64, digest: &[u8]) -> Result<ScrapeKey, KeyError> {
    // Single-byte varints only: both code and length must stay below 0x80.
    if digest.len() >= 0x80 {
        return Err(KeyError::DigestTooLong(digest.len()));
    }
    let mut multihash = Vec::with_capacity(2 + digest.len());
    multihash.push(code as u8);
    multihash.push(digest.len() as u8);
    multihash.extend_from_slice(digest);
    Ok(ScrapeKey { multihash })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampled_key_has_multihash_prefix() {
        let key = sample_key().unwrap();
        let bytes = key.as_bytes();
        assert_eq!(bytes.len(), 34);
        assert_eq!(bytes[0], 0x1e);
        assert_eq!(bytes[1], 32);
        assert_eq!(key.digest().len(), 32);
    }

    #[test]
    fn sampled_keys_differ() {
        let a = sample_key().unwrap();
        let b = sample_key().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn same_entropy_gives_same_key() {
        let entropy = [7u8; 32];
        let a = key_from_entropy(&entropy).unwrap();
        let b = key_from_entropy(&entropy).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest(), blake3::hash(&entropy).as_bytes());
    }

    #[test]
    fn display_is_base58_of_multihash() {
        let key = key_from_entropy(&[1u8; 32]).unwrap();
        let decoded = bs58::decode(key.to_string()).into_vec().unwrap();
        assert_eq!(decoded, key.as_bytes());
    }

    #[test]
    fn oversized_digest_is_rejected() {
        let err = encode_multihash(BLAKE3_MULTIHASH_CODE, &[0u8; 200]).unwrap_err();
        assert!(matches!(err, KeyError::DigestTooLong(200)));
    }
}
