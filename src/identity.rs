//! Identity and locator encoding.
//!
//! A locator is the opaque, shareable string form of a peer's public
//! addressing material. It carries a version prefix, the 32-byte public key,
//! and a 4-byte blake3 checksum, all URL-safe base64 encoded so it survives
//! copy-paste through any channel.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

use crate::error::LocatorError;

/// Version prefix for the current locator format.
const LOCATOR_PREFIX: &str = "cw1";

/// Bytes of blake3 hash appended as a checksum.
const CHECKSUM_LEN: usize = 4;

/// Length of the decoded locator payload: key plus checksum.
const PAYLOAD_LEN: usize = 32 + CHECKSUM_LEN;

/// A peer identity. Only public material; the crate never handles private
/// keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The peer's 32-byte public key.
    pub public_key: [u8; 32],
}

impl Identity {
    /// Create an identity from existing public key material.
    pub fn from_public_key(public_key: [u8; 32]) -> Self {
        Self { public_key }
    }

    /// Generate a fresh random identity. Useful for tests and examples; real
    /// deployments derive the key from their transport keypair.
    pub fn generate() -> Self {
        let mut public_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut public_key);
        Self { public_key }
    }

    /// Encode this identity as a shareable locator string.
    pub fn locator(&self) -> Locator {
        Locator::encode(self)
    }
}

/// An opaque, validated locator string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    encoded: String,
    public_key: [u8; 32],
}

impl Locator {
    /// Encode an identity into its locator form.
    pub fn encode(identity: &Identity) -> Self {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[..32].copy_from_slice(&identity.public_key);
        let checksum = blake3::hash(&identity.public_key);
        payload[32..].copy_from_slice(&checksum.as_bytes()[..CHECKSUM_LEN]);

        Self {
            encoded: format!("{}{}", LOCATOR_PREFIX, URL_SAFE_NO_PAD.encode(payload)),
            public_key: identity.public_key,
        }
    }

    /// Decode and validate a locator string.
    pub fn decode(s: &str) -> Result<Self, LocatorError> {
        let payload_b64 = s
            .strip_prefix(LOCATOR_PREFIX)
            .ok_or_else(|| LocatorError::MissingPrefix {
                expected: LOCATOR_PREFIX.to_string(),
            })?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| LocatorError::InvalidEncoding(e.to_string()))?;

        if payload.len() != PAYLOAD_LEN {
            return Err(LocatorError::InvalidLength {
                length: payload.len(),
                expected: PAYLOAD_LEN,
            });
        }

        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&payload[..32]);

        let checksum = blake3::hash(&public_key);
        if payload[32..] != checksum.as_bytes()[..CHECKSUM_LEN] {
            return Err(LocatorError::ChecksumMismatch);
        }

        Ok(Self {
            encoded: s.to_string(),
            public_key,
        })
    }

    /// The identity this locator addresses.
    pub fn identity(&self) -> Identity {
        Identity {
            public_key: self.public_key,
        }
    }

    /// The locator string.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Short hex form of the public key for log fields.
    pub fn short(&self) -> String {
        hex::encode(&self.public_key[..4])
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encoded)
    }
}
