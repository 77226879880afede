pub(crate) mod error;

use ring::rand::{SecureRandom, SystemRandom};
use std::{fmt, str::FromStr};

pub use crate::error::CryptoError;

pub type CryptoResult<T> = core::result::Result<T, CryptoError>;

pub const KEY_LEN: usize = 32;

/// A Curve25519 key as used by WireGuard for private, public and preshared
/// keys alike.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn try_from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidLength(bytes.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; KEY_LEN]
    }

    /// Standard, padded base64; the form `wg(8)` prints and reads.
    pub fn to_base64(&self) -> String {
        base64::encode(self.0)
    }

    pub fn to_url_safe(&self) -> String {
        base64::encode_config(self.0, base64::URL_SAFE)
    }

    pub fn from_base64(s: &str) -> CryptoResult<Self> {
        let bytes = base64::decode(s.trim())?;
        Self::try_from_slice(&bytes)
    }

    /// Decodes a key taken from a URL path segment. URL-safe base64 is tried
    /// first; standard base64 with `-`/`_` mapped back to `+`/`/` second.
    pub fn from_url_safe(s: &str) -> CryptoResult<Self> {
        let bytes = match base64::decode_config(s, base64::URL_SAFE) {
            Ok(bytes) => bytes,
            Err(_) => base64::decode(s.replace('-', "+").replace('_', "/"))?,
        };
        Self::try_from_slice(&bytes)
    }

    /// Treats `self` as a private key and derives its public key.
    pub fn public_key(&self) -> Key {
        Key(x25519_dalek::x25519(self.0, x25519_dalek::X25519_BASEPOINT_BYTES))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = self.to_base64();
        write!(f, "Key({}...)", &encoded[..8])
    }
}

impl FromStr for Key {
    type Err = CryptoError;
    fn from_str(s: &str) -> CryptoResult<Self> {
        Self::from_base64(s)
    }
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pubkey: Key,
    privkey: Key,
}

impl KeyPair {
    pub fn pubkey(&self) -> &Key {
        &self.pubkey
    }

    pub fn privkey(&self) -> &Key {
        &self.privkey
    }
}

/// Generates a clamped Curve25519 private key, matching `wg genkey`.
pub fn gen_private_key() -> CryptoResult<Key> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; KEY_LEN];
    rng.fill(&mut bytes)?;

    bytes[0] &= 248;
    bytes[31] &= 127;
    bytes[31] |= 64;

    Ok(Key(bytes))
}

pub fn gen_keypair() -> CryptoResult<KeyPair> {
    let privkey = gen_private_key()?;
    Ok(KeyPair {
        pubkey: privkey.public_key(),
        privkey,
    })
}
