//! Signed cookie values.
//!
//! The invitation code cookie is signed with HMAC-SHA256 so a visitor cannot
//! mint a cookie for a code they never received. The wire format is
//! `<value>:<hex mac>`; verification is constant-time.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies cookie values with a server secret.
#[derive(Clone)]
pub struct CookieSigner {
    key: Vec<u8>,
}

impl CookieSigner {
    /// Create a signer from raw key bytes.
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Create a signer with a random key, valid for this process only.
    #[must_use]
    pub fn ephemeral() -> Self {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    fn mac(&self, value: &str) -> Vec<u8> {
        // HMAC accepts keys of any length, so construction cannot fail.
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return Vec::new();
        };
        mac.update(value.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Sign a value for storage in a cookie.
    #[must_use]
    pub fn sign(&self, value: &str) -> String {
        format!("{value}:{}", hex::encode(self.mac(value)))
    }

    /// Verify a signed value and return the original.
    ///
    /// Returns `None` when the format is wrong or the MAC does not match.
    #[must_use]
    pub fn verify(&self, signed: &str) -> Option<String> {
        let (value, tag) = signed.rsplit_once(':')?;
        let tag = hex::decode(tag).ok()?;
        let expected = self.mac(value);

        if expected.is_empty() || !bool::from(expected.ct_eq(&tag)) {
            return None;
        }
        Some(value.to_owned())
    }
}

impl std::fmt::Debug for CookieSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSigner")
            .field("key", &"[redacted]")
            .finish()
    }
}
