//! Keyed lookup hashes for encrypted columns.
//!
//! Tokens are randomised, so an encrypted email cannot be found with an
//! equality query. A lookup hash (HMAC-SHA256, hex) stored beside it can.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::key::DerivedKey;

type HmacSha256 = Hmac<Sha256>;

/// Domain separator for the lookup-hash subkey.
const LOOKUP_CONTEXT: &[u8] = b"pii-lookup-index";

/// Hex length of a lookup hash.
pub const LOOKUP_HASH_LEN: usize = 64;

/// Computes lookup hashes under a subkey of the field key.
#[derive(Clone)]
pub struct LookupHasher {
    subkey: [u8; 32],
}

impl LookupHasher {
    /// Derive the lookup subkey from `key`.
    pub fn new(key: &DerivedKey) -> Self {
        let mut mac = keyed(&key.as_bytes()[..]);
        mac.update(LOOKUP_CONTEXT);
        let mut subkey = [0u8; 32];
        subkey.copy_from_slice(&mac.finalize().into_bytes());
        Self { subkey }
    }

    /// Hash `value` for equality lookups.
    ///
    /// The value is trimmed and lowercased first, so `" Alice@Example.com"`
    /// and `"alice@example.com"` collide on purpose. A blank value hashes to `""`.
    pub fn hash(&self, value: &str) -> String {
        let normalised = value.trim().to_lowercase();
        if normalised.is_empty() {
            return String::new();
        }
        let mut mac = keyed(&self.subkey);
        mac.update(normalised.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl Drop for LookupHasher {
    fn drop(&mut self) {
        self.subkey.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for LookupHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LookupHasher([REDACTED])")
    }
}

fn keyed(key: &[u8]) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::derive_key;

    #[test]
    fn hash_is_stable_and_hex() {
        let h = LookupHasher::new(&derive_key("lookup-secret").unwrap());
        let a = h.hash("alice@example.com");
        assert_eq!(a.len(), LOOKUP_HASH_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, h.hash("alice@example.com"));
    }

    #[test]
    fn hash_normalises_case_and_whitespace() {
        let h = LookupHasher::new(&derive_key("lookup-secret").unwrap());
        assert_eq!(h.hash("  Alice@Example.COM "), h.hash("alice@example.com"));
        assert_ne!(h.hash("alice@example.com"), h.hash("bob@example.com"));
    }

    #[test]
    fn different_keys_give_different_hashes() {
        let h1 = LookupHasher::new(&derive_key("lookup-secret").unwrap());
        let h2 = LookupHasher::new(&derive_key("another-secret").unwrap());
        assert_ne!(h1.hash("alice@example.com"), h2.hash("alice@example.com"));
    }

    #[test]
    fn blank_value_hashes_to_empty() {
        let h = LookupHasher::new(&derive_key("lookup-secret").unwrap());
        assert_eq!(h.hash(""), "");
        assert_eq!(h.hash("   "), "");
    }
}
