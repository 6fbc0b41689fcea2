//! Key material: derive the 32-byte field key from the configured secret.
//!
//! The key is a pure function of the secret. The first [`KEY_LEN`] bytes of
//! its UTF-8 encoding are used; shorter secrets are right-padded with
//! [`PAD_BYTE`]. [`DerivedKey::generate`] is only for one-off data keys.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use thiserror::Error;

/// Byte length of the field key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Filler byte used to right-pad secrets shorter than [`KEY_LEN`].
pub const PAD_BYTE: u8 = b'0';

/// Errors produced while building key material.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The configured secret is absent, empty, or only whitespace.
    #[error("encryption secret is missing or empty")]
    EmptySecret,

    /// A pre-encoded key did not decode to exactly [`KEY_LEN`] bytes.
    #[error("encoded field key is invalid: expected base64url of {KEY_LEN} bytes")]
    InvalidEncodedKey,
}

/// Fixed-size buffer holding the derived field key.
///
/// The memory is overwritten with zeroes on drop and the bytes never appear
/// in `Debug` output.
#[derive(Clone)]
pub struct DerivedKey(Box<[u8; KEY_LEN]>);

impl DerivedKey {
    /// Accept a key that was already derived and base64url-encoded elsewhere
    /// (e.g. a `FIELD_ENCRYPTION_KEY` setting).
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::EmptySecret`] for a blank string and
    /// [`KeyError::InvalidEncodedKey`] if it does not decode to [`KEY_LEN`] bytes.
    pub fn from_encoded(encoded: &str) -> Result<Self, KeyError> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(KeyError::EmptySecret);
        }
        let bytes = URL_SAFE
            .decode(encoded)
            .map_err(|_| KeyError::InvalidEncodedKey)?;
        if bytes.len() != KEY_LEN {
            return Err(KeyError::InvalidEncodedKey);
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(&bytes);
        Ok(Self(buf))
    }

    /// A fresh random key, used as a per-message data key.
    pub fn generate() -> Self {
        use aes_gcm_siv::aead::{rand_core::RngCore, OsRng};
        let mut buf = Box::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut buf[..]);
        Self(buf)
    }

    /// The key in the base64url (padded) form handed to the cipher.
    pub fn encoded(&self) -> String {
        URL_SAFE.encode(&self.0[..])
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Derive the field key from `secret`.
///
/// Takes the first [`KEY_LEN`] bytes of the secret, right-pads with
/// [`PAD_BYTE`] when it is shorter, and returns the result as a [`DerivedKey`].
/// The same secret always yields the same key.
///
/// The key's strength is bounded by the secret's entropy; reusing the
/// application secret avoids managing a second one.
///
/// # Errors
///
/// Returns [`KeyError::EmptySecret`] if `secret` is empty or whitespace.
pub fn derive_key(secret: &str) -> Result<DerivedKey, KeyError> {
    if secret.trim().is_empty() {
        return Err(KeyError::EmptySecret);
    }
    let mut buf = Box::new([PAD_BYTE; KEY_LEN]);
    let bytes = secret.as_bytes();
    let take = bytes.len().min(KEY_LEN);
    buf[..take].copy_from_slice(&bytes[..take]);
    Ok(DerivedKey(buf))
}
