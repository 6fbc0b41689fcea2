//! AES-256-GCM-SIV encryption and decryption of individual string fields.
//!
//! **Token format.** Every encrypted value is the URL-safe (padded) base64
//! encoding of:
//!
//! ```text
//! version (1) | issued-at seconds, big-endian (8) | nonce (12) | ciphertext + tag
//! ```
//!
//! The version byte is [`TOKEN_VERSION`]. Because the high bytes of the
//! timestamp are zero, every token starts with [`TOKEN_PREFIX`]. The 9-byte
//! header is authenticated as associated data.
//!
//! **Nonces.** A fresh random 96-bit nonce is drawn per call, so encrypting
//! the same value twice yields two different tokens.
//!
//! **Fail-open reads.** [`FieldCipher::decrypt`] never errors. Anything that
//! is not a valid token for this key is returned unchanged, so rows that still
//! hold legacy plaintext keep reading correctly. Use [`FieldCipher::try_decrypt`]
//! or [`FieldCipher::is_encrypted`] when the distinction matters.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm_siv::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256GcmSiv, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use thiserror::Error;
use tracing::debug;

use crate::key::{DerivedKey, KEY_LEN};

/// Marker byte at the start of every token.
pub const TOKEN_VERSION: u8 = 0x81;

/// Byte length of the big-endian issued-at timestamp.
pub const TIMESTAMP_LEN: usize = 8;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the AES-GCM-SIV authentication tag.
pub const TAG_LEN: usize = 16;

/// Version byte plus timestamp; bound to the ciphertext as associated data.
pub const HEADER_LEN: usize = 1 + TIMESTAMP_LEN;

/// Raw bytes a token adds on top of the plaintext.
pub const TOKEN_OVERHEAD: usize = HEADER_LEN + NONCE_LEN + TAG_LEN;

/// Base64 prefix shared by every token this cipher produces.
pub const TOKEN_PREFIX: &str = "gQAAAA";

/// Shortest possible encoded token.
pub const MIN_TOKEN_LEN: usize = encrypted_len(0);

/// Exact encoded token length for a plaintext of `plaintext_len` bytes.
///
/// Protected columns must be at least this wide or the store will truncate
/// the token and the value is lost.
pub const fn encrypted_len(plaintext_len: usize) -> usize {
    (TOKEN_OVERHEAD + plaintext_len + 2) / 3 * 4
}

/// Errors produced by the cipher on the write path.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid field key length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// AES-GCM-SIV refused to seal a value.
    #[error("aead encryption failed")]
    EncryptionFailure,
}

/// Why a value could not be decrypted. Returned by [`FieldCipher::try_decrypt`].
///
/// Every variant means the caller should treat the value as plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NotCiphertext {
    /// The value is not base64 or does not have the token layout.
    #[error("value is not in token format")]
    Format,

    /// The token did not authenticate under this key (wrong key or tampered).
    #[error("token failed authentication")]
    Authentication,

    /// Authentication succeeded but the plaintext is not UTF-8.
    #[error("decrypted bytes are not valid UTF-8")]
    Utf8,
}

/// A parsed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedToken {
    /// Seconds since the Unix epoch at which the token was produced.
    pub issued_at: u64,
    /// Raw nonce bytes.
    pub nonce: [u8; NONCE_LEN],
    /// Raw ciphertext + authentication tag bytes.
    pub ciphertext: Vec<u8>,
}

impl EncryptedToken {
    /// Encode this token to its canonical string representation.
    pub fn encode(&self) -> String {
        let mut raw = Vec::with_capacity(HEADER_LEN + NONCE_LEN + self.ciphertext.len());
        raw.extend_from_slice(&self.header());
        raw.extend_from_slice(&self.nonce);
        raw.extend_from_slice(&self.ciphertext);
        URL_SAFE.encode(raw)
    }

    /// Parse a token string.
    ///
    /// This checks the layout only; it does not authenticate anything.
    ///
    /// # Errors
    ///
    /// Returns [`NotCiphertext::Format`] if `s` is not base64, is too short, or
    /// does not start with [`TOKEN_VERSION`].
    pub fn parse(s: &str) -> Result<Self, NotCiphertext> {
        let raw = URL_SAFE.decode(s).map_err(|_| NotCiphertext::Format)?;
        if raw.len() < TOKEN_OVERHEAD || raw[0] != TOKEN_VERSION {
            return Err(NotCiphertext::Format);
        }
        let mut ts = [0u8; TIMESTAMP_LEN];
        ts.copy_from_slice(&raw[1..HEADER_LEN]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&raw[HEADER_LEN..HEADER_LEN + NONCE_LEN]);
        Ok(Self {
            issued_at: u64::from_be_bytes(ts),
            nonce,
            ciphertext: raw[HEADER_LEN + NONCE_LEN..].to_vec(),
        })
    }

    fn header(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0] = TOKEN_VERSION;
        header[1..].copy_from_slice(&self.issued_at.to_be_bytes());
        header
    }
}

/// Fast pre-filter: `true` if `value` has the shape of a token.
///
/// Has no false negatives for tokens produced here, but can say `true` for a
/// plaintext that merely looks like one. [`FieldCipher::is_encrypted`] confirms
/// with a real decrypt.
pub fn looks_encrypted(value: &str) -> bool {
    value.len() >= MIN_TOKEN_LEN && value.starts_with(TOKEN_PREFIX)
}

/// Encrypts and decrypts scalar string fields under one derived key.
///
/// Built once at startup and passed by reference to whatever needs it.
#[derive(Clone)]
pub struct FieldCipher {
    aead: Arc<Aes256GcmSiv>,
}

impl FieldCipher {
    /// Build a cipher from `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKeyLength`] if the AEAD rejects the key.
    /// This is a startup error, never a per-call one.
    pub fn new(key: &DerivedKey) -> Result<Self, CipherError> {
        let aead = Aes256GcmSiv::new_from_slice(&key.as_bytes()[..])
            .map_err(|_| CipherError::InvalidKeyLength)?;
        Ok(Self {
            aead: Arc::new(aead),
        })
    }

    /// Encrypt an optional value. `None` and `""` are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::EncryptionFailure`] if the AEAD fails. This is
    /// never swallowed: an unprotected write is worse than a failed one.
    pub fn encrypt(&self, plaintext: Option<&str>) -> Result<Option<String>, CipherError> {
        plaintext.map(|p| self.encrypt_str(p)).transpose()
    }

    /// Encrypt a string. `""` is returned unchanged.
    ///
    /// # Errors
    ///
    /// See [`FieldCipher::encrypt`].
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CipherError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        Ok(self.seal(plaintext.as_bytes(), unix_now())?.encode())
    }

    /// Decrypt an optional value, falling back to the input on any failure.
    ///
    /// `None` and `""` are returned unchanged.
    pub fn decrypt(&self, token: Option<&str>) -> Option<String> {
        token.map(|t| self.decrypt_str(t))
    }

    /// Decrypt a string, returning it unchanged if it is not a token for this key.
    pub fn decrypt_str(&self, value: &str) -> String {
        if value.is_empty() {
            return String::new();
        }
        match self.try_decrypt(value) {
            Ok(plaintext) => plaintext,
            Err(reason) => {
                debug!(reason = %reason, "value did not decrypt; returning stored value");
                value.to_owned()
            }
        }
    }

    /// Decrypt `value`, reporting why it could not be decrypted.
    ///
    /// # Errors
    ///
    /// Returns a [`NotCiphertext`] reason when `value` is not a valid token
    /// under this key. Callers typically fall back to the original value.
    pub fn try_decrypt(&self, value: &str) -> Result<String, NotCiphertext> {
        if !looks_encrypted(value) {
            return Err(NotCiphertext::Format);
        }
        let token = EncryptedToken::parse(value)?;
        let plaintext = self.open(&token)?;
        String::from_utf8(plaintext).map_err(|_| NotCiphertext::Utf8)
    }

    /// `true` if `value` is a token that authenticates under this key.
    ///
    /// The prefix check rejects most plaintext without allocating; anything
    /// that passes it is confirmed by decrypting.
    pub fn is_encrypted(&self, value: &str) -> bool {
        self.try_decrypt(value).is_ok()
    }

    fn seal(&self, plaintext: &[u8], issued_at: u64) -> Result<EncryptedToken, CipherError> {
        use aes_gcm_siv::aead::rand_core::RngCore;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let mut token = EncryptedToken {
            issued_at,
            nonce: nonce_bytes,
            ciphertext: Vec::new(),
        };
        let header = token.header();
        token.ciphertext = self
            .aead
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: &header,
                },
            )
            .map_err(|_| CipherError::EncryptionFailure)?;
        Ok(token)
    }

    fn open(&self, token: &EncryptedToken) -> Result<Vec<u8>, NotCiphertext> {
        let header = token.header();
        self.aead
            .decrypt(
                Nonce::from_slice(&token.nonce),
                Payload {
                    msg: token.ciphertext.as_ref(),
                    aad: &header,
                },
            )
            .map_err(|_| NotCiphertext::Authentication)
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldCipher([REDACTED])")
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
