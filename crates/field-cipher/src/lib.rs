//! Reversible at-rest encryption for PII string fields.
//!
//! This crate is free of storage and HTTP dependencies. It provides:
//!
//! - [`key`]: derive the 32-byte field key from the configured secret.
//! - [`cipher`]: [`FieldCipher`] encrypt / decrypt / is-encrypted on scalar strings.
//! - [`field`]: [`ProtectedField`], the encrypt-on-write, decrypt-on-read accessor.
//! - [`json`]: whole-document encryption of JSON values.
//! - [`lookup`]: keyed lookup hashes for equality search over encrypted columns.
//! - [`envelope`]: message bodies sealed under per-message data keys.
//! - [`mask`]: display masking for email addresses.
//!
//! # Token format
//!
//! ```text
//! base64url( 0x81 | issued-at u64 BE | nonce[12] | AES-256-GCM-SIV(ciphertext + tag) )
//! ```
//!
//! Every token starts with `gQAAAA`. The version byte leaves room for a key-id
//! scheme later; today there is exactly one key.

pub mod cipher;
pub mod envelope;
pub mod field;
pub mod json;
pub mod key;
pub mod lookup;
pub mod mask;

pub use cipher::{encrypted_len, looks_encrypted, CipherError, EncryptedToken, FieldCipher, NotCiphertext};
pub use envelope::{open_message, seal_message, SealedMessage};
pub use field::{required_width, FieldError, ProtectedField};
pub use key::{derive_key, DerivedKey, KeyError, KEY_LEN};
pub use lookup::LookupHasher;
pub use mask::anonymize_email;
