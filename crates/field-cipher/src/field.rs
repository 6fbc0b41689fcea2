//! [`ProtectedField`]: encrypt-on-write, decrypt-on-read accessor for one column.
//!
//! One accessor covers every protected column. It is parameterized by the
//! column name and, optionally, the column's maximum length so that a token
//! that would not fit is rejected instead of being truncated by the store.

use thiserror::Error;

use crate::cipher::{encrypted_len, CipherError, FieldCipher};

/// Errors produced when sealing a value for storage.
#[derive(Debug, Error)]
pub enum FieldError {
    /// The cipher failed to encrypt the value.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// The token is longer than the column can hold.
    #[error("encrypted {field} is {len} chars but the column holds {max}")]
    TooWide {
        field: String,
        len: usize,
        max: usize,
    },
}

/// A named column whose values are stored encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedField {
    name: String,
    max_length: Option<usize>,
}

impl ProtectedField {
    /// A protected column with no declared width limit.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_length: None,
        }
    }

    /// Declare the column's maximum length in characters.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    /// `true` if `stored` fits the declared width.
    pub fn fits(&self, stored: &str) -> bool {
        self.max_length.map_or(true, |max| stored.len() <= max)
    }

    /// Encrypt `value` for storage in this column.
    ///
    /// `None` and `""` are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::TooWide`] if the token would not fit, or
    /// [`FieldError::Cipher`] if encryption fails.
    pub fn seal(
        &self,
        cipher: &FieldCipher,
        value: Option<&str>,
    ) -> Result<Option<String>, FieldError> {
        let sealed = cipher.encrypt(value)?;
        if let Some(token) = sealed.as_deref() {
            self.check_width(token)?;
        }
        Ok(sealed)
    }

    /// Decrypt a stored value read from this column (fail-open).
    pub fn open(&self, cipher: &FieldCipher, stored: Option<&str>) -> Option<String> {
        cipher.decrypt(stored)
    }

    /// Fail with [`FieldError::TooWide`] if `stored` exceeds the declared width.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn check_width(&self, stored: &str) -> Result<(), FieldError> {
        match self.max_length {
            Some(max) if stored.len() > max => Err(FieldError::TooWide {
                field: self.name.clone(),
                len: stored.len(),
                max,
            }),
            _ => Ok(()),
        }
    }
}

/// Column width needed to hold the token of any plaintext up to
/// `max_plaintext_bytes` long.
pub fn required_width(max_plaintext_bytes: usize) -> usize {
    encrypted_len(max_plaintext_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::derive_key;

    fn cipher() -> FieldCipher {
        FieldCipher::new(&derive_key("accessor-tests-secret").unwrap()).unwrap()
    }

    #[test]
    fn seal_then_open_round_trips() {
        let c = cipher();
        let email = ProtectedField::new("email").with_max_length(required_width(254));
        let stored = email.seal(&c, Some("dana@example.com")).unwrap().unwrap();
        assert!(c.is_encrypted(&stored));
        assert_eq!(
            email.open(&c, Some(&stored)).as_deref(),
            Some("dana@example.com")
        );
    }

    #[test]
    fn open_passes_legacy_plaintext_through() {
        let c = cipher();
        let field = ProtectedField::new("ip_address");
        assert_eq!(
            field.open(&c, Some("10.0.0.1")).as_deref(),
            Some("10.0.0.1")
        );
        assert_eq!(field.open(&c, None), None);
    }

    #[test]
    fn seal_rejects_tokens_wider_than_the_column() {
        let c = cipher();
        // A 254-char column cannot hold the token of a 254-char email.
        let email = ProtectedField::new("email").with_max_length(254);
        let long = format!("{}@example.com", "a".repeat(200));
        match email.seal(&c, Some(&long)) {
            Err(FieldError::TooWide { field, len, max }) => {
                assert_eq!(field, "email");
                assert_eq!(max, 254);
                assert_eq!(len, encrypted_len(long.len()));
            }
            other => panic!("expected TooWide, got {other:?}"),
        }
    }

    #[test]
    fn empty_values_are_never_width_checked() {
        let c = cipher();
        let tiny = ProtectedField::new("first_name").with_max_length(1);
        assert_eq!(tiny.seal(&c, Some("")).unwrap().as_deref(), Some(""));
        assert_eq!(tiny.seal(&c, None).unwrap(), None);
    }

    #[test]
    fn unbounded_field_fits_anything() {
        let field = ProtectedField::new("message");
        assert!(field.fits(&"x".repeat(100_000)));
        assert_eq!(field.max_length(), None);
    }

    #[test]
    fn required_width_covers_overhead() {
        assert_eq!(required_width(254), 388);
        assert_eq!(required_width(0), 52);
    }
}
