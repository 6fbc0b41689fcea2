//! Per-field state classification.

use field_cipher::FieldCipher;

use super::RecordError;
use crate::store::FieldValue;

/// Where a stored field sits in the `PLAINTEXT → ENCRYPTED` state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldState<'a> {
    /// Null or empty. Terminal; nothing to protect.
    Empty,
    /// A token that authenticates under the current key. Terminal.
    Encrypted { plaintext: String },
    /// Anything else.
    Plaintext(&'a str),
}

/// Classify `value` of field `field`.
///
/// The check is a real decrypt, so a plaintext that merely looks like a token
/// is still classified as plaintext.
///
/// # Errors
///
/// Returns [`RecordError::NotText`] for non-text values.
pub fn classify<'a>(
    cipher: &FieldCipher,
    field: &str,
    value: &'a FieldValue,
) -> Result<FieldState<'a>, RecordError> {
    match value {
        FieldValue::Null => Ok(FieldState::Empty),
        FieldValue::Text(s) if s.is_empty() => Ok(FieldState::Empty),
        FieldValue::Text(s) => Ok(match cipher.try_decrypt(s) {
            Ok(plaintext) => FieldState::Encrypted { plaintext },
            Err(_) => FieldState::Plaintext(s),
        }),
        FieldValue::Unsupported(kind) => Err(RecordError::NotText {
            field: field.to_owned(),
            kind,
        }),
    }
}
