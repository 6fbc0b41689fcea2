//! Encrypted JSON values.
//!
//! A whole JSON document is stored as one token. Reads fall back the same way
//! as string fields: a column that still holds plain JSON (or plain text)
//! keeps reading.

use serde_json::Value;

use crate::cipher::{CipherError, FieldCipher};

/// Encrypt a JSON value for storage.
///
/// `Value::Null` maps to `None`. A JSON string is encrypted as its raw text;
/// anything else is serialised first.
///
/// # Errors
///
/// Returns [`CipherError`] if encryption fails.
pub fn encrypt_json(cipher: &FieldCipher, value: &Value) -> Result<Option<String>, CipherError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => cipher.encrypt(Some(s)),
        other => cipher.encrypt(Some(&other.to_string())),
    }
}

/// Decrypt a stored JSON value.
///
/// The stored text is decrypted (fail-open) and parsed. Text that is not JSON
/// comes back as a JSON string.
///
/// A JSON string is stored as its raw text, so a string whose text is itself
/// valid JSON does not survive the round trip: `"123"` reads back as the
/// number `123`, `"true"` as `true`, `"null"` as `null`.
pub fn decrypt_json(cipher: &FieldCipher, stored: Option<&str>) -> Value {
    let Some(text) = cipher.decrypt(stored) else {
        return Value::Null;
    };
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::derive_key;
    use serde_json::json;

    fn cipher() -> FieldCipher {
        FieldCipher::new(&derive_key("json-field-secret").unwrap()).unwrap()
    }

    #[test]
    fn object_round_trips() {
        let c = cipher();
        let value = json!({"street": "1 Main St", "zip": "90210", "tags": [1, 2]});
        let stored = encrypt_json(&c, &value).unwrap().unwrap();
        assert!(c.is_encrypted(&stored));
        assert_eq!(decrypt_json(&c, Some(&stored)), value);
    }

    #[test]
    fn null_is_not_stored() {
        let c = cipher();
        assert_eq!(encrypt_json(&c, &Value::Null).unwrap(), None);
        assert_eq!(decrypt_json(&c, None), Value::Null);
    }

    #[test]
    fn legacy_plain_json_still_reads() {
        let c = cipher();
        assert_eq!(
            decrypt_json(&c, Some(r#"{"zip":"10001"}"#)),
            json!({"zip": "10001"})
        );
    }

    #[test]
    fn string_holding_json_reads_back_as_json() {
        let c = cipher();
        for (written, read) in [
            (json!("123"), json!(123)),
            (json!("true"), json!(true)),
            (json!("[1]"), json!([1])),
            (json!("plain words"), json!("plain words")),
        ] {
            let stored = encrypt_json(&c, &written).unwrap();
            assert_eq!(decrypt_json(&c, stored.as_deref()), read);
        }
    }

    #[test]
    fn legacy_plain_text_reads_as_string() {
        let c = cipher();
        assert_eq!(
            decrypt_json(&c, Some("12 Elm Road")),
            Value::String("12 Elm Road".into())
        );
    }
}
