//! Envelope encryption for message bodies.
//!
//! Each message gets its own random data key. The body is encrypted under the
//! data key and the data key is encrypted (wrapped) under the master field key.
//! Both halves are ordinary tokens and must be stored together.

use crate::cipher::{CipherError, FieldCipher, NotCiphertext};
use crate::key::DerivedKey;

/// A message body sealed under a one-off data key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    /// The body encrypted under the data key.
    pub body: String,
    /// The data key encrypted under the master key.
    pub wrapped_key: String,
}

/// Encrypt `message` under a fresh data key and wrap that key with `master`.
///
/// # Errors
///
/// Returns a [`CipherError`] if either encryption fails.
pub fn seal_message(master: &FieldCipher, message: &str) -> Result<SealedMessage, CipherError> {
    let data_key = DerivedKey::generate();
    let body = FieldCipher::new(&data_key)?.encrypt_str(message)?;
    let wrapped_key = master.encrypt_str(&data_key.encoded())?;
    Ok(SealedMessage { body, wrapped_key })
}

/// Unwrap the data key with `master` and decrypt `body` with it.
///
/// Unlike field reads this does not fall back to the stored value: a message
/// that cannot be opened is an error.
///
/// # Errors
///
/// Returns [`NotCiphertext`] if the wrapped key or the body does not
/// authenticate, or the unwrapped key is not a valid field key.
pub fn open_message(
    master: &FieldCipher,
    body: &str,
    wrapped_key: &str,
) -> Result<String, NotCiphertext> {
    let encoded = master.try_decrypt(wrapped_key)?;
    let data_key = DerivedKey::from_encoded(&encoded).map_err(|_| NotCiphertext::Format)?;
    let cipher = FieldCipher::new(&data_key).map_err(|_| NotCiphertext::Format)?;
    if body.is_empty() {
        return Ok(String::new());
    }
    cipher.try_decrypt(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::derive_key;

    fn master(secret: &str) -> FieldCipher {
        FieldCipher::new(&derive_key(secret).unwrap()).unwrap()
    }

    #[test]
    fn sealed_message_opens_with_master_key() {
        let m = master("message-master-secret");
        let sealed = seal_message(&m, "meet at the library at noon").unwrap();
        assert_ne!(sealed.body, "meet at the library at noon");
        assert_eq!(
            open_message(&m, &sealed.body, &sealed.wrapped_key).unwrap(),
            "meet at the library at noon"
        );
    }

    #[test]
    fn every_message_gets_its_own_data_key() {
        let m = master("message-master-secret");
        let a = seal_message(&m, "same text").unwrap();
        let b = seal_message(&m, "same text").unwrap();
        assert_ne!(m.decrypt_str(&a.wrapped_key), m.decrypt_str(&b.wrapped_key));

        // The body is not readable under the master key directly.
        assert!(!m.is_encrypted(&a.body));
    }

    #[test]
    fn wrong_master_key_cannot_open() {
        let sealed = seal_message(&master("first-master"), "hello").unwrap();
        assert_eq!(
            open_message(&master("second-master"), &sealed.body, &sealed.wrapped_key),
            Err(NotCiphertext::Authentication)
        );
    }

    #[test]
    fn halves_of_different_messages_do_not_mix() {
        let m = master("message-master-secret");
        let a = seal_message(&m, "first").unwrap();
        let b = seal_message(&m, "second").unwrap();
        assert_eq!(
            open_message(&m, &a.body, &b.wrapped_key),
            Err(NotCiphertext::Authentication)
        );
        assert_eq!(
            open_message(&m, &a.body, "not a token"),
            Err(NotCiphertext::Format)
        );
    }

    #[test]
    fn empty_message_round_trips() {
        let m = master("message-master-secret");
        let sealed = seal_message(&m, "").unwrap();
        assert_eq!(sealed.body, "");
        assert_eq!(open_message(&m, "", &sealed.wrapped_key).unwrap(), "");
    }
}
