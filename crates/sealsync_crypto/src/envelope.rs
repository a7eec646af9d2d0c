//! Versioned authenticated-encryption envelope.
//!
//! Wire form: `004:<hex nonce>:<base64 ciphertext>:<base64 associated data>`.
//! The associated data travels inside the envelope so that a reader can tell
//! which record it was bound to, but [`open`] only accepts it if it equals
//! the binding the caller expects.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use sealsync_protocol::{ContentType, KeyParams, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// What a ciphertext is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedData {
    /// Record identity.
    #[serde(rename = "u")]
    pub uuid: Uuid,
    /// Record discriminator.
    #[serde(rename = "ct")]
    pub content_type: ContentType,
    /// Protocol version.
    #[serde(rename = "v")]
    pub version: String,
    /// Account the record belongs to.
    #[serde(rename = "kp", default, skip_serializing_if = "Option::is_none")]
    pub key_params: Option<KeyParams>,
}

impl AuthenticatedData {
    /// Binds to a record of the given account.
    pub fn new(uuid: Uuid, content_type: ContentType, key_params: Option<KeyParams>) -> Self {
        Self {
            uuid,
            content_type,
            version: PROTOCOL_VERSION.to_string(),
            key_params,
        }
    }
}

/// A parsed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    version: String,
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
    associated_data: Vec<u8>,
}

impl Envelope {
    /// Protocol version prefix.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Nonce used to seal this envelope.
    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Ciphertext including the GCM tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Decodes the embedded associated data.
    pub fn associated_data(&self) -> CryptoResult<AuthenticatedData> {
        Ok(serde_json::from_slice(&self.associated_data)?)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.version,
            hex::encode(self.nonce),
            STANDARD.encode(&self.ciphertext),
            STANDARD.encode(&self.associated_data)
        )
    }
}

impl FromStr for Envelope {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [version, nonce, ciphertext, associated_data] = parts.as_slice() else {
            return Err(CryptoError::malformed_envelope(format!(
                "expected 4 components, found {}",
                parts.len()
            )));
        };
        if *version != PROTOCOL_VERSION {
            return Err(CryptoError::UnsupportedVersion((*version).to_string()));
        }

        let nonce = hex::decode(nonce)
            .map_err(|e| CryptoError::malformed_envelope(format!("nonce: {e}")))?;
        let nonce: [u8; NONCE_SIZE] = nonce.as_slice().try_into().map_err(|_| {
            CryptoError::malformed_envelope(format!("nonce must be {NONCE_SIZE} bytes"))
        })?;
        let ciphertext = STANDARD
            .decode(ciphertext)
            .map_err(|e| CryptoError::malformed_envelope(format!("ciphertext: {e}")))?;
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::malformed_envelope("ciphertext too short"));
        }
        let associated_data = STANDARD
            .decode(associated_data)
            .map_err(|e| CryptoError::malformed_envelope(format!("associated data: {e}")))?;

        Ok(Self {
            version: (*version).to_string(),
            nonce,
            ciphertext,
            associated_data,
        })
    }
}

fn cipher(key: &SymmetricKey) -> Aes256Gcm {
    Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()))
}

/// Encrypts `plaintext` under `key`, bound to `associated_data`.
///
/// A fresh random nonce is drawn for every call; callers cannot supply one.
pub fn seal(
    plaintext: &[u8],
    key: &SymmetricKey,
    associated_data: &AuthenticatedData,
) -> CryptoResult<Envelope> {
    let aad = serde_json::to_vec(associated_data)?;

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher(key)
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed("aes-gcm seal".into()))?;

    Ok(Envelope {
        version: PROTOCOL_VERSION.to_string(),
        nonce,
        ciphertext,
        associated_data: aad,
    })
}

/// Decrypts an envelope sealed for `expected`.
///
/// # Errors
///
/// `AssociatedDataMismatch` if the envelope is bound to another record or
/// account; `Authentication` if the key is wrong or the data was tampered.
pub fn open(
    envelope: &Envelope,
    key: &SymmetricKey,
    expected: &AuthenticatedData,
) -> CryptoResult<Vec<u8>> {
    let embedded = envelope
        .associated_data()
        .map_err(|_| CryptoError::AssociatedDataMismatch {
            uuid: expected.uuid,
        })?;
    if embedded != *expected {
        return Err(CryptoError::AssociatedDataMismatch {
            uuid: expected.uuid,
        });
    }

    cipher(key)
        .decrypt(
            Nonce::from_slice(&envelope.nonce),
            Payload {
                msg: &envelope.ciphertext,
                aad: &envelope.associated_data,
            },
        )
        .map_err(|_| CryptoError::Authentication {
            uuid: expected.uuid,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn binding() -> AuthenticatedData {
        AuthenticatedData::new(
            Uuid::new_v4(),
            ContentType::Note,
            Some(KeyParams::new("a@example.com", "nonce")),
        )
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = SymmetricKey::generate();
        let aad = binding();
        let envelope = seal(b"hello", &key, &aad).unwrap();
        assert_eq!(open(&envelope, &key, &aad).unwrap(), b"hello");
    }

    #[test]
    fn string_form_roundtrip() {
        let key = SymmetricKey::generate();
        let aad = binding();
        let envelope = seal(b"", &key, &aad).unwrap();
        let text = envelope.to_string();
        assert!(text.starts_with("004:"));
        assert_eq!(text.split(':').count(), 4);

        let parsed: Envelope = text.parse().unwrap();
        assert_eq!(parsed, envelope);
        assert_eq!(parsed.associated_data().unwrap(), aad);
        assert!(open(&parsed, &key, &aad).unwrap().is_empty());
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let aad = binding();
        let envelope = seal(b"secret", &SymmetricKey::generate(), &aad).unwrap();
        assert!(matches!(
            open(&envelope, &SymmetricKey::generate(), &aad),
            Err(CryptoError::Authentication { .. })
        ));
    }

    #[test]
    fn replay_under_other_identity_is_rejected() {
        let key = SymmetricKey::generate();
        let aad = binding();
        let envelope = seal(b"secret", &key, &aad).unwrap();

        let mut moved = aad.clone();
        moved.uuid = Uuid::new_v4();
        assert!(matches!(
            open(&envelope, &key, &moved),
            Err(CryptoError::AssociatedDataMismatch { .. })
        ));

        let mut retyped = aad.clone();
        retyped.content_type = ContentType::Tag;
        assert!(open(&envelope, &key, &retyped).is_err());

        let mut other_account = aad;
        other_account.key_params = Some(KeyParams::new("b@example.com", "nonce"));
        assert!(open(&envelope, &key, &other_account).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = SymmetricKey::generate();
        let aad = binding();
        let mut envelope = seal(b"secret", &key, &aad).unwrap();
        let last = envelope.ciphertext.len() - 1;
        envelope.ciphertext[last] ^= 0xFF;
        assert!(matches!(
            open(&envelope, &key, &aad),
            Err(CryptoError::Authentication { .. })
        ));
    }

    #[test]
    fn malformed_strings() {
        assert!(matches!(
            "004:aa:bb".parse::<Envelope>(),
            Err(CryptoError::MalformedEnvelope { .. })
        ));
        assert!(matches!(
            "003:aa:bb:cc".parse::<Envelope>(),
            Err(CryptoError::UnsupportedVersion(v)) if v == "003"
        ));
        assert!(matches!(
            "004:abcd:AAAAAAAAAAAAAAAAAAAAAA==:e30=".parse::<Envelope>(),
            Err(CryptoError::MalformedEnvelope { .. })
        ));
    }

    #[test]
    fn nonces_never_repeat() {
        let key = SymmetricKey::generate();
        let aad = binding();
        let mut seen = HashSet::with_capacity(10_000);
        for _ in 0..10_000 {
            let envelope = seal(b"x", &key, &aad).unwrap();
            assert!(seen.insert(*envelope.nonce()), "nonce reused");
        }
    }
}
