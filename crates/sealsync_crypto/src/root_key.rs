//! Root key derivation from account credentials.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{SymmetricKey, KEY_SIZE};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use sealsync_protocol::KeyParams;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 32;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfCost {
    /// Memory in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Lanes.
    pub parallelism: u32,
}

impl Default for KdfCost {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 5,
            parallelism: 1,
        }
    }
}

impl KdfCost {
    /// Minimal cost for tests and fixtures. Never use for real accounts.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// The account-level key. Derived from the password, never persisted.
///
/// The derivation yields 64 bytes: the first half is the master key that
/// wraps items keys, the second half is sent to the server in place of the
/// password.
pub struct RootKey {
    master_key: SymmetricKey,
    server_password: String,
    key_params: KeyParams,
}

impl RootKey {
    /// Derives the root key for an existing account.
    pub fn derive(password: &str, key_params: KeyParams, cost: KdfCost) -> CryptoResult<Self> {
        if !key_params.is_supported() {
            return Err(CryptoError::UnsupportedVersion(key_params.version));
        }

        let digest = Sha256::digest(format!("{}:{}", key_params.identifier, key_params.pw_nonce));
        let salt = &digest[..SALT_SIZE];

        let params = Params::new(
            cost.memory_kib,
            cost.iterations,
            cost.parallelism,
            Some(KEY_SIZE * 2),
        )
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut output = Zeroizing::new([0u8; KEY_SIZE * 2]);
        argon2
            .hash_password_into(password.as_bytes(), salt, output.as_mut_slice())
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        Ok(Self {
            master_key: SymmetricKey::from_bytes(&output[..KEY_SIZE])?,
            server_password: hex::encode(&output[KEY_SIZE..]),
            key_params,
        })
    }

    /// Creates parameters and the root key for a new account.
    pub fn register(identifier: &str, password: &str, cost: KdfCost) -> CryptoResult<Self> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let params = KeyParams::new(identifier, hex::encode(nonce)).with_origination("registration");
        Self::derive(password, params, cost)
    }

    /// Reassembles a root key from stored parts, e.g. a keyring entry.
    pub fn from_parts(
        master_key: SymmetricKey,
        server_password: impl Into<String>,
        key_params: KeyParams,
    ) -> Self {
        Self {
            master_key,
            server_password: server_password.into(),
            key_params,
        }
    }

    /// Key that wraps items keys.
    pub fn master_key(&self) -> &SymmetricKey {
        &self.master_key
    }

    /// Credential sent to the server instead of the password.
    pub fn server_password(&self) -> &str {
        &self.server_password
    }

    /// Parameters the key was derived with.
    pub fn key_params(&self) -> &KeyParams {
        &self.key_params
    }
}

impl Drop for RootKey {
    fn drop(&mut self) {
        self.server_password.zeroize();
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKey")
            .field("master_key", &"[REDACTED]")
            .field("server_password", &"[REDACTED]")
            .field("key_params", &self.key_params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> KeyParams {
        KeyParams::new("a@example.com", "2c409996650e46c748856fbd6aa549f89f35be055a8f9bfacdf0c4b29b2152e9")
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = RootKey::derive("hunter2", params(), KdfCost::insecure_fast()).unwrap();
        let b = RootKey::derive("hunter2", params(), KdfCost::insecure_fast()).unwrap();
        assert_eq!(a.master_key().as_bytes(), b.master_key().as_bytes());
        assert_eq!(a.server_password(), b.server_password());
        assert_eq!(a.server_password().len(), KEY_SIZE * 2);
    }

    #[test]
    fn halves_are_independent() {
        let key = RootKey::derive("hunter2", params(), KdfCost::insecure_fast()).unwrap();
        assert_ne!(
            hex::encode(key.master_key().as_bytes()),
            key.server_password()
        );
    }

    #[test]
    fn password_and_identifier_matter() {
        let base = RootKey::derive("hunter2", params(), KdfCost::insecure_fast()).unwrap();
        let other_pw = RootKey::derive("hunter3", params(), KdfCost::insecure_fast()).unwrap();
        let mut other_params = params();
        other_params.identifier = "b@example.com".into();
        let other_id = RootKey::derive("hunter2", other_params, KdfCost::insecure_fast()).unwrap();

        assert_ne!(base.master_key().as_bytes(), other_pw.master_key().as_bytes());
        assert_ne!(base.master_key().as_bytes(), other_id.master_key().as_bytes());
    }

    #[test]
    fn unsupported_version() {
        let mut old = params();
        old.version = "003".into();
        assert!(matches!(
            RootKey::derive("pw", old, KdfCost::insecure_fast()),
            Err(CryptoError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn registration_draws_fresh_nonce() {
        let a = RootKey::register("a@example.com", "pw", KdfCost::insecure_fast()).unwrap();
        let b = RootKey::register("a@example.com", "pw", KdfCost::insecure_fast()).unwrap();
        assert_ne!(a.key_params().pw_nonce, b.key_params().pw_nonce);
        assert_eq!(a.key_params().origination.as_deref(), Some("registration"));
    }

    #[test]
    fn debug_is_redacted() {
        let key = RootKey::derive("pw", params(), KdfCost::insecure_fast()).unwrap();
        let debug = format!("{key:?}");
        assert!(!debug.contains(key.server_password()));
    }
}
