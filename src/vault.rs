//! Symmetric encryption of tenant secrets (platform access tokens, webhook
//! secrets) at rest, using a versioned envelope so the on-disk format can
//! change without breaking existing rows.

use aes_gcm::aead::{Aead, KeyInit, OsRng, rand_core::RngCore};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

const ENVELOPE_PREFIX: &str = "v1:";
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption key must be 32 bytes (got {0})")]
    InvalidKeyLength(usize),
    #[error("envelope is shorter than the nonce")]
    InvalidEnvelope,
    #[error("decryption failed")]
    DecryptFailed,
}

/// Encrypts/decrypts tenant secrets with AES-256-GCM under a single
/// process-wide key derived from `ENCRYPTION_KEY`.
///
/// Ciphertext is stored as `"v1:" + base64(nonce || ciphertext_with_tag)`.
/// Values that do not start with the `v1:` prefix are returned unchanged by
/// `decrypt`, which lets legacy plaintext rows keep working until the next
/// write re-encrypts them.
pub struct SecretVault {
    cipher: Aes256Gcm,
}

impl SecretVault {
    pub fn new(key_bytes: &[u8]) -> Result<Self, VaultError> {
        if key_bytes.len() != 32 {
            return Err(VaultError::InvalidKeyLength(key_bytes.len()));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::DecryptFailed)?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);

        Ok(format!("{ENVELOPE_PREFIX}{}", BASE64.encode(envelope)))
    }

    /// Decrypts a `v1:`-prefixed envelope. Values without the prefix are
    /// assumed to be legacy plaintext and returned as-is.
    pub fn decrypt(&self, stored: &str) -> Result<String, VaultError> {
        let Some(encoded) = stored.strip_prefix(ENVELOPE_PREFIX) else {
            return Ok(stored.to_string());
        };

        let raw = BASE64
            .decode(encoded)
            .map_err(|_| VaultError::InvalidEnvelope)?;
        if raw.len() < NONCE_LEN {
            return Err(VaultError::InvalidEnvelope);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::DecryptFailed)?;

        String::from_utf8(plaintext).map_err(|_| VaultError::DecryptFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> SecretVault {
        SecretVault::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn round_trips_a_secret() {
        let v = vault();
        let envelope = v.encrypt("glpat-super-secret-token").unwrap();
        assert!(envelope.starts_with("v1:"));
        assert_eq!(v.decrypt(&envelope).unwrap(), "glpat-super-secret-token");
    }

    #[test]
    fn legacy_plaintext_passes_through() {
        let v = vault();
        assert_eq!(v.decrypt("plain-legacy-value").unwrap(), "plain-legacy-value");
    }

    #[test]
    fn rejects_short_key() {
        assert!(matches!(
            SecretVault::new(b"too-short"),
            Err(VaultError::InvalidKeyLength(_))
        ));
    }

    #[test]
    fn tampered_envelope_fails_to_decrypt() {
        let v = vault();
        let mut envelope = v.encrypt("hello").unwrap();
        envelope.push('A');
        assert!(v.decrypt(&envelope).is_err());
    }
}
