//! AES-256-GCM credential-at-rest cipher.
//!
//! Implements a prefix-tagged on-disk format:
//! `"enc:" ‖ base64(nonce12 ‖ ciphertext ‖ tag16)`. `decrypt` of a string
//! lacking the `enc:` prefix is the identity, which lets an existing
//! plaintext corpus adopt encryption without a migration step.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key};
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::llmgate::error::GatewayError;

const PREFIX: &str = "enc:";

/// AES-256-GCM cipher keyed by a passphrase-derived 32-byte key.
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl Cipher {
    /// Derive a cipher from an arbitrary non-empty passphrase via
    /// `SHA-256(passphrase)`.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt `plaintext`, returning the `enc:`-fenced ciphertext. Empty
    /// plaintext short-circuits to an empty string without invoking AEAD.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, GatewayError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| GatewayError::CryptoError("encryption failed".into()))?;
        let mut sealed = Vec::with_capacity(nonce.len() + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(format!(
            "{PREFIX}{}",
            base64::engine::general_purpose::STANDARD.encode(sealed)
        ))
    }

    /// Decrypt `s`. If `s` does not start with `enc:` it is returned
    /// unchanged (identity). A wrong key or corrupted ciphertext fails with
    /// [`GatewayError::CryptoError`].
    pub fn decrypt(&self, s: &str) -> Result<String, GatewayError> {
        let Some(encoded) = s.strip_prefix(PREFIX) else {
            return Ok(s.to_string());
        };
        let sealed = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| GatewayError::CryptoError(format!("invalid base64: {e}")))?;
        if sealed.len() < 12 {
            return Err(GatewayError::CryptoError("ciphertext too short".into()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(12);
        let nonce = aes_gcm::Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| GatewayError::CryptoError("authentication tag verification failed".into()))?;
        String::from_utf8(plaintext)
            .map_err(|e| GatewayError::CryptoError(format!("invalid utf8: {e}")))
    }
}

/// Apply `encrypt` to a provider's sensitive fields (`api_key` and every
/// `extra_headers` value), leaving non-secret fields untouched.
pub fn encrypt_provider_secrets(
    cipher: &Cipher,
    api_key: Option<&str>,
    extra_headers: &std::collections::HashMap<String, String>,
) -> Result<
    (
        Option<String>,
        std::collections::HashMap<String, String>,
    ),
    GatewayError,
> {
    let encrypted_key = api_key.map(|k| cipher.encrypt(k)).transpose()?;
    let mut encrypted_headers = std::collections::HashMap::with_capacity(extra_headers.len());
    for (k, v) in extra_headers {
        encrypted_headers.insert(k.clone(), cipher.encrypt(v)?);
    }
    Ok((encrypted_key, encrypted_headers))
}

/// Inverse of [`encrypt_provider_secrets`], used when materializing an
/// adapter from a stored [`crate::llmgate::config::ProviderConfig`].
pub fn decrypt_provider_secrets(
    cipher: &Cipher,
    api_key: Option<&str>,
    extra_headers: &std::collections::HashMap<String, String>,
) -> Result<
    (
        Option<String>,
        std::collections::HashMap<String, String>,
    ),
    GatewayError,
> {
    let decrypted_key = api_key.map(|k| cipher.decrypt(k)).transpose()?;
    let mut decrypted_headers = std::collections::HashMap::with_capacity(extra_headers.len());
    for (k, v) in extra_headers {
        decrypted_headers.insert(k.clone(), cipher.decrypt(v)?);
    }
    Ok((decrypted_key, decrypted_headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let cipher = Cipher::from_passphrase("correct horse battery staple");
        let encrypted = cipher.encrypt("sk-abc123").unwrap();
        assert!(encrypted.starts_with(PREFIX));
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "sk-abc123");
    }

    #[test]
    fn nonce_uniqueness() {
        let cipher = Cipher::from_passphrase("passphrase");
        let a = cipher.encrypt("same plaintext").unwrap();
        let b = cipher.encrypt("same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn plaintext_passthrough() {
        let cipher = Cipher::from_passphrase("passphrase");
        assert_eq!(cipher.decrypt("sk-plain-value").unwrap(), "sk-plain-value");
        assert_eq!(cipher.decrypt("").unwrap(), "");
    }

    #[test]
    fn empty_plaintext_short_circuits() {
        let cipher = Cipher::from_passphrase("passphrase");
        assert_eq!(cipher.encrypt("").unwrap(), "");
    }

    #[test]
    fn wrong_key_fails() {
        let a = Cipher::from_passphrase("key-one");
        let b = Cipher::from_passphrase("key-two");
        let encrypted = a.encrypt("top secret").unwrap();
        let err = b.decrypt(&encrypted).unwrap_err();
        assert!(matches!(err, GatewayError::CryptoError(_)));
    }
}
