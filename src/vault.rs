use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng;

use crate::error::Error;

/// AES-256-GCM nonce size in bytes.
const NONCE_SIZE: usize = 12;

/// Authenticated encryption for tokens at rest.
///
/// Ciphertexts are `base64(nonce || ciphertext)` — opaque text that can go
/// straight into the session store. Decryption authenticates, so any tamper
/// or key mismatch fails closed with [`Error::InvalidCiphertext`].
///
/// The key is fixed and externally provisioned; rotation is out of scope.
#[derive(Clone)]
pub struct TokenVault {
    cipher: Aes256Gcm,
}

impl TokenVault {
    /// Create a vault from a raw 32-byte key.
    #[must_use]
    pub fn new(key: [u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from(key);
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    /// Create a vault from a base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the key is not valid base64 or not
    /// exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, Error> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| Error::Config(format!("TOKEN_ENCRYPTION_KEY is not valid base64: {e}")))?;
        let key: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::Config(format!(
                "TOKEN_ENCRYPTION_KEY must be 32 bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Self::new(key))
    }

    /// Encrypt a token for storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the cipher rejects the input; this does
    /// not happen for well-formed keys and token-sized plaintexts.
    pub fn encrypt(&self, token: &str) -> Result<String, Error> {
        let nonce_bytes: [u8; NONCE_SIZE] = rand::rng().random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, token.as_bytes())
            .map_err(|_| Error::Internal("token encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Decrypt a stored token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCiphertext`] on malformed input, failed
    /// authentication, or a key mismatch.
    pub fn decrypt(&self, stored: &str) -> Result<String, Error> {
        let bytes = BASE64.decode(stored).map_err(|_| Error::InvalidCiphertext)?;
        if bytes.len() < NONCE_SIZE {
            return Err(Error::InvalidCiphertext);
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| Error::InvalidCiphertext)?;
        String::from_utf8(plaintext).map_err(|_| Error::InvalidCiphertext)
    }
}

/// Generate a random 32-byte vault key, base64-encoded.
///
/// For provisioning and tests; production keys come from the environment.
#[must_use]
pub fn generate_key_base64() -> String {
    let key: [u8; 32] = rand::rng().random();
    BASE64.encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> TokenVault {
        TokenVault::new(rand::rng().random())
    }

    #[test]
    fn round_trip() {
        let vault = test_vault();
        let token = "eyJhbGciOiJSUzI1NiJ9.payload.signature";
        let stored = vault.encrypt(token).unwrap();
        assert_ne!(stored, token);
        assert_eq!(vault.decrypt(&stored).unwrap(), token);
    }

    #[test]
    fn same_token_encrypts_differently() {
        let vault = test_vault();
        let a = vault.encrypt("token").unwrap();
        let b = vault.encrypt("token").unwrap();
        assert_ne!(a, b, "nonces must differ");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let vault = test_vault();
        let stored = vault.encrypt("token").unwrap();
        let mut bytes = BASE64.decode(&stored).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(bytes);
        assert!(matches!(
            vault.decrypt(&tampered),
            Err(Error::InvalidCiphertext)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let stored = test_vault().encrypt("token").unwrap();
        assert!(matches!(
            test_vault().decrypt(&stored),
            Err(Error::InvalidCiphertext)
        ));
    }

    #[test]
    fn garbage_input_fails() {
        let vault = test_vault();
        assert!(matches!(
            vault.decrypt("not base64!!"),
            Err(Error::InvalidCiphertext)
        ));
        assert!(matches!(
            vault.decrypt(&BASE64.encode([0u8; 4])),
            Err(Error::InvalidCiphertext)
        ));
    }

    #[test]
    fn from_base64_validates_length() {
        assert!(TokenVault::from_base64(&generate_key_base64()).is_ok());
        assert!(matches!(
            TokenVault::from_base64(&BASE64.encode([0u8; 16])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            TokenVault::from_base64("///not-base64"),
            Err(Error::Config(_))
        ));
    }
}
