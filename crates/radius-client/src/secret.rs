//! Shared secret decryption boundary
//!
//! Secrets are stored encrypted by the surrounding application. The login
//! path only sees `decrypt(ciphertext) -> plaintext`, called once per server
//! per authentication.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("Failed to decrypt shared secret: {0}")]
    Decrypt(String),
    #[error("Shared secret is empty after decryption")]
    Empty,
}

pub trait SecretDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, SecretError>;
}

/// Identity decryptor: the stored value is the secret
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextSecrets;

impl SecretDecryptor for PlaintextSecrets {
    fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, SecretError> {
        Ok(ciphertext.as_bytes().to_vec())
    }
}

impl<F> SecretDecryptor for F
where
    F: Fn(&str) -> Result<Vec<u8>, SecretError> + Send + Sync,
{
    fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, SecretError> {
        self(ciphertext)
    }
}
