/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: credentials.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 14:40:07
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-05 09:51:22
 */

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

// 96-bit nonce for AES-GCM
const NONCE_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("stored password is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("stored password is too short to contain a nonce")]
    Truncated,

    #[error("stored password could not be decrypted")]
    Decryption,

    #[error("decrypted password is not valid UTF-8")]
    NotUtf8,

    #[error("password encryption failed")]
    Encryption,
}

/// A decrypted password. Only lives while a fetch command is being built and
/// run; its `Debug` output never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Plaintext(String);

impl Plaintext {
    #[allow(dead_code)]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Plaintext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Plaintext(<redacted>)")
    }
}

/// Turns the stored form of a fetcher password into plaintext.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialCodec: Send + Sync {
    fn decrypt(&self, stored: &str) -> Result<Plaintext, CredentialError>;
}

/// AES-256-GCM codec keyed by the SHA-256 digest of an operator secret.
///
/// Stored form is `base64(nonce || ciphertext)`.
pub struct AesCredentialCodec {
    cipher: Aes256Gcm,
}

impl AesCredentialCodec {
    pub fn new(secret: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CredentialError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CredentialError::Encryption)?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }
}

impl CredentialCodec for AesCredentialCodec {
    fn decrypt(&self, stored: &str) -> Result<Plaintext, CredentialError> {
        let combined = BASE64.decode(stored.trim())?;
        if combined.len() <= NONCE_SIZE {
            return Err(CredentialError::Truncated);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let decrypted = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CredentialError::Decryption)?;

        String::from_utf8(decrypted)
            .map(Plaintext)
            .map_err(|_| CredentialError::NotUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrypt_recovers_encrypted_password() {
        let codec = AesCredentialCodec::new("operator secret");
        let stored = codec.encrypt("p@ss'word").unwrap();

        assert_ne!(stored, "p@ss'word");
        assert_eq!(codec.decrypt(&stored).unwrap().expose(), "p@ss'word");
    }

    #[test]
    fn test_decrypt_is_deterministic() {
        let codec = AesCredentialCodec::new("k");
        let stored = codec.encrypt("hunter2").unwrap();
        assert_eq!(codec.decrypt(&stored).unwrap(), codec.decrypt(&stored).unwrap());
    }

    #[test]
    fn test_wrong_secret_fails() {
        let stored = AesCredentialCodec::new("one").encrypt("hunter2").unwrap();
        let result = AesCredentialCodec::new("two").decrypt(&stored);
        assert!(matches!(result, Err(CredentialError::Decryption)));
    }

    #[test]
    fn test_corrupt_input_fails() {
        let codec = AesCredentialCodec::new("k");
        assert!(matches!(
            codec.decrypt("not base64 !!"),
            Err(CredentialError::Encoding(_))
        ));
        assert!(matches!(
            codec.decrypt(&BASE64.encode([1u8; 4])),
            Err(CredentialError::Truncated)
        ));
    }

    #[test]
    fn test_plaintext_debug_is_redacted() {
        let secret = Plaintext::new("hunter2");
        assert_eq!(format!("{:?}", secret), "Plaintext(<redacted>)");
    }
}
