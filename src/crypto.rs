//! Password-derived symmetric crypto for the wallet file.
//!
//! The scheme is AES-256-GCM under a PBKDF2-HMAC-SHA256 key. Tokens are
//! self-describing (algorithm + nonce + ciphertext/tag) so the file format
//! does not depend on struct layout.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const DEFAULT_ITERATIONS: u32 = 100_000;

const ALGORITHM: &str = "AES-256-GCM";

/// Self-describing authenticated-encryption token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub alg: String,
    /// Hex, 12 bytes.
    pub nonce: String,
    /// Hex, ciphertext with the GCM tag appended.
    pub ct: String,
}

/// Stretches a password into a 32-byte key.
///
/// The salt defaults to empty for wallet files, matching the historical
/// on-disk format; see DESIGN.md for the compatibility decision.
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

/// Encrypts with a fresh random nonce, so identical plaintexts never produce
/// identical tokens.
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Token> {
    let nonce = rand::random::<[u8; NONCE_SIZE]>();
    let cipher = Aes256Gcm::new(&(*key).into());
    let ct = cipher
        .encrypt(&nonce.into(), plaintext)
        .map_err(|e| Error::Store(format!("encryption failed: {:?}", e)))?;
    Ok(Token {
        alg: ALGORITHM.to_string(),
        nonce: hex::encode(nonce),
        ct: hex::encode(ct),
    })
}

/// Decrypts a token. Any malformed field or flipped bit fails authentication.
pub fn decrypt(key: &[u8; KEY_SIZE], token: &Token) -> Result<Vec<u8>> {
    if token.alg != ALGORITHM {
        return Err(Error::AuthFail);
    }
    let nonce_bytes = hex::decode(&token.nonce).map_err(|_| Error::AuthFail)?;
    let nonce: [u8; NONCE_SIZE] = nonce_bytes.as_slice().try_into().map_err(|_| Error::AuthFail)?;
    let ct = hex::decode(&token.ct).map_err(|_| Error::AuthFail)?;

    let cipher = Aes256Gcm::new(&(*key).into());
    cipher.decrypt(&nonce.into(), ct.as_ref()).map_err(|_| Error::AuthFail)
}

/// Hex SHA-256 of the password, kept in the record for out-of-band password
/// validation without a full decrypt.
pub fn password_hash(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Constant-time comparison of a candidate password against a stored hash.
pub fn verify_password_hash(password: &str, stored_hex: &str) -> bool {
    let candidate = Sha256::digest(password.as_bytes());
    let stored = match hex::decode(stored_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    candidate.as_slice().ct_eq(stored.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = derive_key("passphrase", b"", 1_000);
        let token = encrypt(&key, b"secret data").unwrap();
        assert_eq!(decrypt(&key, &token).unwrap(), b"secret data");
    }

    #[test]
    fn test_wrong_password_fails_auth() {
        let key = derive_key("correct", b"", 1_000);
        let other = derive_key("wrong", b"", 1_000);
        let token = encrypt(&key, b"secret data").unwrap();
        assert!(matches!(decrypt(&other, &token), Err(Error::AuthFail)));
    }

    #[test]
    fn test_tampered_ciphertext_fails_auth() {
        let key = derive_key("passphrase", b"", 1_000);
        let mut token = encrypt(&key, b"secret data").unwrap();
        let mut ct = hex::decode(&token.ct).unwrap();
        ct[4] ^= 0xff;
        token.ct = hex::encode(ct);
        assert!(matches!(decrypt(&key, &token), Err(Error::AuthFail)));
    }

    #[test]
    fn test_randomized_nonce() {
        let key = derive_key("passphrase", b"", 1_000);
        let a = encrypt(&key, b"same plaintext").unwrap();
        let b = encrypt(&key, b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_key_deterministic() {
        assert_eq!(derive_key("pw", b"", 2_000), derive_key("pw", b"", 2_000));
        assert_ne!(derive_key("pw", b"", 2_000), derive_key("pw", b"salt", 2_000));
    }

    #[test]
    fn test_password_hash_verify() {
        let stored = password_hash("hunter2");
        assert!(verify_password_hash("hunter2", &stored));
        assert!(!verify_password_hash("hunter3", &stored));
        assert!(!verify_password_hash("hunter2", "not-hex"));
    }
}
