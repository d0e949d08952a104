//! Credential encryption using AES-256-GCM.
//!
//! OAuth tokens are stored encrypted at rest. Each payload is laid out as
//! `version (1) | nonce (12) | ciphertext+tag`, and the owning account id is
//! bound in as additional authenticated data so a ciphertext copied onto a
//! different credential row fails to decrypt.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(ZeroizingKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt bytes using AES-256-GCM
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt bytes produced by [`encrypt_bytes`].
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }
    if !is_encrypted_payload(ciphertext) {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];
    debug_assert!(tag_and_ct.len() >= TAG_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

pub fn is_encrypted_payload(ciphertext: &[u8]) -> bool {
    ciphertext.len() >= MIN_ENCRYPTED_LEN && ciphertext[0] == VERSION_ENCRYPTED
}

fn credential_aad(account_id: i64) -> String {
    format!("crm-credential|{account_id}")
}

/// Encrypts one OAuth token for the credential row of `account_id`.
pub fn encrypt_token(key: &CryptoKey, account_id: i64, token: &str) -> Result<Vec<u8>, CryptoError> {
    encrypt_bytes(key, credential_aad(account_id).as_bytes(), token.as_bytes())
}

/// Decrypts a token previously stored with [`encrypt_token`].
pub fn decrypt_token(
    key: &CryptoKey,
    account_id: i64,
    ciphertext: &[u8],
) -> Result<String, CryptoError> {
    let bytes = decrypt_bytes(key, credential_aad(account_id).as_bytes(), ciphertext)?;
    String::from_utf8(bytes)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![7u8; 32]).expect("valid test key")
    }

    #[test]
    fn token_roundtrip_is_bound_to_account() {
        let key = test_key();
        let sealed = encrypt_token(&key, 31_000_001, "access-abc").expect("encrypts");

        assert!(is_encrypted_payload(&sealed));
        assert_eq!(
            decrypt_token(&key, 31_000_001, &sealed).expect("decrypts"),
            "access-abc"
        );
        assert!(decrypt_token(&key, 31_000_002, &sealed).is_err());
    }

    #[test]
    fn test_modified_ciphertext_fails() {
        let key = test_key();
        let mut encrypted = encrypt_bytes(&key, b"aad", b"secret message").expect("encrypts");
        encrypted[13] ^= 0x01;

        assert!(decrypt_bytes(&key, b"aad", &encrypted).is_err());
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key();
        let first = encrypt_bytes(&key, b"aad", b"secret").expect("encrypts");
        let second = encrypt_bytes(&key, b"aad", b"secret").expect("encrypts");

        assert_ne!(&first[1..13], &second[1..13]);
    }

    #[test]
    fn plaintext_payloads_are_rejected() {
        let key = test_key();

        assert!(matches!(
            decrypt_bytes(&key, b"aad", b"plain-token"),
            Err(CryptoError::InvalidFormat)
        ));
        assert!(matches!(
            decrypt_bytes(&key, b"aad", b""),
            Err(CryptoError::EmptyCiphertext)
        ));
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert!(matches!(
            CryptoKey::new(vec![0u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        ));
        assert!(CryptoKey::new(vec![0u8; 64]).is_err());
    }
}
