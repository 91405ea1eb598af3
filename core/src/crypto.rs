//! Password-based encryption
//!
//! AES-256-GCM with Argon2id key derivation. Used for locked notes and
//! for backup archives. Every seal draws a fresh salt and nonce.

use crate::error::{AppError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher};
use rand::rngs::OsRng;
use rand::RngCore;

const NONCE_SIZE: usize = 12; // 96 bits for GCM
const SALT_SIZE: usize = 16; // 128 bits
const KEY_SIZE: usize = 32;

/// Encrypted data container
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EncryptedData {
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Encrypt data with AES-256-GCM
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<EncryptedData> {
    let mut salt = vec![0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);

    let key = derive_key(password, &salt)?;

    let mut nonce_bytes = vec![0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| AppError::Generic(format!("Cipher initialization failed: {}", e)))?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| AppError::Generic(format!("Encryption failed: {}", e)))?;

    Ok(EncryptedData {
        salt,
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypt data with AES-256-GCM.
///
/// A wrong password and tampered data are indistinguishable here; both
/// surface as `AppError::InvalidPassword`.
pub fn decrypt(encrypted: &EncryptedData, password: &str) -> Result<Vec<u8>> {
    if encrypted.nonce.len() != NONCE_SIZE {
        return Err(AppError::Generic("Malformed nonce".to_string()));
    }

    let key = derive_key(password, &encrypted.salt)?;

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| AppError::Generic(format!("Cipher initialization failed: {}", e)))?;

    cipher
        .decrypt(Nonce::from_slice(&encrypted.nonce), encrypted.ciphertext.as_ref())
        .map_err(|_| AppError::InvalidPassword)
}

/// Seal a UTF-8 string
pub fn seal_text(text: &str, password: &str) -> Result<EncryptedData> {
    encrypt(text.as_bytes(), password)
}

/// Open a sealed UTF-8 string
pub fn open_text(sealed: &EncryptedData, password: &str) -> Result<String> {
    let bytes = decrypt(sealed, password)?;
    String::from_utf8(bytes)
        .map_err(|e| AppError::Generic(format!("Sealed text is not UTF-8: {}", e)))
}

/// Derive a 256-bit key from password using Argon2id
fn derive_key(password: &str, salt: &[u8]) -> Result<Vec<u8>> {
    let salt_string = SaltString::encode_b64(salt)
        .map_err(|e| AppError::Generic(format!("Salt encoding failed: {}", e)))?;

    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt_string)
        .map_err(|e| AppError::Generic(format!("Key derivation failed: {}", e)))?;

    let hash = password_hash
        .hash
        .ok_or_else(|| AppError::Generic("No hash generated".to_string()))?;

    let key_bytes = hash.as_bytes();
    if key_bytes.len() < KEY_SIZE {
        return Err(AppError::Generic("Derived key too short".to_string()));
    }

    Ok(key_bytes[..KEY_SIZE].to_vec())
}
