//! Credential cipher: AES-256-GCM over subkeys derived from the
//! application secret.
//!
//! Two subkeys are derived with Argon2id under distinct domain-separation
//! salts: one for encrypting credential blobs at rest, one handed to the
//! token service for HMAC signing. Leaking a derived key requires the full
//! KDF work factor on top of leaking the raw secret.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};

use crate::error::AppError;

const CIPHER_KEY_SALT: &[u8] = b"tenancy/credential-cipher/v1";
const SIGNING_KEY_SALT: &[u8] = b"tenancy/token-signing/v1";

const NONCE_LEN: usize = 12;

/// Symmetric authenticated cipher for opaque credential blobs.
///
/// Ciphertext format: `base64(nonce || ciphertext || tag)`. A fresh random
/// nonce is drawn per call, so encrypting the same plaintext twice yields
/// distinct ciphertexts.
pub struct CredentialCipher {
    key: [u8; 32],
}

impl CredentialCipher {
    pub fn from_secret(app_secret: &Secret<String>) -> Result<Self, AppError> {
        let key = derive_subkey(app_secret, CIPHER_KEY_SALT)?;
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("AES-GCM encryption failed")))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined))
    }

    /// Decrypt a credential blob. Tampering, truncation, and a wrong key
    /// all surface as the same `Decryption` error.
    pub fn decrypt(&self, encoded: &str) -> Result<Secret<String>, AppError> {
        let combined = STANDARD.decode(encoded).map_err(|_| AppError::Decryption)?;

        if combined.len() <= NONCE_LEN {
            return Err(AppError::Decryption);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AppError::Decryption)?;

        String::from_utf8(plaintext)
            .map(Secret::new)
            .map_err(|_| AppError::Decryption)
    }
}

/// Derive the token-signing subkey from the application secret.
pub fn derive_signing_key(app_secret: &Secret<String>) -> Result<Secret<Vec<u8>>, AppError> {
    let key = derive_subkey(app_secret, SIGNING_KEY_SALT)?;
    Ok(Secret::new(key.to_vec()))
}

fn derive_subkey(app_secret: &Secret<String>, salt: &[u8]) -> Result<[u8; 32], AppError> {
    let mut out = [0u8; 32];
    Argon2::default()
        .hash_password_into(app_secret.expose_secret().as_bytes(), salt, &mut out)
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("key derivation failed: {}", e)))?;
    Ok(out)
}
