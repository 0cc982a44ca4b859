//! Password encryption for the target platform login.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};
use thiserror::Error;

use crate::remote::{EncryptedSecret, PasswordKey};

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key component: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    Encrypt(#[from] rsa::Error),
}

fn decode_component(hex_str: &str) -> Result<BigUint, CryptoError> {
    let trimmed = hex_str.trim();
    let padded = if trimmed.len() % 2 == 1 {
        format!("0{}", trimmed)
    } else {
        trimmed.to_string()
    };
    let bytes = hex::decode(&padded).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    if bytes.is_empty() {
        return Err(CryptoError::InvalidKey("empty".to_string()));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}

/// RSA PKCS#1 v1.5 encrypt `secret` under `key`, base64 encoded.
pub fn encrypt_secret(key: &PasswordKey, secret: &str) -> Result<EncryptedSecret, CryptoError> {
    let modulus = decode_component(&key.modulus_hex)?;
    let exponent = decode_component(&key.exponent_hex)?;
    let public_key = RsaPublicKey::new(modulus, exponent)?;

    let mut rng = rsa::rand_core::OsRng;
    let ciphertext = public_key.encrypt(&mut rng, Pkcs1v15Encrypt, secret.as_bytes())?;

    Ok(EncryptedSecret {
        ciphertext_b64: STANDARD.encode(ciphertext),
        timestamp: key.timestamp.clone(),
    })
}
