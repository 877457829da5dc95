//! Encryption-at-rest for session files.
//!
//! One sealed payload per file: a JSON envelope carrying the scrypt salt,
//! the AEAD nonce, and the ciphertext. The key is derived from the
//! operator-configured `session_key` secret, never stored.

use aes_gcm_siv::aead::{Aead, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;
use scrypt::{Params as ScryptParams, scrypt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
/// Domain-separation label mixed into derived key material.
const KEY_CONTEXT: &str = "chatgate-session-seal-v1";
const SEALED_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("failed to derive session key: {0}")]
    KeyDerivation(String),
    #[error("failed to seal session payload")]
    Encrypt,
    #[error("failed to open session payload")]
    Decrypt,
    #[error("invalid sealed envelope field `{field}`")]
    Envelope { field: &'static str },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedEnvelope {
    pub version: u32,
    /// Base64-encoded scrypt salt.
    pub salt: String,
    /// Base64-encoded AEAD nonce.
    pub nonce: String,
    /// Base64-encoded ciphertext.
    pub ciphertext: String,
}

/// Detect whether file bytes are a sealed envelope rather than a plaintext
/// bundle.
pub fn looks_sealed(value: &serde_json::Value) -> bool {
    value.get("ciphertext").is_some() && value.get("salt").is_some()
}

pub fn seal(secret: &str, plaintext: &[u8]) -> Result<SealedEnvelope, SealError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    let key = derive_key(secret, &salt)?;

    let cipher = Aes256GcmSiv::new_from_slice(&key).map_err(|_| SealError::Encrypt)?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| SealError::Encrypt)?;

    Ok(SealedEnvelope {
        version: SEALED_VERSION,
        salt: B64.encode(salt),
        nonce: B64.encode(nonce),
        ciphertext: B64.encode(ciphertext),
    })
}

pub fn open(secret: &str, envelope: &SealedEnvelope) -> Result<Vec<u8>, SealError> {
    let salt = decode_fixed::<SALT_LEN>(&envelope.salt, "salt")?;
    let nonce = decode_fixed::<NONCE_LEN>(&envelope.nonce, "nonce")?;
    let ciphertext = B64
        .decode(&envelope.ciphertext)
        .map_err(|_| SealError::Envelope {
            field: "ciphertext",
        })?;

    let key = derive_key(secret, &salt)?;
    let cipher = Aes256GcmSiv::new_from_slice(&key).map_err(|_| SealError::Decrypt)?;
    cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| SealError::Decrypt)
}

fn derive_key(secret: &str, salt: &[u8; SALT_LEN]) -> Result<[u8; KEY_LEN], SealError> {
    let mut hasher = Sha256::new();
    hasher.update(KEY_CONTEXT.as_bytes());
    hasher.update(secret.as_bytes());
    let seed = hasher.finalize();

    let params = ScryptParams::recommended();
    let mut key = [0u8; KEY_LEN];
    scrypt(&seed, salt, &params, &mut key)
        .map_err(|err| SealError::KeyDerivation(err.to_string()))?;
    Ok(key)
}

fn decode_fixed<const N: usize>(value: &str, field: &'static str) -> Result<[u8; N], SealError> {
    let bytes = B64
        .decode(value)
        .map_err(|_| SealError::Envelope { field })?;
    if bytes.len() != N {
        return Err(SealError::Envelope { field });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}
