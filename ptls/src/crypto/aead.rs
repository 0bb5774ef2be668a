// AES-GCM-128 record encryption. PTLS fixes the suite; there is no
// negotiation, so this module is a thin pair of free functions rather
// than a cipher-suite enum.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Nonce};

use crate::error::{PtlsError, Result};

/// Encrypt `plaintext` with AES-GCM-128 under `key`/`nonce`, with `aad` as
/// associated data. Returns ciphertext with the 16-byte tag appended.
pub fn aes_gcm_128_encrypt(
    key: &[u8; 16],
    nonce: &[u8; 12],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes128Gcm::new_from_slice(key)
        .map_err(|e| PtlsError::Encryption(format!("cipher init: {e}")))?;
    let nonce = Nonce::from_slice(nonce);
    cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| PtlsError::Encryption(e.to_string()))
}

/// Decrypt `ciphertext` (tag appended) with AES-GCM-128 under `key`/`nonce`
/// and the same `aad` used during encryption.
pub fn aes_gcm_128_decrypt(
    key: &[u8; 16],
    nonce: &[u8; 12],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes128Gcm::new_from_slice(key)
        .map_err(|e| PtlsError::Decryption(format!("cipher init: {e}")))?;
    let nonce = Nonce::from_slice(nonce);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|e| PtlsError::Decryption(e.to_string()))
}
