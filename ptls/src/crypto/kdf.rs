// Key derivation and nonce construction for the PTLS record layer.
//
// PTLS derives traffic keys with direct HMAC-SHA256 rather than a full
// HKDF schedule:
//
//   HMAC-SHA256(shared_secret, label || transcript_hash)
//     -> first 16 bytes = AES-GCM-128 key
//     -> next 12 bytes  = AES-GCM-128 IV base
//
// The four labels in use are "ptlss hs traffic" / "ptlsc hs traffic" for
// the handshake-phase keys and "ptlsc ap traffic" / "ptlss ap traffic" for
// the application-phase (post-handshake) keys.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{PtlsError, Result};

type HmacSha256 = Hmac<Sha256>;

/// A derived AES-GCM-128 key and base IV.
pub struct TrafficKeys {
    pub key: [u8; 16],
    pub iv: [u8; 12],
}

/// Derive a traffic key/IV pair from the ECDH shared secret, a direction
/// label, and a transcript-hash snapshot.
pub fn derive_keys(shared_secret: &[u8; 32], label: &str, transcript_hash: &[u8]) -> Result<TrafficKeys> {
    let mut mac = HmacSha256::new_from_slice(shared_secret)
        .map_err(|e| PtlsError::KeyDerivation(format!("hmac key: {e}")))?;
    mac.update(label.as_bytes());
    mac.update(transcript_hash);
    let material = mac.finalize().into_bytes();

    let mut key = [0u8; 16];
    let mut iv = [0u8; 12];
    key.copy_from_slice(&material[0..16]);
    iv.copy_from_slice(&material[16..28]);
    Ok(TrafficKeys { key, iv })
}

/// Construct the per-message nonce by XORing a big-endian 16-bit counter
/// into the last two bytes of the base IV.
pub fn make_nonce(base_iv: &[u8; 12], counter: u16) -> [u8; 12] {
    let mut iv = *base_iv;
    iv[10] ^= (counter >> 8) as u8;
    iv[11] ^= (counter & 0xFF) as u8;
    iv
}

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Incremental SHA-256 transcript hash, snapshot-able without consuming
/// the running state (mirrors the client's running-digest-copy use during
/// the handshake).
#[derive(Clone, Default)]
pub struct Transcript(Sha256);

impl Transcript {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Digest of everything fed so far, without consuming the running hasher.
    pub fn snapshot(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0.clone().finalize());
        out
    }
}
