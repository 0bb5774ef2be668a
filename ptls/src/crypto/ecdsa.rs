//! ECDSA P-256 signing and verification, including the prehashed variant
//! the server-verify step requires: the signed payload there is already a
//! SHA-256 digest of the transcript, not raw message bytes.

use ecdsa::signature::hazmat::PrehashVerifier;
use ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;

use crate::error::{PtlsError, Result};

/// A long-lived ECDSA P-256 identity keypair (the device's persisted
/// long-term key).
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a fresh random P-256 identity keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Reconstruct from a PKCS#8 DER-encoded private key.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_pkcs8_der(der)
            .map_err(|e| PtlsError::InvalidKey(format!("pkcs8: {e}")))?;
        Ok(Self { signing_key })
    }

    /// The corresponding public key.
    pub fn verifying_key(&self) -> VerifyingKey {
        *self.signing_key.verifying_key()
    }

    /// Sign `data` with ECDSA-P256/SHA-256, returning a DER-encoded signature.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let sig: Signature = self.signing_key.sign(data);
        sig.to_der().as_bytes().to_vec()
    }
}

/// Sign `data` with ECDSA-P256/SHA-256 using a raw private key, returning a
/// DER-encoded signature. Free-function form used where no `IdentityKeyPair`
/// is in scope.
pub fn ecdsa_sign(signing_key: &SigningKey, data: &[u8]) -> Vec<u8> {
    let sig: Signature = signing_key.sign(data);
    sig.to_der().as_bytes().to_vec()
}

/// Verify an ECDSA-P256/SHA-256 signature over `data`.
pub fn ecdsa_verify(public_key: &VerifyingKey, der_signature: &[u8], data: &[u8]) -> Result<()> {
    let sig = Signature::from_der(der_signature)
        .map_err(|e| PtlsError::InvalidKey(format!("signature der: {e}")))?;
    public_key
        .verify(data, &sig)
        .map_err(|_| PtlsError::SignatureVerification)
}

/// Verify an ECDSA-P256 signature over a 32-byte SHA-256 digest directly,
/// without re-hashing `digest`. The signed message is itself a SHA-256
/// digest of the transcript-so-far.
pub fn ecdsa_verify_prehashed(
    public_key: &VerifyingKey,
    der_signature: &[u8],
    digest: &[u8; 32],
) -> Result<()> {
    let sig = Signature::from_der(der_signature)
        .map_err(|e| PtlsError::InvalidKey(format!("signature der: {e}")))?;
    public_key
        .verify_prehash(digest, &sig)
        .map_err(|_| PtlsError::SignatureVerification)
}

/// Parse a DER-encoded ECDSA P-256 public key (SubjectPublicKeyInfo) or a
/// raw 65-byte uncompressed SEC1 point, whichever the caller holds.
pub fn verifying_key_from_sec1_bytes(bytes: &[u8]) -> Result<VerifyingKey> {
    VerifyingKey::from_sec1_bytes(bytes)
        .map_err(|e| PtlsError::InvalidKey(format!("sec1 point: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let kp = IdentityKeyPair::generate();
        let msg = b"ptls client verify payload";
        let sig = kp.sign(msg);
        ecdsa_verify(&kp.verifying_key(), &sig, msg).unwrap();
    }

    #[test]
    fn verify_wrong_message_fails() {
        let kp = IdentityKeyPair::generate();
        let sig = kp.sign(b"correct message");
        assert!(ecdsa_verify(&kp.verifying_key(), &sig, b"wrong message").is_err());
    }

    #[test]
    fn prehashed_roundtrip() {
        let kp = IdentityKeyPair::generate();
        let digest = crate::crypto::sha256(b"transcript bytes");
        let sig = ecdsa_sign(&SigningKey::from(&kp.signing_key), &digest);
        ecdsa_verify_prehashed(&kp.verifying_key(), &sig, &digest).unwrap();
    }

    #[test]
    fn prehashed_wrong_digest_fails() {
        let kp = IdentityKeyPair::generate();
        let digest = crate::crypto::sha256(b"transcript bytes");
        let other = crate::crypto::sha256(b"different bytes");
        let sig = ecdsa_sign(&SigningKey::from(&kp.signing_key), &digest);
        assert!(ecdsa_verify_prehashed(&kp.verifying_key(), &sig, &other).is_err());
    }
}
