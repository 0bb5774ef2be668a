// ECDH P-256 key exchange for the ephemeral handshake keys.

use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::{PtlsError, Result};

/// An ephemeral P-256 keypair used for one handshake's ECDH exchange.
pub struct EphemeralKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a new random ephemeral keypair.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// The public key as a 65-byte uncompressed SEC1 point (0x04 || X || Y).
    pub fn public_key_bytes(&self) -> [u8; 65] {
        let point = self.public.to_encoded_point(false);
        let mut out = [0u8; 65];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Perform ECDH with a peer's uncompressed SEC1 public key, returning
    /// the raw 32-byte X-coordinate shared secret. Zeroized on drop — this
    /// is the one secret PTLS holds as a plain byte array rather than a
    /// RustCrypto key type that already zeroizes itself.
    pub fn diffie_hellman(&self, peer_public_bytes: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let peer_public = PublicKey::from_sec1_bytes(peer_public_bytes)
            .map_err(|e| PtlsError::InvalidKey(format!("peer ECDH point: {e}")))?;
        let shared = diffie_hellman(self.secret.to_nonzero_scalar(), peer_public.as_affine());
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(out)
    }
}
