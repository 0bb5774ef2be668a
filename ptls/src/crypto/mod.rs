//! Cryptographic primitives used by the PTLS handshake and record layer.

pub mod aead;
pub mod ecdh;
pub mod ecdsa;
pub mod kdf;

pub use aead::{aes_gcm_128_decrypt, aes_gcm_128_encrypt};
pub use ecdh::EphemeralKeyPair;
pub use ecdsa::{
    ecdsa_sign, ecdsa_verify, ecdsa_verify_prehashed, verifying_key_from_sec1_bytes,
    IdentityKeyPair,
};
pub use kdf::{derive_keys, make_nonce, sha256, Transcript, TrafficKeys};
