// PTLS cryptographic primitive benchmarks.
//
// Measures:
//   - ECDH P-256 key generation and agreement
//   - ECDSA P-256 sign / verify (including prehashed verify)
//   - AES-GCM-128 encrypt / decrypt at various payload sizes
//   - Handshake key-schedule derivation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};

use ptls::crypto::{
    aes_gcm_128_decrypt, aes_gcm_128_encrypt, derive_keys, ecdsa_verify, ecdsa_verify_prehashed,
    sha256, EphemeralKeyPair, IdentityKeyPair,
};

fn bench_ecdh(c: &mut Criterion) {
    c.bench_function("ecdh_p256_keygen", |b| {
        b.iter(|| {
            black_box(EphemeralKeyPair::generate());
        });
    });

    let alice = EphemeralKeyPair::generate();
    let bob_pub = EphemeralKeyPair::generate().public_key_bytes();
    c.bench_function("ecdh_p256_agree", |b| {
        b.iter(|| {
            black_box(alice.diffie_hellman(black_box(&bob_pub)).unwrap());
        });
    });
}

fn bench_ecdsa(c: &mut Criterion) {
    let kp = IdentityKeyPair::generate();
    let message = b"PTLS benchmark message for ECDSA P-256 sign/verify throughput";

    c.bench_function("ecdsa_p256_sign", |b| {
        b.iter(|| {
            black_box(kp.sign(black_box(message)));
        });
    });

    let sig = kp.sign(message);
    c.bench_function("ecdsa_p256_verify", |b| {
        b.iter(|| {
            black_box(ecdsa_verify(&kp.verifying_key(), black_box(&sig), black_box(message)).unwrap());
        });
    });

    let signing_key = SigningKey::random(&mut rand::thread_rng());
    let verifying_key = *signing_key.verifying_key();
    let digest = sha256(message);
    let prehashed_sig: Signature = signing_key.sign_prehash(&digest).unwrap();
    let prehashed_der = prehashed_sig.to_der().as_bytes().to_vec();

    c.bench_function("ecdsa_p256_verify_prehashed", |b| {
        b.iter(|| {
            black_box(
                ecdsa_verify_prehashed(&verifying_key, black_box(&prehashed_der), black_box(&digest))
                    .unwrap(),
            );
        });
    });
}

fn bench_aes_gcm_128(c: &mut Criterion) {
    let key = [0x42u8; 16];
    let nonce = [0u8; 12];

    let sizes: &[usize] = &[64, 1024, 64 * 1024, 1024 * 1024];

    let mut group = c.benchmark_group("aes_gcm_128_encrypt");
    for &size in sizes {
        let plaintext = vec![0xABu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(format!("{size}B")), &plaintext, |b, pt| {
            b.iter(|| {
                black_box(aes_gcm_128_encrypt(&key, &nonce, black_box(pt), b"").unwrap());
            });
        });
    }
    group.finish();

    let mut group = c.benchmark_group("aes_gcm_128_decrypt");
    for &size in sizes {
        let plaintext = vec![0xABu8; size];
        let ciphertext = aes_gcm_128_encrypt(&key, &nonce, &plaintext, b"").unwrap();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(format!("{size}B")), &ciphertext, |b, ct| {
            b.iter(|| {
                black_box(aes_gcm_128_decrypt(&key, &nonce, black_box(ct), b"").unwrap());
            });
        });
    }
    group.finish();
}

fn bench_key_schedule(c: &mut Criterion) {
    let secret = [7u8; 32];
    let hash = sha256(b"benchmark transcript state");

    c.bench_function("derive_keys", |b| {
        b.iter(|| {
            black_box(derive_keys(black_box(&secret), "ptlsc ap traffic", black_box(&hash)).unwrap());
        });
    });
}

criterion_group! {
    name = crypto_benches;
    config = Criterion::default()
        .sample_size(100)
        .measurement_time(Duration::from_secs(5));
    targets =
        bench_ecdh,
        bench_ecdsa,
        bench_aes_gcm_128,
        bench_key_schedule
}

criterion_main!(crypto_benches);
