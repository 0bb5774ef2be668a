// End-to-end handshake test: drives a real `PtlsSession` (the client role)
// against a hand-written "fake device" task that plays the other half of
// the protocol using the same crypto primitives the crate exposes.

use ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};

use ptls::crypto::{self, EphemeralKeyPair, IdentityKeyPair, Transcript};
use ptls::handshake::messages::tag;
use ptls::transport::mock::MockTransport;
use ptls::PtlsSession;

fn push_len_prefixed(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u16).to_be_bytes());
    out.extend_from_slice(field);
}

/// Runs the device side of one handshake against a `MockTransport`'s
/// client-facing channel ends, then echoes one application-data message.
async fn run_fake_device(
    mut handles: ptls::transport::mock::MockTransportHandles,
    device_identity: SigningKey,
) {
    let device_eph = EphemeralKeyPair::generate();
    let mut transcript = Transcript::new();

    // -- hello exchange --
    let client_frame = handles.handshake_out.recv().await.unwrap();
    assert_eq!(client_frame[0] & 0x0F, tag::HELLO);
    let client_hello_payload = client_frame[1..].to_vec();
    transcript.update(&client_hello_payload);

    let client_eph_pub = &client_hello_payload[35..100];

    let mut server_hello_payload = vec![0u8; 35];
    server_hello_payload[0] = ptls::handshake::messages::PROTOCOL_VERSION;
    server_hello_payload[1] = 200;
    server_hello_payload.extend_from_slice(&device_eph.public_key_bytes());
    transcript.update(&server_hello_payload);
    let hello_hash = transcript.snapshot();

    let shared_secret = device_eph.diffie_hellman(client_eph_pub).unwrap();

    let mut server_hello_frame = vec![tag::HELLO];
    server_hello_frame.extend_from_slice(&server_hello_payload);
    handles.handshake_in.send(server_hello_frame).unwrap();

    // -- server verify --
    let auth_frame = handles.handshake_out.recv().await.unwrap();
    assert_eq!(auth_frame[0] & 0x0F, tag::SERVER_VERIFY);
    let auth_data = auth_frame[1..].to_vec();

    let mut sig_transcript = transcript.clone();
    sig_transcript.update(&(auth_data.len() as u16).to_be_bytes());
    sig_transcript.update(&auth_data);
    let sig_digest = sig_transcript.snapshot();
    let signature: Signature = device_identity.sign_prehash(&sig_digest).unwrap();
    let signature_der = signature.to_der().as_bytes().to_vec();

    let mut body = Vec::new();
    push_len_prefixed(&mut body, &auth_data);
    push_len_prefixed(&mut body, &signature_der);
    push_len_prefixed(&mut body, &hello_hash);
    transcript.update(&body);

    let srv_keys = crypto::derive_keys(&shared_secret, "ptlss hs traffic", &hello_hash).unwrap();
    let encrypted = crypto::aes_gcm_128_encrypt(&srv_keys.key, &srv_keys.iv, &body, b"").unwrap();
    let mut frame = vec![tag::SERVER_VERIFY];
    frame.extend_from_slice(&encrypted);
    handles.handshake_in.send(frame).unwrap();

    // -- client verify --
    let part1 = handles.handshake_out.recv().await.unwrap();
    assert_eq!(part1[0] & 0x0F, tag::CLIENT_VERIFY_I);
    let part2 = handles.handshake_out.recv().await.unwrap();
    assert_eq!(part2[0] & 0x0F, tag::CLIENT_VERIFY_II);

    let mut encrypted_payload = part1[1..].to_vec();
    encrypted_payload.extend_from_slice(&part2[1..]);

    let cli_keys = crypto::derive_keys(&shared_secret, "ptlsc hs traffic", &hello_hash).unwrap();
    let payload = crypto::aes_gcm_128_decrypt(&cli_keys.key, &cli_keys.iv, &encrypted_payload, b"").unwrap();
    transcript.update(&payload);

    // -- initialized --
    let finished_hash = transcript.snapshot();
    let session_id = [0x11, 0x22, 0x33, 0x44];
    let mut frame = vec![tag::INITIALIZED];
    frame.extend_from_slice(&session_id);
    handles.handshake_in.send(frame).unwrap();

    // -- one application round trip, client -> device -> client --
    let send_keys = crypto::derive_keys(&shared_secret, "ptlsc ap traffic", &finished_hash).unwrap();
    let recv_keys = crypto::derive_keys(&shared_secret, "ptlss ap traffic", &finished_hash).unwrap();

    let client_record = handles.command_out.recv().await.unwrap();
    assert_eq!(client_record[0], tag::DATA_ENCRYPTED);
    let nonce = crypto::make_nonce(&send_keys.iv, 0);
    let plaintext = crypto::aes_gcm_128_decrypt(&send_keys.key, &nonce, &client_record[1..], b"").unwrap();
    assert_eq!(plaintext, b"ping");

    let nonce = crypto::make_nonce(&recv_keys.iv, 0);
    let reply = crypto::aes_gcm_128_encrypt(&recv_keys.key, &nonce, b"pong", b"").unwrap();
    let mut reply_frame = vec![tag::DATA_ENCRYPTED];
    reply_frame.extend_from_slice(&reply);
    handles.notification_in.send(reply_frame).unwrap();
}

#[tokio::test]
async fn full_handshake_and_one_round_trip() {
    let device_identity = SigningKey::random(&mut rand::thread_rng());
    let device_public_key: VerifyingKey = *device_identity.verifying_key();

    let (transport, handles) = MockTransport::new(200);
    let device_task = tokio::spawn(run_fake_device(handles, device_identity));

    let client_identity = IdentityKeyPair::generate();
    let session = PtlsSession::new(transport, client_identity, b"fake-cert-bytes".to_vec(), device_public_key);

    session.handshake().await.expect("handshake should succeed");
    assert!(session.is_established());
    assert_eq!(session.session_id(), Some([0x11, 0x22, 0x33, 0x44]));

    let record = session.encrypt(b"ping").unwrap();
    session.transport().write_command(&record).await.unwrap();

    let notification = session.transport().read_notification().await.unwrap();
    let plaintext = session.decrypt(&notification).await.unwrap();
    assert_eq!(plaintext, b"pong");

    device_task.await.unwrap();
}

#[tokio::test]
async fn wrong_device_key_fails_server_verify() {
    let device_identity = SigningKey::random(&mut rand::thread_rng());
    let wrong_public_key: VerifyingKey = *SigningKey::random(&mut rand::thread_rng()).verifying_key();

    let (transport, handles) = MockTransport::new(200);
    tokio::spawn(run_fake_device(handles, device_identity));

    let client_identity = IdentityKeyPair::generate();
    let session = PtlsSession::new(transport, client_identity, b"fake-cert-bytes".to_vec(), wrong_public_key);

    let result = session.handshake().await;
    assert!(result.is_err());
}
