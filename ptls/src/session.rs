//! The PTLS handshake driver and record layer.
//!
//! `PtlsSession` owns one connection's cryptographic state: it runs the
//! four-phase handshake over a [`Transport`], then exposes `encrypt`/
//! `decrypt` for the application-data phase. The receive path is guarded
//! by an async mutex because command-response decryption and notification
//! decryption both consume the same receive counter and must not race.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use p256::ecdsa::VerifyingKey;
use rand::RngCore;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::{self, EphemeralKeyPair, IdentityKeyPair, Transcript};
use crate::error::{PtlsError, Result};
use crate::handshake::messages::{self, tag, ClientHello, ClientVerifyPayload, ServerHello, ServerVerifyPayload};
use crate::transport::Transport;

/// A record counter is never allowed to exceed this value; the per-message
/// nonce only has 16 bits of room to vary the base IV.
const MAX_COUNTER: u32 = u16::MAX as u32;

struct SendState {
    key: [u8; 16],
    iv: [u8; 12],
    counter: u32,
}

struct RecvState {
    key: [u8; 16],
    iv: [u8; 12],
    counter: u32,
}

/// One PTLS secure session with a device.
pub struct PtlsSession<T: Transport> {
    transport: T,
    identity: IdentityKeyPair,
    device_public_key: VerifyingKey,
    certificate: Vec<u8>,
    established: AtomicBool,
    session_id: StdMutex<Option<[u8; 4]>>,
    send: StdMutex<Option<SendState>>,
    recv: AsyncMutex<Option<RecvState>>,
}

impl<T: Transport> PtlsSession<T> {
    /// Build a session that has not yet performed its handshake.
    ///
    /// `identity` is this client's own ECDSA keypair, `certificate` is the
    /// DER mobile certificate issued for it by the cloud API, and
    /// `device_public_key` is the device's pinned long-term public key.
    pub fn new(transport: T, identity: IdentityKeyPair, certificate: Vec<u8>, device_public_key: VerifyingKey) -> Self {
        Self {
            transport,
            identity,
            device_public_key,
            certificate,
            established: AtomicBool::new(false),
            session_id: StdMutex::new(None),
            send: StdMutex::new(None),
            recv: AsyncMutex::new(None),
        }
    }

    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Option<[u8; 4]> {
        *self.session_id.lock().unwrap()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the full four-phase handshake: hello exchange, server verify,
    /// client verify, then wait for the initialized confirmation.
    pub async fn handshake(&self) -> Result<()> {
        info!("starting PTLS handshake");

        let mut transcript = Transcript::new();
        let ephemeral = EphemeralKeyPair::generate();

        let (shared_secret, hello_hash, client_hello_bytes, server_hello) =
            self.hello_exchange(&ephemeral, &mut transcript).await?;
        info!("hello exchange complete");

        let (auth_data, server_signature) = self
            .server_verify(&shared_secret, &hello_hash, &mut transcript)
            .await?;
        info!("server verification complete");

        self.client_verify(
            &shared_secret,
            &hello_hash,
            &client_hello_bytes,
            &server_hello,
            &auth_data,
            &server_signature,
            &mut transcript,
        )
        .await?;
        info!("client verification complete");

        self.wait_initialized(&shared_secret, &transcript).await?;
        info!(session_id = ?self.session_id(), "PTLS session established");

        Ok(())
    }

    async fn hello_exchange(
        &self,
        ephemeral: &EphemeralKeyPair,
        transcript: &mut Transcript,
    ) -> Result<(
        Zeroizing<[u8; 32]>,
        [u8; 32],
        Vec<u8>,
        ServerHello,
    )> {
        let mtu = self.transport.peer_mtu().min(255) as u8;
        let mut random = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut random);

        let client_hello = ClientHello {
            mtu,
            random,
            ephemeral_public: ephemeral.public_key_bytes(),
        };
        let client_hello_bytes = client_hello.encode();
        transcript.update(&client_hello_bytes);

        let mut frame = Vec::with_capacity(1 + client_hello_bytes.len());
        frame.push(tag::HELLO);
        frame.extend_from_slice(&client_hello_bytes);
        self.transport.write_handshake(&frame).await?;

        let response = self.transport.read_handshake().await?;
        messages::reject_alert(&response)?;
        let got_tag = messages::peek_tag(&response)?;
        if got_tag != tag::HELLO {
            return Err(PtlsError::UnexpectedMessage { expected: tag::HELLO, got: got_tag });
        }

        let server_hello_payload = &response[1..];
        let server_hello = ServerHello::decode(server_hello_payload)?;
        debug!(version = server_hello.version, mtu = server_hello.mtu, "server hello received");

        transcript.update(server_hello_payload);
        let hello_hash = transcript.snapshot();

        let shared_secret = ephemeral.diffie_hellman(&server_hello.ephemeral_public)?;
        debug!("ECDH shared secret computed");

        Ok((shared_secret, hello_hash, client_hello_bytes, server_hello))
    }

    async fn server_verify(
        &self,
        shared_secret: &[u8; 32],
        hello_hash: &[u8; 32],
        transcript: &mut Transcript,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let auth_data = current_time_millis_be();

        let mut frame = Vec::with_capacity(1 + auth_data.len());
        frame.push(tag::SERVER_VERIFY);
        frame.extend_from_slice(&auth_data);
        self.transport.write_handshake(&frame).await?;

        let srv_keys = crypto::derive_keys(shared_secret, "ptlss hs traffic", hello_hash)?;

        let response = self.transport.read_handshake().await?;
        messages::reject_alert(&response)?;
        let got_tag = messages::peek_tag(&response)?;
        if got_tag != tag::SERVER_VERIFY {
            return Err(PtlsError::UnexpectedMessage { expected: tag::SERVER_VERIFY, got: got_tag });
        }

        let decrypted = crypto::aes_gcm_128_decrypt(&srv_keys.key, &srv_keys.iv, &response[1..], b"")
            .map_err(|e| PtlsError::ServerVerifyFailed(format!("decrypt: {e}")))?;
        debug!(len = decrypted.len(), "server verify decrypted");

        let parsed = ServerVerifyPayload::decode(&decrypted)?;

        if parsed.auth_data != auth_data {
            return Err(PtlsError::ServerVerifyFailed("auth_data mismatch".into()));
        }
        if parsed.hello_hash != hello_hash {
            return Err(PtlsError::ServerVerifyFailed("hello_hash mismatch".into()));
        }

        let mut sig_transcript = transcript.clone();
        sig_transcript.update(&(parsed.auth_data.len() as u16).to_be_bytes());
        sig_transcript.update(&parsed.auth_data);
        let sig_digest = sig_transcript.snapshot();

        crypto::ecdsa_verify_prehashed(&self.device_public_key, &parsed.signature, &sig_digest)
            .map_err(|_| PtlsError::ServerVerifyFailed("signature verification failed".into()))?;

        transcript.update(&decrypted);
        debug!("server verification passed");

        Ok((parsed.auth_data, parsed.signature))
    }

    #[allow(clippy::too_many_arguments)]
    async fn client_verify(
        &self,
        shared_secret: &[u8; 32],
        hello_hash: &[u8; 32],
        client_hello_bytes: &[u8],
        server_hello: &ServerHello,
        server_auth_data: &[u8],
        server_signature: &[u8],
        transcript: &mut Transcript,
    ) -> Result<()> {
        let hello_verify_hash = transcript.snapshot();

        // client_hello_bytes = [header(3) || random(32)] || ephemeral_public(65) || encrypted_random(48) || session_id_cache(4)
        let client_random_data = &client_hello_bytes[0..35];
        let client_ecdh_pub = &client_hello_bytes[35..100];
        let encrypted_random = &client_hello_bytes[100..148];
        let session_id_cache = &client_hello_bytes[148..152];

        let mut sign_data = Vec::new();
        sign_data.extend_from_slice(client_random_data);
        sign_data.extend_from_slice(client_ecdh_pub);
        sign_data.extend_from_slice(encrypted_random);
        sign_data.extend_from_slice(session_id_cache);
        sign_data.extend_from_slice(&server_hello.random);
        sign_data.extend_from_slice(&server_hello.ephemeral_public);
        push_len_prefixed(&mut sign_data, server_auth_data);
        push_len_prefixed(&mut sign_data, server_signature);
        push_len_prefixed(&mut sign_data, hello_hash);
        push_len_prefixed(&mut sign_data, &self.certificate);

        let signature = self.identity.sign(&sign_data);

        let payload = ClientVerifyPayload {
            certificate: &self.certificate,
            signature: &signature,
            hello_verify_hash: &hello_verify_hash,
        }
        .encode();

        transcript.update(&payload);

        let cli_keys = crypto::derive_keys(shared_secret, "ptlsc hs traffic", hello_hash)?;
        let encrypted = crypto::aes_gcm_128_encrypt(&cli_keys.key, &cli_keys.iv, &payload, b"")?;

        let mtu = (server_hello.mtu as usize).saturating_sub(1).max(1);
        if encrypted.len() <= mtu {
            let mut part1 = Vec::with_capacity(1 + encrypted.len());
            part1.push(tag::CLIENT_VERIFY_I);
            part1.extend_from_slice(&encrypted);
            self.transport.write_handshake(&part1).await?;
            self.transport.write_handshake(&[tag::CLIENT_VERIFY_II]).await?;
        } else {
            let (head, tail) = encrypted.split_at(mtu);
            let mut part1 = Vec::with_capacity(1 + head.len());
            part1.push(tag::CLIENT_VERIFY_I);
            part1.extend_from_slice(head);
            let mut part2 = Vec::with_capacity(1 + tail.len());
            part2.push(tag::CLIENT_VERIFY_II);
            part2.extend_from_slice(tail);
            self.transport.write_handshake(&part1).await?;
            self.transport.write_handshake(&part2).await?;
        }

        debug!(len = encrypted.len(), "client verification sent");
        Ok(())
    }

    async fn wait_initialized(&self, shared_secret: &[u8; 32], transcript: &Transcript) -> Result<()> {
        let response = self.transport.read_handshake().await?;
        messages::reject_alert(&response)?;
        let got_tag = messages::peek_tag(&response)?;
        if got_tag != tag::INITIALIZED {
            return Err(PtlsError::UnexpectedMessage { expected: tag::INITIALIZED, got: got_tag });
        }
        if response.len() < 5 {
            return Err(PtlsError::MalformedFrame("initialized frame missing session id".into()));
        }
        let mut session_id = [0u8; 4];
        session_id.copy_from_slice(&response[1..5]);

        let finished_hash = transcript.snapshot();
        let send_keys = crypto::derive_keys(shared_secret, "ptlsc ap traffic", &finished_hash)?;
        let recv_keys = crypto::derive_keys(shared_secret, "ptlss ap traffic", &finished_hash)?;

        *self.session_id.lock().unwrap() = Some(session_id);
        *self.send.lock().unwrap() = Some(SendState { key: send_keys.key, iv: send_keys.iv, counter: 0 });
        *self.recv.lock().await = Some(RecvState { key: recv_keys.key, iv: recv_keys.iv, counter: 0 });
        self.established.store(true, Ordering::SeqCst);

        Ok(())
    }

    /// Encrypt `plaintext` for the device, returning a framed record
    /// (data-header byte followed by the AES-GCM ciphertext+tag).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.send.lock().unwrap();
        let state = guard.as_mut().ok_or(PtlsError::NotEstablished)?;
        if state.counter > MAX_COUNTER {
            return Err(PtlsError::CounterExhausted);
        }
        let nonce = crypto::make_nonce(&state.iv, state.counter as u16);
        let ciphertext = crypto::aes_gcm_128_encrypt(&state.key, &nonce, plaintext, b"")?;
        debug!(counter = state.counter, plaintext_len = plaintext.len(), "encrypt");
        state.counter += 1;

        let mut out = Vec::with_capacity(1 + ciphertext.len());
        out.push(tag::DATA_ENCRYPTED);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a framed record received from the device. Serialized against
    /// every other concurrent decrypt so the receive counter never races.
    pub async fn decrypt(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let header = *frame.first().ok_or_else(|| PtlsError::MalformedFrame("empty frame".into()))? & 0x0F;
        if header == tag::ALERT {
            let code = frame.get(1).copied().unwrap_or(0xFF);
            return Err(PtlsError::Alert(crate::error::AlertCode::from_byte(code)));
        }
        if header == tag::DATA_NOT_ENCRYPTED {
            return Ok(frame[1..].to_vec());
        }
        if header != tag::DATA_ENCRYPTED {
            return Err(PtlsError::MalformedFrame(format!("unexpected record header 0x{header:02x}")));
        }

        let mut guard = self.recv.lock().await;
        let state = guard.as_mut().ok_or(PtlsError::NotEstablished)?;
        if state.counter > MAX_COUNTER {
            return Err(PtlsError::CounterExhausted);
        }
        let nonce = crypto::make_nonce(&state.iv, state.counter as u16);
        debug!(counter = state.counter, len = frame.len() - 1, "decrypt");
        let plaintext = crypto::aes_gcm_128_decrypt(&state.key, &nonce, &frame[1..], b"")?;
        state.counter += 1;
        Ok(plaintext)
    }
}

fn push_len_prefixed(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u16).to_be_bytes());
    out.extend_from_slice(field);
}

fn current_time_millis_be() -> Vec<u8> {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    millis.to_be_bytes().to_vec()
}
