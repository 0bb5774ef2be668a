// Wire layout of the four handshake messages. All multi-byte lengths are
// big-endian u16; all other integers are single bytes.

use crate::error::{AlertCode, PtlsError, Result};

/// Handshake/record message type tags (low nibble of the first byte).
pub mod tag {
    pub const HELLO: u8 = 0x03;
    pub const ALERT: u8 = 0x04;
    pub const SERVER_VERIFY: u8 = 0x05;
    pub const CLIENT_VERIFY_I: u8 = 0x06;
    pub const CLIENT_VERIFY_II: u8 = 0x07;
    pub const INITIALIZED: u8 = 0x08;

    pub const DATA_NOT_ENCRYPTED: u8 = 0x00;
    pub const DATA_ENCRYPTED: u8 = 0x01;
}

/// Protocol version this client speaks.
pub const PROTOCOL_VERSION: u8 = 0x02;

/// Client hello payload: version + mtu + reserved + 32 random bytes + a
/// 65-byte uncompressed ECDH point + 48 zero bytes (session resumption,
/// unsupported) + 4 zero bytes (session id cache, unsupported). Always
/// exactly 152 bytes.
pub struct ClientHello {
    pub mtu: u8,
    pub random: [u8; 32],
    pub ephemeral_public: [u8; 65],
}

impl ClientHello {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(152);
        out.push(PROTOCOL_VERSION);
        out.push(self.mtu);
        out.push(0x00);
        out.extend_from_slice(&self.random);
        out.extend_from_slice(&self.ephemeral_public);
        out.extend_from_slice(&[0u8; 48]);
        out.extend_from_slice(&[0u8; 4]);
        debug_assert_eq!(out.len(), 152);
        out
    }
}

/// Server hello payload, as much of it as this client cares about: the
/// first 35 bytes (version, mtu, reserved, 32 random bytes) followed by
/// a 65-byte uncompressed ECDH point. The device may append further
/// fields; they are not interpreted here.
pub struct ServerHello {
    pub version: u8,
    pub mtu: u8,
    pub random: [u8; 35],
    pub ephemeral_public: [u8; 65],
}

impl ServerHello {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 100 {
            return Err(PtlsError::MalformedFrame(format!(
                "server hello too short: {} bytes",
                payload.len()
            )));
        }
        let mut random = [0u8; 35];
        random.copy_from_slice(&payload[0..35]);
        let mut ephemeral_public = [0u8; 65];
        ephemeral_public.copy_from_slice(&payload[35..100]);
        Ok(Self {
            version: payload[0],
            mtu: payload[1],
            random,
            ephemeral_public,
        })
    }
}

fn read_len_prefixed(data: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    if data.len() < *pos + 2 {
        return Err(PtlsError::MalformedFrame("truncated length prefix".into()));
    }
    let len = u16::from_be_bytes([data[*pos], data[*pos + 1]]) as usize;
    *pos += 2;
    if data.len() < *pos + len {
        return Err(PtlsError::MalformedFrame("truncated length-prefixed field".into()));
    }
    let field = data[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(field)
}

fn write_len_prefixed(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u16).to_be_bytes());
    out.extend_from_slice(field);
}

/// The decrypted server-verify body: the echoed auth challenge, the
/// device's signature over the transcript, and the transcript hash as
/// the device saw it.
pub struct ServerVerifyPayload {
    pub auth_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub hello_hash: Vec<u8>,
}

impl ServerVerifyPayload {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let auth_data = read_len_prefixed(data, &mut pos)?;
        let signature = read_len_prefixed(data, &mut pos)?;
        let hello_hash = read_len_prefixed(data, &mut pos)?;
        Ok(Self { auth_data, signature, hello_hash })
    }
}

/// The client-verify body sent once the server has been authenticated:
/// this client's certificate, its signature over the handshake
/// transcript, and the transcript hash at the point of signing.
pub struct ClientVerifyPayload<'a> {
    pub certificate: &'a [u8],
    pub signature: &'a [u8],
    pub hello_verify_hash: &'a [u8],
}

impl<'a> ClientVerifyPayload<'a> {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_len_prefixed(&mut out, self.certificate);
        write_len_prefixed(&mut out, self.signature);
        write_len_prefixed(&mut out, self.hello_verify_hash);
        out
    }
}

/// Parse the first byte of any handshake/record frame: either an alert
/// (with the following byte as its code) or a plain message tag.
pub fn peek_tag(frame: &[u8]) -> Result<u8> {
    frame
        .first()
        .map(|b| b & 0x0F)
        .ok_or_else(|| PtlsError::MalformedFrame("empty frame".into()))
}

/// Raise the appropriate error if `frame` carries an alert tag.
pub fn reject_alert(frame: &[u8]) -> Result<()> {
    if peek_tag(frame)? == tag::ALERT {
        let code = frame.get(1).copied().unwrap_or(0xFF);
        return Err(PtlsError::Alert(AlertCode::from_byte(code)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_hello_is_152_bytes() {
        let hello = ClientHello {
            mtu: 244,
            random: [1u8; 32],
            ephemeral_public: [2u8; 65],
        };
        assert_eq!(hello.encode().len(), 152);
    }

    #[test]
    fn server_hello_roundtrip_fields() {
        let mut payload = vec![0u8; 100];
        payload[0] = PROTOCOL_VERSION;
        payload[1] = 200;
        payload[35] = 0x04;
        let hello = ServerHello::decode(&payload).unwrap();
        assert_eq!(hello.version, PROTOCOL_VERSION);
        assert_eq!(hello.mtu, 200);
        assert_eq!(hello.ephemeral_public[0], 0x04);
    }

    #[test]
    fn server_hello_rejects_short_payload() {
        assert!(ServerHello::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn server_verify_payload_roundtrip() {
        let mut data = Vec::new();
        write_len_prefixed(&mut data, b"auth");
        write_len_prefixed(&mut data, b"sig-bytes");
        write_len_prefixed(&mut data, b"hash32bytesplaceholder");
        let parsed = ServerVerifyPayload::decode(&data).unwrap();
        assert_eq!(parsed.auth_data, b"auth");
        assert_eq!(parsed.signature, b"sig-bytes");
        assert_eq!(parsed.hello_hash, b"hash32bytesplaceholder");
    }

    #[test]
    fn client_verify_payload_roundtrip_via_manual_parse() {
        let payload = ClientVerifyPayload {
            certificate: b"cert-bytes",
            signature: b"sig-bytes",
            hello_verify_hash: b"hash",
        }
        .encode();
        let mut pos = 0;
        assert_eq!(read_len_prefixed(&payload, &mut pos).unwrap(), b"cert-bytes");
        assert_eq!(read_len_prefixed(&payload, &mut pos).unwrap(), b"sig-bytes");
        assert_eq!(read_len_prefixed(&payload, &mut pos).unwrap(), b"hash");
    }

    #[test]
    fn reject_alert_detects_alert_tag() {
        let frame = [tag::ALERT, 0x05];
        assert!(reject_alert(&frame).is_err());
        let frame = [tag::HELLO, 0x00];
        assert!(reject_alert(&frame).is_ok());
    }
}
