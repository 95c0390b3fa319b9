//! The "open" handshake packet
//!
//! An open carries a freshly generated elliptic curve public key to the
//! destination, RSA-OAEP encrypted so only the destination can read it,
//! together with an AES-encrypted inner packet naming the open time,
//! destination hashname, and the sender's chosen line identifier. The
//! sender's RSA public key rides in the inner body and an encrypted RSA
//! signature over the encrypted inner packet proves authenticity.
//!
//! Rendering is pure given its inputs; [`render`] draws the IV and OAEP
//! randomness from the provider and delegates to [`render_with`], which
//! tests call directly with externally chosen values.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use telehash_core::codec::{base64_decode, base64_encode};
use telehash_core::crypto::{self, Crypto, CryptoError, EcPublicKey};
use telehash_core::packet;
use telehash_core::types::{Hashname, IdError, LineId, IV_SIZE};
use telehash_core::{Identity, Node, PacketError};
use thiserror::Error;

/// Type tag of an open packet.
pub const OPEN_TYPE: &str = "open";

/// Maximum tolerated distance between the open time and our clock.
const MAX_TIME_SKEW_MS: u64 = 24 * 3600 * 1000;

/// Reasons an inbound open is rejected. The switch logs and drops; none
/// of these are fatal.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("malformed open: {0}")]
    Malformed(String),
    #[error("open time outside the acceptance window")]
    Stale,
    #[error("open not destined for this identity")]
    WrongDestination,
    #[error("signature verification failed")]
    BadSignature,
    #[error("decrypt failure")]
    DecryptFailure,
    #[error("open replays an already accepted time")]
    Replay,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Packet(#[from] PacketError),
}

impl From<IdError> for OpenError {
    fn from(err: IdError) -> Self {
        OpenError::Malformed(err.to_string())
    }
}

#[derive(Serialize, Deserialize)]
struct OpenHeader {
    #[serde(rename = "type")]
    kind: String,
    iv: String,
    sig: String,
    open: String,
}

#[derive(Serialize, Deserialize)]
struct InnerHeader {
    at: u64,
    to: String,
    line: String,
}

/// A successfully verified inbound open.
pub struct ParsedOpen {
    /// The sender, with its endpoint captured from the receiving socket.
    pub source: Node,
    /// The sender's ephemeral EC public key.
    pub ec_public: EcPublicKey,
    /// Open time, milliseconds since the epoch.
    pub at: u64,
    /// The line identifier the sender chose.
    pub line: LineId,
}

/// Render an open packet, drawing the IV and OAEP randomness from the
/// provider. The EC keypair and line identifier are generated by the
/// caller, which must retain them to complete the handshake.
pub fn render(
    crypto: &Crypto,
    identity: &Identity,
    destination: &Node,
    ec_public: &EcPublicKey,
    at: u64,
    line: LineId,
) -> Result<Vec<u8>, OpenError> {
    let iv = crypto.random_array::<IV_SIZE>();
    let open_param = crypto.rsa_oaep_encrypt(
        destination.public_key(),
        &crypto::encode_ec_public_key(ec_public),
    )?;
    render_with(identity, destination, ec_public, at, line, iv, &open_param)
}

/// Render with externally chosen IV and `open` parameter. Pure in its
/// inputs, which makes deterministic packet construction possible.
pub fn render_with(
    identity: &Identity,
    destination: &Node,
    ec_public: &EcPublicKey,
    at: u64,
    line: LineId,
    iv: [u8; IV_SIZE],
    open_param: &[u8],
) -> Result<Vec<u8>, OpenError> {
    let encoded_ec = crypto::encode_ec_public_key(ec_public);

    // inner packet: framed {at, to, line} with our DER public key as body
    let inner_header = InnerHeader {
        at,
        to: destination.hashname().to_hex(),
        line: line.to_hex(),
    };
    let inner_json =
        serde_json::to_value(inner_header).map_err(|e| OpenError::Malformed(e.to_string()))?;
    let inner = packet::frame(
        &inner_json,
        &crypto::rsa_public_key_der(identity.public_key())?,
    )?;

    let inner_key = crypto::sha256(&encoded_ec);
    let encrypted_inner = crypto::aes256ctr(&inner_key, &iv, &inner);

    let signature = crypto::rsa_sign(identity.private_key(), &encrypted_inner)?;
    let sig_key = crypto::sha256_concat(&[&encoded_ec, line.as_bytes()]);
    let encrypted_sig = crypto::aes256ctr(&sig_key, &iv, &signature);

    let header = OpenHeader {
        kind: OPEN_TYPE.to_string(),
        iv: hex::encode(iv),
        sig: base64_encode(&encrypted_sig),
        open: base64_encode(open_param),
    };
    let header =
        serde_json::to_value(header).map_err(|e| OpenError::Malformed(e.to_string()))?;
    Ok(packet::frame(&header, &encrypted_inner)?)
}

/// Parse and verify an inbound open.
///
/// `last_at` reports the greatest `at` previously accepted from a given
/// sender; anything at or below it is rejected as a replay.
pub fn parse(
    identity: &Identity,
    header: &Map<String, Value>,
    body: &[u8],
    origin: SocketAddr,
    now_ms: u64,
    last_at: impl FnOnce(&Hashname) -> Option<u64>,
) -> Result<ParsedOpen, OpenError> {
    let header: OpenHeader = serde_json::from_value(Value::Object(header.clone()))
        .map_err(|e| OpenError::Malformed(e.to_string()))?;
    if header.kind != OPEN_TYPE {
        return Err(OpenError::Malformed("type is not open".to_string()));
    }

    let iv_bytes = hex::decode(&header.iv).map_err(|e| OpenError::Malformed(e.to_string()))?;
    let iv: [u8; IV_SIZE] = iv_bytes
        .try_into()
        .map_err(|_| OpenError::Malformed("iv is not 16 bytes".to_string()))?;
    let encrypted_sig =
        base64_decode(&header.sig).map_err(|e| OpenError::Malformed(e.to_string()))?;
    let open_param =
        base64_decode(&header.open).map_err(|e| OpenError::Malformed(e.to_string()))?;

    // recover the sender's ephemeral EC public key
    let encoded_ec = crypto::rsa_oaep_decrypt(identity.private_key(), &open_param)
        .map_err(|_| OpenError::DecryptFailure)?;
    let ec_public =
        crypto::decode_ec_public_key(&encoded_ec).map_err(|_| OpenError::DecryptFailure)?;

    // decrypt and split the inner packet
    let inner_key = crypto::sha256(&encoded_ec);
    let inner = crypto::aes256ctr(&inner_key, &iv, body);
    let (inner_header, sender_der) =
        packet::split(&inner).map_err(|_| OpenError::DecryptFailure)?;
    let inner_header: InnerHeader = serde_json::from_value(Value::Object(inner_header))
        .map_err(|e| OpenError::Malformed(e.to_string()))?;

    let to = Hashname::from_hex(&inner_header.to)?;
    let line = LineId::from_hex(&inner_header.line)?;

    if to != identity.hashname() {
        return Err(OpenError::WrongDestination);
    }

    let sender_key = crypto::rsa_public_key_from_der(sender_der)
        .map_err(|_| OpenError::Malformed("undecodable sender public key".to_string()))?;
    let source = Node::new(sender_key, Some(origin))?;

    if now_ms.abs_diff(inner_header.at) > MAX_TIME_SKEW_MS {
        return Err(OpenError::Stale);
    }
    if let Some(last) = last_at(&source.hashname()) {
        if inner_header.at <= last {
            return Err(OpenError::Replay);
        }
    }

    // the signature covers the encrypted inner packet
    let sig_key = crypto::sha256_concat(&[&encoded_ec, line.as_bytes()]);
    let signature = crypto::aes256ctr(&sig_key, &iv, &encrypted_sig);
    crypto::rsa_verify(source.public_key(), body, &signature)
        .map_err(|_| OpenError::BadSignature)?;

    Ok(ParsedOpen {
        source,
        ec_public,
        at: inner_header.at,
        line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const AT: u64 = 1_700_000_000_000;

    fn origin() -> SocketAddr {
        "192.0.2.1:42424".parse().unwrap()
    }

    fn rendered_open(
        crypto: &Crypto,
        sender: &Identity,
        receiver: &Identity,
    ) -> (Vec<u8>, EcPublicKey, LineId) {
        let destination = Node::new(receiver.public_key().clone(), None).unwrap();
        let (_, ec_public) = crypto.generate_ec_keypair();
        let line = LineId::new(crypto.random_array());
        let bytes = render(crypto, sender, &destination, &ec_public, AT, line).unwrap();
        (bytes, ec_public, line)
    }

    #[test]
    fn open_round_trip() {
        let crypto = Crypto::seeded(31);
        let sender = Identity::generate(&crypto).unwrap();
        let receiver = Identity::generate(&crypto).unwrap();
        let (bytes, ec_public, line) = rendered_open(&crypto, &sender, &receiver);

        let (header, body) = packet::split(&bytes).unwrap();
        assert_eq!(packet::header_type(&header).unwrap(), OPEN_TYPE);

        let parsed = parse(&receiver, &header, body, origin(), AT + 1_000, |_| None).unwrap();
        assert_eq!(parsed.source.hashname(), sender.hashname());
        assert_eq!(parsed.at, AT);
        assert_eq!(parsed.line, line);
        assert_eq!(parsed.source.endpoint(), Some(origin()));
        assert_eq!(
            crypto::encode_ec_public_key(&parsed.ec_public),
            crypto::encode_ec_public_key(&ec_public)
        );
    }

    #[test]
    fn stale_open_rejected() {
        let crypto = Crypto::seeded(32);
        let sender = Identity::generate(&crypto).unwrap();
        let receiver = Identity::generate(&crypto).unwrap();
        let (bytes, _, _) = rendered_open(&crypto, &sender, &receiver);
        let (header, body) = packet::split(&bytes).unwrap();

        let day = 24 * 3600 * 1000;
        let too_old = AT + 25 * 3600 * 1000;
        assert!(matches!(
            parse(&receiver, &header, body, origin(), too_old, |_| None),
            Err(OpenError::Stale)
        ));
        // future-dated opens are equally stale
        let in_window = AT + day;
        assert!(parse(&receiver, &header, body, origin(), in_window, |_| None).is_ok());
    }

    #[test]
    fn wrong_destination_rejected() {
        let crypto = Crypto::seeded(33);
        let sender = Identity::generate(&crypto).unwrap();
        let receiver = Identity::generate(&crypto).unwrap();
        let third = Identity::generate(&crypto).unwrap();

        // inner "to" names the third identity, but the open parameter is
        // encrypted to the actual receiver
        let (_, ec_public) = crypto.generate_ec_keypair();
        let line = LineId::new(crypto.random_array());
        let iv = crypto.random_array();
        let open_param = crypto
            .rsa_oaep_encrypt(
                receiver.public_key(),
                &crypto::encode_ec_public_key(&ec_public),
            )
            .unwrap();
        let third_node = Node::new(third.public_key().clone(), None).unwrap();
        let bytes =
            render_with(&sender, &third_node, &ec_public, AT, line, iv, &open_param).unwrap();

        let (header, body) = packet::split(&bytes).unwrap();
        assert!(matches!(
            parse(&receiver, &header, body, origin(), AT, |_| None),
            Err(OpenError::WrongDestination)
        ));
    }

    #[test]
    fn replay_rejected() {
        let crypto = Crypto::seeded(34);
        let sender = Identity::generate(&crypto).unwrap();
        let receiver = Identity::generate(&crypto).unwrap();
        let (bytes, _, _) = rendered_open(&crypto, &sender, &receiver);
        let (header, body) = packet::split(&bytes).unwrap();

        assert!(parse(&receiver, &header, body, origin(), AT, |_| Some(AT - 1)).is_ok());
        assert!(matches!(
            parse(&receiver, &header, body, origin(), AT, |_| Some(AT)),
            Err(OpenError::Replay)
        ));
    }

    #[test]
    fn wrong_key_rejected() {
        let crypto = Crypto::seeded(35);
        let sender = Identity::generate(&crypto).unwrap();
        let receiver = Identity::generate(&crypto).unwrap();
        let other = Identity::generate(&crypto).unwrap();
        let (bytes, _, _) = rendered_open(&crypto, &sender, &receiver);
        let (header, body) = packet::split(&bytes).unwrap();

        // decrypting the open parameter with the wrong RSA key fails
        assert!(matches!(
            parse(&other, &header, body, origin(), AT, |_| None),
            Err(OpenError::DecryptFailure)
        ));
    }

    #[test]
    fn tampered_signature_rejected() {
        let crypto = Crypto::seeded(36);
        let sender = Identity::generate(&crypto).unwrap();
        let receiver = Identity::generate(&crypto).unwrap();
        let (bytes, _, _) = rendered_open(&crypto, &sender, &receiver);
        let (mut header, body) = packet::split(&bytes).unwrap();

        let sig = header["sig"].as_str().unwrap();
        let mut raw = base64_decode(sig).unwrap();
        raw[0] ^= 0xff;
        header.insert("sig".to_string(), Value::String(base64_encode(&raw)));

        assert!(matches!(
            parse(&receiver, &header, body, origin(), AT, |_| None),
            Err(OpenError::BadSignature)
        ));
    }

    #[test]
    fn garbled_body_rejected() {
        let crypto = Crypto::seeded(37);
        let sender = Identity::generate(&crypto).unwrap();
        let receiver = Identity::generate(&crypto).unwrap();
        let (bytes, _, _) = rendered_open(&crypto, &sender, &receiver);
        let (header, body) = packet::split(&bytes).unwrap();

        let mut garbled = body.to_vec();
        garbled[0] ^= 0xff;
        assert!(parse(&receiver, &header, &garbled, origin(), AT, |_| None).is_err());
    }

    #[test]
    fn malformed_iv_rejected() {
        let crypto = Crypto::seeded(38);
        let sender = Identity::generate(&crypto).unwrap();
        let receiver = Identity::generate(&crypto).unwrap();
        let (bytes, _, _) = rendered_open(&crypto, &sender, &receiver);
        let (mut header, body) = packet::split(&bytes).unwrap();

        header.insert("iv".to_string(), json!("not hex at all"));
        assert!(matches!(
            parse(&receiver, &header, body, origin(), AT, |_| None),
            Err(OpenError::Malformed(_))
        ));

        header.insert("iv".to_string(), json!("00ff"));
        assert!(matches!(
            parse(&receiver, &header, body, origin(), AT, |_| None),
            Err(OpenError::Malformed(_))
        ));
    }
}
