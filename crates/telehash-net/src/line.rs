//! Established lines and their key schedule
//!
//! A line is the bidirectional encrypted session negotiated by the open
//! exchange. Each side chooses a 16-byte identifier; outgoing packets
//! carry the identifier the *receiver* chose, so inbound demultiplexing
//! keys on our own identifier. The two traffic keys hash the ECDH secret
//! with the line identifier of the respective direction, which keeps the
//! directions asymmetric and reflection-proof.

use crate::channel::{Channel, ChannelHandler};
use crate::switch::{map_send_error, Command, SwitchError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use telehash_core::crypto;
use telehash_core::packet;
use telehash_core::types::{ChannelId, LineId, IV_SIZE};
use telehash_core::{Node, PacketError};
use tokio::sync::mpsc;

/// Type tag of a line packet.
pub const LINE_TYPE: &str = "line";

/// Per-direction AES keys for one line.
#[derive(Clone)]
pub struct LineKeys {
    /// Key for packets we send.
    pub encrypt: [u8; 32],
    /// Key for packets we receive.
    pub decrypt: [u8; 32],
}

/// Derive the traffic keys for a line.
///
/// `line_out` is the identifier the remote peer chose (stamped on our
/// outgoing packets); `line_in` is ours. A's encrypt key equals B's
/// decrypt key and vice versa.
pub fn derive_line_keys(shared_secret: &[u8; 32], line_out: &LineId, line_in: &LineId) -> LineKeys {
    LineKeys {
        encrypt: crypto::sha256_concat(&[shared_secret, line_out.as_bytes()]),
        decrypt: crypto::sha256_concat(&[shared_secret, line_in.as_bytes()]),
    }
}

#[derive(Serialize, Deserialize)]
struct LineHeader {
    #[serde(rename = "type")]
    kind: String,
    line: String,
    iv: String,
}

/// The outer fields of an inbound line packet.
pub struct LineEnvelope {
    /// Our line identifier, as stamped by the sender.
    pub line: LineId,
    pub iv: [u8; IV_SIZE],
}

/// Render a line packet: encrypt the framed inner packet and wrap it.
pub fn render(
    line_out: &LineId,
    encrypt_key: &[u8; 32],
    iv: [u8; IV_SIZE],
    inner: &[u8],
) -> Result<Vec<u8>, PacketError> {
    let body = crypto::aes256ctr(encrypt_key, &iv, inner);
    let header = LineHeader {
        kind: LINE_TYPE.to_string(),
        line: line_out.to_hex(),
        iv: hex::encode(iv),
    };
    let header =
        serde_json::to_value(header).map_err(|e| PacketError::Malformed(e.to_string()))?;
    packet::frame(&header, &body)
}

/// Parse the outer header of a line packet.
pub fn parse_header(header: &Map<String, Value>) -> Result<LineEnvelope, PacketError> {
    let header: LineHeader = serde_json::from_value(Value::Object(header.clone()))
        .map_err(|e| PacketError::Malformed(e.to_string()))?;
    if header.kind != LINE_TYPE {
        return Err(PacketError::Malformed("type is not line".to_string()));
    }
    let line = LineId::from_hex(&header.line)
        .map_err(|e| PacketError::Malformed(e.to_string()))?;
    let iv_bytes =
        hex::decode(&header.iv).map_err(|e| PacketError::Malformed(e.to_string()))?;
    let iv: [u8; IV_SIZE] = iv_bytes
        .try_into()
        .map_err(|_| PacketError::Malformed("iv is not 16 bytes".to_string()))?;
    Ok(LineEnvelope { line, iv })
}

/// Decrypt the body of a line packet into the framed inner packet.
pub fn decrypt(decrypt_key: &[u8; 32], envelope: &LineEnvelope, body: &[u8]) -> Vec<u8> {
    crypto::aes256ctr(decrypt_key, &envelope.iv, body)
}

/// Application handle to an established line.
///
/// Cheap to clone; all operations travel through the switch's bounded
/// command queue and execute on the reactor.
#[derive(Clone, Debug)]
pub struct Line {
    pub(crate) remote: Node,
    pub(crate) line_in: LineId,
    pub(crate) commands: mpsc::Sender<Command>,
}

impl Line {
    /// The remote peer, with the endpoint captured at establishment.
    pub fn remote(&self) -> &Node {
        &self.remote
    }

    /// The line identifier we chose (stamped on packets we receive).
    pub fn local_id(&self) -> LineId {
        self.line_in
    }

    /// Open a channel of the given type on this line.
    ///
    /// The handler is invoked on the reactor for every inbound packet on
    /// the channel and for teardown errors. Returns
    /// [`SwitchError::Backpressure`] when the command queue is full.
    pub fn open_channel(
        &self,
        kind: &str,
        handler: Box<dyn ChannelHandler>,
    ) -> Result<Channel, SwitchError> {
        let id = ChannelId::new(rand::random());
        self.commands
            .try_send(Command::OpenChannel {
                line_in: self.line_in,
                channel: id,
                kind: kind.to_string(),
                handler,
            })
            .map_err(map_send_error)?;
        Ok(Channel {
            line_in: self.line_in,
            id,
            kind: kind.to_string(),
            commands: self.commands.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelPacket;
    use telehash_core::Crypto;

    #[test]
    fn key_schedule_is_symmetric() {
        let shared = [0x5a; 32];
        let id_a = LineId::new([1; 16]);
        let id_b = LineId::new([2; 16]);

        // A chose id_a, so A's outgoing packets carry id_b and vice versa
        let keys_a = derive_line_keys(&shared, &id_b, &id_a);
        let keys_b = derive_line_keys(&shared, &id_a, &id_b);

        assert_eq!(keys_a.encrypt, keys_b.decrypt);
        assert_eq!(keys_a.decrypt, keys_b.encrypt);
        assert_ne!(keys_a.encrypt, keys_a.decrypt);
    }

    #[test]
    fn line_packet_round_trip() {
        let crypto = Crypto::seeded(41);
        let shared = [7u8; 32];
        let line_in = LineId::new(crypto.random_array());
        let line_out = LineId::new(crypto.random_array());
        let sender_keys = derive_line_keys(&shared, &line_out, &line_in);
        let receiver_keys = derive_line_keys(&shared, &line_in, &line_out);

        let mut fields = Map::new();
        fields.insert("seek".to_string(), Value::String("00ff".to_string()));
        let inner = ChannelPacket {
            channel: ChannelId::new(crypto.random_array()),
            kind: Some("seek".to_string()),
            seq: Some(0),
            end: false,
            fields,
            body: b"payload".to_vec(),
        }
        .render()
        .unwrap();

        let iv = crypto.random_array();
        let rendered = render(&line_out, &sender_keys.encrypt, iv, &inner).unwrap();

        let (header, body) = packet::split(&rendered).unwrap();
        assert_eq!(packet::header_type(&header).unwrap(), LINE_TYPE);
        let envelope = parse_header(&header).unwrap();
        assert_eq!(envelope.line, line_out);

        let decrypted = decrypt(&receiver_keys.decrypt, &envelope, body);
        assert_eq!(decrypted, inner);
        let packet = ChannelPacket::parse(&decrypted).unwrap();
        assert_eq!(packet.kind.as_deref(), Some("seek"));
        assert_eq!(packet.body, b"payload");
    }

    #[test]
    fn parse_header_rejects_bad_fields() {
        let mut header = Map::new();
        header.insert("type".to_string(), Value::String("line".to_string()));
        header.insert("line".to_string(), Value::String("zz".to_string()));
        header.insert("iv".to_string(), Value::String("00".repeat(16)));
        assert!(parse_header(&header).is_err());

        header.insert("line".to_string(), Value::String("00".repeat(16)));
        header.insert("iv".to_string(), Value::String("beef".to_string()));
        assert!(parse_header(&header).is_err());

        header.insert("iv".to_string(), Value::String("00".repeat(16)));
        assert!(parse_header(&header).is_ok());
    }
}
