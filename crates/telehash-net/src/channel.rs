//! Channel multiplexing within a line
//!
//! Channels are named logical streams inside an established line. Every
//! channel packet carries the 16-byte channel identifier `c`; the first
//! packet from the opening side also carries the channel `type`. The
//! `end` flag terminates the channel.

use crate::switch::{map_send_error, Command, SwitchError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use telehash_core::packet;
use telehash_core::types::{ChannelId, LineId};
use telehash_core::PacketError;
use tokio::sync::mpsc;

/// Handler for inbound traffic and lifecycle errors on one channel.
///
/// Invoked on the reactor task; packets for a given channel arrive in
/// receive order.
pub trait ChannelHandler: Send {
    fn handle_incoming(&mut self, packet: ChannelPacket);
    fn handle_error(&mut self, error: SwitchError);
}

/// A decoded channel packet.
#[derive(Debug, Clone)]
pub struct ChannelPacket {
    pub channel: ChannelId,
    /// Channel type; present on the first packet of a channel.
    pub kind: Option<String>,
    /// Monotonic per-channel sequence number.
    pub seq: Option<u64>,
    /// Terminator flag.
    pub end: bool,
    /// Application fields.
    pub fields: Map<String, Value>,
    /// Opaque payload.
    pub body: Vec<u8>,
}

fn is_false(value: &bool) -> bool {
    !value
}

#[derive(Serialize, Deserialize)]
struct ChannelHeader {
    c: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq: Option<u64>,
    #[serde(default, skip_serializing_if = "is_false")]
    end: bool,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl ChannelPacket {
    /// Render into the framed inner form carried by a line packet.
    pub fn render(&self) -> Result<Vec<u8>, PacketError> {
        let header = ChannelHeader {
            c: self.channel.to_hex(),
            kind: self.kind.clone(),
            seq: self.seq,
            end: self.end,
            fields: self.fields.clone(),
        };
        let header =
            serde_json::to_value(header).map_err(|e| PacketError::Malformed(e.to_string()))?;
        packet::frame(&header, &self.body)
    }

    /// Parse the decrypted inner form of a line packet.
    pub fn parse(inner: &[u8]) -> Result<Self, PacketError> {
        let (header, body) = packet::split(inner)?;
        let header: ChannelHeader = serde_json::from_value(Value::Object(header))
            .map_err(|e| PacketError::Malformed(e.to_string()))?;
        let channel = ChannelId::from_hex(&header.c)
            .map_err(|e| PacketError::Malformed(e.to_string()))?;
        Ok(Self {
            channel,
            kind: header.kind,
            seq: header.seq,
            end: header.end,
            fields: header.fields,
            body: body.to_vec(),
        })
    }
}

/// Application handle to a channel. Cheap to clone.
#[derive(Clone)]
pub struct Channel {
    pub(crate) line_in: LineId,
    pub(crate) id: ChannelId,
    pub(crate) kind: String,
    pub(crate) commands: mpsc::Sender<Command>,
}

impl Channel {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Send a packet on this channel.
    ///
    /// Non-blocking: returns [`SwitchError::Backpressure`] when the
    /// switch's command queue is full.
    pub fn send(&self, body: Vec<u8>, fields: Map<String, Value>) -> Result<(), SwitchError> {
        self.commands
            .try_send(Command::ChannelSend {
                line_in: self.line_in,
                channel: self.id,
                fields,
                body,
                end: false,
            })
            .map_err(map_send_error)
    }

    /// Terminate the channel with an `end` packet.
    pub fn close(&self) -> Result<(), SwitchError> {
        self.commands
            .try_send(Command::ChannelSend {
                line_in: self.line_in,
                channel: self.id,
                fields: Map::new(),
                body: Vec::new(),
                end: true,
            })
            .map_err(map_send_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_packet_round_trip() {
        let mut fields = Map::new();
        fields.insert("seek".to_string(), json!("aabbcc"));
        fields.insert("hops".to_string(), json!(3));

        let packet = ChannelPacket {
            channel: ChannelId::new([9; 16]),
            kind: Some("seek".to_string()),
            seq: Some(0),
            end: false,
            fields: fields.clone(),
            body: b"opaque".to_vec(),
        };

        let parsed = ChannelPacket::parse(&packet.render().unwrap()).unwrap();
        assert_eq!(parsed.channel, packet.channel);
        assert_eq!(parsed.kind.as_deref(), Some("seek"));
        assert_eq!(parsed.seq, Some(0));
        assert!(!parsed.end);
        assert_eq!(parsed.fields, fields);
        assert_eq!(parsed.body, b"opaque");
    }

    #[test]
    fn later_packets_omit_type_and_keep_end() {
        let packet = ChannelPacket {
            channel: ChannelId::new([1; 16]),
            kind: None,
            seq: Some(7),
            end: true,
            fields: Map::new(),
            body: Vec::new(),
        };

        let rendered = packet.render().unwrap();
        let (header, _) = packet::split(&rendered).unwrap();
        assert!(!header.contains_key("type"));
        assert_eq!(header.get("end"), Some(&json!(true)));

        let parsed = ChannelPacket::parse(&rendered).unwrap();
        assert!(parsed.kind.is_none());
        assert!(parsed.end);
    }

    #[test]
    fn missing_channel_id_is_malformed() {
        let framed = packet::frame(&json!({"type": "seek"}), b"").unwrap();
        assert!(matches!(
            ChannelPacket::parse(&framed),
            Err(PacketError::Malformed(_))
        ));
    }

    #[test]
    fn bad_channel_id_is_malformed() {
        let framed = packet::frame(&json!({"c": "abcd"}), b"").unwrap();
        assert!(ChannelPacket::parse(&framed).is_err());
    }
}
