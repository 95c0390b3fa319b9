//! Sample "seek" channel handlers
//!
//! Illustrative only: the outbound side sends our hashname on a `seek`
//! channel; the inbound side answers every seek with an empty `see`
//! list. A real switch would consult a routing table here.

use serde_json::{json, Map, Value};
use telehash_net::{Channel, ChannelHandler, ChannelPacket, Line, Switch, SwitchError};
use tracing::{debug, info, warn};

/// Answers inbound seeks with an empty `see` list.
pub struct SeekResponder {
    channel: Channel,
}

impl ChannelHandler for SeekResponder {
    fn handle_incoming(&mut self, packet: ChannelPacket) {
        let target = packet
            .fields
            .get("seek")
            .and_then(Value::as_str)
            .unwrap_or("?");
        info!(%target, "seek received");

        let mut fields = Map::new();
        fields.insert("see".to_string(), json!([]));
        if let Err(e) = self.channel.send(Vec::new(), fields) {
            warn!("failed to answer seek: {e}");
        }
    }

    fn handle_error(&mut self, error: SwitchError) {
        debug!("seek channel closed: {error}");
    }
}

/// Logs answers arriving on a seek channel we opened.
pub struct SeekLogger;

impl ChannelHandler for SeekLogger {
    fn handle_incoming(&mut self, packet: ChannelPacket) {
        let see = packet.fields.get("see").cloned().unwrap_or(Value::Null);
        info!(%see, "seek answered");
    }

    fn handle_error(&mut self, error: SwitchError) {
        debug!("seek channel closed: {error}");
    }
}

/// Register the inbound seek responder on a switch.
pub fn register(switch: &Switch) {
    switch.register_channel_type(
        "seek",
        Box::new(|channel: &Channel| {
            Box::new(SeekResponder {
                channel: channel.clone(),
            })
        }),
    );
}

/// Open a seek channel on `line` asking after our own hashname.
pub fn seek_self(switch: &Switch, line: &Line) -> Result<(), SwitchError> {
    let channel = line.open_channel("seek", Box::new(SeekLogger))?;
    let mut fields = Map::new();
    fields.insert(
        "seek".to_string(),
        Value::String(switch.hashname().to_hex()),
    );
    channel.send(Vec::new(), fields)
}
