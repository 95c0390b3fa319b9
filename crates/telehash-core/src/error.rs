//! Error types for the packet layer

use thiserror::Error;

/// Errors raised while framing or splitting datagrams.
///
/// Anything arriving off the wire that trips one of these is logged and
/// dropped by the switch; these are never fatal to the reactor.
#[derive(Debug, Error)]
pub enum PacketError {
    /// Framing or JSON invalid
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Well-formed packet with a type no parser is registered for
    #[error("unknown packet type: {0}")]
    UnknownType(String),
}

impl PacketError {
    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        Self::Malformed(what.into())
    }
}
