//! Telehash Networking Library
//!
//! This crate implements the session layer of a Telehash peer node:
//!
//! - [`open`]: the "open" handshake packet that negotiates a line
//! - [`line`]: established encrypted sessions and their key schedule
//! - [`channel`]: multiplexed logical streams within a line
//! - [`switch`]: the UDP reactor owning sockets, lines, and pending opens

pub mod channel;
pub mod line;
pub mod open;
pub mod switch;

pub use channel::{Channel, ChannelHandler, ChannelPacket};
pub use line::Line;
pub use open::OpenError;
pub use switch::{OpenCallback, Switch, SwitchConfig, SwitchError};
