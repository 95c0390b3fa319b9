//! Fixed-size protocol identifiers
//!
//! All identifiers travel as lowercase hex on the wire and have exact
//! byte lengths; anything else is rejected at parse time.

use std::fmt;
use thiserror::Error;

/// Hashname length in bytes (SHA-256 output).
pub const HASHNAME_SIZE: usize = 32;
/// Line identifier length in bytes.
pub const LINE_ID_SIZE: usize = 16;
/// Channel identifier length in bytes.
pub const CHANNEL_ID_SIZE: usize = 16;
/// AES initialization vector length in bytes.
pub const IV_SIZE: usize = 16;

/// Errors decoding a fixed-size identifier from its hex form.
#[derive(Debug, Error)]
pub enum IdError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("wrong length: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], IdError> {
    let bytes = hex::decode(s)?;
    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| IdError::Length { expected: N, actual })
}

/// A node's stable overlay identity: SHA-256 of the DER-encoded RSA
/// public key. 64 lowercase hex characters on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hashname([u8; HASHNAME_SIZE]);

impl Hashname {
    pub fn new(bytes: [u8; HASHNAME_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASHNAME_SIZE] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        Ok(Self(decode_fixed(s)?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for Hashname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hashname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hashname({})", self.short())
    }
}

/// A 16-byte line identifier. Each side of a line chooses its own,
/// freshly at every open; identifiers are never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineId([u8; LINE_ID_SIZE]);

impl LineId {
    pub fn new(bytes: [u8; LINE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; LINE_ID_SIZE] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        Ok(Self(decode_fixed(s)?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LineId({})", hex::encode(self.0))
    }
}

/// A 16-byte channel identifier, random per channel within a line.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId([u8; CHANNEL_ID_SIZE]);

impl ChannelId {
    pub fn new(bytes: [u8; CHANNEL_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHANNEL_ID_SIZE] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        Ok(Self(decode_fixed(s)?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", hex::encode(self.0))
    }
}
