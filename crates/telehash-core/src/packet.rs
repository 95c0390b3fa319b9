//! Datagram framing
//!
//! Every datagram is a single packet:
//!
//! ```text
//! [2 bytes big-endian length L][L bytes UTF-8 JSON object][body]
//! ```
//!
//! The same framing nests inside open and line packets, so [`frame`] and
//! [`split`] are used at both layers. Any framing or JSON violation is a
//! [`PacketError::Malformed`]; the reactor logs and drops, never crashes.

use crate::error::PacketError;
use bytes::BufMut;
use serde_json::{Map, Value};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Recommended upper bound for a rendered datagram (fits one MTU).
pub const MAX_DATAGRAM_SIZE: usize = 1400;

/// JSON key carrying the packet type tag.
pub const TYPE_KEY: &str = "type";

/// Render a header object and body into framed bytes.
pub fn frame(header: &Value, body: &[u8]) -> Result<Vec<u8>, PacketError> {
    if !header.is_object() {
        return Err(PacketError::malformed("header is not a JSON object"));
    }
    let json =
        serde_json::to_vec(header).map_err(|e| PacketError::Malformed(e.to_string()))?;
    if json.len() > u16::MAX as usize {
        return Err(PacketError::malformed("header exceeds length prefix"));
    }

    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + json.len() + body.len());
    out.put_u16(json.len() as u16);
    out.put_slice(&json);
    out.put_slice(body);
    Ok(out)
}

/// Split framed bytes into the header object and the body slice.
pub fn split(datagram: &[u8]) -> Result<(Map<String, Value>, &[u8]), PacketError> {
    if datagram.len() < LENGTH_PREFIX_SIZE {
        return Err(PacketError::malformed("shorter than length prefix"));
    }
    let header_len = u16::from_be_bytes([datagram[0], datagram[1]]) as usize;
    if header_len == 0 {
        return Err(PacketError::malformed("empty header"));
    }
    if header_len > datagram.len() - LENGTH_PREFIX_SIZE {
        return Err(PacketError::malformed("length prefix exceeds datagram"));
    }

    let header_end = LENGTH_PREFIX_SIZE + header_len;
    let header: Value = serde_json::from_slice(&datagram[LENGTH_PREFIX_SIZE..header_end])
        .map_err(|e| PacketError::Malformed(e.to_string()))?;
    let Value::Object(header) = header else {
        return Err(PacketError::malformed("header is not a JSON object"));
    };

    Ok((header, &datagram[header_end..]))
}

/// Read the mandatory `type` tag from a header.
pub fn header_type(header: &Map<String, Value>) -> Result<&str, PacketError> {
    header
        .get(TYPE_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| PacketError::malformed("missing type"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_round_trip() {
        let header = json!({"type": "open", "iv": "00ff"});
        let body = b"ciphertext bytes";

        let framed = frame(&header, body).unwrap();
        let (parsed, parsed_body) = split(&framed).unwrap();

        assert_eq!(Value::Object(parsed), header);
        assert_eq!(parsed_body, body);
    }

    #[test]
    fn frame_round_trip_empty_body() {
        let header = json!({"type": "line"});
        let framed = frame(&header, b"").unwrap();
        let (parsed, body) = split(&framed).unwrap();
        assert_eq!(header_type(&parsed).unwrap(), "line");
        assert!(body.is_empty());
    }

    #[test]
    fn rejects_non_object_header() {
        assert!(frame(&json!("open"), b"").is_err());

        let mut datagram = vec![0u8, 4];
        datagram.extend_from_slice(b"true");
        assert!(matches!(split(&datagram), Err(PacketError::Malformed(_))));
    }

    #[test]
    fn rejects_zero_length_header() {
        let datagram = [0u8, 0, b'x'];
        assert!(matches!(split(&datagram), Err(PacketError::Malformed(_))));
    }

    #[test]
    fn rejects_length_past_end() {
        let mut datagram = vec![0u8, 200];
        datagram.extend_from_slice(b"{}");
        assert!(matches!(split(&datagram), Err(PacketError::Malformed(_))));
    }

    #[test]
    fn rejects_truncated_datagram() {
        assert!(split(&[7u8]).is_err());
        assert!(split(&[]).is_err());
    }

    #[test]
    fn empty_object_lacks_type() {
        let framed = frame(&json!({}), b"").unwrap();
        let (parsed, _) = split(&framed).unwrap();
        assert!(matches!(
            header_type(&parsed),
            Err(PacketError::Malformed(_))
        ));
    }

    #[test]
    fn non_string_type_is_malformed() {
        let framed = frame(&json!({"type": 7}), b"").unwrap();
        let (parsed, _) = split(&framed).unwrap();
        assert!(header_type(&parsed).is_err());
    }
}
