//! Source-engine RCON binary frame codec.
//!
//! Frame layout (all integers little-endian):
//!
//! ```text
//! size: i32   byte count of everything after this field
//! id:   i32
//! kind: i32
//! body: UTF-8 bytes
//! 0x00        body terminator
//! 0x00        packet terminator
//! ```
//!
//! `size = 4 + 4 + len(body) + 2`. Pure, no I/O — `encode`/`decode` never
//! touch a socket.

use thiserror::Error;

pub const AUTH: i32 = 3;
pub const AUTH_RESPONSE: i32 = 2;
pub const EXEC_COMMAND: i32 = 2;
pub const RESPONSE_VALUE: i32 = 0;

/// Dummy response id the binary client sends right after a command, so it
/// can tell when the server has finished replying to that command.
pub const SENTINEL_ID: i32 = 9999;

const HEADER_LEN: usize = 4; // the `size` field itself
const MIN_BODY_LEN: usize = 4 + 4 + 2; // id + kind + two terminator bytes

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed frame: declared size {0} is smaller than the minimum viable frame")]
    MalformedFrame(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn new(id: i32, kind: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }
}

/// Encode a packet. This never fails: any `id`/`kind`/`body` combination
/// produces a valid frame.
pub fn encode(id: i32, kind: i32, body: &str) -> Vec<u8> {
    let body_bytes = body.as_bytes();
    let size = (MIN_BODY_LEN + body_bytes.len()) as i32;

    let mut buf = Vec::with_capacity(HEADER_LEN + size as usize);
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&kind.to_le_bytes());
    buf.extend_from_slice(body_bytes);
    buf.push(0x00);
    buf.push(0x00);
    buf
}

/// Try to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame (the
/// caller should wait for more bytes). Returns `Err` only when the frame
/// declares an impossible size — a genuinely malformed stream, not merely
/// an incomplete one.
pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>, CodecError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let size = i32::from_le_bytes(buf[0..4].try_into().unwrap());
    if size < MIN_BODY_LEN as i32 {
        return Err(CodecError::MalformedFrame(size));
    }

    let total_len = HEADER_LEN + size as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    let id = i32::from_le_bytes(buf[4..8].try_into().unwrap());
    let kind = i32::from_le_bytes(buf[8..12].try_into().unwrap());

    let body_end = total_len - 2;
    let body_bytes = &buf[12..body_end];
    let body = String::from_utf8_lossy(body_bytes).into_owned();

    Ok(Some((Packet::new(id, kind, body), total_len)))
}

/// Drains complete frames from a growable receive buffer in arrival order,
/// leaving any trailing partial frame buffered for the next call. Used by
/// [`crate::rcon::binary::BinaryRconClient`]'s read loop so the "one byte
/// at a time vs. all at once" boundary case (see tests) behaves the same.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Pop the next complete frame, if any, advancing past its bytes.
    ///
    /// On a malformed frame the whole buffer is dropped rather than left in
    /// place — otherwise every later call would re-decode the same leading
    /// bytes and fail forever, wedging the connection instead of resyncing.
    pub fn next_frame(&mut self) -> Result<Option<Packet>, CodecError> {
        match decode(&self.buf) {
            Ok(Some((packet, consumed))) => {
                self.buf.drain(0..consumed);
                Ok(Some(packet))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.buf.clear();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_basic() {
        for kind in [AUTH, AUTH_RESPONSE, RESPONSE_VALUE] {
            let encoded = encode(42, kind, "hello world");
            let (packet, consumed) = decode(&encoded).unwrap().unwrap();
            assert_eq!(consumed, encoded.len());
            assert_eq!(packet.id, 42);
            assert_eq!(packet.kind, kind);
            assert_eq!(packet.body, "hello world");
        }
    }

    #[test]
    fn round_trip_empty_body() {
        let encoded = encode(SENTINEL_ID, RESPONSE_VALUE, "");
        let (packet, consumed) = decode(&encoded).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(packet.id, SENTINEL_ID);
        assert_eq!(packet.body, "");
    }

    #[test]
    fn round_trip_utf8_body() {
        let body = "héllo wörld \u{1F600}";
        let encoded = encode(-1, AUTH_RESPONSE, body);
        let (packet, _) = decode(&encoded).unwrap().unwrap();
        assert_eq!(packet.body, body);
    }

    #[test]
    fn incomplete_header_is_none() {
        assert_eq!(decode(&[1, 2, 3]).unwrap(), None);
    }

    #[test]
    fn incomplete_body_is_none() {
        let encoded = encode(1, EXEC_COMMAND, "status");
        // Only ship the declared size + half the rest.
        let partial = &encoded[..encoded.len() - 3];
        assert_eq!(decode(partial).unwrap(), None);
    }

    #[test]
    fn malformed_frame_rejected() {
        // size = 5 is smaller than the minimum 10-byte body-less frame.
        let mut buf = 5i32.to_le_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 5]);
        assert_eq!(decode(&buf), Err(CodecError::MalformedFrame(5)));
    }

    #[test]
    fn frame_reader_one_byte_at_a_time_matches_all_at_once() {
        let mut encoded = encode(1, EXEC_COMMAND, "status");
        encoded.extend(encode(2, RESPONSE_VALUE, "ok"));

        let mut whole = FrameReader::new();
        whole.push(&encoded);
        let mut whole_packets = Vec::new();
        while let Some(p) = whole.next_frame().unwrap() {
            whole_packets.push(p);
        }

        let mut trickle = FrameReader::new();
        let mut trickle_packets = Vec::new();
        for byte in &encoded {
            trickle.push(std::slice::from_ref(byte));
            while let Some(p) = trickle.next_frame().unwrap() {
                trickle_packets.push(p);
            }
        }

        assert_eq!(whole_packets, trickle_packets);
        assert_eq!(whole_packets.len(), 2);
    }

    #[test]
    fn frame_reader_drains_buffer_on_malformed_frame() {
        let mut buf = 5i32.to_le_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 5]);
        let mut reader = FrameReader::new();
        reader.push(&buf);

        assert_eq!(reader.next_frame(), Err(CodecError::MalformedFrame(5)));
        assert!(reader.is_empty());

        // A subsequent valid frame is decoded normally instead of re-failing
        // on the same stale bytes.
        let valid = encode(1, RESPONSE_VALUE, "ok");
        reader.push(&valid);
        let packet = reader.next_frame().unwrap().unwrap();
        assert_eq!(packet.body, "ok");
    }

    #[test]
    fn frame_reader_leaves_partial_frame_buffered() {
        let encoded = encode(1, EXEC_COMMAND, "status");
        let mut reader = FrameReader::new();
        reader.push(&encoded[..encoded.len() - 1]);
        assert_eq!(reader.next_frame().unwrap(), None);
        assert!(!reader.is_empty());
    }
}
