//! HRD wire framing.
//!
//! Every message is a 16-byte header followed by a UTF-16-LE,
//! NUL-terminated payload string:
//!
//! ```text
//! offset 0   u32 LE   total size (header + payload bytes)
//! offset 4   u32 LE   magic 0x1234ABCD
//! offset 8   u32 LE   magic 0xABCD1234
//! offset 12  u32 LE   checksum (XOR-sum of payload bytes)
//! offset 16  ...      payload, UTF-16-LE code units, NUL-terminated
//! ```
//!
//! The checksum algorithm of third-party senders varies, so any value is
//! accepted on receive; we emit the XOR-sum on send. All decoding here is
//! pure parsing over a byte buffer -- no I/O.

use slicehub_core::{Error, Result};

/// First header magic.
pub const MAGIC_1: u32 = 0x1234_ABCD;

/// Second header magic.
pub const MAGIC_2: u32 = 0xABCD_1234;

/// Header length in bytes.
pub const HEADER_LEN: usize = 16;

/// Frames larger than this are rejected as corrupt.
const MAX_FRAME: usize = 64 * 1024;

/// Result of attempting to decode one frame from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete frame was decoded.
    Frame {
        /// The payload text, NUL terminator stripped.
        payload: String,
        /// Bytes consumed from the input buffer.
        consumed: usize,
    },
    /// The buffer does not yet contain a complete frame.
    Incomplete,
}

/// XOR-sum of the payload bytes, as emitted in the checksum field.
fn checksum(payload: &[u8]) -> u32 {
    payload.iter().fold(0u8, |acc, b| acc ^ b) as u32
}

/// Encode a payload string into a framed message.
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let mut body: Vec<u8> = Vec::with_capacity(payload.len() * 2 + 2);
    for unit in payload.encode_utf16() {
        body.extend_from_slice(&unit.to_le_bytes());
    }
    body.extend_from_slice(&[0, 0]); // NUL terminator

    let total = (HEADER_LEN + body.len()) as u32;
    let mut out = Vec::with_capacity(total as usize);
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(&MAGIC_1.to_le_bytes());
    out.extend_from_slice(&MAGIC_2.to_le_bytes());
    out.extend_from_slice(&checksum(&body).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Try to decode one frame from the start of `buf`.
///
/// Returns [`DecodeResult::Incomplete`] until a whole frame is present.
/// Bad magics or an implausible size are an error; the caller drops the
/// connection. The checksum field is deliberately not validated.
pub fn decode_frame(buf: &[u8]) -> Result<DecodeResult> {
    if buf.len() < HEADER_LEN {
        return Ok(DecodeResult::Incomplete);
    }

    let total = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let magic1 = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let magic2 = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);

    if magic1 != MAGIC_1 || magic2 != MAGIC_2 {
        return Err(Error::Protocol(format!(
            "bad HRD frame magics 0x{magic1:08X}/0x{magic2:08X}"
        )));
    }
    if total < HEADER_LEN || total > MAX_FRAME {
        return Err(Error::Protocol(format!("implausible HRD frame size {total}")));
    }
    if buf.len() < total {
        return Ok(DecodeResult::Incomplete);
    }

    let body = &buf[HEADER_LEN..total];
    if body.len() % 2 != 0 {
        return Err(Error::Protocol("odd HRD payload length".into()));
    }
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    let payload = String::from_utf16(&units)
        .map_err(|_| Error::Protocol("invalid UTF-16 in HRD payload".into()))?;

    Ok(DecodeResult::Frame {
        payload,
        consumed: total,
    })
}
