//! SmartSDR line codec.
//!
//! The radio speaks newline-terminated ASCII over TCP port 4992:
//!
//! ```text
//! Command:   C<seq>|<command_text>\n        (client -> radio)
//! Response:  R<seq>|<hex_error>|<data>\n    (radio -> client)
//! Status:    S<hex_handle>|<object> <k>=<v> ...\n
//! Message:   M<seq>|<text>\n
//! Version:   V<major>.<minor>.<patch>.<build>\n
//! Handle:    H<hex_handle>\n
//! ```
//!
//! Everything here is pure parsing and formatting -- no I/O.

use slicehub_core::{Error, Result};

// ---------------------------------------------------------------------------
// Frequency helpers
// ---------------------------------------------------------------------------

/// Hz to the MHz float the radio expects in commands.
pub fn hz_to_mhz(hz: u64) -> f64 {
    hz as f64 / 1_000_000.0
}

/// MHz from a status message to integer Hz.
pub fn mhz_to_hz(mhz: f64) -> u64 {
    (mhz * 1_000_000.0).round() as u64
}

// ---------------------------------------------------------------------------
// Command formatting
// ---------------------------------------------------------------------------

/// Wrap a command with its sequence number: `C<seq>|<command>\n`.
pub fn encode_command(seq: u32, command: &str) -> Vec<u8> {
    format!("C{seq}|{command}\n").into_bytes()
}

/// `slice tune <index> <MHz>`
pub fn cmd_slice_tune(index: u8, freq_hz: u64) -> String {
    format!("slice tune {index} {:.6}", hz_to_mhz(freq_hz))
}

/// `slice set <index> mode=<MODE>`
pub fn cmd_slice_set_mode(index: u8, mode: &str) -> String {
    format!("slice set {index} mode={mode}")
}

/// `slice set <index> tx=<0|1>`
pub fn cmd_slice_set_tx(index: u8, tx: bool) -> String {
    format!("slice set {index} tx={}", if tx { 1 } else { 0 })
}

/// `slice set <index> dax=<channel>`
pub fn cmd_slice_set_dax(index: u8, dax_channel: u8) -> String {
    format!("slice set {index} dax={dax_channel}")
}

/// `sub <object>` subscription command.
pub fn cmd_subscribe(object: &str) -> String {
    format!("sub {object}")
}

/// `client program <name>` registration.
pub fn cmd_client_program(name: &str) -> String {
    format!("client program {name}")
}

// ---------------------------------------------------------------------------
// Line parsing
// ---------------------------------------------------------------------------

/// A decoded response to a previously-sent command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexResponse {
    pub sequence: u32,
    /// `0` is success; anything else is a radio error code.
    pub error_code: u32,
    pub data: String,
}

/// An unsolicited status line.
#[derive(Debug, Clone, PartialEq)]
pub struct FlexStatus {
    pub handle: u32,
    /// Object head, e.g. `"slice 0"` or `"tx"`.
    pub object: String,
    /// Key-value pairs after the object head.
    pub params: Vec<(String, String)>,
}

/// Any line received from the radio.
#[derive(Debug, Clone, PartialEq)]
pub enum FlexMessage {
    Version(String),
    Handle(u32),
    Response(FlexResponse),
    Status(FlexStatus),
    Message(String),
    Unknown(String),
}

/// Parse one line (without the trailing newline).
pub fn parse_line(line: &str) -> Result<FlexMessage> {
    let line = line.trim();
    if line.is_empty() {
        return Err(Error::Protocol("empty line".into()));
    }

    match line.as_bytes()[0] {
        b'V' => Ok(FlexMessage::Version(line[1..].to_string())),
        b'H' => {
            let handle = u32::from_str_radix(line[1..].trim(), 16)
                .map_err(|_| Error::Protocol(format!("bad handle line: {line}")))?;
            Ok(FlexMessage::Handle(handle))
        }
        b'R' => {
            let mut parts = line[1..].splitn(3, '|');
            let seq = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::Protocol(format!("bad response line: {line}")))?;
            let code = parts
                .next()
                .and_then(|s| u32::from_str_radix(s, 16).ok())
                .ok_or_else(|| Error::Protocol(format!("bad response line: {line}")))?;
            let data = parts.next().unwrap_or("").to_string();
            Ok(FlexMessage::Response(FlexResponse {
                sequence: seq,
                error_code: code,
                data,
            }))
        }
        b'S' => {
            let (handle_str, rest) = line[1..]
                .split_once('|')
                .ok_or_else(|| Error::Protocol(format!("bad status line: {line}")))?;
            let handle = u32::from_str_radix(handle_str, 16)
                .map_err(|_| Error::Protocol(format!("bad status handle: {line}")))?;

            // The object head is every leading token without '='; the rest
            // are key=value parameters.
            let mut object_parts = Vec::new();
            let mut params = Vec::new();
            for token in rest.split_whitespace() {
                match token.split_once('=') {
                    Some((k, v)) => params.push((k.to_string(), v.to_string())),
                    None if params.is_empty() => object_parts.push(token),
                    // A bare token after parameters started; ignore it.
                    None => {}
                }
            }
            Ok(FlexMessage::Status(FlexStatus {
                handle,
                object: object_parts.join(" "),
                params,
            }))
        }
        b'M' => {
            let text = line[1..].split_once('|').map(|(_, t)| t).unwrap_or("");
            Ok(FlexMessage::Message(text.to_string()))
        }
        _ => Ok(FlexMessage::Unknown(line.to_string())),
    }
}

/// Slice fields extracted from a `slice <index> ...` status line. Absent
/// keys stay `None`; the radio only sends what changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceStatus {
    pub index: u8,
    pub freq_hz: Option<u64>,
    pub mode: Option<String>,
    pub tx: Option<bool>,
    pub in_use: Option<bool>,
    pub dax: Option<u8>,
}

/// Interpret a status line as a slice update, if it is one.
pub fn parse_slice_status(status: &FlexStatus) -> Option<SliceStatus> {
    let rest = status.object.strip_prefix("slice")?.trim();
    let index: u8 = rest.parse().ok()?;

    let mut out = SliceStatus {
        index,
        ..SliceStatus::default()
    };
    for (key, value) in &status.params {
        match key.as_str() {
            "RF_frequency" | "freq" => {
                if let Ok(mhz) = value.parse::<f64>() {
                    out.freq_hz = Some(mhz_to_hz(mhz));
                }
            }
            "mode" => out.mode = Some(value.clone()),
            "tx" => out.tx = Some(value == "1"),
            "in_use" | "active" => out.in_use = Some(value == "1"),
            "dax" => out.dax = value.parse().ok(),
            _ => {}
        }
    }
    Some(out)
}
