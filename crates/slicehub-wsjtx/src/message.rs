//! Typed decoder messages: inbound parsing and outbound encoding.
//!
//! Inbound datagrams carry the types the hub reacts to (heartbeat, status,
//! decode, QSO-logged, close); outbound frames are the control messages the
//! hub sends back (reply, free-text, configure, halt-TX, clear, close).

use chrono::{DateTime, Utc};

use slicehub_core::{Error, Result};

use crate::wire::{Reader, Writer, MAGIC};

// Message type identifiers.
const TYPE_HEARTBEAT: u32 = 0;
const TYPE_STATUS: u32 = 1;
const TYPE_DECODE: u32 = 2;
const TYPE_CLEAR: u32 = 3;
const TYPE_REPLY: u32 = 4;
const TYPE_QSO_LOGGED: u32 = 5;
const TYPE_CLOSE: u32 = 6;
const TYPE_HALT_TX: u32 = 8;
const TYPE_FREE_TEXT: u32 = 9;
const TYPE_CONFIGURE: u32 = 15;

/// Reply-frame modifier bit: shift held, which makes the decoder
/// auto-enable TX when it accepts the reply.
pub const MODIFIER_SHIFT: u8 = 0x02;

// ---------------------------------------------------------------------------
// Inbound messages
// ---------------------------------------------------------------------------

/// Fields of a decoder status message (type 1).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusFields {
    pub id: String,
    pub dial_hz: u64,
    pub mode: String,
    pub dx_call: String,
    pub report: String,
    pub tx_mode: String,
    pub tx_enabled: bool,
    pub transmitting: bool,
    pub decoding: bool,
    pub rx_offset_hz: u32,
    pub tx_offset_hz: u32,
}

/// Fields of a decode message (type 2).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeFields {
    pub id: String,
    pub is_new: bool,
    /// Milliseconds since UTC midnight.
    pub time_ms: u32,
    pub snr_db: i32,
    pub dt_sec: f64,
    pub delta_freq_hz: u32,
    pub mode: String,
    pub text: String,
    pub low_confidence: bool,
    pub off_air: bool,
}

/// Fields of a QSO-logged message (type 5).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QsoLoggedFields {
    pub id: String,
    pub time_off: Option<DateTime<Utc>>,
    pub dx_call: String,
    pub dx_grid: String,
    pub tx_freq_hz: u64,
    pub mode: String,
    pub report_sent: String,
    pub report_received: String,
    pub tx_power: String,
    pub comments: String,
    pub name: String,
    pub time_on: Option<DateTime<Utc>>,
}

/// One parsed inbound datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderMessage {
    Heartbeat { id: String },
    Status(StatusFields),
    Decode(DecodeFields),
    QsoLogged(QsoLoggedFields),
    Close { id: String },
    /// A frame type the hub sends itself; ignored when looped back.
    Outbound { msg_type: u32 },
    /// A well-framed message of a type the hub does not handle.
    Unsupported { msg_type: u32 },
}

/// Parse one datagram. Fails on bad magic or a truncated body; the caller
/// discards and counts failures without tearing down the listener.
pub fn parse_datagram(data: &[u8]) -> Result<DecoderMessage> {
    let mut r = Reader::new(data);
    let magic = r.read_u32()?;
    if magic != MAGIC {
        return Err(Error::Protocol(format!("bad magic 0x{magic:08X}")));
    }
    let _schema = r.read_u32()?;
    let msg_type = r.read_u32()?;

    match msg_type {
        TYPE_HEARTBEAT => Ok(DecoderMessage::Heartbeat {
            id: r.read_string_or_empty()?,
        }),
        TYPE_STATUS => {
            let id = r.read_string_or_empty()?;
            let dial_hz = r.read_u64()?;
            let mode = r.read_string_or_empty()?;
            let dx_call = r.read_string_or_empty()?;
            let report = r.read_string_or_empty()?;
            let tx_mode = r.read_string_or_empty()?;
            let tx_enabled = r.read_bool()?;
            let transmitting = r.read_bool()?;
            let decoding = r.read_bool()?;
            let rx_offset_hz = r.read_u32()?;
            let tx_offset_hz = r.read_u32()?;
            Ok(DecoderMessage::Status(StatusFields {
                id,
                dial_hz,
                mode,
                dx_call,
                report,
                tx_mode,
                tx_enabled,
                transmitting,
                decoding,
                rx_offset_hz,
                tx_offset_hz,
            }))
        }
        TYPE_DECODE => {
            let id = r.read_string_or_empty()?;
            let is_new = r.read_bool()?;
            let time_ms = r.read_u32()?;
            let snr_db = r.read_i32()?;
            let dt_sec = r.read_f64()?;
            let delta_freq_hz = r.read_u32()?;
            let mode = r.read_string_or_empty()?;
            let text = r.read_string_or_empty()?;
            // Trailing flags are absent in some sender builds.
            let low_confidence = if r.remaining() > 0 { r.read_bool()? } else { false };
            let off_air = if r.remaining() > 0 { r.read_bool()? } else { false };
            Ok(DecoderMessage::Decode(DecodeFields {
                id,
                is_new,
                time_ms,
                snr_db,
                dt_sec,
                delta_freq_hz,
                mode,
                text,
                low_confidence,
                off_air,
            }))
        }
        TYPE_QSO_LOGGED => {
            let id = r.read_string_or_empty()?;
            let time_off = r.read_datetime()?;
            let dx_call = r.read_string_or_empty()?;
            let dx_grid = r.read_string_or_empty()?;
            let tx_freq_hz = r.read_u64()?;
            let mode = r.read_string_or_empty()?;
            let report_sent = r.read_string_or_empty()?;
            let report_received = r.read_string_or_empty()?;
            let tx_power = r.read_string_or_empty()?;
            let comments = r.read_string_or_empty()?;
            let name = r.read_string_or_empty()?;
            let time_on = if r.remaining() >= 13 {
                r.read_datetime()?
            } else {
                None
            };
            Ok(DecoderMessage::QsoLogged(QsoLoggedFields {
                id,
                time_off,
                dx_call,
                dx_grid,
                tx_freq_hz,
                mode,
                report_sent,
                report_received,
                tx_power,
                comments,
                name,
                time_on,
            }))
        }
        TYPE_CLOSE => Ok(DecoderMessage::Close {
            id: r.read_string_or_empty()?,
        }),
        TYPE_CLEAR | TYPE_REPLY | TYPE_HALT_TX | TYPE_FREE_TEXT | TYPE_CONFIGURE => {
            Ok(DecoderMessage::Outbound { msg_type })
        }
        other => Ok(DecoderMessage::Unsupported { msg_type: other }),
    }
}

/// Map a decoder's single-character mode tag to the canonical mode name.
pub fn normalize_mode(mode: &str) -> String {
    match mode {
        "~" => "FT8".to_string(),
        "+" => "FT4".to_string(),
        "#" => "JT65".to_string(),
        "@" => "JT9".to_string(),
        "&" => "MSK144".to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Outbound frames
// ---------------------------------------------------------------------------

/// Parameters of a Reply frame (type 4), keyed to a prior decode.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyFrame {
    pub time_ms: u32,
    pub snr_db: i32,
    pub dt_sec: f64,
    pub delta_freq_hz: u32,
    pub mode: String,
    pub message: String,
    pub low_confidence: bool,
    /// Modifier byte; set [`MODIFIER_SHIFT`] to auto-enable TX.
    pub modifiers: u8,
}

/// Encode a Reply frame (type 4).
pub fn encode_reply(id: &str, reply: &ReplyFrame) -> Vec<u8> {
    let mut w = Writer::frame(TYPE_REPLY, id);
    w.write_u32(reply.time_ms);
    w.write_i32(reply.snr_db);
    w.write_f64(reply.dt_sec);
    w.write_u32(reply.delta_freq_hz);
    w.write_string(Some(&reply.mode));
    w.write_string(Some(&reply.message));
    w.write_bool(reply.low_confidence);
    w.write_u8(reply.modifiers);
    w.finish()
}

/// Encode a free-text frame (type 9).
pub fn encode_free_text(id: &str, text: &str, send: bool) -> Vec<u8> {
    let mut w = Writer::frame(TYPE_FREE_TEXT, id);
    w.write_string(Some(text));
    w.write_bool(send);
    w.finish()
}

/// Fields of a Configure frame (type 15). Empty strings and zero values
/// mean "do not change".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigureFrame {
    pub mode: String,
    pub frequency_tolerance: u32,
    pub submode: String,
    pub fast_mode: bool,
    pub tr_period_secs: u32,
    pub rx_offset_hz: u32,
    pub dx_call: String,
    pub dx_grid: String,
    pub generate_messages: bool,
}

/// Encode a Configure frame (type 15).
pub fn encode_configure(id: &str, cfg: &ConfigureFrame) -> Vec<u8> {
    let mut w = Writer::frame(TYPE_CONFIGURE, id);
    w.write_string(Some(&cfg.mode));
    w.write_u32(cfg.frequency_tolerance);
    w.write_string(Some(&cfg.submode));
    w.write_bool(cfg.fast_mode);
    w.write_u32(cfg.tr_period_secs);
    w.write_u32(cfg.rx_offset_hz);
    w.write_string(Some(&cfg.dx_call));
    w.write_string(Some(&cfg.dx_grid));
    w.write_bool(cfg.generate_messages);
    w.finish()
}

/// Encode a halt-TX frame (type 8).
pub fn encode_halt_tx(id: &str, auto_tx_only: bool) -> Vec<u8> {
    let mut w = Writer::frame(TYPE_HALT_TX, id);
    w.write_bool(auto_tx_only);
    w.finish()
}

/// Encode a window-clear frame (type 3). `window` selects 0, 1, or 2.
pub fn encode_clear(id: &str, window: u8) -> Vec<u8> {
    let mut w = Writer::frame(TYPE_CLEAR, id);
    w.write_u8(window);
    w.finish()
}

/// Encode a close frame (type 6), asking the decoder to shut down.
pub fn encode_close(id: &str) -> Vec<u8> {
    Writer::frame(TYPE_CLOSE, id).finish()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::SCHEMA_VERSION;

    /// Helper: build a status datagram the way a decoder would.
    fn status_datagram() -> Vec<u8> {
        let mut w = Writer::frame(TYPE_STATUS, "Slice-A");
        w.write_u64(14_074_000);
        w.write_string(Some("FT8"));
        w.write_string(Some("EA4IFI"));
        w.write_string(Some("-07"));
        w.write_string(Some("FT8"));
        w.write_bool(true);
        w.write_bool(false);
        w.write_bool(true);
        w.write_u32(1500);
        w.write_u32(1500);
        w.finish()
    }

    #[test]
    fn heartbeat_parses() {
        let frame = Writer::frame(TYPE_HEARTBEAT, "Slice-C").finish();
        let msg = parse_datagram(&frame).unwrap();
        assert_eq!(msg, DecoderMessage::Heartbeat { id: "Slice-C".into() });
    }

    #[test]
    fn heartbeat_with_trailing_fields_parses() {
        // Real senders append schema/version/revision fields; they are
        // ignored.
        let mut w = Writer::frame(TYPE_HEARTBEAT, "Slice-C");
        w.write_u32(3);
        w.write_string(Some("2.6.1"));
        w.write_string(Some(""));
        let msg = parse_datagram(&w.finish()).unwrap();
        assert_eq!(msg, DecoderMessage::Heartbeat { id: "Slice-C".into() });
    }

    #[test]
    fn status_parses() {
        let msg = parse_datagram(&status_datagram()).unwrap();
        let DecoderMessage::Status(s) = msg else {
            panic!("expected status");
        };
        assert_eq!(s.id, "Slice-A");
        assert_eq!(s.dial_hz, 14_074_000);
        assert_eq!(s.mode, "FT8");
        assert_eq!(s.dx_call, "EA4IFI");
        assert!(s.tx_enabled);
        assert!(!s.transmitting);
        assert!(s.decoding);
        assert_eq!(s.rx_offset_hz, 1500);
    }

    #[test]
    fn decode_parses() {
        let mut w = Writer::frame(TYPE_DECODE, "Slice-B");
        w.write_bool(true);
        w.write_u32(49_230_000);
        w.write_i32(-12);
        w.write_f64(0.2);
        w.write_u32(1623);
        w.write_string(Some("~"));
        w.write_string(Some("CQ DL9XYZ JO31"));
        w.write_bool(false);
        w.write_bool(false);

        let msg = parse_datagram(&w.finish()).unwrap();
        let DecoderMessage::Decode(d) = msg else {
            panic!("expected decode");
        };
        assert!(d.is_new);
        assert_eq!(d.time_ms, 49_230_000);
        assert_eq!(d.snr_db, -12);
        assert_eq!(d.dt_sec, 0.2);
        assert_eq!(d.delta_freq_hz, 1623);
        assert_eq!(d.mode, "~");
        assert_eq!(d.text, "CQ DL9XYZ JO31");
    }

    #[test]
    fn decode_without_trailing_flags_parses() {
        let mut w = Writer::frame(TYPE_DECODE, "Slice-B");
        w.write_bool(true);
        w.write_u32(0);
        w.write_i32(-1);
        w.write_f64(0.0);
        w.write_u32(1000);
        w.write_string(Some("~"));
        w.write_string(Some("CQ W1ABC FN42"));
        let msg = parse_datagram(&w.finish()).unwrap();
        let DecoderMessage::Decode(d) = msg else {
            panic!("expected decode");
        };
        assert!(!d.low_confidence);
        assert!(!d.off_air);
    }

    #[test]
    fn qso_logged_parses() {
        let end = chrono::Utc::now();
        let start = end - chrono::Duration::seconds(90);
        let mut w = Writer::frame(TYPE_QSO_LOGGED, "Slice-B");
        w.write_datetime(Some(end));
        w.write_string(Some("EA4IFI"));
        w.write_string(Some("IM79"));
        w.write_u64(14_074_000);
        w.write_string(Some("FT8"));
        w.write_string(Some("-07"));
        w.write_string(Some("+03"));
        w.write_string(Some("25"));
        w.write_string(Some(""));
        w.write_string(Some(""));
        w.write_datetime(Some(start));

        let msg = parse_datagram(&w.finish()).unwrap();
        let DecoderMessage::QsoLogged(q) = msg else {
            panic!("expected qso-logged");
        };
        assert_eq!(q.dx_call, "EA4IFI");
        assert_eq!(q.dx_grid, "IM79");
        assert_eq!(q.tx_freq_hz, 14_074_000);
        assert_eq!(q.report_sent, "-07");
        assert_eq!(q.report_received, "+03");
        // Timestamps truncate to milliseconds on the wire.
        assert_eq!(
            q.time_off.unwrap().timestamp_millis(),
            end.timestamp_millis()
        );
        assert_eq!(
            q.time_on.unwrap().timestamp_millis(),
            start.timestamp_millis()
        );
    }

    #[test]
    fn close_parses() {
        let frame = encode_close("Slice-D");
        let msg = parse_datagram(&frame).unwrap();
        assert_eq!(msg, DecoderMessage::Close { id: "Slice-D".into() });
    }

    #[test]
    fn bad_magic_rejected() {
        let mut frame = status_datagram();
        frame[0] = 0x00;
        assert!(parse_datagram(&frame).is_err());
    }

    #[test]
    fn truncated_status_rejected() {
        let frame = status_datagram();
        assert!(parse_datagram(&frame[..frame.len() - 6]).is_err());
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let w = Writer::frame(11, "Slice-A");
        let msg = parse_datagram(&w.finish()).unwrap();
        assert_eq!(msg, DecoderMessage::Unsupported { msg_type: 11 });
    }

    #[test]
    fn own_frame_types_are_outbound() {
        let frame = encode_halt_tx("Slice-A", false);
        let msg = parse_datagram(&frame).unwrap();
        assert_eq!(msg, DecoderMessage::Outbound { msg_type: TYPE_HALT_TX });
    }

    #[test]
    fn reply_round_trips() {
        let reply = ReplyFrame {
            time_ms: 49_230_000,
            snr_db: 3,
            dt_sec: -0.1,
            delta_freq_hz: 1550,
            mode: "FT8".into(),
            message: "EA4IFI".into(),
            low_confidence: false,
            modifiers: MODIFIER_SHIFT,
        };
        let frame = encode_reply("Slice-B", &reply);

        let mut r = Reader::new(&frame);
        assert_eq!(r.read_u32().unwrap(), MAGIC);
        assert_eq!(r.read_u32().unwrap(), SCHEMA_VERSION);
        assert_eq!(r.read_u32().unwrap(), TYPE_REPLY);
        assert_eq!(r.read_string().unwrap().as_deref(), Some("Slice-B"));
        assert_eq!(r.read_u32().unwrap(), reply.time_ms);
        assert_eq!(r.read_i32().unwrap(), reply.snr_db);
        assert_eq!(r.read_f64().unwrap(), reply.dt_sec);
        assert_eq!(r.read_u32().unwrap(), reply.delta_freq_hz);
        assert_eq!(r.read_string().unwrap().as_deref(), Some("FT8"));
        assert_eq!(r.read_string().unwrap().as_deref(), Some("EA4IFI"));
        assert!(!r.read_bool().unwrap());
        assert_eq!(r.read_u8().unwrap(), MODIFIER_SHIFT);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn free_text_round_trips() {
        let frame = encode_free_text("Slice-A", "EA4IFI HB9BLA RR73", true);
        let mut r = Reader::new(&frame);
        r.read_u32().unwrap();
        r.read_u32().unwrap();
        assert_eq!(r.read_u32().unwrap(), TYPE_FREE_TEXT);
        assert_eq!(r.read_string().unwrap().as_deref(), Some("Slice-A"));
        assert_eq!(
            r.read_string().unwrap().as_deref(),
            Some("EA4IFI HB9BLA RR73")
        );
        assert!(r.read_bool().unwrap());
    }

    #[test]
    fn configure_encodes_all_fields() {
        let cfg = ConfigureFrame {
            mode: "FT8".into(),
            rx_offset_hz: 1500,
            dx_call: "EA4IFI".into(),
            dx_grid: "IM79".into(),
            generate_messages: true,
            ..ConfigureFrame::default()
        };
        let frame = encode_configure("Slice-A", &cfg);
        let mut r = Reader::new(&frame);
        r.read_u32().unwrap();
        r.read_u32().unwrap();
        assert_eq!(r.read_u32().unwrap(), TYPE_CONFIGURE);
        assert_eq!(r.read_string().unwrap().as_deref(), Some("Slice-A"));
        assert_eq!(r.read_string().unwrap().as_deref(), Some("FT8"));
        assert_eq!(r.read_u32().unwrap(), 0);
        assert_eq!(r.read_string().unwrap().as_deref(), Some(""));
        assert!(!r.read_bool().unwrap());
        assert_eq!(r.read_u32().unwrap(), 0);
        assert_eq!(r.read_u32().unwrap(), 1500);
        assert_eq!(r.read_string().unwrap().as_deref(), Some("EA4IFI"));
        assert_eq!(r.read_string().unwrap().as_deref(), Some("IM79"));
        assert!(r.read_bool().unwrap());
    }

    #[test]
    fn clear_encodes_window_selector() {
        let frame = encode_clear("Slice-A", 2);
        assert_eq!(*frame.last().unwrap(), 2);
    }

    #[test]
    fn mode_normalization() {
        assert_eq!(normalize_mode("~"), "FT8");
        assert_eq!(normalize_mode("+"), "FT4");
        assert_eq!(normalize_mode("FT8"), "FT8");
    }
}
