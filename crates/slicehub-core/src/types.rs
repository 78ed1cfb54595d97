//! Core types shared across the slicehub workspace.
//!
//! Channels are the hub's abstraction of a radio slice: fixed cardinality
//! four, indices 0..3, letters A..D. Everything that crosses a component
//! boundary -- decode records, QSO records, the station profile -- is
//! defined here so that the state core, the protocol crates, and the tool
//! surface agree on one vocabulary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of channels the hub manages.
pub const CHANNEL_COUNT: usize = 4;

/// Base UDP port for decoder ingest; channel N listens on `UDP_BASE_PORT + N`.
pub const UDP_BASE_PORT: u16 = 2237;

/// Base TCP port for per-channel HRD rig-control servers.
pub const HRD_BASE_PORT: u16 = 7809;

/// Default TCP port for the aggregate HRD server used by external loggers.
pub const HRD_AGGREGATE_PORT: u16 = 7800;

/// SmartSDR command channel TCP port.
pub const FLEX_TCP_PORT: u16 = 4992;

/// Return the channel letter (`'A'`..`'D'`) for a channel index.
pub fn channel_letter(index: u8) -> char {
    (b'A' + index) as char
}

// ---------------------------------------------------------------------------
// Operating mode
// ---------------------------------------------------------------------------

/// Radio operating mode as spoken by both the HRD protocol and SmartSDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioMode {
    /// Upper sideband voice.
    USB,
    /// Lower sideband voice.
    LSB,
    /// CW (morse).
    CW,
    /// Digital upper sideband (sound-card digital; the FT8 default).
    DIGU,
    /// Digital lower sideband.
    DIGL,
    /// Frequency modulation.
    FM,
    /// Amplitude modulation.
    AM,
}

impl RadioMode {
    /// The wire string used by both HRD responses and SmartSDR commands.
    pub fn as_str(&self) -> &'static str {
        match self {
            RadioMode::USB => "USB",
            RadioMode::LSB => "LSB",
            RadioMode::CW => "CW",
            RadioMode::DIGU => "DIGU",
            RadioMode::DIGL => "DIGL",
            RadioMode::FM => "FM",
            RadioMode::AM => "AM",
        }
    }
}

impl fmt::Display for RadioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a string cannot be parsed into a [`RadioMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseModeError(pub String);

impl fmt::Display for ParseModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown mode: '{}'", self.0)
    }
}

impl std::error::Error for ParseModeError {}

impl FromStr for RadioMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USB" => Ok(RadioMode::USB),
            "LSB" => Ok(RadioMode::LSB),
            "CW" | "CWL" | "CWU" => Ok(RadioMode::CW),
            "DIGU" | "DATA-USB" | "DATAU" => Ok(RadioMode::DIGU),
            "DIGL" | "DATA-LSB" | "DATAL" => Ok(RadioMode::DIGL),
            "FM" | "NFM" | "DFM" => Ok(RadioMode::FM),
            "AM" | "SAM" => Ok(RadioMode::AM),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel status
// ---------------------------------------------------------------------------

/// Lifecycle status of a channel's decoder pipeline.
///
/// Transitions are owned by the state core: offline -> idle on heartbeat,
/// idle -> decoding on first decode, decoding -> calling when the decoder
/// reports transmitting, any -> error only on an explicit supervisor report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Offline,
    Idle,
    Decoding,
    Calling,
    InQso,
    Error,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelStatus::Offline => "offline",
            ChannelStatus::Idle => "idle",
            ChannelStatus::Decoding => "decoding",
            ChannelStatus::Calling => "calling",
            ChannelStatus::InQso => "in_qso",
            ChannelStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Station profile
// ---------------------------------------------------------------------------

/// Continent designators used in CQ targeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Continent {
    EU,
    NA,
    SA,
    AF,
    AS,
    OC,
    AN,
}

impl Continent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Continent::EU => "EU",
            Continent::NA => "NA",
            Continent::SA => "SA",
            Continent::AF => "AF",
            Continent::AS => "AS",
            Continent::OC => "OC",
            Continent::AN => "AN",
        }
    }
}

impl FromStr for Continent {
    type Err = ParseModeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EU" => Ok(Continent::EU),
            "NA" => Ok(Continent::NA),
            "SA" => Ok(Continent::SA),
            "AF" => Ok(Continent::AF),
            "AS" => Ok(Continent::AS),
            "OC" => Ok(Continent::OC),
            "AN" => Ok(Continent::AN),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// The operator's station identity, consulted by CQ targeting and by the
/// decoder config generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationProfile {
    /// Station callsign, uppercase (e.g. "HB9XYZ").
    pub callsign: String,
    /// Maidenhead locator (e.g. "JN47").
    pub grid: String,
    /// Home continent.
    pub continent: Continent,
    /// DXCC prefix (e.g. "HB9").
    pub dxcc: String,
    /// Additional prefixes this station may sign.
    #[serde(default)]
    pub prefixes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Decode records
// ---------------------------------------------------------------------------

/// Optional decoder-reported flags on a decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeFlags {
    pub is_new: bool,
    pub low_confidence: bool,
    pub off_air: bool,
}

/// One observed decoded message, enriched and routed to a channel.
///
/// Records without a valid callsign never reach this type -- they are
/// dropped at ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeRecord {
    /// Owning channel index (0..3). Never crosses the AI boundary.
    pub channel: u8,
    /// Slice letter (A..D). Never crosses the AI boundary.
    pub slice: char,
    /// ISO-8601 UTC wall-clock time the decode was received.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Band name derived from the dial frequency (e.g. "20m").
    pub band: String,
    /// Decoder mode string (e.g. "FT8" / "~").
    pub mode: String,
    /// Channel dial frequency at decode time, Hz.
    pub dial_hz: u64,
    /// Audio offset within the passband, Hz.
    pub audio_offset_hz: u32,
    /// RF frequency (dial + audio offset), Hz.
    pub rf_hz: u64,
    /// Signal-to-noise ratio, dB.
    pub snr_db: i32,
    /// Time offset from the decode window, seconds.
    pub dt_sec: f64,
    /// Extracted callsign (always valid, uppercase).
    pub callsign: String,
    /// Extracted Maidenhead grid, if the message carried one.
    pub grid: Option<String>,
    /// Whether the message is a CQ.
    pub is_cq: bool,
    /// Whether the message appears to be directed at my callsign.
    pub is_my_call: bool,
    /// Server-side CQ targeting verdict (see the message module).
    pub is_directed_cq_to_me: bool,
    /// Region token following "CQ" (e.g. "DX", "NA"), if any.
    pub cq_target: Option<String>,
    /// Raw decoded message text.
    pub text: String,
    /// Decoder-reported flags.
    pub flags: DecodeFlags,
}

// ---------------------------------------------------------------------------
// QSO record
// ---------------------------------------------------------------------------

/// A completed contact, as reported by a decoder's QSO-logged message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QsoRecord {
    pub start: chrono::DateTime<chrono::Utc>,
    pub end: chrono::DateTime<chrono::Utc>,
    /// Worked station callsign, uppercase.
    pub callsign: String,
    pub grid: Option<String>,
    /// Band name derived from the TX frequency.
    pub band: String,
    /// TX dial frequency, Hz.
    pub dial_hz: u64,
    pub mode: String,
    pub report_sent: String,
    pub report_received: String,
    pub tx_power_watts: Option<f64>,
    /// Slice letter the contact was made on.
    pub slice: char,
    /// Channel index the contact was made on.
    pub channel: u8,
    /// Decoder instance that reported the contact.
    pub instance: String,
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_letters() {
        assert_eq!(channel_letter(0), 'A');
        assert_eq!(channel_letter(1), 'B');
        assert_eq!(channel_letter(2), 'C');
        assert_eq!(channel_letter(3), 'D');
    }

    #[test]
    fn mode_round_trip() {
        for mode in [
            RadioMode::USB,
            RadioMode::LSB,
            RadioMode::CW,
            RadioMode::DIGU,
            RadioMode::DIGL,
            RadioMode::FM,
            RadioMode::AM,
        ] {
            let parsed: RadioMode = mode.as_str().parse().unwrap();
            assert_eq!(parsed, mode);
        }
    }

    #[test]
    fn mode_parse_case_insensitive() {
        assert_eq!("digu".parse::<RadioMode>().unwrap(), RadioMode::DIGU);
        assert_eq!("Usb".parse::<RadioMode>().unwrap(), RadioMode::USB);
    }

    #[test]
    fn mode_parse_unknown() {
        assert!("WFM2".parse::<RadioMode>().is_err());
    }

    #[test]
    fn status_display() {
        assert_eq!(ChannelStatus::InQso.to_string(), "in_qso");
        assert_eq!(ChannelStatus::Offline.to_string(), "offline");
    }

    #[test]
    fn continent_parse() {
        assert_eq!("eu".parse::<Continent>().unwrap(), Continent::EU);
        assert!("XX".parse::<Continent>().is_err());
    }

    #[test]
    fn port_layout() {
        for i in 0..CHANNEL_COUNT as u16 {
            assert_eq!(UDP_BASE_PORT + i, 2237 + i);
            assert_eq!(HRD_BASE_PORT + i, 7809 + i);
        }
    }
}
