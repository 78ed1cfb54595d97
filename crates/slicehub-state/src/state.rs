//! Data carried by the state core: per-channel state, decoder instances,
//! and the immutable snapshot handed to subscribers.

use chrono::{DateTime, Utc};

use slicehub_core::band::band_name;
use slicehub_core::types::{
    channel_letter, ChannelStatus, RadioMode, HRD_BASE_PORT, UDP_BASE_PORT,
};

/// State of one channel (the hub's view of a radio slice plus its decoder).
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    /// Channel index (0..3).
    pub index: u8,
    /// Channel letter (A..D).
    pub letter: char,
    /// Decoder instance name serving this channel, if one is registered.
    pub instance: Option<String>,
    /// Dial frequency in hertz.
    pub dial_hz: u64,
    /// Radio operating mode.
    pub mode: RadioMode,
    /// Band name derived from the dial frequency.
    pub band: String,
    /// Whether this is the TX channel.
    pub is_tx: bool,
    /// DAX audio RX channel (1-based; always index + 1).
    pub audio_rx: u8,
    /// DAX audio TX channel.
    pub audio_tx: u8,
    /// UDP ingest port (UDP_BASE_PORT + index).
    pub udp_port: u16,
    /// Per-channel HRD rig-control port (HRD_BASE_PORT + index).
    pub hrd_port: u16,
    /// Digital mode reported by the decoder (e.g. "FT8"), if any.
    pub decoder_mode: Option<String>,
    /// Decoder TX-enable flag.
    pub tx_enabled: bool,
    /// Decoder currently transmitting.
    pub transmitting: bool,
    /// Decoder currently running a decode pass.
    pub decoding: bool,
    /// RX audio offset within the passband, Hz.
    pub rx_offset_hz: u32,
    /// TX audio offset within the passband, Hz.
    pub tx_offset_hz: u32,
    /// Pipeline status.
    pub status: ChannelStatus,
    /// Whether the decoder is considered alive (heartbeats flowing).
    pub connected: bool,
    /// Time of the last heartbeat.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Time of the last decode.
    pub last_decode: Option<DateTime<Utc>>,
    /// Decodes observed on this channel since startup.
    pub decode_count: u64,
    /// QSOs logged on this channel since startup.
    pub qso_count: u64,
}

impl ChannelState {
    /// A fresh offline channel with the fixed port/audio layout.
    pub fn new(index: u8) -> Self {
        ChannelState {
            index,
            letter: channel_letter(index),
            instance: None,
            dial_hz: 0,
            mode: RadioMode::DIGU,
            band: band_name(0),
            is_tx: false,
            audio_rx: index + 1,
            audio_tx: index + 1,
            udp_port: UDP_BASE_PORT + index as u16,
            hrd_port: HRD_BASE_PORT + index as u16,
            decoder_mode: None,
            tx_enabled: false,
            transmitting: false,
            decoding: false,
            rx_offset_hz: 0,
            tx_offset_hz: 0,
            status: ChannelStatus::Offline,
            connected: false,
            last_heartbeat: None,
            last_decode: None,
            decode_count: 0,
            qso_count: 0,
        }
    }

    /// Recompute the derived band from the dial frequency.
    pub(crate) fn refresh_band(&mut self) {
        self.band = band_name(self.dial_hz);
    }
}

/// A supervised decoder process as tracked by the state core.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderInstance {
    /// Instance name (e.g. "Slice-A").
    pub name: String,
    /// Channel index the instance serves.
    pub channel: u8,
    /// OS process id, if the process is (or was) running.
    pub pid: Option<u32>,
    /// Whether the process is believed to be running.
    pub running: bool,
    /// Number of restarts performed so far.
    pub restarts: u32,
    /// Time of the most recent (re)start.
    pub last_start: Option<DateTime<Utc>>,
    /// Last error reported for this instance.
    pub last_error: Option<String>,
}

impl DecoderInstance {
    pub fn new(name: impl Into<String>, channel: u8) -> Self {
        DecoderInstance {
            name: name.into(),
            channel,
            pid: None,
            running: false,
            restarts: 0,
            last_start: None,
            last_error: None,
        }
    }
}

/// Immutable view of the whole hub, delivered to change subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct HubSnapshot {
    /// Whether the radio backend's command channel is up.
    pub backend_connected: bool,
    /// Index of the TX channel, if one is assigned.
    pub tx_channel: Option<u8>,
    /// All four channels.
    pub channels: Vec<ChannelState>,
    /// Registered decoder instances.
    pub instances: Vec<DecoderInstance>,
    /// Total decodes across all channels since startup.
    pub total_decodes: u64,
    /// Total QSOs across all channels since startup.
    pub total_qsos: u64,
    /// Malformed frames / commands discarded since startup.
    pub parse_drops: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_channel_layout() {
        for i in 0..4u8 {
            let ch = ChannelState::new(i);
            assert_eq!(ch.letter, (b'A' + i) as char);
            assert_eq!(ch.audio_rx, i + 1);
            assert_eq!(ch.udp_port, 2237 + i as u16);
            assert_eq!(ch.hrd_port, 7809 + i as u16);
            assert_eq!(ch.status, ChannelStatus::Offline);
            assert!(!ch.connected);
        }
    }

    #[test]
    fn band_refresh() {
        let mut ch = ChannelState::new(0);
        ch.dial_hz = 14_074_000;
        ch.refresh_band();
        assert_eq!(ch.band, "20m");
    }
}
