//! Hub events and mutation payloads.
//!
//! The state core is purely reactive: collaborators call mutators and hear
//! about the world through [`HubEvent`]s on a broadcast channel. No module
//! holds a back-pointer into state internals.

use std::sync::Arc;

use slicehub_core::types::{DecodeRecord, QsoRecord, RadioMode};

use crate::state::HubSnapshot;

/// Events emitted by the state core.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// Debounced state-change notification carrying the current snapshot.
    ///
    /// At most one of these per debounce window, regardless of how many
    /// mutations happened.
    StateChanged(Arc<HubSnapshot>),

    /// A decode was accepted into a channel's ring. Undebounced; consumed
    /// by the QSO machine and the resource-update notifier.
    DecodeAdded(DecodeRecord),

    /// A completed QSO was reported by a decoder.
    QsoLogged(QsoRecord),

    /// The heartbeat watchdog wants the supervisor to respawn a decoder.
    ChannelNeedsRestart {
        channel: u8,
        instance: String,
        restarts: u32,
    },

    /// A station about to be answered is already in the worked-index.
    DuplicateWarning {
        callsign: String,
        band: String,
        mode: String,
    },
}

/// Per-field diff applied from a backend slice update. `None` leaves the
/// field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceUpdate {
    pub freq_hz: Option<u64>,
    pub mode: Option<RadioMode>,
    pub is_tx: Option<bool>,
    pub audio_rx: Option<u8>,
}

/// Fields reported by a decoder's status message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecoderStatusUpdate {
    pub dial_hz: u64,
    /// Digital mode string (e.g. "FT8").
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
