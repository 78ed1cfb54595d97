//! The `RadioBackend` trait -- the hub's capability view of the radio.
//!
//! The hub programs against `dyn RadioBackend` so the supervisor, the HRD
//! servers, and the AI tool surface never know which vendor protocol is in
//! use. The SmartSDR implementation lives in `slicehub-flex`; tests
//! substitute a scripted stand-in.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::RadioMode;

/// Snapshot of one radio slice as reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceInfo {
    /// Slice index (0..3).
    pub index: u8,
    /// Dial frequency in hertz.
    pub freq_hz: u64,
    /// Operating mode.
    pub mode: RadioMode,
    /// Whether this slice is the designated TX slice.
    pub is_tx: bool,
    /// Audio RX channel assigned to the slice (1-based), 0 if unassigned.
    pub audio_rx: u8,
}

/// An event emitted by a radio backend when radio state changes.
///
/// Delivered through a bounded broadcast channel; slow consumers may miss
/// events under heavy load.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// The command channel is established.
    Connected,
    /// The command channel was lost; a reconnect loop may be running.
    Disconnected,
    /// A slice became active on the radio.
    SliceAdded(SliceInfo),
    /// A slice was removed from the radio.
    SliceRemoved {
        index: u8,
    },
    /// One or more fields of an active slice changed.
    SliceUpdated(SliceInfo),
    /// A backend-level failure worth surfacing.
    Error(String),
}

/// Asynchronous interface to the radio.
///
/// All methods that talk to the radio are `async`; `is_connected` reads a
/// cached flag. Implementations must be safe to share across tasks.
#[async_trait]
pub trait RadioBackend: Send + Sync {
    /// Establish the command channel and subscribe to slice updates.
    async fn connect(&self) -> Result<()>;

    /// Tear down the command channel and stop any reconnect loop.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the command channel is currently up.
    fn is_connected(&self) -> bool;

    /// Current slices as last reported by the radio.
    async fn list_slices(&self) -> Result<Vec<SliceInfo>>;

    /// Retune a slice to the given dial frequency.
    async fn tune_slice(&self, index: u8, freq_hz: u64) -> Result<()>;

    /// Change a slice's operating mode.
    async fn set_slice_mode(&self, index: u8, mode: RadioMode) -> Result<()>;

    /// Designate or clear a slice as the TX slice.
    async fn set_slice_tx(&self, index: u8, tx: bool) -> Result<()>;

    /// Route a slice's RX audio to the given DAX channel (1-based).
    async fn set_slice_audio(&self, index: u8, channel: u8) -> Result<()>;

    /// Subscribe to backend events.
    fn subscribe(&self) -> broadcast::Receiver<BackendEvent>;
}
