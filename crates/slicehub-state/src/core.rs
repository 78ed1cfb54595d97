//! The state core: single owner of the canonical world state.
//!
//! All reads return cloned views; all writes go through the mutators on
//! [`StateCore`]. Mutations happen under one lock, so external observers
//! see transitions atomically (setting `is_tx` on channel K and clearing
//! it on all others is one step). Change notification is debounced: no
//! matter how many mutations land, subscribers get at most one
//! [`HubEvent::StateChanged`] per debounce window, carrying the state as
//! observed at emission time.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Mutex};

use slicehub_core::types::{ChannelStatus, DecodeRecord, QsoRecord, CHANNEL_COUNT};

use crate::events::{DecoderStatusUpdate, HubEvent, SliceUpdate};
use crate::state::{ChannelState, DecoderInstance, HubSnapshot};

/// Debounce window for change fan-out.
pub const CHANGE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Cadence of the heartbeat watchdog.
pub const WATCHDOG_CADENCE: Duration = Duration::from_secs(5);

/// A channel whose heartbeat is older than this is considered dead.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long decodes stay in a channel's ring buffer by default.
pub const DECODE_HORIZON: Duration = Duration::from_secs(15 * 60);

/// Restarts per instance before it is marked permanently errored.
pub const RESTART_LIMIT: u32 = 5;

/// Minimum spacing between decoder restarts.
pub const RESTART_SPACING: Duration = Duration::from_secs(5);

/// Capacity of the hub event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Inner state
// ---------------------------------------------------------------------------

/// Everything behind the lock.
#[derive(Debug)]
struct HubState {
    backend_connected: bool,
    tx_channel: Option<u8>,
    channels: Vec<ChannelState>,
    instances: HashMap<String, DecoderInstance>,
    /// Per-channel time-bounded decode rings, oldest first.
    rings: Vec<VecDeque<DecodeRecord>>,
    total_decodes: u64,
    total_qsos: u64,
    parse_drops: u64,
}

impl HubState {
    fn new() -> Self {
        HubState {
            backend_connected: false,
            tx_channel: None,
            channels: (0..CHANNEL_COUNT as u8).map(ChannelState::new).collect(),
            instances: HashMap::new(),
            rings: (0..CHANNEL_COUNT).map(|_| VecDeque::new()).collect(),
            total_decodes: 0,
            total_qsos: 0,
            parse_drops: 0,
        }
    }

    fn snapshot(&self) -> HubSnapshot {
        let mut instances: Vec<DecoderInstance> = self.instances.values().cloned().collect();
        instances.sort_by_key(|i| i.channel);
        HubSnapshot {
            backend_connected: self.backend_connected,
            tx_channel: self.tx_channel,
            channels: self.channels.clone(),
            instances,
            total_decodes: self.total_decodes,
            total_qsos: self.total_qsos,
            parse_drops: self.parse_drops,
        }
    }
}

// ---------------------------------------------------------------------------
// StateCore
// ---------------------------------------------------------------------------

/// Shared handle to the canonical hub state.
///
/// Cheap to clone via `Arc`; every collaborator (backend bridge, UDP
/// ingest, HRD servers, supervisor, QSO machine, tool surface) holds one.
pub struct StateCore {
    inner: Mutex<HubState>,
    events: broadcast::Sender<HubEvent>,
    change_tx: mpsc::UnboundedSender<()>,
    decode_horizon: Duration,
}

impl StateCore {
    /// Create the state core with default timing and start the debounce
    /// task. Must be called from within a tokio runtime.
    pub fn new() -> Arc<Self> {
        Self::with_timing(CHANGE_DEBOUNCE, DECODE_HORIZON)
    }

    /// Create with explicit debounce window and decode-ring horizon.
    pub fn with_timing(debounce: Duration, decode_horizon: Duration) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let core = Arc::new(StateCore {
            inner: Mutex::new(HubState::new()),
            events,
            change_tx,
            decode_horizon,
        });
        tokio::spawn(debounce_loop(Arc::downgrade(&core), change_rx, debounce));
        core
    }

    /// Subscribe to hub events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Schedule a debounced state-change emission.
    fn mark_changed(&self) {
        let _ = self.change_tx.send(());
    }

    fn emit(&self, event: HubEvent) {
        let _ = self.events.send(event);
    }

    // -- Reads --------------------------------------------------------------

    /// Clone of the full current state.
    pub async fn snapshot(&self) -> HubSnapshot {
        self.inner.lock().await.snapshot()
    }

    /// Clone of one channel's state.
    pub async fn channel(&self, index: u8) -> Option<ChannelState> {
        let s = self.inner.lock().await;
        s.channels.get(index as usize).cloned()
    }

    /// Index of the TX channel, if assigned.
    pub async fn tx_channel(&self) -> Option<u8> {
        self.inner.lock().await.tx_channel
    }

    /// Whether the radio backend is connected.
    pub async fn backend_connected(&self) -> bool {
        self.inner.lock().await.backend_connected
    }

    /// All decodes newer than `window`, across channels, newest first.
    pub async fn decodes_within(&self, window: Duration) -> Vec<DecodeRecord> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        let s = self.inner.lock().await;
        let mut out: Vec<DecodeRecord> = s
            .rings
            .iter()
            .flatten()
            .filter(|d| d.timestamp >= cutoff)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out
    }

    /// Most recent decode of `callsign` on `channel` within `window`.
    pub async fn latest_decode_for(
        &self,
        channel: u8,
        callsign: &str,
        window: Duration,
    ) -> Option<DecodeRecord> {
        let callsign = callsign.to_uppercase();
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        let s = self.inner.lock().await;
        s.rings
            .get(channel as usize)?
            .iter()
            .rev()
            .find(|d| d.callsign == callsign && d.timestamp >= cutoff)
            .cloned()
    }

    /// Locate a decode by its (callsign, timestamp, snr) triple. Used to
    /// recover routing information for a public decode id.
    pub async fn find_decode(
        &self,
        callsign: &str,
        timestamp: chrono::DateTime<Utc>,
        snr_db: i32,
    ) -> Option<DecodeRecord> {
        let s = self.inner.lock().await;
        s.rings
            .iter()
            .flatten()
            .find(|d| d.callsign == callsign && d.timestamp == timestamp && d.snr_db == snr_db)
            .cloned()
    }

    /// Clone of one registered instance.
    pub async fn instance(&self, name: &str) -> Option<DecoderInstance> {
        self.inner.lock().await.instances.get(name).cloned()
    }

    // -- Mutators -----------------------------------------------------------

    /// Flip the backend-connected flag; emits a change only when it differs.
    pub async fn set_backend_connected(&self, connected: bool) {
        let mut s = self.inner.lock().await;
        if s.backend_connected != connected {
            s.backend_connected = connected;
            drop(s);
            tracing::debug!(connected = connected, "radio backend connectivity changed");
            self.mark_changed();
        }
    }

    /// Apply a per-field diff from a backend slice update.
    ///
    /// Setting `is_tx = true` on one channel clears it on all others in the
    /// same step and updates the global TX channel index.
    pub async fn update_from_backend(&self, index: u8, update: SliceUpdate) {
        let mut s = self.inner.lock().await;
        let Some(pos) = s.channels.iter().position(|c| c.index == index) else {
            return;
        };
        let mut changed = false;

        if let Some(freq) = update.freq_hz {
            let ch = &mut s.channels[pos];
            if ch.dial_hz != freq {
                ch.dial_hz = freq;
                ch.refresh_band();
                changed = true;
            }
        }
        if let Some(mode) = update.mode {
            let ch = &mut s.channels[pos];
            if ch.mode != mode {
                ch.mode = mode;
                changed = true;
            }
        }
        if let Some(audio_rx) = update.audio_rx {
            let ch = &mut s.channels[pos];
            if ch.audio_rx != audio_rx {
                ch.audio_rx = audio_rx;
                changed = true;
            }
        }
        if let Some(is_tx) = update.is_tx {
            if is_tx {
                if s.tx_channel != Some(index) {
                    for ch in s.channels.iter_mut() {
                        ch.is_tx = ch.index == index;
                    }
                    s.tx_channel = Some(index);
                    changed = true;
                }
            } else if s.channels[pos].is_tx {
                s.channels[pos].is_tx = false;
                if s.tx_channel == Some(index) {
                    s.tx_channel = None;
                }
                changed = true;
            }
        }

        drop(s);
        if changed {
            self.mark_changed();
        }
    }

    /// Apply decoder-reported status fields.
    ///
    /// When the decoder and the channel disagree on the dial frequency, the
    /// decoder value wins and the band is recomputed.
    pub async fn update_from_decoder_status(&self, channel: u8, update: DecoderStatusUpdate) {
        let mut s = self.inner.lock().await;
        let Some(ch) = s.channels.get_mut(channel as usize) else {
            return;
        };

        if update.dial_hz != 0 && ch.dial_hz != update.dial_hz {
            ch.dial_hz = update.dial_hz;
            ch.refresh_band();
        }
        if !update.mode.is_empty() {
            ch.decoder_mode = Some(update.mode.clone());
        }
        ch.tx_enabled = update.tx_enabled;
        ch.decoding = update.decoding;
        ch.rx_offset_hz = update.rx_offset_hz;
        ch.tx_offset_hz = update.tx_offset_hz;

        let was_transmitting = ch.transmitting;
        ch.transmitting = update.transmitting;
        if update.transmitting && !was_transmitting && ch.status != ChannelStatus::InQso {
            ch.status = ChannelStatus::Calling;
        }
        if update.decoding && ch.status == ChannelStatus::Idle {
            ch.status = ChannelStatus::Decoding;
        }

        drop(s);
        self.mark_changed();
    }

    /// Record a decoder heartbeat: stamps the time, marks the channel
    /// connected, and lifts offline to idle.
    pub async fn record_heartbeat(&self, channel: u8) {
        let mut s = self.inner.lock().await;
        let Some(ch) = s.channels.get_mut(channel as usize) else {
            return;
        };
        ch.last_heartbeat = Some(Utc::now());
        let newly_alive = !ch.connected;
        ch.connected = true;
        if ch.status == ChannelStatus::Offline {
            ch.status = ChannelStatus::Idle;
        }
        drop(s);
        if newly_alive {
            tracing::debug!(channel = channel, "channel came alive");
            self.mark_changed();
        }
    }

    /// Append a decode to its channel's ring, evicting entries older than
    /// the horizon, and emit [`HubEvent::DecodeAdded`].
    pub async fn add_decode(&self, record: DecodeRecord) {
        let horizon = chrono::Duration::from_std(self.decode_horizon).unwrap_or_default();
        let mut s = self.inner.lock().await;
        let idx = record.channel as usize;
        if idx >= CHANNEL_COUNT {
            return;
        }

        let cutoff = Utc::now() - horizon;
        let ring = &mut s.rings[idx];
        while ring.front().is_some_and(|d| d.timestamp < cutoff) {
            ring.pop_front();
        }
        ring.push_back(record.clone());

        let ch = &mut s.channels[idx];
        ch.decode_count += 1;
        ch.last_decode = Some(record.timestamp);
        if ch.status == ChannelStatus::Idle {
            ch.status = ChannelStatus::Decoding;
        }
        s.total_decodes += 1;

        drop(s);
        self.emit(HubEvent::DecodeAdded(record));
        self.mark_changed();
    }

    /// Account a completed QSO and emit [`HubEvent::QsoLogged`]. The
    /// logbook owns the worked-index and hears about the QSO through the
    /// event.
    pub async fn add_qso(&self, record: QsoRecord) {
        let mut s = self.inner.lock().await;
        if let Some(ch) = s.channels.get_mut(record.channel as usize) {
            ch.qso_count += 1;
        }
        s.total_qsos += 1;
        drop(s);
        tracing::info!(
            callsign = %record.callsign,
            band = %record.band,
            mode = %record.mode,
            "QSO completed"
        );
        self.emit(HubEvent::QsoLogged(record));
        self.mark_changed();
    }

    /// Emit a duplicate warning for a station about to be answered again.
    pub async fn warn_duplicate(&self, callsign: &str, band: &str, mode: &str) {
        tracing::warn!(
            callsign = callsign,
            band = band,
            mode = mode,
            "station already worked on this band and mode"
        );
        self.emit(HubEvent::DuplicateWarning {
            callsign: callsign.to_string(),
            band: band.to_string(),
            mode: mode.to_string(),
        });
    }

    /// Set a channel's pipeline status.
    pub async fn set_channel_status(&self, channel: u8, status: ChannelStatus) {
        let mut s = self.inner.lock().await;
        let Some(ch) = s.channels.get_mut(channel as usize) else {
            return;
        };
        if ch.status != status {
            ch.status = status;
            drop(s);
            self.mark_changed();
        }
    }

    /// Atomically make `channel` the TX channel. Idempotent.
    pub async fn set_tx_channel(&self, channel: u8) {
        let mut s = self.inner.lock().await;
        if s.tx_channel == Some(channel) {
            return;
        }
        for ch in s.channels.iter_mut() {
            ch.is_tx = ch.index == channel;
        }
        s.tx_channel = Some(channel);
        drop(s);
        tracing::debug!(channel = channel, "TX channel reassigned");
        self.mark_changed();
    }

    /// Mark a channel offline (decoder closed or slice removed).
    pub async fn mark_channel_offline(&self, channel: u8) {
        let mut s = self.inner.lock().await;
        let Some(ch) = s.channels.get_mut(channel as usize) else {
            return;
        };
        ch.connected = false;
        ch.status = ChannelStatus::Offline;
        ch.transmitting = false;
        ch.decoding = false;
        drop(s);
        self.mark_changed();
    }

    /// Register a decoder instance for a channel.
    ///
    /// Re-registration after a restart deliberately leaves `is_tx`
    /// untouched; the prior TX assignment persists across decoder
    /// restarts.
    pub async fn register_instance(&self, name: &str, channel: u8) {
        let mut s = self.inner.lock().await;
        s.instances
            .entry(name.to_string())
            .or_insert_with(|| DecoderInstance::new(name, channel));
        if let Some(ch) = s.channels.get_mut(channel as usize) {
            ch.instance = Some(name.to_string());
        }
        drop(s);
        self.mark_changed();
    }

    /// Record a successful first spawn of an instance.
    pub async fn set_instance_pid(&self, name: &str, pid: u32) {
        let mut s = self.inner.lock().await;
        if let Some(inst) = s.instances.get_mut(name) {
            inst.pid = Some(pid);
            inst.running = true;
            inst.last_start = Some(Utc::now());
            inst.last_error = None;
        }
        drop(s);
        self.mark_changed();
    }

    /// Record a respawn of an instance, bumping its restart count.
    pub async fn instance_restarted(&self, name: &str, pid: u32) {
        let mut s = self.inner.lock().await;
        if let Some(inst) = s.instances.get_mut(name) {
            inst.pid = Some(pid);
            inst.running = true;
            inst.restarts += 1;
            inst.last_start = Some(Utc::now());
            inst.last_error = None;
        }
        drop(s);
        self.mark_changed();
    }

    /// Record that an instance's process is gone.
    pub async fn instance_stopped(&self, name: &str, error: Option<&str>) {
        let mut s = self.inner.lock().await;
        if let Some(inst) = s.instances.get_mut(name) {
            inst.running = false;
            inst.pid = None;
            inst.last_error = error.map(str::to_string);
        }
        drop(s);
        self.mark_changed();
    }

    /// Drop an instance from the registry.
    pub async fn unregister_instance(&self, name: &str) {
        let mut s = self.inner.lock().await;
        if let Some(inst) = s.instances.remove(name) {
            if let Some(ch) = s.channels.get_mut(inst.channel as usize) {
                ch.instance = None;
            }
        }
        drop(s);
        self.mark_changed();
    }

    /// Count a discarded malformed frame or command.
    pub async fn count_parse_drop(&self) {
        let mut s = self.inner.lock().await;
        s.parse_drops += 1;
    }

    // -- Watchdog -----------------------------------------------------------

    /// Start the heartbeat watchdog with default timing.
    pub fn start_watchdog(self: &Arc<Self>) {
        self.start_watchdog_with(WATCHDOG_CADENCE, HEARTBEAT_TIMEOUT, RESTART_SPACING);
    }

    /// Start the heartbeat watchdog with explicit timing (tests).
    pub fn start_watchdog_with(
        self: &Arc<Self>,
        cadence: Duration,
        timeout: Duration,
        spacing: Duration,
    ) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(cadence);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(core) = weak.upgrade() else { break };
                core.watchdog_cycle(timeout, spacing).await;
            }
        });
    }

    /// One watchdog pass: detect dead channels and decide on restarts.
    async fn watchdog_cycle(&self, timeout: Duration, spacing: Duration) {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or_default();
        let spacing = chrono::Duration::from_std(spacing).unwrap_or_default();
        let now = Utc::now();

        let mut restart_events = Vec::new();
        let mut changed = false;

        {
            let mut s = self.inner.lock().await;

            // Phase 1: mark channels whose heartbeats stopped.
            for idx in 0..s.channels.len() {
                let ch = &s.channels[idx];
                let expired = ch
                    .last_heartbeat
                    .map(|hb| now - hb >= timeout)
                    .unwrap_or(false);
                if !(ch.connected && expired) {
                    continue;
                }
                let channel = ch.index;
                let instance = ch.instance.clone();
                let ch = &mut s.channels[idx];
                ch.connected = false;
                ch.status = ChannelStatus::Offline;
                changed = true;
                tracing::warn!(channel = channel, "heartbeat timeout");
                if let Some(name) = instance {
                    if let Some(inst) = s.instances.get_mut(&name) {
                        if inst.running {
                            inst.running = false;
                            inst.pid = None;
                            inst.last_error = Some("heartbeat timeout".to_string());
                        }
                    }
                }
            }

            // Phase 2: schedule restarts for instances lost to heartbeat
            // timeouts, within the restart policy.
            let mut error_channels = Vec::new();
            for inst in s.instances.values() {
                if inst.running || inst.last_error.as_deref() != Some("heartbeat timeout") {
                    continue;
                }
                if inst.restarts >= RESTART_LIMIT {
                    error_channels.push(inst.channel);
                    continue;
                }
                let spaced = inst
                    .last_start
                    .map(|t| now - t >= spacing)
                    .unwrap_or(true);
                if spaced {
                    restart_events.push(HubEvent::ChannelNeedsRestart {
                        channel: inst.channel,
                        instance: inst.name.clone(),
                        restarts: inst.restarts,
                    });
                }
            }
            for channel in error_channels {
                if let Some(ch) = s.channels.get_mut(channel as usize) {
                    if ch.status != ChannelStatus::Error {
                        tracing::error!(channel = channel, "restart limit reached");
                        ch.status = ChannelStatus::Error;
                        changed = true;
                    }
                }
            }
        }

        for event in restart_events {
            self.emit(event);
        }
        if changed {
            self.mark_changed();
        }
    }
}

// ---------------------------------------------------------------------------
// Debounce task
// ---------------------------------------------------------------------------

/// Coalesces change signals into at most one snapshot emission per window.
async fn debounce_loop(
    core: Weak<StateCore>,
    mut rx: mpsc::UnboundedReceiver<()>,
    window: Duration,
) {
    while rx.recv().await.is_some() {
        tokio::time::sleep(window).await;
        // Drain everything that accumulated during the window.
        while rx.try_recv().is_ok() {}
        let Some(core) = core.upgrade() else { break };
        let snapshot = core.snapshot().await;
        let _ = core.events.send(HubEvent::StateChanged(Arc::new(snapshot)));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
