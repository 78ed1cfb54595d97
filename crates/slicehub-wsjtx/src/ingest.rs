//! Per-channel UDP ingest.
//!
//! One listener per channel, bound to `base_port + index` on loopback.
//! Each listener parses inbound datagrams and feeds the state core;
//! malformed frames are discarded and counted, never escalated -- a bad
//! datagram must not take a listener down.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use slicehub_core::band::band_name;
use slicehub_core::message as decode_text;
use slicehub_core::types::{
    channel_letter, DecodeFlags, DecodeRecord, QsoRecord, StationProfile, UDP_BASE_PORT,
};
use slicehub_core::{Error, Result};

use slicehub_state::{DecoderStatusUpdate, StateCore};

use crate::egress::ChannelLink;
use crate::message::{self, DecoderMessage};

/// Manages the four per-channel ingest listeners and their egress links.
pub struct IngestManager {
    core: Arc<StateCore>,
    profile: StationProfile,
    base_port: u16,
    channels: Mutex<HashMap<u8, ChannelEntry>>,
}

struct ChannelEntry {
    link: Arc<ChannelLink>,
    task: JoinHandle<()>,
}

impl IngestManager {
    pub fn new(core: Arc<StateCore>, profile: StationProfile) -> Self {
        Self::with_base_port(core, profile, UDP_BASE_PORT)
    }

    /// Use a non-standard base port (tests).
    pub fn with_base_port(core: Arc<StateCore>, profile: StationProfile, base_port: u16) -> Self {
        IngestManager {
            core,
            profile,
            base_port,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// UDP port assigned to a channel.
    pub fn port_for(&self, index: u8) -> u16 {
        self.base_port + index as u16
    }

    /// Start the listener for a channel. A second call while the listener
    /// is running is a no-op.
    pub async fn start_channel(&self, index: u8, instance: &str) -> Result<()> {
        let mut channels = self.channels.lock().await;
        if let Some(entry) = channels.get(&index) {
            if !entry.task.is_finished() {
                tracing::debug!(channel = index, "ingest already running");
                return Ok(());
            }
            channels.remove(&index);
        }

        let port = self.port_for(index);
        let bind_addr = format!("127.0.0.1:{port}");
        let socket = UdpSocket::bind(&bind_addr).await.map_err(|e| {
            Error::Transport(format!("failed to bind decoder UDP port {bind_addr}: {e}"))
        })?;
        let socket = Arc::new(socket);

        let default_target: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let link = Arc::new(ChannelLink::new(
            index,
            instance,
            Arc::clone(&socket),
            default_target,
        ));

        let task = tokio::spawn(listen_loop(
            Arc::clone(&self.core),
            self.profile.clone(),
            Arc::clone(&link),
            socket,
        ));

        tracing::debug!(channel = index, port = port, instance = instance, "ingest started");
        channels.insert(index, ChannelEntry { link, task });
        Ok(())
    }

    /// Stop a channel's listener. Unbalanced calls are no-ops.
    pub async fn stop_channel(&self, index: u8) {
        let mut channels = self.channels.lock().await;
        if let Some(entry) = channels.remove(&index) {
            entry.task.abort();
            tracing::debug!(channel = index, "ingest stopped");
        }
    }

    /// Egress link for a channel, if its listener was started.
    pub async fn link(&self, index: u8) -> Option<Arc<ChannelLink>> {
        let channels = self.channels.lock().await;
        channels.get(&index).map(|e| Arc::clone(&e.link))
    }

    /// Send graceful Close frames to every started channel.
    pub async fn close_all(&self) {
        let links: Vec<Arc<ChannelLink>> = {
            let channels = self.channels.lock().await;
            channels.values().map(|e| Arc::clone(&e.link)).collect()
        };
        for link in links {
            if let Err(e) = link.send_close().await {
                tracing::debug!(channel = link.index(), error = %e, "close frame failed");
            }
        }
    }

    /// Stop every listener.
    pub async fn stop_all(&self) {
        let mut channels = self.channels.lock().await;
        for (_, entry) in channels.drain() {
            entry.task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Listener loop
// ---------------------------------------------------------------------------

async fn listen_loop(
    core: Arc<StateCore>,
    profile: StationProfile,
    link: Arc<ChannelLink>,
    socket: Arc<UdpSocket>,
) {
    let index = link.index();
    let mut buf = [0u8; 8192];

    loop {
        let (n, src) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                tracing::trace!(channel = index, error = %e, "UDP recv error");
                continue;
            }
        };

        // Replies go wherever the decoder actually sends from, but never
        // back to our own listening socket.
        if Some(src) != socket.local_addr().ok() {
            link.set_target(src);
        }

        let msg = match message::parse_datagram(&buf[..n]) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::trace!(channel = index, error = %e, "discarding malformed datagram");
                core.count_parse_drop().await;
                continue;
            }
        };

        match msg {
            DecoderMessage::Heartbeat { .. } => {
                core.record_heartbeat(index).await;
            }
            DecoderMessage::Status(s) => {
                core.update_from_decoder_status(
                    index,
                    DecoderStatusUpdate {
                        dial_hz: s.dial_hz,
                        mode: message::normalize_mode(&s.mode),
                        dx_call: s.dx_call,
                        report: s.report,
                        tx_mode: s.tx_mode,
                        tx_enabled: s.tx_enabled,
                        transmitting: s.transmitting,
                        decoding: s.decoding,
                        rx_offset_hz: s.rx_offset_hz,
                        tx_offset_hz: s.tx_offset_hz,
                    },
                )
                .await;
            }
            DecoderMessage::Decode(d) => {
                if let Some(record) = build_decode(&core, &profile, index, &d).await {
                    core.add_decode(record).await;
                }
            }
            DecoderMessage::QsoLogged(q) => {
                let record = build_qso(index, link.instance(), &q);
                core.add_qso(record).await;
            }
            DecoderMessage::Close { .. } => {
                tracing::info!(channel = index, "decoder closed its UDP session");
                core.mark_channel_offline(index).await;
                break;
            }
            DecoderMessage::Outbound { msg_type } => {
                tracing::trace!(channel = index, msg_type = msg_type, "ignoring looped-back frame");
            }
            DecoderMessage::Unsupported { msg_type } => {
                tracing::trace!(channel = index, msg_type = msg_type, "unsupported message type");
                core.count_parse_drop().await;
            }
        }
    }
}

/// Assemble an enriched decode record; `None` drops the decode (no valid
/// callsign).
async fn build_decode(
    core: &StateCore,
    profile: &StationProfile,
    index: u8,
    d: &message::DecodeFields,
) -> Option<DecodeRecord> {
    let parsed = decode_text::parse_text(&d.text);
    let callsign = match parsed.callsign {
        Some(c) => c,
        None => {
            tracing::trace!(channel = index, text = %d.text, "decode without callsign dropped");
            return None;
        }
    };

    let dial_hz = core.channel(index).await.map(|c| c.dial_hz).unwrap_or(0);
    let directed = parsed.is_cq
        && decode_text::is_directed_cq_to_me(parsed.cq_target.as_deref(), profile);

    Some(DecodeRecord {
        channel: index,
        slice: channel_letter(index),
        timestamp: Utc::now(),
        band: band_name(dial_hz),
        mode: message::normalize_mode(&d.mode),
        dial_hz,
        audio_offset_hz: d.delta_freq_hz,
        rf_hz: dial_hz + d.delta_freq_hz as u64,
        snr_db: d.snr_db,
        dt_sec: d.dt_sec,
        callsign,
        grid: parsed.grid,
        is_cq: parsed.is_cq,
        is_my_call: decode_text::is_my_call(&d.text, &profile.callsign),
        is_directed_cq_to_me: directed,
        cq_target: parsed.cq_target,
        text: d.text.clone(),
        flags: DecodeFlags {
            is_new: d.is_new,
            low_confidence: d.low_confidence,
            off_air: d.off_air,
        },
    })
}

fn build_qso(index: u8, instance: &str, q: &message::QsoLoggedFields) -> QsoRecord {
    let end = q.time_off.unwrap_or_else(Utc::now);
    let start = q.time_on.unwrap_or(end);
    QsoRecord {
        start,
        end,
        callsign: q.dx_call.to_uppercase(),
        grid: (!q.dx_grid.is_empty()).then(|| q.dx_grid.clone()),
        band: band_name(q.tx_freq_hz),
        dial_hz: q.tx_freq_hz,
        mode: q.mode.clone(),
        report_sent: q.report_sent.clone(),
        report_received: q.report_received.clone(),
        tx_power_watts: q.tx_power.parse().ok(),
        slice: channel_letter(index),
        channel: index,
        instance: instance.to_string(),
        notes: (!q.comments.is_empty()).then(|| q.comments.clone()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
