//! Outbound control-frame link to one decoder.
//!
//! Each channel keeps a [`ChannelLink`]: the ingest socket plus the address
//! control frames are sent to. The target defaults to the loopback ingest
//! port and is replaced by the source address of the decoder's most recent
//! datagram, so replies always reach the socket the decoder actually sends
//! from.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::Arc;

use tokio::net::UdpSocket;

use slicehub_core::types::DecodeRecord;
use slicehub_core::Result;

use crate::message::{self, ConfigureFrame, ReplyFrame, MODIFIER_SHIFT};
use crate::wire::ms_since_midnight;

/// Send side of one channel's decoder link.
pub struct ChannelLink {
    index: u8,
    instance: String,
    socket: Arc<UdpSocket>,
    target: Mutex<SocketAddr>,
}

impl ChannelLink {
    pub fn new(
        index: u8,
        instance: impl Into<String>,
        socket: Arc<UdpSocket>,
        default_target: SocketAddr,
    ) -> Self {
        ChannelLink {
            index,
            instance: instance.into(),
            socket,
            target: Mutex::new(default_target),
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    /// Decoder instance name used as the frame identifier.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Current egress target.
    pub fn target(&self) -> SocketAddr {
        *self.target.lock().unwrap()
    }

    /// Update the egress target from an observed source address.
    pub fn set_target(&self, addr: SocketAddr) {
        *self.target.lock().unwrap() = addr;
    }

    async fn send(&self, frame: &[u8]) -> Result<()> {
        let target = self.target();
        self.socket.send_to(frame, target).await?;
        tracing::trace!(
            channel = self.index,
            target = %target,
            bytes = frame.len(),
            "control frame sent"
        );
        Ok(())
    }

    /// Answer a prior decode, the wire equivalent of double-clicking it.
    ///
    /// `auto_tx` sets the shift modifier, which makes the decoder enable
    /// TX as part of accepting the reply.
    pub async fn send_reply(&self, decode: &DecodeRecord, auto_tx: bool) -> Result<()> {
        self.send_reply_with_message(decode, &decode.callsign, auto_tx)
            .await
    }

    /// Answer a prior decode with an explicit message text.
    pub async fn send_reply_with_message(
        &self,
        decode: &DecodeRecord,
        text: &str,
        auto_tx: bool,
    ) -> Result<()> {
        let reply = ReplyFrame {
            time_ms: ms_since_midnight(decode.timestamp),
            snr_db: decode.snr_db,
            dt_sec: decode.dt_sec,
            delta_freq_hz: decode.audio_offset_hz,
            mode: decode.mode.clone(),
            message: text.to_string(),
            low_confidence: decode.flags.low_confidence,
            modifiers: if auto_tx { MODIFIER_SHIFT } else { 0 },
        };
        self.send(&message::encode_reply(&self.instance, &reply))
            .await
    }

    /// Set or send arbitrary outbound text.
    pub async fn send_free_text(&self, text: &str, send: bool) -> Result<()> {
        self.send(&message::encode_free_text(&self.instance, text, send))
            .await
    }

    /// Push configuration changes to the decoder.
    pub async fn send_configure(&self, cfg: &ConfigureFrame) -> Result<()> {
        self.send(&message::encode_configure(&self.instance, cfg))
            .await
    }

    /// Stop the decoder's transmitter.
    pub async fn send_halt_tx(&self, auto_tx_only: bool) -> Result<()> {
        self.send(&message::encode_halt_tx(&self.instance, auto_tx_only))
            .await
    }

    /// Clear a decoder window (0, 1, or 2).
    pub async fn send_clear(&self, window: u8) -> Result<()> {
        self.send(&message::encode_clear(&self.instance, window))
            .await
    }

    /// Ask the decoder to shut down gracefully.
    pub async fn send_close(&self) -> Result<()> {
        self.send(&message::encode_close(&self.instance)).await
    }
}
