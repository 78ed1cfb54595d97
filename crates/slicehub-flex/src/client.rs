//! SmartSDR TCP client implementing the hub's `RadioBackend`.
//!
//! Maintains the command channel on port 4992, parses unsolicited slice
//! status messages into backend events, and reconnects with exponential
//! backoff (1 s doubling to a 60 s cap) whenever the radio goes away.
//! While disconnected every command fails with `NotConnected`, which the
//! HRD servers surface as `RPRT -9`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use slicehub_core::{
    BackendEvent, Error, RadioBackend, RadioMode, Result, SliceInfo, FLEX_TCP_PORT,
};

use crate::codec::{self, FlexMessage, SliceStatus};

/// Broadcast capacity for backend events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection options.
#[derive(Debug, Clone)]
pub struct FlexOptions {
    /// Client program name sent during registration.
    pub client_name: String,
    /// Timeout for one TCP connect attempt.
    pub connect_timeout: Duration,
    /// First reconnect delay after a disconnect.
    pub reconnect_initial: Duration,
    /// Reconnect delay cap.
    pub reconnect_cap: Duration,
}

impl Default for FlexOptions {
    fn default() -> Self {
        FlexOptions {
            client_name: "slicehub".to_string(),
            connect_timeout: Duration::from_secs(5),
            reconnect_initial: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(60),
        }
    }
}

/// Cached per-slice state assembled from status messages.
#[derive(Debug, Clone)]
struct FlexSlice {
    index: u8,
    freq_hz: u64,
    mode: RadioMode,
    tx: bool,
    in_use: bool,
    dax: u8,
}

impl FlexSlice {
    fn new(index: u8) -> Self {
        FlexSlice {
            index,
            freq_hz: 0,
            mode: RadioMode::USB,
            tx: false,
            in_use: false,
            dax: 0,
        }
    }

    fn info(&self) -> SliceInfo {
        SliceInfo {
            index: self.index,
            freq_hz: self.freq_hz,
            mode: self.mode,
            is_tx: self.tx,
            audio_rx: self.dax,
        }
    }
}

struct Inner {
    host: String,
    port: u16,
    options: FlexOptions,
    writer: Mutex<Option<OwnedWriteHalf>>,
    next_seq: Mutex<u32>,
    slices: Mutex<HashMap<u8, FlexSlice>>,
    events: broadcast::Sender<BackendEvent>,
    connected: AtomicBool,
    shutdown: AtomicBool,
}

/// SmartSDR radio backend. Clone-cheap handle; share via `Arc<dyn
/// RadioBackend>`.
pub struct FlexBackend {
    inner: Arc<Inner>,
    manager: Mutex<Option<JoinHandle<()>>>,
}

impl FlexBackend {
    /// Backend for a radio at `host`, on the standard port with default
    /// options.
    pub fn new(host: impl Into<String>) -> Self {
        Self::with_options(host, FLEX_TCP_PORT, FlexOptions::default())
    }

    pub fn with_options(host: impl Into<String>, port: u16, options: FlexOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        FlexBackend {
            inner: Arc::new(Inner {
                host: host.into(),
                port,
                options,
                writer: Mutex::new(None),
                next_seq: Mutex::new(1),
                slices: Mutex::new(HashMap::new()),
                events,
                connected: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
            manager: Mutex::new(None),
        }
    }

    async fn send_command(&self, command: &str) -> Result<()> {
        let inner = &self.inner;
        if !inner.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let seq = {
            let mut next = inner.next_seq.lock().await;
            let seq = *next;
            *next = next.wrapping_add(1);
            seq
        };
        let encoded = codec::encode_command(seq, command);
        tracing::trace!(seq = seq, command = %command, "sending radio command");

        let mut writer = inner.writer.lock().await;
        let w = writer.as_mut().ok_or(Error::NotConnected)?;
        w.write_all(&encoded)
            .await
            .map_err(|e| Error::Transport(format!("failed to send command: {e}")))?;
        w.flush()
            .await
            .map_err(|e| Error::Transport(format!("failed to flush command: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl RadioBackend for FlexBackend {
    async fn connect(&self) -> Result<()> {
        let mut manager = self.manager.lock().await;
        if let Some(handle) = manager.as_ref() {
            if !handle.is_finished() {
                return Ok(());
            }
        }
        self.inner.shutdown.store(false, Ordering::SeqCst);
        *manager = Some(tokio::spawn(run_manager(Arc::clone(&self.inner))));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        inner.shutdown.store(true, Ordering::SeqCst);

        {
            let mut writer = inner.writer.lock().await;
            if let Some(mut w) = writer.take() {
                let _ = w.shutdown().await;
            }
        }
        if let Some(handle) = self.manager.lock().await.take() {
            handle.abort();
        }
        if inner.connected.swap(false, Ordering::SeqCst) {
            let _ = inner.events.send(BackendEvent::Disconnected);
        }
        tracing::debug!("radio backend disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn list_slices(&self) -> Result<Vec<SliceInfo>> {
        let slices = self.inner.slices.lock().await;
        let mut out: Vec<SliceInfo> = slices
            .values()
            .filter(|s| s.in_use)
            .map(FlexSlice::info)
            .collect();
        out.sort_by_key(|s| s.index);
        Ok(out)
    }

    async fn tune_slice(&self, index: u8, freq_hz: u64) -> Result<()> {
        self.send_command(&codec::cmd_slice_tune(index, freq_hz)).await
    }

    async fn set_slice_mode(&self, index: u8, mode: RadioMode) -> Result<()> {
        self.send_command(&codec::cmd_slice_set_mode(index, mode.as_str()))
            .await
    }

    async fn set_slice_tx(&self, index: u8, tx: bool) -> Result<()> {
        self.send_command(&codec::cmd_slice_set_tx(index, tx)).await
    }

    async fn set_slice_audio(&self, index: u8, channel: u8) -> Result<()> {
        self.send_command(&codec::cmd_slice_set_dax(index, channel))
            .await
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.inner.events.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Connection manager
// ---------------------------------------------------------------------------

/// Connect, run the read loop, and reconnect with backoff until shutdown.
async fn run_manager(inner: Arc<Inner>) {
    let mut delay = inner.options.reconnect_initial;
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }

        match attempt_connect(&inner).await {
            Ok(reader) => {
                delay = inner.options.reconnect_initial;
                inner.connected.store(true, Ordering::SeqCst);
                let _ = inner.events.send(BackendEvent::Connected);
                tracing::info!(host = %inner.host, port = inner.port, "radio connected");

                read_loop(&inner, reader).await;

                inner.connected.store(false, Ordering::SeqCst);
                *inner.writer.lock().await = None;
                let _ = inner.events.send(BackendEvent::Disconnected);
                tracing::warn!(host = %inner.host, "radio connection lost");

                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(host = %inner.host, error = %e, "radio connect attempt failed");
            }
        }

        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(inner.options.reconnect_cap);
    }
}

/// One TCP connect attempt; on success, registers the client and
/// subscribes to slice status.
async fn attempt_connect(inner: &Inner) -> Result<BufReader<OwnedReadHalf>> {
    let addr = format!("{}:{}", inner.host, inner.port);
    tracing::debug!(addr = %addr, "connecting to radio");

    let stream = tokio::time::timeout(inner.options.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(|e| Error::Transport(format!("TCP connect failed: {e}")))?;
    let _ = stream.set_nodelay(true);

    let (read_half, mut write_half) = stream.into_split();

    // Registration and subscription; sequence numbers restart per
    // connection.
    {
        let mut next = inner.next_seq.lock().await;
        *next = 1;
    }
    for command in [
        codec::cmd_client_program(&inner.options.client_name),
        codec::cmd_subscribe("slice all"),
    ] {
        let seq = {
            let mut next = inner.next_seq.lock().await;
            let seq = *next;
            *next = next.wrapping_add(1);
            seq
        };
        write_half
            .write_all(&codec::encode_command(seq, &command))
            .await
            .map_err(|e| Error::Transport(format!("handshake write failed: {e}")))?;
    }

    *inner.writer.lock().await = Some(write_half);
    Ok(BufReader::new(read_half))
}

/// Read lines until the connection drops.
async fn read_loop(inner: &Inner, mut reader: BufReader<OwnedReadHalf>) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if trimmed.is_empty() {
                    continue;
                }
                match codec::parse_line(trimmed) {
                    Ok(FlexMessage::Status(status)) => {
                        if let Some(slice) = codec::parse_slice_status(&status) {
                            apply_slice_status(inner, slice).await;
                        }
                    }
                    Ok(FlexMessage::Response(resp)) => {
                        if resp.error_code != 0 {
                            tracing::debug!(
                                seq = resp.sequence,
                                code = format!("0x{:08X}", resp.error_code),
                                data = %resp.data,
                                "radio command error"
                            );
                        }
                    }
                    Ok(FlexMessage::Version(v)) => {
                        tracing::debug!(version = %v, "radio version");
                    }
                    Ok(FlexMessage::Handle(h)) => {
                        tracing::debug!(handle = format!("{h:08X}"), "radio client handle");
                    }
                    Ok(FlexMessage::Message(text)) => {
                        tracing::debug!(message = %text, "radio message");
                    }
                    Ok(FlexMessage::Unknown(l)) => {
                        tracing::trace!(line = %l, "unknown radio line");
                    }
                    Err(e) => {
                        tracing::trace!(error = %e, line = %trimmed, "failed to parse radio line");
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "radio read error");
                break;
            }
        }
    }
}

/// Fold a slice status into the cache and emit lifecycle events on
/// liveness transitions.
async fn apply_slice_status(inner: &Inner, status: SliceStatus) {
    let event = {
        let mut slices = inner.slices.lock().await;
        let slice = slices
            .entry(status.index)
            .or_insert_with(|| FlexSlice::new(status.index));

        let was_in_use = slice.in_use;
        if let Some(freq) = status.freq_hz {
            slice.freq_hz = freq;
        }
        if let Some(mode_str) = &status.mode {
            match mode_str.parse::<RadioMode>() {
                Ok(mode) => slice.mode = mode,
                Err(_) => {
                    tracing::trace!(mode = %mode_str, "unmapped radio mode");
                }
            }
        }
        if let Some(tx) = status.tx {
            slice.tx = tx;
        }
        if let Some(dax) = status.dax {
            slice.dax = dax;
        }
        if let Some(in_use) = status.in_use {
            slice.in_use = in_use;
        }

        match (was_in_use, slice.in_use) {
            (false, true) => Some(BackendEvent::SliceAdded(slice.info())),
            (true, false) => Some(BackendEvent::SliceRemoved {
                index: slice.index,
            }),
            (true, true) => Some(BackendEvent::SliceUpdated(slice.info())),
            (false, false) => None,
        }
    };

    if let Some(event) = event {
        tracing::debug!(event = ?event, "slice event");
        let _ = inner.events.send(event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
