//! HRD rig-control TCP servers.
//!
//! Five listeners run in a full deployment: one per channel (7809..7812)
//! serving that channel to its decoder, and one aggregate (7800) serving
//! the current TX channel to external loggers. Each accepted connection
//! gets its own handler task; a slow client never blocks another channel.
//!
//! Error semantics: `RPRT 0` ok, `RPRT -1` unrecognized command,
//! `RPRT -9` recognized but the radio backend is not available.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use slicehub_core::{Error, RadioBackend, RadioMode, Result};
use slicehub_state::{HubEvent, SliceUpdate, StateCore};

use crate::command::{parse_command, HrdCommand};
use crate::frame::{decode_frame, encode_frame, DecodeResult};

/// Which channel a server speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedChannel {
    /// A per-channel server, bound to one fixed channel index.
    Fixed(u8),
    /// The aggregate server: always the current TX channel.
    TxChannel,
}

/// A running HRD server.
pub struct HrdServer {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl HrdServer {
    /// Bind and start serving. A bind conflict is a startup-fatal error
    /// surfaced to the caller.
    pub async fn start(
        addr: &str,
        served: ServedChannel,
        core: Arc<StateCore>,
        backend: Option<Arc<dyn RadioBackend>>,
    ) -> Result<HrdServer> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("failed to bind HRD port {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Transport(format!("local_addr: {e}")))?;

        tracing::debug!(addr = %local_addr, served = ?served, "HRD server listening");

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "HRD client connected");
                        let ctx = ConnCtx {
                            served,
                            core: Arc::clone(&core),
                            backend: backend.clone(),
                        };
                        tokio::spawn(async move {
                            handle_connection(stream, ctx).await;
                            tracing::debug!(peer = %peer, "HRD client disconnected");
                        });
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "HRD accept error");
                    }
                }
            }
        });

        Ok(HrdServer { local_addr, task })
    }

    /// The bound address (useful when started with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Existing connection handlers finish on their own.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for HrdServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct ConnCtx {
    served: ServedChannel,
    core: Arc<StateCore>,
    backend: Option<Arc<dyn RadioBackend>>,
}

impl ConnCtx {
    async fn channel_index(&self) -> u8 {
        match self.served {
            ServedChannel::Fixed(i) => i,
            ServedChannel::TxChannel => self.core.tx_channel().await.unwrap_or(0),
        }
    }
}

async fn handle_connection(stream: TcpStream, ctx: ConnCtx) {
    let _ = stream.set_nodelay(true);
    let (mut rd, mut wr) = stream.into_split();
    let mut events = ctx.core.subscribe();

    // Seed the change tracker so only real changes push updates.
    let mut last_pushed = {
        let snap = ctx.core.snapshot().await;
        served_view(&ctx, &snap).await
    };

    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        tokio::select! {
            read = rd.read(&mut chunk) => {
                let n = match read {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        tracing::trace!(error = %e, "HRD read error");
                        break;
                    }
                };
                buf.extend_from_slice(&chunk[..n]);

                loop {
                    match decode_frame(&buf) {
                        Ok(DecodeResult::Frame { payload, consumed }) => {
                            buf.drain(..consumed);
                            tracing::trace!(command = %payload, "HRD command");
                            let responses = execute(&ctx, parse_command(&payload)).await;
                            for resp in responses {
                                if wr.write_all(&encode_frame(&resp)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Ok(DecodeResult::Incomplete) => break,
                        Err(e) => {
                            // Framing is gone; count it and drop the
                            // connection, the listener stays up.
                            tracing::debug!(error = %e, "HRD framing error, closing connection");
                            ctx.core.count_parse_drop().await;
                            return;
                        }
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Ok(HubEvent::StateChanged(snap)) => {
                        let current = served_view(&ctx, &snap).await;
                        let lines = changed_lines(&last_pushed, &current);
                        last_pushed = current;
                        for line in lines {
                            if wr.write_all(&encode_frame(&line)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// The (frequency, mode, ptt) triple this connection serves.
async fn served_view(
    ctx: &ConnCtx,
    snap: &slicehub_state::HubSnapshot,
) -> (u64, RadioMode, bool) {
    let index = match ctx.served {
        ServedChannel::Fixed(i) => i,
        ServedChannel::TxChannel => snap.tx_channel.unwrap_or(0),
    };
    snap.channels
        .get(index as usize)
        .map(|ch| (ch.dial_hz, ch.mode, ch.is_tx))
        .unwrap_or((0, RadioMode::USB, false))
}

/// Unsolicited update lines for every field that changed.
fn changed_lines(old: &(u64, RadioMode, bool), new: &(u64, RadioMode, bool)) -> Vec<String> {
    let mut lines = Vec::new();
    if old.0 != new.0 {
        lines.push(format!("frequency {}\r\n", new.0));
    }
    if old.1 != new.1 {
        lines.push(format!("mode {}\r\n", new.1));
    }
    if old.2 != new.2 {
        lines.push(format!("ptt {}\r\n", if new.2 { "on" } else { "off" }));
    }
    lines
}

/// Execute one command, producing the response payloads in order.
async fn execute(ctx: &ConnCtx, cmd: HrdCommand) -> Vec<String> {
    let index = ctx.channel_index().await;

    match cmd {
        HrdCommand::GetFrequency => {
            let hz = ctx
                .core
                .channel(index)
                .await
                .map(|ch| ch.dial_hz)
                .unwrap_or(0);
            vec![hz.to_string(), "RPRT 0".into()]
        }

        HrdCommand::SetFrequencyHz(hz) => match &ctx.backend {
            Some(backend) => {
                if !backend.is_connected() {
                    return vec!["RPRT -9".into()];
                }
                match backend.tune_slice(index, hz).await {
                    Ok(()) => vec!["RPRT 0".into()],
                    Err(e) => {
                        tracing::debug!(error = %e, "backend retune failed");
                        vec!["RPRT -9".into()]
                    }
                }
            }
            // Without a radio backend the channel state is the radio.
            None => {
                ctx.core
                    .update_from_backend(
                        index,
                        SliceUpdate {
                            freq_hz: Some(hz),
                            ..SliceUpdate::default()
                        },
                    )
                    .await;
                vec!["RPRT 0".into()]
            }
        },

        HrdCommand::GetMode => {
            let mode = ctx
                .core
                .channel(index)
                .await
                .map(|ch| ch.mode)
                .unwrap_or(RadioMode::USB);
            vec![mode.to_string()]
        }

        HrdCommand::SetMode(mode) => match &ctx.backend {
            Some(backend) => {
                if !backend.is_connected() {
                    return vec!["RPRT -9".into()];
                }
                match backend.set_slice_mode(index, mode).await {
                    Ok(()) => vec!["RPRT 0".into()],
                    Err(_) => vec!["RPRT -9".into()],
                }
            }
            None => {
                ctx.core
                    .update_from_backend(
                        index,
                        SliceUpdate {
                            mode: Some(mode),
                            ..SliceUpdate::default()
                        },
                    )
                    .await;
                vec!["RPRT 0".into()]
            }
        },

        HrdCommand::GetPtt => {
            // PTT is the state core's TX assignment, the same field SetPtt
            // writes and the unsolicited push diffs on.
            let ptt = ctx
                .core
                .channel(index)
                .await
                .map(|ch| ch.is_tx)
                .unwrap_or(false);
            vec![if ptt { "1" } else { "0" }.into(), "RPRT 0".into()]
        }

        HrdCommand::SetPtt(on) => {
            if let Some(backend) = &ctx.backend {
                if !backend.is_connected() {
                    return vec!["RPRT -9".into()];
                }
                if backend.set_slice_tx(index, on).await.is_err() {
                    return vec!["RPRT -9".into()];
                }
            }
            // Mirror the assignment into the state core so a follow-up
            // get (and the ptt push) see it without waiting for the
            // radio's status echo.
            ctx.core
                .update_from_backend(
                    index,
                    SliceUpdate {
                        is_tx: Some(on),
                        ..SliceUpdate::default()
                    },
                )
                .await;
            vec!["RPRT 0".into()]
        }

        HrdCommand::GetRadio => vec!["Slicehub".into()],
        HrdCommand::GetRadios => vec!["1: Slicehub".into()],
        HrdCommand::GetContext => vec!["1".into()],
        HrdCommand::GetContexts => vec!["1: Slicehub".into()],

        HrdCommand::Unknown(line) => {
            tracing::debug!(command = %line, "unrecognized HRD command");
            ctx.core.count_parse_drop().await;
            vec!["RPRT -1".into()]
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use slicehub_core::{BackendEvent, SliceInfo};

    /// Scripted backend stand-in recording the calls it receives.
    struct MockBackend {
        connected: AtomicBool,
        calls: StdMutex<Vec<String>>,
        events: broadcast::Sender<BackendEvent>,
    }

    impl MockBackend {
        fn new(connected: bool) -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(MockBackend {
                connected: AtomicBool::new(connected),
                calls: StdMutex::new(Vec::new()),
                events,
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl RadioBackend for MockBackend {
        async fn connect(&self) -> Result<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        async fn list_slices(&self) -> Result<Vec<SliceInfo>> {
            Ok(vec![])
        }
        async fn tune_slice(&self, index: u8, freq_hz: u64) -> Result<()> {
            self.record(format!("tune {index} {freq_hz}"));
            Ok(())
        }
        async fn set_slice_mode(&self, index: u8, mode: RadioMode) -> Result<()> {
            self.record(format!("mode {index} {mode}"));
            Ok(())
        }
        async fn set_slice_tx(&self, index: u8, tx: bool) -> Result<()> {
            self.record(format!("tx {index} {tx}"));
            Ok(())
        }
        async fn set_slice_audio(&self, index: u8, channel: u8) -> Result<()> {
            self.record(format!("audio {index} {channel}"));
            Ok(())
        }
        fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
            self.events.subscribe()
        }
    }

    async fn send_cmd(stream: &mut TcpStream, cmd: &str) {
        stream.write_all(&encode_frame(cmd)).await.unwrap();
    }

    /// Read one framed payload from the stream.
    async fn recv_frame(stream: &mut TcpStream, buf: &mut Vec<u8>) -> String {
        let mut chunk = [0u8; 1024];
        loop {
            if let DecodeResult::Frame { payload, consumed } = decode_frame(buf).unwrap() {
                buf.drain(..consumed);
                return payload;
            }
            let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut chunk))
                .await
                .expect("frame should arrive")
                .unwrap();
            assert_ne!(n, 0, "connection closed while awaiting frame");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read the next command response, skipping any unsolicited update
    /// lines (CRLF-terminated) the server interleaves.
    async fn recv_response(stream: &mut TcpStream, buf: &mut Vec<u8>) -> String {
        loop {
            let payload = recv_frame(stream, buf).await;
            if !payload.ends_with("\r\n") {
                return payload;
            }
        }
    }

    async fn start_fixed(
        core: &Arc<StateCore>,
        backend: Option<Arc<dyn RadioBackend>>,
        index: u8,
    ) -> (HrdServer, TcpStream, Vec<u8>) {
        let server = HrdServer::start(
            "127.0.0.1:0",
            ServedChannel::Fixed(index),
            Arc::clone(core),
            backend,
        )
        .await
        .unwrap();
        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        (server, stream, Vec::new())
    }

    #[tokio::test]
    async fn get_frequency_reports_channel_dial() {
        let core = StateCore::new();
        core.update_from_backend(
            0,
            SliceUpdate {
                freq_hz: Some(14_074_000),
                ..SliceUpdate::default()
            },
        )
        .await;

        let (_server, mut stream, mut buf) = start_fixed(&core, None, 0).await;
        send_cmd(&mut stream, "get frequency").await;
        assert_eq!(recv_frame(&mut stream, &mut buf).await, "14074000");
        assert_eq!(recv_frame(&mut stream, &mut buf).await, "RPRT 0");
    }

    #[tokio::test]
    async fn set_frequency_without_backend_updates_state() {
        let core = StateCore::new();
        let (_server, mut stream, mut buf) = start_fixed(&core, None, 1).await;

        send_cmd(&mut stream, "set frequency-hz 7074000").await;
        assert_eq!(recv_frame(&mut stream, &mut buf).await, "RPRT 0");

        let ch = core.channel(1).await.unwrap();
        assert_eq!(ch.dial_hz, 7_074_000);
        assert_eq!(ch.band, "40m");
    }

    #[tokio::test]
    async fn set_frequency_reaches_backend() {
        let core = StateCore::new();
        let mock = MockBackend::new(true);
        let backend: Arc<dyn RadioBackend> = mock.clone();
        let (_server, mut stream, mut buf) = start_fixed(&core, Some(backend), 2).await;

        send_cmd(&mut stream, "set frequency-hz 21074000").await;
        assert_eq!(recv_frame(&mut stream, &mut buf).await, "RPRT 0");
        assert_eq!(mock.calls(), vec!["tune 2 21074000"]);
    }

    #[tokio::test]
    async fn disconnected_backend_answers_rprt_minus_nine() {
        let core = StateCore::new();
        let mock = MockBackend::new(false);
        let backend: Arc<dyn RadioBackend> = mock.clone();
        let (_server, mut stream, mut buf) = start_fixed(&core, Some(backend), 0).await;

        send_cmd(&mut stream, "set frequency-hz 14074000").await;
        assert_eq!(recv_frame(&mut stream, &mut buf).await, "RPRT -9");
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_command_answers_rprt_minus_one() {
        let core = StateCore::new();
        let (_server, mut stream, mut buf) = start_fixed(&core, None, 0).await;
        send_cmd(&mut stream, "frobnicate the antenna").await;
        assert_eq!(recv_frame(&mut stream, &mut buf).await, "RPRT -1");
    }

    #[tokio::test]
    async fn selector_prefix_accepted() {
        let core = StateCore::new();
        let (_server, mut stream, mut buf) = start_fixed(&core, None, 0).await;
        send_cmd(&mut stream, "[1] get mode").await;
        assert_eq!(recv_frame(&mut stream, &mut buf).await, "DIGU");
    }

    #[tokio::test]
    async fn ptt_roundtrip() {
        let core = StateCore::new();
        let mock = MockBackend::new(true);
        let backend: Arc<dyn RadioBackend> = mock.clone();
        let (_server, mut stream, mut buf) = start_fixed(&core, Some(backend), 1).await;

        send_cmd(&mut stream, "get button-select {TX}").await;
        assert_eq!(recv_response(&mut stream, &mut buf).await, "0");
        assert_eq!(recv_response(&mut stream, &mut buf).await, "RPRT 0");

        send_cmd(&mut stream, "set button-select {TX} 1").await;
        assert_eq!(recv_response(&mut stream, &mut buf).await, "RPRT 0");
        assert_eq!(mock.calls(), vec!["tx 1 true"]);

        // The defensive read-back a rig-control client performs: the set
        // must be visible to an immediate get.
        send_cmd(&mut stream, "get button-select {TX}").await;
        assert_eq!(recv_response(&mut stream, &mut buf).await, "1");
        assert_eq!(recv_response(&mut stream, &mut buf).await, "RPRT 0");
        assert!(core.channel(1).await.unwrap().is_tx);

        send_cmd(&mut stream, "set button-select {TX} 0").await;
        assert_eq!(recv_response(&mut stream, &mut buf).await, "RPRT 0");
        send_cmd(&mut stream, "get button-select {TX}").await;
        assert_eq!(recv_response(&mut stream, &mut buf).await, "0");
        assert_eq!(recv_response(&mut stream, &mut buf).await, "RPRT 0");
        assert_eq!(mock.calls(), vec!["tx 1 true", "tx 1 false"]);
    }

    #[tokio::test]
    async fn ptt_roundtrip_without_backend() {
        let core = StateCore::new();
        let (_server, mut stream, mut buf) = start_fixed(&core, None, 2).await;

        send_cmd(&mut stream, "set button-select {TX} 1").await;
        assert_eq!(recv_response(&mut stream, &mut buf).await, "RPRT 0");
        send_cmd(&mut stream, "get button-select {TX}").await;
        assert_eq!(recv_response(&mut stream, &mut buf).await, "1");
        assert_eq!(recv_response(&mut stream, &mut buf).await, "RPRT 0");
        assert_eq!(core.tx_channel().await, Some(2));

        send_cmd(&mut stream, "set button-select {TX} 0").await;
        assert_eq!(recv_response(&mut stream, &mut buf).await, "RPRT 0");
        send_cmd(&mut stream, "get button-select {TX}").await;
        assert_eq!(recv_response(&mut stream, &mut buf).await, "0");
        assert_eq!(recv_response(&mut stream, &mut buf).await, "RPRT 0");
        assert_eq!(core.tx_channel().await, None);
    }

    #[tokio::test]
    async fn unsolicited_ptt_push_on_tx_reassignment() {
        let core = StateCore::new();
        let (_server, mut stream, mut buf) = start_fixed(&core, None, 0).await;

        // Confirm the connection is up before mutating.
        send_cmd(&mut stream, "get mode").await;
        assert_eq!(recv_frame(&mut stream, &mut buf).await, "DIGU");

        // A TX reassignment made elsewhere (tool surface, another client)
        // reaches this connection as a ptt push.
        core.set_tx_channel(0).await;
        assert_eq!(recv_frame(&mut stream, &mut buf).await, "ptt on\r\n");

        core.set_tx_channel(3).await;
        assert_eq!(recv_frame(&mut stream, &mut buf).await, "ptt off\r\n");
    }

    #[tokio::test]
    async fn unsolicited_frequency_push_on_change() {
        let core = StateCore::new();
        let (_server, mut stream, mut buf) = start_fixed(&core, None, 0).await;

        // Confirm the connection is up before mutating.
        send_cmd(&mut stream, "get mode").await;
        assert_eq!(recv_frame(&mut stream, &mut buf).await, "DIGU");

        core.update_from_backend(
            0,
            SliceUpdate {
                freq_hz: Some(10_136_000),
                ..SliceUpdate::default()
            },
        )
        .await;

        // The debounced change event arrives and is pushed as a framed
        // CRLF-terminated line.
        assert_eq!(
            recv_frame(&mut stream, &mut buf).await,
            "frequency 10136000\r\n"
        );
    }

    #[tokio::test]
    async fn aggregate_serves_tx_channel() {
        let core = StateCore::new();
        core.update_from_backend(
            0,
            SliceUpdate {
                freq_hz: Some(14_074_000),
                ..SliceUpdate::default()
            },
        )
        .await;
        core.update_from_backend(
            2,
            SliceUpdate {
                freq_hz: Some(7_074_000),
                ..SliceUpdate::default()
            },
        )
        .await;
        core.set_tx_channel(2).await;

        let server = HrdServer::start(
            "127.0.0.1:0",
            ServedChannel::TxChannel,
            Arc::clone(&core),
            None,
        )
        .await
        .unwrap();
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut buf = Vec::new();

        send_cmd(&mut stream, "get frequency").await;
        assert_eq!(recv_frame(&mut stream, &mut buf).await, "7074000");
        assert_eq!(recv_frame(&mut stream, &mut buf).await, "RPRT 0");

        // A logger retune lands on the TX channel.
        send_cmd(&mut stream, "set frequency-hz 7076000").await;
        assert_eq!(recv_frame(&mut stream, &mut buf).await, "RPRT 0");
        assert_eq!(core.channel(2).await.unwrap().dial_hz, 7_076_000);
        assert_eq!(core.channel(0).await.unwrap().dial_hz, 14_074_000);
    }

    #[tokio::test]
    async fn framing_garbage_closes_connection_but_not_listener() {
        let core = StateCore::new();
        let (server, mut stream, _) = start_fixed(&core, None, 0).await;

        stream.write_all(b"garbage that is not a frame!").await.unwrap();
        // Connection gets dropped.
        let mut chunk = [0u8; 64];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }

        // The listener still accepts fresh clients.
        let mut stream2 = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut buf2 = Vec::new();
        send_cmd(&mut stream2, "get mode").await;
        assert_eq!(recv_frame(&mut stream2, &mut buf2).await, "DIGU");
        assert!(core.snapshot().await.parse_drops >= 1);
    }
}
