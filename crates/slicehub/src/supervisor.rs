//! Decoder process supervision.
//!
//! For every slice the radio reports, the supervisor wires up the full
//! per-channel pipeline: audio routing, the channel's HRD server, the UDP
//! ingest listener, a generated decoder configuration file, and finally
//! the decoder process itself. It also owns the restart policy and the
//! graceful shutdown sequence (Close frames, a grace period, then kill).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use slicehub_core::types::{channel_letter, StationProfile, CHANNEL_COUNT};
use slicehub_core::{BackendEvent, ChannelStatus, Error, RadioBackend, Result, SliceInfo};
use slicehub_hrd::{HrdServer, ServedChannel};
use slicehub_state::{HubEvent, SliceUpdate, StateCore, RESTART_LIMIT, RESTART_SPACING};
use slicehub_wsjtx::IngestManager;

/// Grace period between Close frames and process termination at shutdown.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// How long a process may take to exit after being asked nicely.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Grace period used during a restart-all cycle.
const RESTART_ALL_GRACE: Duration = Duration::from_secs(3);

/// Cadence of the child process monitor.
const MONITOR_CADENCE: Duration = Duration::from_secs(2);

/// Static supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Decoder executable.
    pub decoder_path: PathBuf,
    /// Directory receiving the generated per-instance config files.
    pub config_dir: PathBuf,
    /// Base UDP ingest port.
    pub udp_base_port: u16,
    /// Base TCP port for per-channel HRD servers.
    pub cat_base_port: u16,
    /// Optional per-channel pre-tune frequencies (Hz).
    pub default_bands: Option<Vec<u64>>,
}

/// Spawns, restarts, and tears down decoder processes.
pub struct DecoderSupervisor {
    core: Arc<StateCore>,
    backend: Option<Arc<dyn RadioBackend>>,
    ingest: Arc<IngestManager>,
    station: StationProfile,
    settings: SupervisorSettings,
    servers: Mutex<HashMap<u8, HrdServer>>,
    children: Mutex<HashMap<String, Child>>,
}

/// Instance name for a channel ("Slice-A".."Slice-D").
pub fn instance_name(index: u8) -> String {
    format!("Slice-{}", channel_letter(index))
}

impl DecoderSupervisor {
    pub fn new(
        core: Arc<StateCore>,
        backend: Option<Arc<dyn RadioBackend>>,
        ingest: Arc<IngestManager>,
        station: StationProfile,
        settings: SupervisorSettings,
    ) -> Arc<Self> {
        Arc::new(DecoderSupervisor {
            core,
            backend,
            ingest,
            station,
            settings,
            servers: Mutex::new(HashMap::new()),
            children: Mutex::new(HashMap::new()),
        })
    }

    /// Start the event loop (backend + hub events) and the child monitor.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(MONITOR_CADENCE);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                monitor.monitor_cycle().await;
            }
        });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut hub_events = this.core.subscribe();
            let mut backend_events = this.backend.as_ref().map(|b| b.subscribe());

            loop {
                tokio::select! {
                    event = async {
                        match backend_events.as_mut() {
                            Some(rx) => rx.recv().await.ok(),
                            None => std::future::pending().await,
                        }
                    } => {
                        let Some(event) = event else { continue };
                        this.handle_backend_event(event).await;
                    }

                    event = hub_events.recv() => {
                        match event {
                            Ok(HubEvent::ChannelNeedsRestart { channel, instance, restarts }) => {
                                tracing::warn!(
                                    channel = channel,
                                    instance = %instance,
                                    restarts = restarts,
                                    "restarting decoder after heartbeat loss"
                                );
                                this.respawn(channel, &instance).await;
                            }
                            Ok(_) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        })
    }

    async fn handle_backend_event(&self, event: BackendEvent) {
        match event {
            BackendEvent::Connected => self.core.set_backend_connected(true).await,
            BackendEvent::Disconnected => self.core.set_backend_connected(false).await,
            BackendEvent::SliceAdded(info) => {
                if let Err(e) = self.handle_slice_added(&info).await {
                    tracing::error!(slice = info.index, error = %e, "slice bring-up failed");
                    self.core
                        .set_channel_status(info.index, ChannelStatus::Error)
                        .await;
                }
            }
            BackendEvent::SliceRemoved { index } => self.handle_slice_removed(index).await,
            BackendEvent::SliceUpdated(info) => {
                self.core
                    .update_from_backend(
                        info.index,
                        SliceUpdate {
                            freq_hz: Some(info.freq_hz),
                            mode: Some(info.mode),
                            is_tx: Some(info.is_tx),
                            audio_rx: None,
                        },
                    )
                    .await;
            }
            BackendEvent::Error(message) => {
                tracing::error!(error = %message, "radio backend error");
            }
        }
    }

    /// Bring up the full pipeline for a freshly appeared slice.
    pub async fn handle_slice_added(&self, info: &SliceInfo) -> Result<()> {
        let index = info.index;
        if index as usize >= CHANNEL_COUNT {
            return Err(Error::InvalidParameter(format!("slice index {index}")));
        }
        let instance = instance_name(index);
        tracing::info!(slice = index, instance = %instance, "slice appeared");

        // 1. Route the slice's RX audio to its DAX channel.
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.set_slice_audio(index, index + 1).await {
                tracing::warn!(slice = index, error = %e, "audio routing failed");
            }
        }

        // 2. Seed the channel state from the backend's view.
        self.core
            .update_from_backend(
                index,
                SliceUpdate {
                    freq_hz: Some(info.freq_hz),
                    mode: Some(info.mode),
                    is_tx: Some(info.is_tx),
                    audio_rx: Some(index + 1),
                },
            )
            .await;

        // 3. The per-channel HRD server, if not already listening.
        self.start_hrd(index).await?;

        // 4. The UDP ingest listener.
        self.ingest.start_channel(index, &instance).await?;

        // 5. Pre-tune to the configured band, if any.
        let pretune = self
            .settings
            .default_bands
            .as_ref()
            .and_then(|bands| bands.get(index as usize).copied());
        if let (Some(freq), Some(backend)) = (pretune, &self.backend) {
            if let Err(e) = backend.tune_slice(index, freq).await {
                tracing::warn!(slice = index, freq = freq, error = %e, "pre-tune failed");
            }
        }

        // 6-7. Config file and process.
        self.core.register_instance(&instance, index).await;
        self.write_config(&instance, index, pretune.or(Some(info.freq_hz)))?;
        let pid = self.spawn_decoder(&instance).await?;
        self.core.set_instance_pid(&instance, pid).await;

        // 8. Tile the decoder windows, best effort.
        tokio::spawn(place_windows_later(instance.clone()));
        Ok(())
    }

    /// Tear down the pipeline of a removed slice.
    pub async fn handle_slice_removed(&self, index: u8) {
        let instance = instance_name(index);
        tracing::info!(slice = index, instance = %instance, "slice removed");

        if let Some(link) = self.ingest.link(index).await {
            let _ = link.send_close().await;
        }
        self.ingest.stop_channel(index).await;
        self.servers.lock().await.remove(&index);

        self.terminate_child(&instance, EXIT_GRACE).await;
        self.core.instance_stopped(&instance, None).await;
        self.core.unregister_instance(&instance).await;
        self.core.mark_channel_offline(index).await;
    }

    /// Respawn one instance with preserved frequency and mode. Callers
    /// have already applied the restart policy.
    async fn respawn(&self, index: u8, instance: &str) {
        self.terminate_child(instance, Duration::from_millis(200)).await;

        let dial = self.core.channel(index).await.map(|ch| ch.dial_hz);
        if let Err(e) = self.write_config(instance, index, dial) {
            tracing::error!(instance = %instance, error = %e, "config regeneration failed");
            self.core
                .instance_stopped(instance, Some("config regeneration failed"))
                .await;
            return;
        }
        match self.spawn_decoder(instance).await {
            Ok(pid) => {
                self.core.instance_restarted(instance, pid).await;
            }
            Err(e) => {
                tracing::error!(instance = %instance, error = %e, "respawn failed");
                self.core
                    .instance_stopped(instance, Some("respawn failed"))
                    .await;
            }
        }
    }

    /// Detect exited children and apply the restart policy to them.
    async fn monitor_cycle(&self) {
        // Collect exited children first; try_wait needs &mut Child.
        let mut exited = Vec::new();
        {
            let mut children = self.children.lock().await;
            let names: Vec<String> = children.keys().cloned().collect();
            for name in names {
                if let Some(child) = children.get_mut(&name) {
                    if let Ok(Some(status)) = child.try_wait() {
                        tracing::warn!(instance = %name, status = %status, "decoder exited");
                        children.remove(&name);
                        exited.push(name);
                    }
                }
            }
        }
        for name in exited {
            self.core
                .instance_stopped(&name, Some("process exited"))
                .await;
        }

        // Apply the restart policy to anything stopped by a process exit.
        let snapshot = self.core.snapshot().await;
        for inst in snapshot.instances {
            if inst.running || inst.last_error.as_deref() != Some("process exited") {
                continue;
            }
            if inst.restarts >= RESTART_LIMIT {
                self.core
                    .set_channel_status(inst.channel, ChannelStatus::Error)
                    .await;
                continue;
            }
            let spacing = chrono::Duration::from_std(RESTART_SPACING).unwrap_or_default();
            let spaced = inst
                .last_start
                .map(|t| Utc::now() - t >= spacing)
                .unwrap_or(true);
            if spaced {
                tracing::warn!(
                    instance = %inst.name,
                    restarts = inst.restarts,
                    "restarting exited decoder"
                );
                self.respawn(inst.channel, &inst.name).await;
            }
        }
    }

    /// Graceful restart of all instances (config changes): Close frames,
    /// a grace period, then regenerate and respawn in channel order.
    pub async fn restart_all(&self) {
        let snapshot = self.core.snapshot().await;
        let mut instances: Vec<(String, u8, u64)> = snapshot
            .instances
            .iter()
            .map(|i| {
                let dial = snapshot
                    .channels
                    .get(i.channel as usize)
                    .map(|c| c.dial_hz)
                    .unwrap_or(0);
                (i.name.clone(), i.channel, dial)
            })
            .collect();
        instances.sort_by_key(|(_, channel, _)| *channel);

        tracing::info!(count = instances.len(), "graceful restart of all decoders");
        self.ingest.close_all().await;
        tokio::time::sleep(RESTART_ALL_GRACE).await;

        for (name, _, _) in &instances {
            self.terminate_child(name, EXIT_GRACE).await;
        }
        for (name, index, dial) in &instances {
            if let Err(e) = self.write_config(name, *index, Some(*dial)) {
                tracing::error!(instance = %name, error = %e, "config regeneration failed");
                continue;
            }
            match self.spawn_decoder(name).await {
                Ok(pid) => self.core.instance_restarted(name, pid).await,
                Err(e) => {
                    tracing::error!(instance = %name, error = %e, "respawn failed");
                    self.core.instance_stopped(name, Some("respawn failed")).await;
                }
            }
        }
        for (name, _, _) in instances {
            tokio::spawn(place_windows_later(name));
        }
    }

    /// Full shutdown: Close frames, 2 s, then terminate every child with
    /// the usual grace, and stop all listeners.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down decoder pipelines");
        self.ingest.close_all().await;
        tokio::time::sleep(CLOSE_GRACE).await;

        let names: Vec<String> = self.children.lock().await.keys().cloned().collect();
        for name in names {
            self.terminate_child(&name, EXIT_GRACE).await;
            self.core.instance_stopped(&name, None).await;
        }
        self.ingest.stop_all().await;
        self.servers.lock().await.clear();
    }

    /// Single-channel standard mode: one hard-coded rig, no backend.
    pub async fn start_standard(&self, rig_name: &str) -> Result<()> {
        self.start_hrd(0).await?;
        self.ingest.start_channel(0, rig_name).await?;
        self.core.register_instance(rig_name, 0).await;
        self.core.set_tx_channel(0).await;
        self.write_config(rig_name, 0, None)?;
        let pid = self.spawn_decoder(rig_name).await?;
        self.core.set_instance_pid(rig_name, pid).await;
        Ok(())
    }

    async fn start_hrd(&self, index: u8) -> Result<()> {
        let mut servers = self.servers.lock().await;
        if servers.contains_key(&index) {
            return Ok(());
        }
        let addr = format!("127.0.0.1:{}", self.settings.cat_base_port + index as u16);
        let server = HrdServer::start(
            &addr,
            ServedChannel::Fixed(index),
            Arc::clone(&self.core),
            self.backend.clone(),
        )
        .await?;
        servers.insert(index, server);
        Ok(())
    }

    fn config_path(&self, instance: &str) -> PathBuf {
        self.settings.config_dir.join(format!("WSJT-X - {instance}.ini"))
    }

    fn write_config(&self, instance: &str, index: u8, dial_hz: Option<u64>) -> Result<()> {
        std::fs::create_dir_all(&self.settings.config_dir)?;
        let content = generate_config(
            &self.station,
            instance,
            index,
            self.settings.udp_base_port,
            self.settings.cat_base_port,
            dial_hz,
        );
        let path = self.config_path(instance);
        std::fs::write(&path, content)?;
        tracing::debug!(path = %path.display(), "decoder config written");
        Ok(())
    }

    async fn spawn_decoder(&self, instance: &str) -> Result<u32> {
        let mut command = Command::new(&self.settings.decoder_path);
        command
            .arg("--rig-name")
            .arg(instance)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            Error::Transport(format!(
                "failed to spawn decoder {}: {e}",
                self.settings.decoder_path.display()
            ))
        })?;
        let pid = child.id().unwrap_or(0);
        tracing::info!(instance = %instance, pid = pid, "decoder spawned");
        self.children.lock().await.insert(instance.to_string(), child);
        Ok(pid)
    }

    /// Wait up to `grace` for the child to exit, then kill it.
    async fn terminate_child(&self, instance: &str, grace: Duration) {
        let Some(mut child) = self.children.lock().await.remove(instance) else {
            return;
        };
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(instance = %instance, status = %status, "decoder exited");
                    return;
                }
                Ok(None) => {
                    if tokio::time::Instant::now() >= deadline {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(e) => {
                    tracing::debug!(instance = %instance, error = %e, "wait failed");
                    break;
                }
            }
        }
        tracing::warn!(instance = %instance, "killing decoder");
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

// ---------------------------------------------------------------------------
// Config generation
// ---------------------------------------------------------------------------

/// Decoder FFT bin width in Hz (12000 Hz sample rate over 4096 bins).
const BIN_HZ: f64 = 12_000.0 / 4_096.0;

/// Waterfall plot width in pixels for a visible range of `visible_hz`.
pub fn waterfall_plot_width(visible_hz: u32, bins_per_pixel: u32) -> u32 {
    (visible_hz as f64 / (bins_per_pixel as f64 * BIN_HZ)).round() as u32
}

/// Generate the per-instance decoder configuration file.
///
/// Carries the keys the decoder needs for hands-off operation: HRD rig
/// control on the channel's CAT port, CAT PTT, DAX audio devices, the
/// channel's UDP server port, and mandatory `HoldTxFreq`/`AutoSeq`.
pub fn generate_config(
    station: &StationProfile,
    instance: &str,
    index: u8,
    udp_base_port: u16,
    cat_base_port: u16,
    dial_hz: Option<u64>,
) -> String {
    let cat_port = cat_base_port + index as u16;
    let udp_port = udp_base_port + index as u16;
    let mut out = String::new();

    out.push_str("[Configuration]\n");
    out.push_str(&format!("; generated for {instance}\n"));
    out.push_str("Rig=Ham Radio Deluxe\n");
    out.push_str(&format!("CATNetworkServer=127.0.0.1:{cat_port}\n"));
    out.push_str("PTTMethod=CAT\n");
    out.push_str(&format!("SoundInName=DAX Audio RX {}\n", index + 1));
    out.push_str("SoundOutName=DAX Audio TX\n");
    out.push_str("UDPServer=127.0.0.1\n");
    out.push_str(&format!("UDPServerPort={udp_port}\n"));
    out.push_str(&format!("MyCall={}\n", station.callsign));
    out.push_str(&format!("MyGrid={}\n", station.grid));
    out.push_str("HoldTxFreq=true\n");
    out.push_str("AutoSeq=true\n");
    out.push_str("Mode=FT8\n");
    if let Some(dial) = dial_hz {
        out.push_str(&format!("DialFreq={dial}\n"));
    }
    out.push('\n');
    out.push_str("[Widegraph]\n");
    out.push_str("BinsPerPixel=2\n");
    out.push_str(&format!("PlotWidth={}\n", waterfall_plot_width(2_500, 2)));
    out
}

// ---------------------------------------------------------------------------
// Window placement
// ---------------------------------------------------------------------------

/// 2x2 tile for a channel index on a 1920x1080 desktop.
pub fn tile_geometry(index: u8) -> (u32, u32, u32, u32) {
    let (w, h) = (960, 540);
    let x = (index as u32 % 2) * w;
    let y = (index as u32 / 2) * h;
    (x, y, w, h)
}

/// Best-effort window placement: wait for the window to exist, then ask
/// the window manager to move it. Every failure is ignored.
async fn place_windows_later(instance: String) {
    tokio::time::sleep(Duration::from_secs(5)).await;
    let index = instance
        .strip_prefix("Slice-")
        .and_then(|l| l.chars().next())
        .map(|l| (l as u8).saturating_sub(b'A'))
        .unwrap_or(0);
    let (x, y, w, h) = tile_geometry(index);
    let title = format!("WSJT-X - {instance}");
    let result = Command::new("wmctrl")
        .args(["-r", &title, "-e", &format!("0,{x},{y},{w},{h}")])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        tracing::debug!(instance = %instance, error = %e, "window placement unavailable");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use slicehub_core::types::Continent;

    fn station() -> StationProfile {
        StationProfile {
            callsign: "HB9BLA".into(),
            grid: "JN37VL".into(),
            continent: Continent::EU,
            dxcc: "HB9".into(),
            prefixes: vec![],
        }
    }

    fn settings(dir: &std::path::Path, udp_base: u16, cat_base: u16) -> SupervisorSettings {
        SupervisorSettings {
            decoder_path: PathBuf::from("/bin/sleep"),
            config_dir: dir.to_path_buf(),
            udp_base_port: udp_base,
            cat_base_port: cat_base,
            default_bands: None,
        }
    }

    #[test]
    fn config_carries_mandatory_keys() {
        let content = generate_config(&station(), "Slice-B", 1, 2237, 7809, Some(14_074_000));
        assert!(content.contains("Rig=Ham Radio Deluxe\n"));
        assert!(content.contains("CATNetworkServer=127.0.0.1:7810\n"));
        assert!(content.contains("PTTMethod=CAT\n"));
        assert!(content.contains("SoundInName=DAX Audio RX 2\n"));
        assert!(content.contains("SoundOutName=DAX Audio TX\n"));
        assert!(content.contains("UDPServerPort=2238\n"));
        assert!(content.contains("MyCall=HB9BLA\n"));
        assert!(content.contains("MyGrid=JN37VL\n"));
        assert!(content.contains("HoldTxFreq=true\n"));
        assert!(content.contains("AutoSeq=true\n"));
        assert!(content.contains("Mode=FT8\n"));
        assert!(content.contains("DialFreq=14074000\n"));
    }

    #[test]
    fn waterfall_width_covers_visible_range() {
        // 2500 Hz at two bins per pixel, ~2.93 Hz per bin.
        assert_eq!(waterfall_plot_width(2_500, 2), 427);
    }

    #[test]
    fn tiles_cover_quadrants() {
        assert_eq!(tile_geometry(0), (0, 0, 960, 540));
        assert_eq!(tile_geometry(1), (960, 0, 960, 540));
        assert_eq!(tile_geometry(2), (0, 540, 960, 540));
        assert_eq!(tile_geometry(3), (960, 540, 960, 540));
    }

    #[tokio::test]
    async fn standard_mode_brings_up_single_channel() {
        let dir = tempfile::tempdir().unwrap();
        let core = StateCore::new();
        let ingest = Arc::new(IngestManager::with_base_port(
            Arc::clone(&core),
            station(),
            42400,
        ));
        let sup = DecoderSupervisor::new(
            Arc::clone(&core),
            None,
            ingest,
            station(),
            settings(dir.path(), 42400, 47400),
        );

        sup.start_standard("IC-7300").await.unwrap();

        let inst = core.instance("IC-7300").await.unwrap();
        assert!(inst.running);
        assert!(inst.pid.is_some());
        assert_eq!(core.tx_channel().await, Some(0));
        assert!(dir.path().join("WSJT-X - IC-7300.ini").exists());
        let ch = core.channel(0).await.unwrap();
        assert!(!ch.connected); // no heartbeats yet
        assert_eq!(ch.status, ChannelStatus::Offline);

        sup.shutdown().await;
        assert!(!core.instance("IC-7300").await.unwrap().running);
    }

    #[tokio::test]
    async fn slice_added_wires_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let core = StateCore::new();
        let ingest = Arc::new(IngestManager::with_base_port(
            Arc::clone(&core),
            station(),
            42410,
        ));
        let sup = DecoderSupervisor::new(
            Arc::clone(&core),
            None,
            Arc::clone(&ingest),
            station(),
            settings(dir.path(), 42410, 47410),
        );

        sup.handle_slice_added(&SliceInfo {
            index: 1,
            freq_hz: 14_074_000,
            mode: slicehub_core::RadioMode::DIGU,
            is_tx: false,
            audio_rx: 0,
        })
        .await
        .unwrap();

        let ch = core.channel(1).await.unwrap();
        assert_eq!(ch.dial_hz, 14_074_000);
        assert_eq!(ch.band, "20m");
        assert_eq!(ch.instance.as_deref(), Some("Slice-B"));

        let inst = core.instance("Slice-B").await.unwrap();
        assert!(inst.running);
        assert!(dir.path().join("WSJT-X - Slice-B.ini").exists());
        assert!(ingest.link(1).await.is_some());

        // The per-channel HRD server answers.
        let mut stream = tokio::net::TcpStream::connect("127.0.0.1:47411")
            .await
            .unwrap();
        use tokio::io::AsyncWriteExt;
        stream
            .write_all(&slicehub_hrd::encode_frame("get frequency"))
            .await
            .unwrap();

        sup.handle_slice_removed(1).await;
        assert!(core.instance("Slice-B").await.is_none());
        assert_eq!(
            core.channel(1).await.unwrap().status,
            ChannelStatus::Offline
        );
    }

    #[tokio::test]
    async fn respawn_bumps_restart_count() {
        let dir = tempfile::tempdir().unwrap();
        let core = StateCore::new();
        let ingest = Arc::new(IngestManager::with_base_port(
            Arc::clone(&core),
            station(),
            42420,
        ));
        let sup = DecoderSupervisor::new(
            Arc::clone(&core),
            None,
            ingest,
            station(),
            settings(dir.path(), 42420, 47420),
        );

        core.register_instance("Slice-A", 0).await;
        sup.write_config("Slice-A", 0, None).unwrap();
        let pid = sup.spawn_decoder("Slice-A").await.unwrap();
        core.set_instance_pid("Slice-A", pid).await;

        sup.respawn(0, "Slice-A").await;
        let inst = core.instance("Slice-A").await.unwrap();
        assert!(inst.running);
        assert_eq!(inst.restarts, 1);

        sup.shutdown().await;
    }
}
