//! Application wiring.
//!
//! Builds the component graph for the configured mode, runs the JSON-RPC
//! stdio surface in the foreground, and tears everything down in order on
//! shutdown. Fatal conditions (bad config, missing decoder, bind
//! conflicts) surface here before any listener starts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::sync::Mutex;

use slicehub_core::{RadioBackend, UDP_BASE_PORT};
use slicehub_flex::FlexBackend;
use slicehub_hrd::{HrdServer, ServedChannel};
use slicehub_logbook::Logbook;
use slicehub_state::{HubEvent, StateCore};
use slicehub_wsjtx::IngestManager;

use crate::config::{Config, OperatingMode};
use crate::mcp::{self, ToolContext};
use crate::qso::QsoMachine;
use crate::supervisor::{DecoderSupervisor, SupervisorSettings};

/// Rig name used by the single-channel standard mode.
const STANDARD_RIG: &str = "IC-7300";

/// Run the hub until stdin closes or a shutdown signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let profile = config.station_profile().context("station configuration")?;
    tracing::info!(
        callsign = %profile.callsign,
        grid = %profile.grid,
        mode = ?config.mode,
        "starting slicehub"
    );

    // Decoder binary: an explicitly configured path must exist.
    let decoder_path = match &config.wsjtx.path {
        Some(path) => {
            if !path.exists() {
                bail!("decoder executable not found at {}", path.display());
            }
            path.clone()
        }
        None => PathBuf::from("wsjtx"),
    };

    let core = StateCore::new();
    core.start_watchdog();

    // Logbook and its persistence of decoder-reported QSOs.
    let logbook_path = config
        .logbook
        .path
        .clone()
        .unwrap_or_else(slicehub_logbook::default_path);
    let logbook = Logbook::open(&logbook_path, profile.clone()).context("opening logbook")?;
    let logbook = Arc::new(Mutex::new(logbook));
    tokio::spawn(persist_qsos(core.subscribe(), Arc::clone(&logbook)));

    let ingest = Arc::new(IngestManager::new(Arc::clone(&core), profile.clone()));

    let backend: Option<Arc<dyn RadioBackend>> = match config.mode {
        OperatingMode::Flex => Some(Arc::new(FlexBackend::new(config.flex.host.clone()))),
        OperatingMode::Standard => None,
    };

    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("WSJT-X");
    let supervisor = DecoderSupervisor::new(
        Arc::clone(&core),
        backend.clone(),
        Arc::clone(&ingest),
        profile.clone(),
        SupervisorSettings {
            decoder_path,
            config_dir,
            udp_base_port: UDP_BASE_PORT,
            cat_base_port: config.flex.cat_base_port,
            default_bands: config.flex.default_bands.clone(),
        },
    );

    // Aggregate HRD server for external loggers; a bind conflict here is
    // startup-fatal.
    let _aggregate = if config.logbook.enable_hrd_server {
        let addr = format!("0.0.0.0:{}", config.logbook.hrd_port);
        Some(
            HrdServer::start(
                &addr,
                ServedChannel::TxChannel,
                Arc::clone(&core),
                backend.clone(),
            )
            .await
            .context("binding aggregate HRD server")?,
        )
    } else {
        None
    };

    // The autonomous QSO machine; driven by operator surfaces.
    let _qso_machine = QsoMachine::new(Arc::clone(&core), Arc::clone(&ingest));

    let _supervisor_task = supervisor.start();
    match config.mode {
        OperatingMode::Flex => {
            let backend = backend.as_ref().expect("flex mode has a backend");
            backend.connect().await.context("starting radio backend")?;
        }
        OperatingMode::Standard => {
            supervisor
                .start_standard(STANDARD_RIG)
                .await
                .context("starting standard-mode channel")?;
        }
    }

    // The AI surface runs in the foreground; EOF or a signal ends it.
    let ctx = Arc::new(ToolContext {
        core: Arc::clone(&core),
        backend: backend.clone(),
        ingest: Arc::clone(&ingest),
        logbook: Arc::clone(&logbook),
    });
    tokio::select! {
        result = mcp::run_stdio(ctx) => {
            result.context("JSON-RPC stdio surface")?;
            tracing::info!("stdio closed");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    // Orderly teardown: Close frames, grace, kill; then the backend.
    supervisor.shutdown().await;
    if let Some(backend) = backend {
        let _ = backend.disconnect().await;
    }
    tracing::info!("shutdown complete");
    Ok(())
}

/// Persist every decoder-reported QSO. A disk failure is surfaced but
/// never fatal; the worked-index already has the contact.
async fn persist_qsos(
    mut events: tokio::sync::broadcast::Receiver<HubEvent>,
    logbook: Arc<Mutex<Logbook>>,
) {
    loop {
        match events.recv().await {
            Ok(HubEvent::QsoLogged(qso)) => {
                let mut book = logbook.lock().await;
                if let Err(e) = book.log_qso(&qso) {
                    tracing::error!(call = %qso.callsign, error = %e, "QSO not persisted");
                }
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(missed = n, "logbook event stream lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
