//! Autonomous QSO state machine.
//!
//! One finite-state machine per channel drives a complete contact after
//! `execute_qso`: answer the target's decode, exchange reports, close
//! with RR73, confirm the 73. Each waiting state arms a single-shot
//! 15-second timer (one decode cycle); the prior timer is cancelled
//! whenever the phase advances. At most one QSO runs per channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use slicehub_core::types::{ChannelStatus, DecodeRecord};
use slicehub_core::{Error, Result};
use slicehub_state::{HubEvent, StateCore};
use slicehub_wsjtx::{ChannelLink, IngestManager};

/// Default single-cycle wait before a retry.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Retries per waiting state before the QSO fails.
pub const MAX_RETRIES: u32 = 3;

/// A target decode older than this cannot start a QSO.
pub const DECODE_FRESHNESS: Duration = Duration::from_secs(60);

/// Phases of an autonomous contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QsoPhase {
    Idle,
    CallingCq,
    WaitingReply,
    SendingReport,
    WaitingReport,
    SendingRr73,
    Waiting73,
    Complete,
    Failed,
}

/// Terminal report of one QSO attempt.
#[derive(Debug, Clone)]
pub struct QsoOutcome {
    pub channel: u8,
    pub target: String,
    pub phase: QsoPhase,
    pub reason: Option<String>,
}

/// Runs at most one autonomous QSO per channel.
pub struct QsoMachine {
    core: Arc<StateCore>,
    ingest: Arc<IngestManager>,
    wait_timeout: Duration,
    max_retries: u32,
    active: Arc<Mutex<HashMap<u8, JoinHandle<()>>>>,
    phases: Arc<Mutex<HashMap<u8, QsoPhase>>>,
    outcomes: broadcast::Sender<QsoOutcome>,
}

impl QsoMachine {
    pub fn new(core: Arc<StateCore>, ingest: Arc<IngestManager>) -> Self {
        Self::with_timing(core, ingest, WAIT_TIMEOUT, MAX_RETRIES)
    }

    /// Explicit timing (tests).
    pub fn with_timing(
        core: Arc<StateCore>,
        ingest: Arc<IngestManager>,
        wait_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        let (outcomes, _) = broadcast::channel(32);
        QsoMachine {
            core,
            ingest,
            wait_timeout,
            max_retries,
            active: Arc::new(Mutex::new(HashMap::new())),
            phases: Arc::new(Mutex::new(HashMap::new())),
            outcomes,
        }
    }

    /// Current phase of the channel's contact; `Idle` when none runs.
    pub async fn phase(&self, channel: u8) -> QsoPhase {
        let phases = self.phases.lock().await;
        phases.get(&channel).copied().unwrap_or(QsoPhase::Idle)
    }

    /// Subscribe to terminal QSO events.
    pub fn subscribe(&self) -> broadcast::Receiver<QsoOutcome> {
        self.outcomes.subscribe()
    }

    /// Whether a QSO is currently running on the channel.
    pub async fn is_active(&self, channel: u8) -> bool {
        let active = self.active.lock().await;
        active.get(&channel).is_some_and(|h| !h.is_finished())
    }

    /// Start an autonomous contact with `target_call` on `channel`.
    ///
    /// Needs a decode of the target within the last 60 seconds; answering
    /// it is the wire equivalent of the operator double-clicking that
    /// decode. Fails when a QSO is already active on the channel.
    pub async fn execute_qso(
        &self,
        channel: u8,
        target_call: &str,
        my_call: &str,
        _my_grid: &str,
    ) -> Result<()> {
        let target = target_call.to_uppercase();
        let my_call = my_call.to_uppercase();

        let mut active = self.active.lock().await;
        if active.get(&channel).is_some_and(|h| !h.is_finished()) {
            return Err(Error::ChannelBusy(channel));
        }

        let decode = self
            .core
            .latest_decode_for(channel, &target, DECODE_FRESHNESS)
            .await
            .ok_or_else(|| {
                Error::NotFound(format!("no decode of {target} within the last 60 s"))
            })?;
        let link = self
            .ingest
            .link(channel)
            .await
            .ok_or(Error::NotConnected)?;

        // Initiate: answer the decode with auto-TX enabled.
        self.phases.lock().await.insert(channel, QsoPhase::CallingCq);
        if let Err(e) = link.send_reply(&decode, true).await {
            self.phases.lock().await.remove(&channel);
            return Err(e);
        }
        self.core.set_channel_status(channel, ChannelStatus::InQso).await;
        tracing::info!(channel = channel, target = %target, "QSO started");

        // Subscribe before spawning so no decode can slip past.
        let events = self.core.subscribe();
        let task = tokio::spawn(run_qso(
            Arc::clone(&self.core),
            events,
            link,
            Arc::clone(&self.active),
            Arc::clone(&self.phases),
            self.outcomes.clone(),
            QsoParams {
                channel,
                target,
                my_call,
                initial: decode,
                wait_timeout: self.wait_timeout,
                max_retries: self.max_retries,
            },
        ));
        active.insert(channel, task);
        Ok(())
    }
}

struct QsoParams {
    channel: u8,
    target: String,
    my_call: String,
    initial: DecodeRecord,
    wait_timeout: Duration,
    max_retries: u32,
}

/// Signal report string from an SNR: `+NN` / `-NN`, zero-padded.
pub fn format_report(snr_db: i32) -> String {
    format!(
        "{}{:02}",
        if snr_db < 0 { "-" } else { "+" },
        snr_db.abs()
    )
}

/// Report tokens: `-07`, `+03`, `R-07`, `R+03`. A bare number (or "73")
/// is not a report.
fn is_report_token(token: &str) -> bool {
    let digits = match token.strip_prefix('R') {
        Some(rest) => rest.strip_prefix(['+', '-']).unwrap_or(rest),
        None => match token.strip_prefix(['+', '-']) {
            Some(rest) => rest,
            None => return false,
        },
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

async fn run_qso(
    core: Arc<StateCore>,
    mut events: broadcast::Receiver<HubEvent>,
    link: Arc<ChannelLink>,
    active: Arc<Mutex<HashMap<u8, JoinHandle<()>>>>,
    phases: Arc<Mutex<HashMap<u8, QsoPhase>>>,
    outcomes: broadcast::Sender<QsoOutcome>,
    params: QsoParams,
) {
    let QsoParams {
        channel,
        target,
        my_call,
        initial,
        wait_timeout,
        max_retries,
    } = params;

    let mut phase = QsoPhase::WaitingReply;
    let mut retries = 0u32;
    let mut reason = None;
    phases.lock().await.insert(channel, phase);

    let timer = tokio::time::sleep(wait_timeout);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            event = events.recv() => {
                let decode = match event {
                    Ok(HubEvent::DecodeAdded(d)) if d.channel == channel => d,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        phase = QsoPhase::Failed;
                        reason = Some("state core gone".to_string());
                        break;
                    }
                };

                let text = decode.text.to_uppercase();
                let tokens: Vec<&str> = text.split_whitespace().collect();

                match phase {
                    QsoPhase::WaitingReply => {
                        // "<my-call> <their-call> ..." -- they answered us.
                        if tokens.len() >= 2 && tokens[0] == my_call && tokens[1] == target {
                            phase = QsoPhase::SendingReport;
                            let report = format_report(decode.snr_db);
                            let message = format!("{target} {my_call} {report}");
                            tracing::debug!(channel = channel, message = %message, "sending report");
                            if link
                                .send_reply_with_message(&decode, &message, false)
                                .await
                                .is_err()
                            {
                                phase = QsoPhase::Failed;
                                reason = Some("failed to send report".to_string());
                                break;
                            }
                            phase = QsoPhase::WaitingReport;
                            phases.lock().await.insert(channel, phase);
                            retries = 0;
                            timer.as_mut().reset(tokio::time::Instant::now() + wait_timeout);
                        }
                    }

                    QsoPhase::WaitingReport => {
                        // "<my-call> <their-call> R-07" -- roger plus report.
                        if tokens.len() >= 3
                            && tokens[0] == my_call
                            && tokens[1] == target
                            && is_report_token(tokens[2])
                        {
                            phase = QsoPhase::SendingRr73;
                            let message = format!("{target} {my_call} RR73");
                            tracing::debug!(channel = channel, message = %message, "sending RR73");
                            if link.send_free_text(&message, true).await.is_err() {
                                phase = QsoPhase::Failed;
                                reason = Some("failed to send RR73".to_string());
                                break;
                            }
                            phase = QsoPhase::Waiting73;
                            phases.lock().await.insert(channel, phase);
                            retries = 0;
                            timer.as_mut().reset(tokio::time::Instant::now() + wait_timeout);
                        }
                    }

                    QsoPhase::Waiting73 => {
                        let has_calls = tokens.contains(&my_call.as_str())
                            && tokens.contains(&target.as_str());
                        if has_calls && tokens.contains(&"73") {
                            phase = QsoPhase::Complete;
                            break;
                        }
                    }

                    _ => {}
                }
            }

            () = &mut timer => {
                retries += 1;
                if retries > max_retries {
                    reason = Some(format!("timed out in {phase:?}"));
                    phase = QsoPhase::Failed;
                    break;
                }
                tracing::debug!(
                    channel = channel,
                    phase = ?phase,
                    retry = retries,
                    "QSO cycle timeout"
                );
                if phase == QsoPhase::WaitingReply {
                    // Re-answer the original decode; the other waiting
                    // states just keep listening for the next cycle.
                    let _ = link.send_reply(&initial, true).await;
                }
                timer.as_mut().reset(tokio::time::Instant::now() + wait_timeout);
            }
        }
    }

    let completed = phase == QsoPhase::Complete;
    tracing::info!(
        channel = channel,
        target = %target,
        completed = completed,
        reason = reason.as_deref().unwrap_or(""),
        "QSO finished"
    );
    core.set_channel_status(channel, ChannelStatus::Decoding).await;
    active.lock().await.remove(&channel);
    phases.lock().await.remove(&channel);
    let _ = outcomes.send(QsoOutcome {
        channel,
        target,
        phase,
        reason,
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use slicehub_core::types::{Continent, DecodeFlags, StationProfile};
    use tokio::net::UdpSocket;

    fn profile() -> StationProfile {
        StationProfile {
            callsign: "HB9BLA".into(),
            grid: "JN37VL".into(),
            continent: Continent::EU,
            dxcc: "HB9".into(),
            prefixes: vec![],
        }
    }

    fn decode(channel: u8, text: &str, snr: i32) -> DecodeRecord {
        let parsed = slicehub_core::message::parse_text(text);
        DecodeRecord {
            channel,
            slice: (b'A' + channel) as char,
            timestamp: Utc::now(),
            band: "20m".into(),
            mode: "FT8".into(),
            dial_hz: 14_074_000,
            audio_offset_hz: 1500,
            rf_hz: 14_075_500,
            snr_db: snr,
            dt_sec: 0.1,
            callsign: parsed.callsign.unwrap_or_else(|| "X1X".into()),
            grid: parsed.grid,
            is_cq: parsed.is_cq,
            is_my_call: false,
            is_directed_cq_to_me: parsed.is_cq,
            cq_target: parsed.cq_target,
            text: text.into(),
            flags: DecodeFlags::default(),
        }
    }

    struct Rig {
        core: Arc<StateCore>,
        machine: QsoMachine,
        decoder: UdpSocket,
    }

    /// Hub with one ingest channel and a fake decoder socket whose
    /// address is registered as the egress target.
    async fn rig(base_port: u16, wait: Duration) -> Rig {
        let core = StateCore::new();
        let ingest = Arc::new(IngestManager::with_base_port(
            Arc::clone(&core),
            profile(),
            base_port,
        ));
        ingest.start_channel(0, "Slice-A").await.unwrap();

        let decoder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        // A heartbeat registers the decoder's socket as the reply target.
        let hb = slicehub_wsjtx::wire::Writer::frame(0, "Slice-A").finish();
        decoder
            .send_to(&hb, ("127.0.0.1", base_port))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let machine = QsoMachine::with_timing(Arc::clone(&core), ingest, wait, MAX_RETRIES);
        Rig {
            core,
            machine,
            decoder,
        }
    }

    async fn recv_frame_type(decoder: &UdpSocket) -> u32 {
        let mut buf = [0u8; 2048];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), decoder.recv_from(&mut buf))
            .await
            .expect("frame should arrive")
            .unwrap();
        u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]])
    }

    #[test]
    fn report_formatting() {
        assert_eq!(format_report(-5), "-05");
        assert_eq!(format_report(3), "+03");
        assert_eq!(format_report(-15), "-15");
        assert_eq!(format_report(0), "+00");
    }

    #[test]
    fn report_tokens() {
        assert!(is_report_token("-07"));
        assert!(is_report_token("+03"));
        assert!(is_report_token("R-07"));
        assert!(is_report_token("R+03"));
        assert!(!is_report_token("RR73"));
        assert!(!is_report_token("JN37"));
        assert!(!is_report_token("73"));
    }

    #[tokio::test]
    async fn full_qso_completes() {
        let rig = rig(42500, Duration::from_secs(5)).await;
        let mut outcomes = rig.machine.subscribe();

        rig.core.add_decode(decode(0, "CQ EA4IFI IM79", -12)).await;
        rig.machine
            .execute_qso(0, "EA4IFI", "HB9BLA", "JN37")
            .await
            .unwrap();

        // Initiation reply (type 4).
        assert_eq!(recv_frame_type(&rig.decoder).await, 4);
        assert_eq!(
            rig.core.channel(0).await.unwrap().status,
            ChannelStatus::InQso
        );

        // They answer us; we send the report.
        rig.core.add_decode(decode(0, "HB9BLA EA4IFI JN61", -8)).await;
        assert_eq!(recv_frame_type(&rig.decoder).await, 4);

        // Roger-report; we close with RR73 (free text, type 9).
        rig.core.add_decode(decode(0, "HB9BLA EA4IFI R-05", -8)).await;
        assert_eq!(recv_frame_type(&rig.decoder).await, 9);

        // Their 73 completes the contact.
        rig.core.add_decode(decode(0, "HB9BLA EA4IFI 73", -8)).await;

        let outcome = tokio::time::timeout(Duration::from_secs(2), outcomes.recv())
            .await
            .expect("outcome should arrive")
            .unwrap();
        assert_eq!(outcome.phase, QsoPhase::Complete);
        assert_eq!(outcome.target, "EA4IFI");
        assert!(!rig.machine.is_active(0).await);
        assert_eq!(
            rig.core.channel(0).await.unwrap().status,
            ChannelStatus::Decoding
        );
    }

    #[tokio::test]
    async fn second_qso_on_channel_is_rejected() {
        let rig = rig(42510, Duration::from_secs(5)).await;
        rig.core.add_decode(decode(0, "CQ EA4IFI IM79", -12)).await;
        rig.machine
            .execute_qso(0, "EA4IFI", "HB9BLA", "JN37")
            .await
            .unwrap();

        let second = rig
            .machine
            .execute_qso(0, "EA4IFI", "HB9BLA", "JN37")
            .await;
        assert!(matches!(second, Err(Error::ChannelBusy(0))));
    }

    #[tokio::test]
    async fn stale_target_fails_immediately() {
        let rig = rig(42520, Duration::from_secs(5)).await;
        let result = rig.machine.execute_qso(0, "EA4IFI", "HB9BLA", "JN37").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(!rig.machine.is_active(0).await);
    }

    #[tokio::test]
    async fn timeout_retries_then_fails() {
        let rig = rig(42530, Duration::from_millis(200)).await;
        let mut outcomes = rig.machine.subscribe();

        rig.core.add_decode(decode(0, "CQ EA4IFI IM79", -12)).await;
        rig.machine
            .execute_qso(0, "EA4IFI", "HB9BLA", "JN37")
            .await
            .unwrap();

        // Initial reply plus three timeout-driven retries.
        for _ in 0..4 {
            assert_eq!(recv_frame_type(&rig.decoder).await, 4);
        }

        let outcome = tokio::time::timeout(Duration::from_secs(3), outcomes.recv())
            .await
            .expect("outcome should arrive")
            .unwrap();
        assert_eq!(outcome.phase, QsoPhase::Failed);
        assert!(outcome.reason.unwrap().contains("timed out"));
        assert!(!rig.machine.is_active(0).await);
    }
}
