//! AI-facing tool surface: JSON-RPC 2.0 over stdio.
//!
//! Exposes exactly four tools (`call_cq`, `answer_decoded_station`,
//! `rig_get_state`, `rig_emergency_stop`) and one resource
//! (`wsjt-x://decodes`). The resource is a decode snapshot assembled on
//! demand; routing identifiers (channel indices, slice letters, instance
//! names) never appear in tool payloads -- the channel letter in
//! `rig_get_state` is the one public identifier for the read-only view.
//!
//! Server-side targeting is authoritative: clients receive the
//! `is_directed_cq_to_me` verdict with every decode and are forbidden
//! from recomputing it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};

use slicehub_core::types::{channel_letter, DecodeRecord};
use slicehub_core::{Error, RadioBackend, Result, CHANNEL_COUNT};
use slicehub_logbook::Logbook;
use slicehub_state::{HubEvent, StateCore};
use slicehub_wsjtx::IngestManager;

/// The decode resource URI.
pub const DECODES_URI: &str = "wsjt-x://decodes";

/// How far back a snapshot reaches.
pub const SNAPSHOT_WINDOW: Duration = Duration::from_secs(60);

/// Debounce for `resources/updated` notifications.
pub const NOTIFY_DEBOUNCE: Duration = Duration::from_millis(500);

/// Everything the tool handlers need.
pub struct ToolContext {
    pub core: Arc<StateCore>,
    pub backend: Option<Arc<dyn RadioBackend>>,
    pub ingest: Arc<IngestManager>,
    pub logbook: Arc<Mutex<Logbook>>,
}

// ---------------------------------------------------------------------------
// Decode snapshot
// ---------------------------------------------------------------------------

/// One decode as shown to the AI client. No channel index, no slice
/// field; the id is the only handle.
#[derive(Debug, Clone, Serialize)]
pub struct PublicDecode {
    pub id: String,
    pub timestamp: String,
    pub band: String,
    pub mode: String,
    pub dial_hz: u64,
    pub audio_offset_hz: u32,
    pub rf_hz: u64,
    pub snr_db: i32,
    pub dt_sec: f64,
    pub callsign: String,
    pub grid: Option<String>,
    pub is_cq: bool,
    pub is_my_call: bool,
    pub is_directed_cq_to_me: bool,
    pub cq_target: Option<String>,
    pub text: String,
    pub is_new: bool,
    pub low_confidence: bool,
    pub off_air: bool,
}

/// A snapshot of recent decodes, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct DecodeSnapshot {
    pub snapshot_id: String,
    pub generated_at: String,
    pub decodes: Vec<PublicDecode>,
}

fn public_id(record: &DecodeRecord, index: usize) -> String {
    format!(
        "{}-{}-{}",
        record.slice,
        record.timestamp.timestamp_millis(),
        index
    )
}

fn to_public(record: &DecodeRecord, index: usize) -> PublicDecode {
    PublicDecode {
        id: public_id(record, index),
        timestamp: record.timestamp.to_rfc3339(),
        band: record.band.clone(),
        mode: record.mode.clone(),
        dial_hz: record.dial_hz,
        audio_offset_hz: record.audio_offset_hz,
        rf_hz: record.rf_hz,
        snr_db: record.snr_db,
        dt_sec: record.dt_sec,
        callsign: record.callsign.clone(),
        grid: record.grid.clone(),
        is_cq: record.is_cq,
        is_my_call: record.is_my_call,
        is_directed_cq_to_me: record.is_directed_cq_to_me,
        cq_target: record.cq_target.clone(),
        text: record.text.clone(),
        is_new: record.flags.is_new,
        low_confidence: record.flags.low_confidence,
        off_air: record.flags.off_air,
    }
}

/// Recent internal decodes paired with their public projections.
async fn snapshot_pairs(core: &StateCore) -> Vec<(PublicDecode, DecodeRecord)> {
    core.decodes_within(SNAPSHOT_WINDOW)
        .await
        .into_iter()
        .enumerate()
        .map(|(i, record)| (to_public(&record, i), record))
        .collect()
}

/// Assemble a fresh snapshot of the last 60 seconds, newest first.
pub async fn assemble_snapshot(core: &StateCore) -> DecodeSnapshot {
    let decodes = snapshot_pairs(core)
        .await
        .into_iter()
        .map(|(public, _)| public)
        .collect();
    DecodeSnapshot {
        snapshot_id: uuid::Uuid::new_v4().to_string(),
        generated_at: Utc::now().to_rfc3339(),
        decodes,
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// `call_cq`: pick the best channel, assert TX on it, optionally retune.
pub async fn call_cq(
    ctx: &ToolContext,
    band: Option<&str>,
    freq_hz: Option<u64>,
    mode: Option<&str>,
) -> Result<Value> {
    let snap = ctx.core.snapshot().await;

    // Prefer a connected channel already on the requested band, else the
    // current TX channel, else channel 0.
    let channel = band
        .and_then(|wanted| {
            snap.channels
                .iter()
                .find(|c| c.connected && c.band.eq_ignore_ascii_case(wanted))
                .map(|c| c.index)
        })
        .or(snap.tx_channel)
        .unwrap_or(0);

    if let Some(backend) = &ctx.backend {
        if backend.is_connected() {
            backend.set_slice_tx(channel, true).await?;
            if let Some(freq) = freq_hz {
                backend.tune_slice(channel, freq).await?;
            }
        } else if freq_hz.is_some() {
            return Err(Error::NotConnected);
        }
    }
    ctx.core.set_tx_channel(channel).await;

    let ch = ctx
        .core
        .channel(channel)
        .await
        .ok_or_else(|| Error::NotFound(format!("channel {channel}")))?;
    let mode = mode
        .map(str::to_string)
        .or(ch.decoder_mode.clone())
        .unwrap_or_else(|| "FT8".to_string());
    Ok(json!({
        "status": "ok",
        "band": ch.band,
        "freq_hz": freq_hz.unwrap_or(ch.dial_hz),
        "mode": mode,
    }))
}

/// `answer_decoded_station`: set TX to the decode's channel and answer it.
pub async fn answer_decoded_station(
    ctx: &ToolContext,
    decode_id: &str,
    force_mode: Option<&str>,
) -> Result<Value> {
    let pairs = snapshot_pairs(&ctx.core).await;
    let (_, snapshot_record) = pairs
        .into_iter()
        .find(|(public, _)| public.id == decode_id)
        .ok_or_else(|| Error::NotFound(format!("decode id {decode_id}")))?;

    // Recover the routable record through the call/time/snr triple.
    let record = ctx
        .core
        .find_decode(
            &snapshot_record.callsign,
            snapshot_record.timestamp,
            snapshot_record.snr_db,
        )
        .await
        .ok_or_else(|| Error::NotFound(format!("decode id {decode_id}")))?;
    let channel = record.channel;
    let mode = force_mode.map(str::to_string).unwrap_or(record.mode.clone());

    // Already worked is a warning, never a refusal.
    {
        let book = ctx.logbook.lock().await;
        if book.is_worked(&record.callsign, &record.band, &mode) {
            drop(book);
            ctx.core
                .warn_duplicate(&record.callsign, &record.band, &mode)
                .await;
        }
    }

    // TX assignment completes before the reply frame goes out.
    if let Some(backend) = &ctx.backend {
        if backend.is_connected() {
            backend.set_slice_tx(channel, true).await?;
        }
    }
    ctx.core.set_tx_channel(channel).await;

    let link = ctx.ingest.link(channel).await.ok_or(Error::NotConnected)?;
    let mut reply_record = record.clone();
    reply_record.mode = mode.clone();
    link.send_reply(&reply_record, true).await?;

    tracing::info!(target = %record.callsign, band = %record.band, "answering station");
    Ok(json!({
        "status": "ok",
        "band": record.band,
        "freq_hz": record.dial_hz,
        "mode": mode,
        "target_call": record.callsign,
    }))
}

/// `rig_get_state`: read-only view of the four channels.
pub async fn rig_get_state(ctx: &ToolContext) -> Result<Value> {
    let snap = ctx.core.snapshot().await;
    let channels: Vec<Value> = snap
        .channels
        .iter()
        .map(|ch| {
            json!({
                "letter": ch.letter.to_string(),
                "index": ch.index,
                "freq_hz": ch.dial_hz,
                "band": ch.band,
                "mode": ch.decoder_mode.clone().unwrap_or_else(|| ch.mode.to_string()),
                "is_tx": ch.is_tx,
                "status": ch.status.to_string(),
                "connected": ch.connected,
                "last_decode": ch.last_decode.map(|t| t.to_rfc3339()),
            })
        })
        .collect();
    Ok(json!({
        "channels": channels,
        "tx_channel": snap.tx_channel.map(|i| channel_letter(i).to_string()),
        "backend_connected": snap.backend_connected,
    }))
}

/// `rig_emergency_stop`: drop TX on every slice.
pub async fn rig_emergency_stop(ctx: &ToolContext) -> Result<Value> {
    let backend = ctx.backend.as_ref().ok_or(Error::NotConnected)?;
    if !backend.is_connected() {
        return Err(Error::NotConnected);
    }
    for index in 0..CHANNEL_COUNT as u8 {
        backend.set_slice_tx(index, false).await?;
    }
    tracing::warn!("emergency stop: all slices TX off");
    Ok(json!({ "status": "all transmitters stopped" }))
}

// ---------------------------------------------------------------------------
// JSON-RPC plumbing
// ---------------------------------------------------------------------------

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

/// Tool result content wrapper; errors are structured, not transport
/// failures.
fn tool_result(id: Value, outcome: Result<Value>) -> Value {
    match outcome {
        Ok(value) => rpc_result(
            id,
            json!({
                "content": [{ "type": "text", "text": value.to_string() }],
                "isError": false,
            }),
        ),
        Err(e) => rpc_result(
            id,
            json!({
                "content": [{ "type": "text", "text": format!("error: {e}") }],
                "isError": true,
            }),
        ),
    }
}

fn tool_descriptors() -> Value {
    json!([
        {
            "name": "call_cq",
            "description": "Start calling CQ on the best available channel.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "band": { "type": "string", "description": "Preferred band, e.g. \"20m\"" },
                    "freq_hz": { "type": "integer", "description": "Dial frequency to retune to" },
                    "mode": { "type": "string", "description": "Digital mode, e.g. \"FT8\"" }
                }
            }
        },
        {
            "name": "answer_decoded_station",
            "description": "Answer a station from the current decode snapshot by id.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "decode_id": { "type": "string" },
                    "force_mode": { "type": "string" }
                },
                "required": ["decode_id"]
            }
        },
        {
            "name": "rig_get_state",
            "description": "Read-only state of all channels.",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "rig_emergency_stop",
            "description": "Immediately stop all transmitters.",
            "inputSchema": { "type": "object", "properties": {} }
        }
    ])
}

/// Handle one JSON-RPC request. `None` means no response (notification).
pub async fn handle_request(ctx: &ToolContext, request: &Value) -> Option<Value> {
    let method = request.get("method")?.as_str()?;
    let id = request.get("id").cloned();

    match method {
        "initialize" => Some(rpc_result(
            id?,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {}, "resources": {} },
                "serverInfo": { "name": "slicehub", "version": env!("CARGO_PKG_VERSION") },
            }),
        )),
        "notifications/initialized" => None,
        "ping" => Some(rpc_result(id?, json!({}))),
        "tools/list" => Some(rpc_result(id?, json!({ "tools": tool_descriptors() }))),
        "tools/call" => {
            let id = id?;
            let params = request.get("params")?;
            let name = params.get("name")?.as_str()?;
            let args = params.get("arguments").cloned().unwrap_or(json!({}));
            let outcome = match name {
                "call_cq" => {
                    call_cq(
                        ctx,
                        args.get("band").and_then(Value::as_str),
                        args.get("freq_hz").and_then(Value::as_u64),
                        args.get("mode").and_then(Value::as_str),
                    )
                    .await
                }
                "answer_decoded_station" => match args.get("decode_id").and_then(Value::as_str) {
                    Some(decode_id) => {
                        answer_decoded_station(
                            ctx,
                            decode_id,
                            args.get("force_mode").and_then(Value::as_str),
                        )
                        .await
                    }
                    None => Err(Error::InvalidParameter("decode_id is required".into())),
                },
                "rig_get_state" => rig_get_state(ctx).await,
                "rig_emergency_stop" => rig_emergency_stop(ctx).await,
                other => {
                    return Some(rpc_error(id, -32602, &format!("unknown tool {other}")));
                }
            };
            Some(tool_result(id, outcome))
        }
        "resources/list" => Some(rpc_result(
            id?,
            json!({
                "resources": [{
                    "uri": DECODES_URI,
                    "name": "Recent decodes",
                    "mimeType": "application/json",
                }]
            }),
        )),
        "resources/read" => {
            let id = id?;
            let uri = request
                .get("params")
                .and_then(|p| p.get("uri"))
                .and_then(Value::as_str);
            if uri != Some(DECODES_URI) {
                return Some(rpc_error(id, -32602, "unknown resource"));
            }
            let snapshot = assemble_snapshot(&ctx.core).await;
            let text = serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".into());
            Some(rpc_result(
                id,
                json!({
                    "contents": [{
                        "uri": DECODES_URI,
                        "mimeType": "application/json",
                        "text": text,
                    }]
                }),
            ))
        }
        _ => id.map(|id| rpc_error(id, -32601, &format!("method {method} not found"))),
    }
}

/// Debounced `resources/updated` notifications after decode activity.
async fn notify_loop(
    mut events: tokio::sync::broadcast::Receiver<HubEvent>,
    out: mpsc::UnboundedSender<Value>,
) {
    loop {
        match events.recv().await {
            Ok(HubEvent::DecodeAdded(_)) => {}
            Ok(_) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
        tokio::time::sleep(NOTIFY_DEBOUNCE).await;
        while events.try_recv().is_ok() {}
        let notification = json!({
            "jsonrpc": "2.0",
            "method": "notifications/resources/updated",
            "params": { "uri": DECODES_URI },
        });
        if out.send(notification).is_err() {
            break;
        }
    }
}

/// Serve JSON-RPC on stdin/stdout until EOF.
pub async fn run_stdio(ctx: Arc<ToolContext>) -> Result<()> {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(value) = out_rx.recv().await {
            let mut line = value.to_string();
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    tokio::spawn(notify_loop(ctx.core.subscribe(), out_tx.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| Error::Transport(format!("stdin read failed: {e}")))?
    {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(request) => {
                if let Some(response) = handle_request(&ctx, &request).await {
                    let _ = out_tx.send(response);
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "unparseable JSON-RPC line");
                let _ = out_tx.send(rpc_error(Value::Null, -32700, "parse error"));
            }
        }
    }

    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
