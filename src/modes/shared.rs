use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::{info, warn};

use crate::dedup::{DetectorConfig, DuplicateDetector};
use crate::history::{self, SharedDb};
use crate::message::BroadcastMessage;

#[derive(Clone)]
pub(super) struct ReplayCfg {
    pub input_path: String,
    pub speed: f64,
    pub fixed_step_ms: Option<u64>,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub persist: bool,
}

pub(super) fn must_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("Missing env var {key}"))
}

pub(super) fn parse_bool_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(default)
}

pub(super) fn history_db_path() -> String {
    std::env::var("HISTORY_DB_PATH").unwrap_or_else(|_| "./cell_broadcasts.sqlite".into())
}

pub(super) fn load_replay_cfg() -> Result<ReplayCfg> {
    let input_path = must_env("REPLAY_INPUT_PATH")?;
    let speed = std::env::var("REPLAY_SPEED")
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| *v > 0.0)
        .unwrap_or(1.0);
    let fixed_step_ms = std::env::var("REPLAY_STEP_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0);
    let min_delay_ms = std::env::var("REPLAY_MIN_DELAY_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let max_delay_ms = std::env::var("REPLAY_MAX_DELAY_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(10_000);

    Ok(ReplayCfg {
        input_path,
        speed,
        fixed_step_ms,
        min_delay_ms,
        max_delay_ms,
        persist: parse_bool_env("REPLAY_PERSIST", false),
    })
}

/// Open the history store and build the configured detector.  The store is
/// also where admitted messages are recorded.
pub(super) fn build_detector() -> Result<(DuplicateDetector, SharedDb)> {
    let cfg = DetectorConfig::from_env();
    info!("Dedup config: {cfg}");
    let db = history::open_db(&history_db_path())?;
    let detector = DuplicateDetector::from_config(&cfg, &db, Utc::now().timestamp_millis());
    info!(
        "Detector ready: mode={}, resident={}",
        detector.mode().label(),
        detector.resident()
    );
    Ok((detector, db))
}

/// Parse one JSON line into a message.
pub(super) fn parse_message(line: &str) -> Result<BroadcastMessage> {
    serde_json::from_str(line).context("invalid broadcast message JSON")
}

pub(super) fn load_messages(path: &str) -> Result<Vec<BroadcastMessage>> {
    let file = File::open(path).with_context(|| format!("failed to open replay file {path}"))?;
    let reader = BufReader::new(file);

    let mut messages = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let msg = parse_message(&line).with_context(|| format!("at line {}", idx + 1))?;
        messages.push(msg);
    }

    messages.sort_by_key(|m| m.delivery_time);
    Ok(messages)
}

/// Run one message through the duplicate gate.  New messages are recorded
/// in the history store when `persist` is set, then printed.  Returns `true`
/// when the alert was shown; a failed insert suppresses it.
pub(super) fn handle_message(
    detector: &DuplicateDetector,
    db: &SharedDb,
    msg: &BroadcastMessage,
    persist: bool,
) -> bool {
    if !detector.is_new(msg) {
        return false;
    }
    if persist {
        if let Err(e) = history::insert_broadcast(db, msg) {
            warn!("Failed to record broadcast serial={}, not shown: {e:#}", msg.serial_number);
            return false;
        }
    }
    println!("{}", format_alert(msg));
    true
}

pub(super) fn format_alert(msg: &BroadcastMessage) -> String {
    format!(
        "[{} {} #{}] {} @ {}\n{}",
        msg.kind.label(),
        msg.service_category,
        msg.serial_number,
        msg.delivery_time,
        msg.location,
        msg.body,
    )
}
