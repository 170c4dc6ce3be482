use anyhow::{Result, anyhow};
use std::time::Duration;
use tracing::info;

use super::shared::{ReplayCfg, build_detector, handle_message, load_messages, load_replay_cfg};
use crate::message::BroadcastMessage;

pub(super) async fn run() -> Result<()> {
    let replay = load_replay_cfg()?;
    let messages = load_messages(&replay.input_path)?;
    if messages.is_empty() {
        return Err(anyhow!("Replay input is empty: {}", replay.input_path));
    }

    let (detector, db) = build_detector()?;
    info!(
        "Replay started: {} messages from {}",
        messages.len(),
        replay.input_path
    );
    if replay.persist {
        info!("Replay persistence enabled; new messages are recorded in history");
    }

    for (idx, msg) in messages.iter().enumerate() {
        if idx > 0 {
            let delay_ms = replay_delay_ms(&replay, &messages[idx - 1], msg);
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        handle_message(&detector, &db, msg, replay.persist);
    }

    let stats = detector.stats();
    info!(
        "Replay complete: total={}, new={}, duplicates={}",
        messages.len(),
        stats.admitted,
        stats.suppressed
    );

    Ok(())
}

/// Pause before `next`: the fixed step if set, otherwise the recorded gap
/// scaled by `speed` and clamped to the configured bounds.
fn replay_delay_ms(cfg: &ReplayCfg, prev: &BroadcastMessage, next: &BroadcastMessage) -> u64 {
    if let Some(step_ms) = cfg.fixed_step_ms {
        return step_ms;
    }
    let delta_ms = next.delivery_time.saturating_sub(prev.delivery_time).max(0) as f64;
    let scaled = (delta_ms / cfg.speed).round() as u64;
    scaled.clamp(cfg.min_delay_ms, cfg.max_delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CellLocation, MessageKind};

    fn cfg() -> ReplayCfg {
        ReplayCfg {
            input_path: String::new(),
            speed: 2.0,
            fixed_step_ms: None,
            min_delay_ms: 0,
            max_delay_ms: 10_000,
            persist: false,
        }
    }

    fn at(delivery_time: i64) -> BroadcastMessage {
        BroadcastMessage {
            service_category: 4370,
            serial_number: 1,
            location: CellLocation::default(),
            body: "x".into(),
            kind: MessageKind::Cmas,
            etws_info: None,
            delivery_time,
        }
    }

    #[test]
    fn gap_is_scaled_and_clamped() {
        assert_eq!(replay_delay_ms(&cfg(), &at(0), &at(3_000)), 1_500);
        assert_eq!(replay_delay_ms(&cfg(), &at(0), &at(60_000)), 10_000);

        let fixed = ReplayCfg {
            fixed_step_ms: Some(250),
            ..cfg()
        };
        assert_eq!(replay_delay_ms(&fixed, &at(0), &at(60_000)), 250);
    }

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        assert_eq!(replay_delay_ms(&cfg(), &at(i64::MIN), &at(i64::MAX)), 10_000);
        assert_eq!(replay_delay_ms(&cfg(), &at(i64::MAX), &at(i64::MIN)), 0);
    }
}
