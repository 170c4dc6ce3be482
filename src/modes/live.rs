use anyhow::Result;
use tokio::io::{self, AsyncBufReadExt};
use tracing::{info, warn};

use super::shared::{build_detector, handle_message, parse_message};

/// Reads one decoded message per line from stdin until EOF.
pub(super) async fn run() -> Result<()> {
    let (detector, db) = build_detector()?;

    info!("Running in live mode. Waiting for messages on stdin...");
    let mut lines = io::BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let msg = match parse_message(line) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Dropping malformed message: {e:#}");
                continue;
            }
        };
        handle_message(&detector, &db, &msg, true);
    }

    let stats = detector.stats();
    info!(
        "Input closed: new={}, duplicates={}, resident={}",
        stats.admitted,
        stats.suppressed,
        detector.resident()
    );
    Ok(())
}
