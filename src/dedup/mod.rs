//! Duplicate detection for incoming cell-broadcast alerts.
//!
//! One of two strategies is picked at startup and kept for the life of the
//! detector:
//!
//! * **in-memory** – a capacity-limited identity set, FIFO eviction by
//!   arrival.  ETWS keys include the body hash and ETWS metadata.
//! * **database** – a sliding time window seeded from stored history; a
//!   repeat is a duplicate only while the earlier copy is inside the window
//!   and its text matches exactly.
//!
//! A third mode turns detection off and reports every message as new.
pub mod fingerprint;
pub mod identity_set;
pub mod window_log;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dedup::fingerprint::{IdentityKey, WindowKey};
use crate::dedup::identity_set::BoundedIdentitySet;
use crate::dedup::window_log::SlidingWindowLog;
use crate::history::{HistoryRow, HistorySource};
use crate::message::{BroadcastMessage, MessageKind, body_hash};

/// Default identity-set capacity.
pub const DEFAULT_CAPACITY: usize = 65_535;

/// Default sliding window (12 hours).
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(12 * 60 * 60);

// ───────────────────────────── Configuration ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    Disabled,
    InMemory,
    Windowed,
}

impl DedupMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "memory" | "in_memory" | "set" => Some(Self::InMemory),
            "database" | "db" | "window" | "windowed" => Some(Self::Windowed),
            "disabled" | "off" | "none" => Some(Self::Disabled),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::InMemory => "memory",
            Self::Windowed => "database",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    pub mode: DedupMode,
    pub capacity: usize,
    pub window: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            mode: DedupMode::InMemory,
            capacity: DEFAULT_CAPACITY,
            window: DEFAULT_WINDOW,
        }
    }
}

impl DetectorConfig {
    /// Construct from environment variables.
    ///
    /// | Env var             | Default  | Purpose                                |
    /// |---------------------|----------|----------------------------------------|
    /// | `DEDUP_MODE`        | `memory` | `memory`, `database` or `disabled`     |
    /// | `DEDUP_CAPACITY`    | `65535`  | Identity-set capacity                  |
    /// | `DEDUP_WINDOW_SECS` | `43200`  | Sliding window for `database` mode     |
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom lookup.  Invalid
    /// or zero values fall back to the defaults.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let mode = match lookup("DEDUP_MODE") {
            Some(raw) => DedupMode::parse(&raw).unwrap_or_else(|| {
                warn!("Unknown DEDUP_MODE {raw:?}, using {}", defaults.mode.label());
                defaults.mode
            }),
            None => defaults.mode,
        };
        let capacity = lookup("DEDUP_CAPACITY")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.capacity);
        let window = lookup("DEDUP_WINDOW_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.window);

        Self {
            mode,
            capacity,
            window,
        }
    }
}

impl fmt::Display for DetectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            DedupMode::Disabled => write!(f, "DuplicateDetector(mode=disabled)"),
            DedupMode::InMemory => write!(
                f,
                "DuplicateDetector(mode=memory, capacity={})",
                self.capacity
            ),
            DedupMode::Windowed => write!(
                f,
                "DuplicateDetector(mode=database, window={}s)",
                self.window.as_secs()
            ),
        }
    }
}

// ─────────────────────────────── Detector ────────────────────────────────

enum Strategy {
    Disabled,
    InMemory(Mutex<BoundedIdentitySet<IdentityKey>>),
    Windowed(Mutex<SlidingWindowLog>),
}

/// Verdict counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    pub admitted: u64,
    pub suppressed: u64,
}

/// Single decision point for the alert pipeline: "is this message new?"
pub struct DuplicateDetector {
    strategy: Strategy,
    admitted: AtomicU64,
    suppressed: AtomicU64,
}

impl DuplicateDetector {
    fn with_strategy(strategy: Strategy) -> Self {
        Self {
            strategy,
            admitted: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::with_strategy(Strategy::Disabled)
    }

    pub fn in_memory(capacity: usize) -> Self {
        Self::with_strategy(Strategy::InMemory(Mutex::new(BoundedIdentitySet::new(
            capacity,
        ))))
    }

    pub fn windowed(window: Duration, seed: Vec<WindowKey>) -> Self {
        Self::with_strategy(Strategy::Windowed(Mutex::new(SlidingWindowLog::with_seed(
            window, seed,
        ))))
    }

    /// Build the configured strategy.  History is only read in `Windowed`
    /// mode; a failed read leaves the window empty and is logged.
    pub fn from_config(cfg: &DetectorConfig, history: &dyn HistorySource, now_ms: i64) -> Self {
        match cfg.mode {
            DedupMode::Disabled => Self::disabled(),
            DedupMode::InMemory => Self::in_memory(cfg.capacity),
            DedupMode::Windowed => {
                let window_ms = i64::try_from(cfg.window.as_millis()).unwrap_or(i64::MAX);
                let since = now_ms.saturating_sub(window_ms);
                let seed = match history.recent_since(since) {
                    Ok(rows) => seed_from_rows(rows),
                    Err(e) => {
                        warn!("History seed failed, starting with an empty window: {e:#}");
                        Vec::new()
                    }
                };
                info!("Seeded duplicate window with {} recent message(s)", seed.len());
                Self::windowed(cfg.window, seed)
            }
        }
    }

    pub fn mode(&self) -> DedupMode {
        match self.strategy {
            Strategy::Disabled => DedupMode::Disabled,
            Strategy::InMemory(_) => DedupMode::InMemory,
            Strategy::Windowed(_) => DedupMode::Windowed,
        }
    }

    /// Returns `true` when `msg` has not been seen before, and records it.
    pub fn is_new(&self, msg: &BroadcastMessage) -> bool {
        let fresh = match &self.strategy {
            Strategy::Disabled => true,
            Strategy::InMemory(set) => {
                let key = IdentityKey::from_message(msg);
                debug!("Identity key {key} code={}", key.code());
                let mut set = set.lock().unwrap_or_else(PoisonError::into_inner);
                let fresh = set.admit(key);
                if !fresh {
                    debug!("Ignoring duplicate alert serial={}", msg.serial_number);
                }
                fresh
            }
            Strategy::Windowed(log) => {
                let key = WindowKey::from_message(msg);
                let mut log = log.lock().unwrap_or_else(PoisonError::into_inner);
                let fresh = log.admit(key);
                if !fresh {
                    debug!("Ignoring duplicate alert serial={} within window", msg.serial_number);
                }
                fresh
            }
        };

        let counter = if fresh { &self.admitted } else { &self.suppressed };
        counter.fetch_add(1, Ordering::Relaxed);
        fresh
    }

    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }

    /// Number of keys currently held by the active strategy.
    pub fn resident(&self) -> usize {
        match &self.strategy {
            Strategy::Disabled => 0,
            Strategy::InMemory(set) => set.lock().unwrap_or_else(PoisonError::into_inner).len(),
            Strategy::Windowed(log) => log.lock().unwrap_or_else(PoisonError::into_inner).len(),
        }
    }
}

/// Turn stored rows into window keys.  The stored kind decides whether the
/// body is hashed, falling back to the category classifier that incoming
/// messages use when the kind column is NULL.  Rows without category, serial or
/// delivery time are skipped: they cannot be compared without inventing a
/// value that might collide with a real one.
fn seed_from_rows(rows: Vec<HistoryRow>) -> Vec<WindowKey> {
    let total = rows.len();
    let seed: Vec<WindowKey> = rows
        .into_iter()
        .filter_map(|row| {
            let (Some(category), Some(serial), Some(at)) =
                (row.service_category, row.serial_number, row.delivery_time)
            else {
                return None;
            };
            let kind = row
                .kind
                .unwrap_or_else(|| MessageKind::from_service_category(category));
            let hash = match (&row.message_body, kind) {
                (Some(body), MessageKind::Etws) => body_hash(body),
                _ => 0,
            };
            Some(WindowKey {
                service_category: category,
                serial_number: serial,
                location: row.location,
                body_hash: hash,
                message_body: row.message_body,
                delivery_time: at,
            })
        })
        .collect();
    if seed.len() < total {
        debug!("Skipped {} incomplete history row(s)", total - seed.len());
    }
    seed
}
