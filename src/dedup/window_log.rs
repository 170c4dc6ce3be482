//! Time-windowed log of recent keys, newest first.
//!
//! A repeat only counts as a duplicate while the earlier copy is younger
//! than the window, measured from the incoming key's delivery time.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;

use crate::dedup::fingerprint::WindowKey;

pub struct SlidingWindowLog {
    entries: VecDeque<WindowKey>,
    window_ms: i64,
}

impl SlidingWindowLog {
    /// Build from previously delivered keys.  The seed is re-sorted newest
    /// first so any source ordering is accepted.
    pub fn with_seed(window: Duration, mut seed: Vec<WindowKey>) -> Self {
        seed.sort_by(|a, b| b.delivery_time.cmp(&a.delivery_time));
        Self {
            entries: seed.into(),
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Returns `true` when no in-window entry equals `key`.
    ///
    /// The scan stops at the first stale entry (age >= window); everything
    /// from there on is dropped.  On a hit the log is left as is.  On a
    /// miss the stale tail is cut and `key` becomes the newest entry.
    pub fn admit(&mut self, key: WindowKey) -> bool {
        let mut fresh = self.entries.len();
        for (idx, entry) in self.entries.iter().enumerate() {
            let age = key.delivery_time.saturating_sub(entry.delivery_time);
            if age >= self.window_ms {
                fresh = idx;
                break;
            }
            if *entry == key {
                debug!("Window log hit: {key} matches entry delivered at {}", entry.delivery_time);
                return false;
            }
        }

        if fresh < self.entries.len() {
            debug!(
                "Window log dropping {} stale entries",
                self.entries.len() - fresh
            );
            self.entries.truncate(fresh);
        }
        self.entries.push_front(key);
        true
    }

    /// Delivery times of the retained entries, newest first.
    #[cfg(test)]
    pub fn delivery_times(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.iter().map(|e| e.delivery_time)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
