use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Process-local "work done" counter backing a component's /info endpoint:
/// a monotonic count plus the wall-clock time of the last advance.
#[derive(Default)]
pub struct ActivityCounter {
    count: AtomicU64,
    last_update: Mutex<Option<DateTime<Utc>>>,
}

impl ActivityCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
        *self.last_update.lock() = Some(Utc::now());
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.lock()
    }
}
