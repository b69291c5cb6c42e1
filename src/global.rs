//! Whole-client back-off shared by every bucket.
//!
//! Stored as milliseconds past the limiter's creation instant in a single atomic, so
//! readers never take a lock. Writers only move it forward (`fetch_max`), which makes a
//! stale read at worst an unnecessary wait, never a missed one. `0` means unset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct GlobalBackoff {
    epoch: Instant,
    until_millis: AtomicU64,
}

impl GlobalBackoff {
    pub(crate) fn new() -> Self {
        Self { epoch: Instant::now(), until_millis: AtomicU64::new(0) }
    }

    /// The instant before which no request may be issued, if one was ever set.
    ///
    /// May be in the past.
    pub(crate) fn until(&self) -> Option<Instant> {
        match self.until_millis.load(Ordering::Acquire) {
            0 => None,
            millis => self.epoch.checked_add(Duration::from_millis(millis)),
        }
    }

    /// Push the back-off out to `until` unless it already reaches further.
    pub(crate) fn extend_to(&self, until: Instant) {
        let offset = until.saturating_duration_since(self.epoch);
        // Round up so waiters never wake before the server's instant, unless the rounded
        // instant is past what `Instant` can hold.
        let ceil = u64::try_from((offset.as_nanos() + 999_999) / 1_000_000).unwrap_or(u64::MAX);
        let millis = match self.epoch.checked_add(Duration::from_millis(ceil)) {
            Some(_) => ceil,
            None => u64::try_from(offset.as_millis()).unwrap_or(u64::MAX),
        };
        self.until_millis.fetch_max(millis.max(1), Ordering::AcqRel);
    }

    pub(crate) fn clear(&self) {
        self.until_millis.store(0, Ordering::Release);
    }
}
