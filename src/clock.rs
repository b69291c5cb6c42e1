//! Wall-clock abstraction used to interpret absolute reset timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Clock abstraction so absolute reset headers can be tested against a fixed "now".
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn unix_millis(&self) -> u64;
}

/// Wall clock backed by `SystemTime::now()`.
///
/// Notes: a clock set before the epoch reads as `0`, which makes every absolute reset
/// header look far in the future; the relative header is unaffected.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_millis(&self) -> u64 {
        let since = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        u64::try_from(since.as_millis()).unwrap_or(u64::MAX)
    }
}
