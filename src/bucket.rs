//! Per-resource rate limit state guarded by the lock that serializes requests to it.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Rate limit state of one bucket.
///
/// Fields are written only by the task holding the bucket's lock, and only in reaction to
/// a server response. A fresh bucket is optimistic: one request remaining, unknown limit,
/// no reset time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketState {
    pub(crate) id: Option<String>,
    pub(crate) remaining: u32,
    pub(crate) limit: Option<u32>,
    pub(crate) reset_at: Option<Instant>,
}

impl BucketState {
    pub(crate) fn new() -> Self {
        Self { id: None, remaining: 1, limit: None, reset_at: None }
    }

    /// Server-assigned bucket id, once a response has carried one.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Requests left in the current window.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Window ceiling; `None` until the server reports it.
    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// When the window resets; `None` until the server reports it.
    pub fn reset_at(&self) -> Option<Instant> {
        self.reset_at
    }

    /// The instant this bucket's own limit lifts, if it is currently exhausted.
    ///
    /// An unknown limit never blocks: only an explicit `remaining == 0` does.
    pub(crate) fn exhausted_until(&self, now: Instant) -> Option<Instant> {
        match self.reset_at {
            Some(reset) if self.remaining == 0 && reset > now => Some(reset),
            _ => None,
        }
    }

    /// Whether the window has elapsed. An unknown reset counts as elapsed.
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.reset_at.map_or(true, |reset| reset <= now)
    }
}

/// Handle to a bucket's lock-guarded state. Clones share the same lock.
#[derive(Debug, Clone)]
pub(crate) struct Bucket {
    state: Arc<Mutex<BucketState>>,
}

impl Bucket {
    pub(crate) fn new() -> Self {
        Self { state: Arc::new(Mutex::new(BucketState::new())) }
    }

    /// Wait for exclusive use of the bucket. Cancel-safe: dropping the future gives up the wait.
    pub(crate) async fn lock(&self) -> OwnedMutexGuard<BucketState> {
        self.state.clone().lock_owned().await
    }

    /// Take the lock only if nobody holds it.
    pub(crate) fn try_lock(&self) -> Option<OwnedMutexGuard<BucketState>> {
        self.state.clone().try_lock_owned().ok()
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.state.try_lock().is_err()
    }

    /// Whether both handles point at the same bucket.
    pub(crate) fn same(&self, other: &Bucket) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn new_bucket_is_optimistic() {
        let state = BucketState::new();
        assert_eq!(state.remaining(), 1);
        assert_eq!(state.limit(), None);
        assert_eq!(state.reset_at(), None);
        assert_eq!(state.id(), None);
        assert_eq!(state.exhausted_until(Instant::now()), None);
        assert!(state.is_expired(Instant::now()));
    }

    #[test]
    fn exhausted_only_when_remaining_is_zero_and_reset_is_ahead() {
        let now = Instant::now();
        let later = now + Duration::from_millis(200);
        let mut state = BucketState::new();
        state.reset_at = Some(later);
        assert_eq!(state.exhausted_until(now), None, "remaining > 0 never blocks");

        state.remaining = 0;
        assert_eq!(state.exhausted_until(now), Some(later));
        assert_eq!(state.exhausted_until(later), None, "reset reached");
        assert!(!state.is_expired(now));
        assert!(state.is_expired(later));
    }

    #[tokio::test]
    async fn try_lock_fails_while_held() {
        let bucket = Bucket::new();
        let guard = bucket.lock().await;
        assert!(bucket.is_locked());
        assert!(bucket.try_lock().is_none());
        drop(guard);
        assert!(!bucket.is_locked());
        assert!(bucket.try_lock().is_some());
    }

    #[test]
    fn clones_share_identity() {
        let a = Bucket::new();
        let b = a.clone();
        assert!(a.same(&b));
        assert!(!a.same(&Bucket::new()));
    }
}
