//! Registry mapping bucket keys to buckets.
//!
//! The map sits behind a short-held `std::sync::Mutex`. It is never held across an
//! `.await`, so no task ever waits on a bucket's lock while holding the registry.

use crate::bucket::Bucket;
use crate::route::BucketKey;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepStats {
    /// Buckets evicted this pass.
    pub removed: usize,
    /// Buckets skipped because a request held them.
    pub busy: usize,
    /// Buckets left in the registry.
    pub retained: usize,
}

/// In-memory bucket registry; created lazily, one entry per key.
#[derive(Debug, Default)]
pub(crate) struct BucketRegistry {
    buckets: Mutex<HashMap<BucketKey, Bucket>>,
}

impl BucketRegistry {
    /// Look up `key` without creating it.
    pub(crate) fn get(&self, key: &BucketKey) -> Option<Bucket> {
        let map = self.buckets.lock().expect("bucket registry poisoned");
        map.get(key).cloned()
    }

    /// Look up `key`, inserting an optimistic bucket if it is new. The flag is `true` on insert.
    pub(crate) fn get_or_insert(&self, key: &BucketKey) -> (Bucket, bool) {
        let mut map = self.buckets.lock().expect("bucket registry poisoned");
        if let Some(bucket) = map.get(key) {
            return (bucket.clone(), false);
        }
        let bucket = Bucket::new();
        map.insert(key.clone(), bucket.clone());
        trace!(target: "paceline::registry", key = %key, "bucket created");
        (bucket, true)
    }

    /// Whether `bucket` is still the one registered under `key`.
    pub(crate) fn is_current(&self, key: &BucketKey, bucket: &Bucket) -> bool {
        let map = self.buckets.lock().expect("bucket registry poisoned");
        map.get(key).is_some_and(|registered| registered.same(bucket))
    }

    pub(crate) fn contains(&self, key: &BucketKey) -> bool {
        self.buckets.lock().expect("bucket registry poisoned").contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.lock().expect("bucket registry poisoned").len()
    }

    /// Every registered bucket, copied out so callers can await on them unlocked.
    pub(crate) fn entries(&self) -> Vec<(BucketKey, Bucket)> {
        let map = self.buckets.lock().expect("bucket registry poisoned");
        map.iter().map(|(k, b)| (k.clone(), b.clone())).collect()
    }

    /// Drop every bucket.
    pub(crate) fn clear(&self) {
        self.buckets.lock().expect("bucket registry poisoned").clear();
    }

    /// Evict buckets whose window has elapsed, skipping any that are locked.
    pub(crate) fn sweep(&self, now: Instant) -> SweepStats {
        let mut stats = SweepStats::default();
        let mut map = self.buckets.lock().expect("bucket registry poisoned");
        map.retain(|key, bucket| {
            let Some(guard) = bucket.try_lock() else {
                stats.busy += 1;
                return true;
            };
            if guard.is_expired(now) {
                trace!(target: "paceline::registry", key = %key, "bucket evicted");
                stats.removed += 1;
                false
            } else {
                true
            }
        });
        stats.retained = map.len();
        stats
    }
}
