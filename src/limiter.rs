//! The limiter façade: acquire a bucket, send, report the response, release.
//!
//! Protocol, per request:
//!
//! 1. [`Ratelimiter::wait_bucket`] locks the bucket for the request's key and sleeps out any
//!    active back-off. The returned [`BucketPermit`] *is* the lock.
//! 2. The caller performs the request.
//! 3. [`Ratelimiter::unlock_bucket`] consumes the permit, folds the response's rate limit
//!    headers into the bucket (or into the global back-off), and releases the lock.
//!
//! Requests with different keys never contend. Requests with the same key are serialized
//! with no fairness guarantee.
//!
//! A permit that is dropped instead of unlocked releases the bucket without touching its
//! state, so every exit path (errors, panics, cancelled futures) frees the bucket.

use crate::bucket::{Bucket, BucketState};
use crate::clock::{Clock, SystemClock};
use crate::config::{LiveTunables, RatelimiterConfig};
use crate::context::WaitContext;
use crate::error::RatelimitError;
use crate::global::GlobalBackoff;
use crate::headers::{self, EdgeDetection, Exceeded, LimitScope, ResponseMeta};
use crate::registry::{BucketRegistry, SweepStats};
use crate::route::{BucketKey, Route, RouteResolver};
use crate::telemetry::{emit_best_effort, LogSink, RatelimitEvent, TelemetrySink, WaitScope};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Exclusive use of one bucket, from [`Ratelimiter::wait_bucket`] until
/// [`Ratelimiter::unlock_bucket`] or drop.
#[must_use = "dropping a permit releases the bucket without recording the response"]
pub struct BucketPermit {
    key: BucketKey,
    bucket: Bucket,
    guard: OwnedMutexGuard<BucketState>,
}

impl BucketPermit {
    pub fn key(&self) -> &BucketKey {
        &self.key
    }

    /// The bucket's state as of acquisition.
    pub fn state(&self) -> &BucketState {
        &self.guard
    }
}

impl fmt::Debug for BucketPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketPermit")
            .field("key", &self.key)
            .field("state", &*self.guard)
            .finish()
    }
}

/// What [`Ratelimiter::unlock_bucket`] did with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The bucket's window was refreshed from the headers.
    Updated,
    /// The server answered 429; retry the whole acquire/send/release cycle.
    Exceeded { scope: LimitScope, retry_after: Duration },
    /// No response was supplied; the bucket was released untouched.
    NoResponse,
    /// The bucket was evicted or reset while held; nothing was recorded.
    Untracked,
}

impl Release {
    pub fn is_exceeded(&self) -> bool {
        matches!(self, Release::Exceeded { .. })
    }
}

enum Applied {
    Window { remaining: u32, limit: Option<u32>, reset_after: Duration },
    Exceeded(Exceeded),
}

#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) registry: BucketRegistry,
    pub(crate) global: GlobalBackoff,
    pub(crate) resolver: RouteResolver,
    pub(crate) tunables: LiveTunables,
    pub(crate) cleanup_interval: Duration,
    pub(crate) shutdown: CancellationToken,
}

/// Header-driven bucket limiter shared by every request-issuing task.
///
/// Clones share the same registry, global back-off and configuration.
///
/// # Example
/// ```rust
/// use paceline::{RatelimitResponse, Ratelimiter, RatelimiterConfig, Route, WaitContext};
/// use http::{Method, Response, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), paceline::RatelimitError> {
/// let limiter = Ratelimiter::new(RatelimiterConfig::default());
/// let route = Route::new(Method::GET, "/channels/{channel_id}").param("channel_id", 42);
/// let key = limiter.resolve(&route);
///
/// let permit = limiter.wait_bucket(&WaitContext::new(), &key).await?;
/// let response = Response::builder()
///     .status(StatusCode::OK)
///     .header("x-ratelimit-remaining", "4")
///     .header("x-ratelimit-reset-after", "1.0")
///     .body(())
///     .unwrap();
/// let released = limiter.unlock_bucket(permit, Some(response.meta())).await?;
/// assert!(!released.is_exceeded());
/// # Ok(())
/// # }
/// ```
pub struct Ratelimiter<S = LogSink> {
    pub(crate) shared: Arc<Shared>,
    pub(crate) sink: S,
    pub(crate) clock: Arc<dyn Clock>,
}

impl<S: Clone> Clone for Ratelimiter<S> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone(), sink: self.sink.clone(), clock: self.clock.clone() }
    }
}

impl<S> fmt::Debug for Ratelimiter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ratelimiter")
            .field("buckets", &self.shared.registry.len())
            .field("global_until", &self.shared.global.until())
            .field("cleanup_interval", &self.shared.cleanup_interval)
            .field("sink", &"<sink>")
            .finish()
    }
}

impl Ratelimiter<LogSink> {
    /// Create a limiter that logs through `tracing`.
    pub fn new(config: RatelimiterConfig) -> Self {
        let shared = Shared {
            registry: BucketRegistry::default(),
            global: GlobalBackoff::new(),
            resolver: RouteResolver::new(config.major_parameters().iter().cloned()),
            tunables: LiveTunables::new(&config),
            cleanup_interval: config.cleanup_interval(),
            shutdown: CancellationToken::new(),
        };
        Self { shared: Arc::new(shared), sink: LogSink, clock: Arc::new(SystemClock) }
    }
}

impl Default for Ratelimiter<LogSink> {
    fn default() -> Self {
        Self::new(RatelimiterConfig::default())
    }
}

impl<S> Ratelimiter<S> {
    /// Replace the telemetry sink.
    pub fn with_sink<T>(self, sink: T) -> Ratelimiter<T> {
        Ratelimiter { shared: self.shared, sink, clock: self.clock }
    }

    /// Override the wall clock used for absolute reset headers (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Resolve the bucket key for `route`.
    pub fn resolve(&self, route: &Route) -> BucketKey {
        self.shared.resolver.resolve(route)
    }

    pub fn resolver(&self) -> &RouteResolver {
        &self.shared.resolver
    }

    pub fn max_retries(&self) -> usize {
        self.shared.tunables.get().max_retries
    }

    pub fn set_max_retries(&self, retries: usize) {
        self.shared.tunables.update(|t| t.max_retries = retries);
    }

    pub fn edge_detection(&self) -> EdgeDetection {
        self.shared.tunables.get().edge_detection.clone()
    }

    /// Swap the edge-wide 429 heuristic on a running limiter.
    pub fn set_edge_detection(&self, edge: EdgeDetection) {
        self.shared.tunables.update(|t| t.edge_detection = edge.clone());
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.shared.cleanup_interval
    }

    /// Number of registered buckets.
    pub fn len(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &BucketKey) -> bool {
        self.shared.registry.contains(key)
    }

    /// Whether a request currently holds the bucket for `key`.
    pub fn is_locked(&self, key: &BucketKey) -> bool {
        self.shared.registry.get(key).is_some_and(|bucket| bucket.is_locked())
    }

    /// Copy of the bucket's state without waiting. `None` if the key is unknown or in use.
    pub fn bucket_snapshot(&self, key: &BucketKey) -> Option<BucketState> {
        let bucket = self.shared.registry.get(key)?;
        let guard = bucket.try_lock()?;
        Some(guard.clone())
    }

    /// The whole-client back-off instant, if one was ever set. May be in the past.
    pub fn global_backoff_until(&self) -> Option<Instant> {
        self.shared.global.until()
    }

    /// Forget every bucket and clear the global back-off.
    ///
    /// Permits held across a reset release into nothing: their responses are not recorded.
    pub fn reset(&self) {
        self.shared.registry.clear();
        self.shared.global.clear();
        debug!(target: "paceline::limiter", "limiter reset");
    }
}

impl<S> Ratelimiter<S>
where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    /// Lock the bucket for `key`, then wait out its back-off or the global one.
    ///
    /// The first request for an unseen key passes straight through. If the required back-off
    /// ends after the context's deadline, the bucket is released and `DeadlineExceeded` is
    /// returned without sleeping.
    pub async fn wait_bucket(
        &self,
        ctx: &WaitContext,
        key: &BucketKey,
    ) -> Result<BucketPermit, RatelimitError> {
        let (bucket, guard) = loop {
            let (bucket, created) = self.shared.registry.get_or_insert(key);
            if created {
                self.emit(RatelimitEvent::BucketCreated { key: key.clone() }).await;
            }

            let guard = tokio::select! {
                biased;
                err = ctx.done() => return Err(err),
                guard = bucket.lock() => guard,
            };

            if self.shared.registry.is_current(key, &bucket) {
                break (bucket, guard);
            }
            // Swept or reset between lookup and lock; the replacement is the real bucket.
            trace!(target: "paceline::limiter", key = %key, "bucket replaced while waiting");
        };
        trace!(target: "paceline::limiter", key = %key, "bucket locked");

        let now = Instant::now();
        let (until, scope) = match guard.exhausted_until(now) {
            Some(reset) => (Some(reset), WaitScope::Bucket),
            None => (self.shared.global.until(), WaitScope::Global),
        };

        if let Some(until) = until.filter(|until| *until > now) {
            let wait = until - now;
            if ctx.outlived_by(until) {
                debug!(target: "paceline::limiter", key = %key, wait = ?wait, "back-off outlives deadline");
                return Err(RatelimitError::DeadlineExceeded { wait });
            }

            debug!(target: "paceline::limiter", key = %key, %scope, wait = ?wait, "waiting out back-off");
            self.emit(RatelimitEvent::Waiting { key: key.clone(), scope, wait }).await;
            tokio::select! {
                biased;
                err = ctx.done() => return Err(err),
                _ = tokio::time::sleep_until(until) => {}
            }
        }

        Ok(BucketPermit { key: key.clone(), bucket, guard })
    }

    /// Record `response` against the permit's bucket and release it.
    ///
    /// The bucket is released on every path, including header errors. Pass `None` when the
    /// request failed before a response arrived.
    pub async fn unlock_bucket(
        &self,
        permit: BucketPermit,
        response: Option<ResponseMeta<'_>>,
    ) -> Result<Release, RatelimitError> {
        let BucketPermit { key, bucket, mut guard } = permit;

        if !self.shared.registry.is_current(&key, &bucket) {
            trace!(target: "paceline::limiter", key = %key, "releasing untracked bucket");
            return Ok(Release::Untracked);
        }
        let Some(meta) = response else {
            trace!(target: "paceline::limiter", key = %key, "released without response");
            return Ok(Release::NoResponse);
        };

        let applied = self.apply(&key, &mut guard, meta);
        drop(guard);
        trace!(target: "paceline::limiter", key = %key, "bucket released");

        match applied {
            Ok(Applied::Window { remaining, limit, reset_after }) => {
                self.emit(RatelimitEvent::Updated { key, remaining, limit, reset_after }).await;
                Ok(Release::Updated)
            }
            Ok(Applied::Exceeded(Exceeded { scope, retry_after })) => {
                warn!(
                    target: "paceline::limiter",
                    key = %key,
                    %scope,
                    retry_after = ?retry_after,
                    "rate limit exceeded"
                );
                self.emit(RatelimitEvent::Exceeded { key, scope, retry_after }).await;
                Ok(Release::Exceeded { scope, retry_after })
            }
            Err(error) => {
                warn!(target: "paceline::limiter", key = %key, %error, "unusable rate limit headers");
                self.emit(RatelimitEvent::MalformedHeaders { key, error: error.clone() }).await;
                Err(error)
            }
        }
    }

    /// Stop the sweeper and wait until no request holds a bucket.
    ///
    /// Bounded by `ctx`: on cancellation or deadline it stops waiting and returns. Closing is
    /// final for background sweeping: sweepers spawned afterwards exit at once. Explicit
    /// [`sweep`](Self::sweep) calls and requests keep working.
    pub async fn close(&self, ctx: &WaitContext) {
        self.shared.shutdown.cancel();
        for (key, bucket) in self.shared.registry.entries() {
            tokio::select! {
                biased;
                err = ctx.done() => {
                    debug!(target: "paceline::limiter", key = %key, %err, "close gave up waiting for bucket");
                    return;
                }
                _drained = bucket.lock() => {}
            }
        }
        debug!(target: "paceline::limiter", "limiter closed");
    }

    /// Run one cleanup pass: evict unlocked buckets whose window has elapsed.
    pub async fn sweep(&self) -> SweepStats {
        let stats = self.shared.registry.sweep(Instant::now());
        debug!(
            target: "paceline::sweeper",
            removed = stats.removed,
            busy = stats.busy,
            retained = stats.retained,
            "sweep finished"
        );
        self.emit(RatelimitEvent::Swept(stats)).await;
        stats
    }

    pub(crate) async fn emit(&self, event: RatelimitEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }

    fn apply(
        &self,
        key: &BucketKey,
        state: &mut BucketState,
        meta: ResponseMeta<'_>,
    ) -> Result<Applied, RatelimitError> {
        let headers = meta.headers();
        if let Some(id) = headers::bucket_id(headers)? {
            if state.id.as_deref() != Some(id) {
                trace!(target: "paceline::limiter", key = %key, bucket_id = id, "bucket id learned");
                state.id = Some(id.to_owned());
            }
            self.shared.resolver.record_bucket_id(key, id);
        }

        let now = Instant::now();
        let tunables = self.shared.tunables.get();
        if let Some(exceeded) = headers::exceeded(meta, &tunables.edge_detection)? {
            let until = exceeded.until(now)?;
            match exceeded.scope {
                LimitScope::Global | LimitScope::Edge => self.shared.global.extend_to(until),
                LimitScope::Bucket => {
                    state.remaining = 0;
                    state.reset_at = Some(until);
                }
            }
            return Ok(Applied::Exceeded(exceeded));
        }

        let window = headers::window(headers)?;
        let reset_at = window.reset.instant(now, self.clock.as_ref())?;
        if let Some(limit) = window.limit {
            state.limit = Some(limit);
        }
        if let Some(remaining) = window.remaining {
            state.remaining = remaining;
        }
        state.reset_at = Some(reset_at);
        trace!(
            target: "paceline::limiter",
            key = %key,
            remaining = state.remaining,
            limit = ?state.limit,
            reset_after = ?(reset_at - now),
            "bucket updated"
        );

        Ok(Applied::Window {
            remaining: state.remaining,
            limit: state.limit,
            reset_after: reset_at - now,
        })
    }
}
