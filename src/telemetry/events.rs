use crate::error::RatelimitError;
use crate::headers::LimitScope;
use crate::registry::SweepStats;
use crate::route::BucketKey;
use std::fmt;
use std::time::Duration;

/// What a waiting request is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitScope {
    /// The bucket's own window is exhausted.
    Bucket,
    /// A whole-client back-off is active.
    Global,
}

/// Events emitted by the limiter.
#[derive(Debug, Clone, PartialEq)]
pub enum RatelimitEvent {
    /// A bucket was created for a key seen for the first time.
    BucketCreated { key: BucketKey },
    /// A request holds its bucket and is sleeping out a back-off.
    Waiting { key: BucketKey, scope: WaitScope, wait: Duration },
    /// A successful response updated a bucket's window.
    Updated { key: BucketKey, remaining: u32, limit: Option<u32>, reset_after: Duration },
    /// The server answered 429.
    Exceeded { key: BucketKey, scope: LimitScope, retry_after: Duration },
    /// A response's rate limit headers could not be used.
    MalformedHeaders { key: BucketKey, error: RatelimitError },
    /// A sweep pass finished.
    Swept(SweepStats),
    /// The retry loop gave up after repeated 429s.
    RetryExhausted { key: BucketKey, attempts: usize },
}

impl RatelimitEvent {
    /// Whether the event describes something an operator should be warned about.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            RatelimitEvent::Exceeded { .. }
                | RatelimitEvent::MalformedHeaders { .. }
                | RatelimitEvent::RetryExhausted { .. }
        )
    }
}

impl fmt::Display for WaitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitScope::Bucket => write!(f, "bucket"),
            WaitScope::Global => write!(f, "global"),
        }
    }
}

impl fmt::Display for RatelimitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RatelimitEvent::BucketCreated { key } => write!(f, "BucketCreated({})", key),
            RatelimitEvent::Waiting { key, scope, wait } => {
                write!(f, "Waiting({}, {} back-off, wait={:?})", key, scope, wait)
            }
            RatelimitEvent::Updated { key, remaining, limit, reset_after } => match limit {
                Some(limit) => write!(
                    f,
                    "Updated({}, {}/{} remaining, reset_after={:?})",
                    key, remaining, limit, reset_after
                ),
                None => {
                    write!(f, "Updated({}, {} remaining, reset_after={:?})", key, remaining, reset_after)
                }
            },
            RatelimitEvent::Exceeded { key, scope, retry_after } => {
                write!(f, "Exceeded({}, {} limit, retry_after={:?})", key, scope, retry_after)
            }
            RatelimitEvent::MalformedHeaders { key, error } => {
                write!(f, "MalformedHeaders({}, {})", key, error)
            }
            RatelimitEvent::Swept(stats) => write!(
                f,
                "Swept(removed={}, busy={}, retained={})",
                stats.removed, stats.busy, stats.retained
            ),
            RatelimitEvent::RetryExhausted { key, attempts } => {
                write!(f, "RetryExhausted({}, attempts={})", key, attempts)
            }
        }
    }
}
