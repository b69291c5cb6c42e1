//! Convenient re-exports for common paceline types.
pub use crate::{
    config::{RatelimiterConfig, DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_RETRIES},
    headers::{EdgeDetection, LimitScope, RatelimitResponse, ResponseMeta},
    limiter::{BucketPermit, Ratelimiter, Release},
    middleware::RatelimitLayer,
    route::{BucketKey, Route},
    telemetry::{LogSink, MemorySink, NullSink, RatelimitEvent, TelemetrySink},
    RatelimitError, RequestError, WaitContext,
};
