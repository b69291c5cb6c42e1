//! Telemetry for the bucket limiter.
//!
//! The limiter reports what it does as [`RatelimitEvent`]s delivered to a
//! [`TelemetrySink`], which is a `tower::Service<RatelimitEvent>`. The default sink,
//! [`LogSink`], forwards to `tracing`; [`MemorySink`] and [`StreamingSink`] make the event
//! stream observable in tests and dashboards.
//!
//! | Event              | When                                                  |
//! |--------------------|-------------------------------------------------------|
//! | `BucketCreated`    | first acquire for a key                               |
//! | `Waiting`          | a holder sleeps out a bucket or global back-off       |
//! | `Updated`          | a response refreshed a bucket's window                |
//! | `Exceeded`         | a 429 was classified (global / edge / bucket)         |
//! | `MalformedHeaders` | rate limit headers were unusable                      |
//! | `Swept`            | a cleanup pass finished                               |
//! | `RetryExhausted`   | the retry loop gave up                                |

pub mod events;
pub mod sinks;

pub use events::{RatelimitEvent, WaitScope};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, StreamingSink, TelemetrySink};
