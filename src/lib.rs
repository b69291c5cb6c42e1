#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # paceline
//!
//! Client-side rate limiting driven by the server's rate limit headers.
//!
//! Requests are grouped into buckets keyed by route template and major parameters. Each
//! bucket is a lock: at most one request per bucket is in flight, and that request first
//! sleeps out whatever back-off the last response announced. A 429 flagged as global, or one
//! that came from an edge proxy, pauses every bucket at once.
//!
//! ## Features
//!
//! - **Per-bucket serialization** with independent buckets running concurrently
//! - **Header-driven windows** (`X-RateLimit-*`, `Retry-After`)
//! - **Three-way 429 classification**: global, edge, bucket
//! - **Cancellable waits** bounded by a [`WaitContext`]
//! - **Retry loop** with a configurable budget, plus a tower middleware
//! - **Background sweeper** evicting idle buckets
//! - **Telemetry sinks** built on `tower::Service`
//!
//! ## Quick Start
//!
//! ```rust
//! use paceline::{Ratelimiter, RatelimiterConfig, Route, WaitContext};
//! use http::{Method, Response};
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = Ratelimiter::new(RatelimiterConfig::default());
//!     let sweeper = limiter.spawn_sweeper();
//!
//!     let route = Route::new(Method::GET, "/guilds/{guild_id}").param("guild_id", 1);
//!     let response = limiter
//!         .execute(&WaitContext::new(), &route, || async {
//!             // Your HTTP call here
//!             Ok::<_, std::io::Error>(
//!                 Response::builder()
//!                     .header("x-ratelimit-remaining", "9")
//!                     .header("x-ratelimit-reset-after", "1")
//!                     .body(())
//!                     .unwrap(),
//!             )
//!         })
//!         .await
//!         .unwrap();
//!     assert!(response.status().is_success());
//!
//!     limiter.close(&WaitContext::new()).await;
//!     sweeper.join().await;
//! }
//! ```

mod bucket;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
mod global;
pub mod headers;
pub mod limiter;
pub mod middleware;
pub mod prelude;
mod registry;
mod retry;
pub mod route;
pub mod sweeper;
pub mod telemetry;

// Re-exports
pub use bucket::BucketState;
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, RatelimiterConfig, RatelimiterConfigBuilder};
pub use context::WaitContext;
pub use error::{RatelimitError, RequestError};
pub use headers::{EdgeDetection, LimitScope, RatelimitResponse, ResponseMeta};
pub use limiter::{BucketPermit, Ratelimiter, Release};
pub use middleware::{RatelimitLayer, RatelimitService};
pub use registry::SweepStats;
pub use route::{BucketKey, Route, RouteResolver};
pub use sweeper::SweeperHandle;
pub use tokio_util::sync::CancellationToken;
