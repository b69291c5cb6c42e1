//! Rate limit response headers: parsing and 429 classification.
//!
//! Header lookups go through [`http::HeaderMap`], so names are case-insensitive.
//!
//! | Header                    | Meaning                                        |
//! |---------------------------|------------------------------------------------|
//! | `X-RateLimit-Bucket`      | server-assigned bucket id                      |
//! | `X-RateLimit-Limit`       | window ceiling                                 |
//! | `X-RateLimit-Remaining`   | requests left in the window                    |
//! | `X-RateLimit-Reset`       | absolute reset, float seconds since the epoch  |
//! | `X-RateLimit-Reset-After` | relative reset, float seconds                  |
//! | `X-RateLimit-Global`      | present on whole-client 429s                   |
//! | `Retry-After`             | float seconds to wait, required on 429         |

use crate::clock::Clock;
use crate::error::RatelimitError;
use http::header::{HeaderMap, HeaderName, RETRY_AFTER, VIA};
use http::StatusCode;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

pub const BUCKET: HeaderName = HeaderName::from_static("x-ratelimit-bucket");
pub const LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const RESET_AFTER: HeaderName = HeaderName::from_static("x-ratelimit-reset-after");
pub const GLOBAL: HeaderName = HeaderName::from_static("x-ratelimit-global");

/// Status and headers of a response, borrowed from whatever type the transport uses.
#[derive(Debug, Clone, Copy)]
pub struct ResponseMeta<'a> {
    status: StatusCode,
    headers: &'a HeaderMap,
}

impl<'a> ResponseMeta<'a> {
    pub fn new(status: StatusCode, headers: &'a HeaderMap) -> Self {
        Self { status, headers }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &'a HeaderMap {
        self.headers
    }
}

/// Anything the limiter can read rate limit metadata from.
pub trait RatelimitResponse {
    fn meta(&self) -> ResponseMeta<'_>;
}

impl<B> RatelimitResponse for http::Response<B> {
    fn meta(&self) -> ResponseMeta<'_> {
        ResponseMeta::new(self.status(), self.headers())
    }
}

impl RatelimitResponse for ResponseMeta<'_> {
    fn meta(&self) -> ResponseMeta<'_> {
        *self
    }
}

/// Which state a 429 applies to.
///
/// `Global` and `Edge` are both written to the shared back-off; they stay distinct so
/// logs and telemetry can tell an explicit global limit from an upstream throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitScope {
    /// The server flagged a whole-client limit.
    Global,
    /// The request never reached the application tier.
    Edge,
    /// Only the bucket that made the request is limited.
    Bucket,
}

impl LimitScope {
    /// Whether this limit applies to every bucket.
    pub fn is_shared(self) -> bool {
        !matches!(self, LimitScope::Bucket)
    }
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LimitScope::Global => "global",
            LimitScope::Edge => "edge",
            LimitScope::Bucket => "bucket",
        })
    }
}

/// Heuristic for spotting 429s issued by an edge proxy rather than the API itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeDetection {
    /// A 429 without this header (normally added by the application tier's
    /// intermediary) is treated as edge-wide.
    MissingHeader(HeaderName),
    /// Every non-global 429 is bucket-specific.
    Disabled,
}

impl Default for EdgeDetection {
    fn default() -> Self {
        EdgeDetection::MissingHeader(VIA)
    }
}

/// A parsed 429.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exceeded {
    pub scope: LimitScope,
    pub retry_after: Duration,
}

/// When a window resets, as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reset {
    /// Absolute, as time since the Unix epoch.
    At(Duration),
    /// Relative to when the response was processed.
    After(Duration),
}

impl Exceeded {
    /// When the back-off ends. A delay too large to represent is a malformed header.
    pub fn until(&self, now: Instant) -> Result<Instant, RatelimitError> {
        now.checked_add(self.retry_after)
            .ok_or_else(|| out_of_range("Retry-After", self.retry_after))
    }
}

impl Reset {
    /// Convert to a monotonic instant. Absolute resets in the past map to `now`.
    ///
    /// Fails with `MalformedHeader` if the reset lies beyond what `Instant` can represent.
    pub fn instant(self, now: Instant, clock: &dyn Clock) -> Result<Instant, RatelimitError> {
        match self {
            Reset::At(at) => {
                let wall = Duration::from_millis(clock.unix_millis());
                now.checked_add(at.saturating_sub(wall))
                    .ok_or_else(|| out_of_range("X-RateLimit-Reset", at))
            }
            Reset::After(after) => {
                now.checked_add(after).ok_or_else(|| out_of_range("X-RateLimit-Reset-After", after))
            }
        }
    }
}

fn out_of_range(name: &'static str, secs: Duration) -> RatelimitError {
    RatelimitError::MalformedHeader { name, value: secs.as_secs_f64().to_string() }
}

/// Window headers of a non-429 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset: Reset,
}

/// The server-assigned bucket id, if present.
pub fn bucket_id(headers: &HeaderMap) -> Result<Option<&str>, RatelimitError> {
    match headers.get(&BUCKET) {
        None => Ok(None),
        Some(value) => value.to_str().map(Some).map_err(|_| RatelimitError::MalformedHeader {
            name: "X-RateLimit-Bucket",
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        }),
    }
}

/// Classify a 429. Returns `Ok(None)` for any other status.
pub fn exceeded(
    meta: ResponseMeta<'_>,
    edge: &EdgeDetection,
) -> Result<Option<Exceeded>, RatelimitError> {
    if meta.status() != StatusCode::TOO_MANY_REQUESTS {
        return Ok(None);
    }
    let headers = meta.headers();
    let retry_after = seconds(headers, &RETRY_AFTER, "Retry-After")?
        .ok_or(RatelimitError::MissingHeader { name: "Retry-After" })?;

    let scope = if headers.contains_key(&GLOBAL) {
        LimitScope::Global
    } else {
        match edge {
            EdgeDetection::MissingHeader(name) if !headers.contains_key(name) => LimitScope::Edge,
            _ => LimitScope::Bucket,
        }
    };

    Ok(Some(Exceeded { scope, retry_after }))
}

/// Parse the window headers, preferring the absolute reset over the relative one.
pub fn window(headers: &HeaderMap) -> Result<Window, RatelimitError> {
    let limit = count(headers, &LIMIT, "X-RateLimit-Limit")?;
    let remaining = count(headers, &REMAINING, "X-RateLimit-Remaining")?;
    let reset = match seconds(headers, &RESET, "X-RateLimit-Reset")? {
        Some(at) => Reset::At(at),
        None => match seconds(headers, &RESET_AFTER, "X-RateLimit-Reset-After")? {
            Some(after) => Reset::After(after),
            None => return Err(RatelimitError::MissingReset),
        },
    };
    Ok(Window { limit, remaining, reset })
}

fn text<'h>(
    headers: &'h HeaderMap,
    header: &HeaderName,
    name: &'static str,
) -> Result<Option<&'h str>, RatelimitError> {
    let Some(value) = headers.get(header) else {
        return Ok(None);
    };
    value.to_str().map(|s| Some(s.trim())).map_err(|_| RatelimitError::MalformedHeader {
        name,
        value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
    })
}

fn count(
    headers: &HeaderMap,
    header: &HeaderName,
    name: &'static str,
) -> Result<Option<u32>, RatelimitError> {
    let Some(raw) = text(headers, header, name)? else {
        return Ok(None);
    };
    raw.parse::<u32>()
        .map(Some)
        .map_err(|_| RatelimitError::MalformedHeader { name, value: raw.to_owned() })
}

fn seconds(
    headers: &HeaderMap,
    header: &HeaderName,
    name: &'static str,
) -> Result<Option<Duration>, RatelimitError> {
    let Some(raw) = text(headers, header, name)? else {
        return Ok(None);
    };
    raw.parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map(Some)
        .ok_or_else(|| RatelimitError::MalformedHeader { name, value: raw.to_owned() })
}
