//! Error types for the bucket limiter and its retry loop.
use crate::headers::LimitScope;
use std::time::Duration;

/// Errors produced by [`Ratelimiter`](crate::Ratelimiter) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RatelimitError {
    /// The caller's [`WaitContext`](crate::WaitContext) was cancelled.
    #[error("wait for rate limit bucket was cancelled")]
    Cancelled,
    /// The caller's deadline passed, or the required back-off outlives it.
    #[error("rate limit wait of {wait:?} exceeds the caller's deadline")]
    DeadlineExceeded { wait: Duration },
    /// A rate limit header was present but could not be parsed.
    #[error("malformed {name} header: {value:?}")]
    MalformedHeader { name: &'static str, value: String },
    /// A header required for this response was absent.
    #[error("missing {name} header")]
    MissingHeader { name: &'static str },
    /// A non-429 response carried neither an absolute nor a relative reset.
    #[error("response carried no rate limit reset information")]
    MissingReset,
}

impl RatelimitError {
    /// Check if the wait was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if the wait ran out of time.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    /// Check if this error came from response header parsing.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::MalformedHeader { .. } | Self::MissingHeader { .. } | Self::MissingReset
        )
    }
}

/// Error returned by [`Ratelimiter::execute`](crate::Ratelimiter::execute) and the tower middleware.
#[derive(Debug, thiserror::Error)]
pub enum RequestError<E> {
    /// The limiter refused or failed to pace the request.
    #[error(transparent)]
    Ratelimit(#[from] RatelimitError),
    /// The underlying request failed before a response arrived.
    #[error("transport error: {0}")]
    Transport(#[source] E),
    /// The server kept answering 429 after every permitted retry.
    #[error("rate limited after {attempts} attempts ({scope} limit, retry after {retry_after:?})")]
    RateLimited { attempts: usize, retry_after: Duration, scope: LimitScope },
}

impl<E> RequestError<E> {
    /// Check if retries were exhausted on 429 responses.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Check if the transport failed.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Borrow the limiter error if present.
    pub fn as_ratelimit(&self) -> Option<&RatelimitError> {
        match self {
            Self::Ratelimit(e) => Some(e),
            _ => None,
        }
    }

    /// Take the transport error if present.
    pub fn into_transport(self) -> Option<E> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn deadline_display_includes_wait() {
        let err = RatelimitError::DeadlineExceeded { wait: Duration::from_millis(1500) };
        let msg = err.to_string();
        assert!(msg.contains("deadline"));
        assert!(msg.contains("1.5"));
    }

    #[test]
    fn malformed_header_display_names_header() {
        let err = RatelimitError::MalformedHeader {
            name: "X-RateLimit-Remaining",
            value: "lots".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("X-RateLimit-Remaining"));
        assert!(msg.contains("lots"));
        assert!(err.is_protocol());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn predicates_cover_wait_variants() {
        assert!(RatelimitError::Cancelled.is_cancelled());
        assert!(RatelimitError::DeadlineExceeded { wait: Duration::ZERO }.is_deadline_exceeded());
        assert!(RatelimitError::MissingReset.is_protocol());
        assert!(RatelimitError::MissingHeader { name: "Retry-After" }.is_protocol());
    }

    #[test]
    fn request_error_exposes_transport_source() {
        let err: RequestError<io::Error> =
            RequestError::Transport(io::Error::new(io::ErrorKind::Other, "reset by peer"));
        assert!(err.is_transport());
        assert!(err.source().is_some());
        assert_eq!(err.into_transport().unwrap().to_string(), "reset by peer");
    }

    #[test]
    fn rate_limited_display() {
        let err: RequestError<io::Error> = RequestError::RateLimited {
            attempts: 4,
            retry_after: Duration::from_secs(2),
            scope: LimitScope::Global,
        };
        let msg = err.to_string();
        assert!(err.is_rate_limited());
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("global"));
        assert!(err.as_ratelimit().is_none());
    }

    #[test]
    fn ratelimit_errors_convert() {
        let err: RequestError<io::Error> = RatelimitError::Cancelled.into();
        assert_eq!(err.as_ratelimit(), Some(&RatelimitError::Cancelled));
    }
}
