//! The acquire/send/release cycle with retry on 429.

use crate::context::WaitContext;
use crate::error::RequestError;
use crate::headers::RatelimitResponse;
use crate::limiter::{Ratelimiter, Release};
use crate::route::Route;
use crate::telemetry::{RatelimitEvent, TelemetrySink};
use http::StatusCode;
use std::future::Future;
use tracing::{debug, warn};

impl<S> Ratelimiter<S>
where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    /// Send a request for `route` through the limiter, retrying while the server answers 429.
    ///
    /// Each attempt waits for the route's bucket, calls `op`, and reports the response. After a
    /// 429 the next attempt re-enters the wait, which sleeps out the back-off the 429 installed.
    /// Gives up with [`RequestError::RateLimited`] once the configured retry budget is spent.
    ///
    /// Unusable rate limit headers on a non-429 response are logged and the response is still
    /// returned; on a 429 they abort with [`RequestError::Ratelimit`].
    pub async fn execute<R, E, Fut, Op>(
        &self,
        ctx: &WaitContext,
        route: &Route,
        mut op: Op,
    ) -> Result<R, RequestError<E>>
    where
        R: RatelimitResponse,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let key = self.resolve(route);
        let mut retries = 0usize;

        loop {
            let permit = self.wait_bucket(ctx, &key).await?;
            let response = match op().await {
                Ok(response) => response,
                Err(err) => {
                    self.unlock_bucket(permit, None).await?;
                    return Err(RequestError::Transport(err));
                }
            };

            let meta = response.meta();
            let status = meta.status();
            let released = self.unlock_bucket(permit, Some(meta)).await;

            match released {
                Ok(Release::Exceeded { scope, retry_after }) => {
                    let max = self.max_retries();
                    if retries >= max {
                        let attempts = retries + 1;
                        warn!(target: "paceline::retry", key = %key, attempts, "giving up after repeated 429s");
                        self.emit(RatelimitEvent::RetryExhausted { key: key.clone(), attempts }).await;
                        return Err(RequestError::RateLimited { attempts, retry_after, scope });
                    }
                    retries += 1;
                    debug!(
                        target: "paceline::retry",
                        key = %key,
                        retry = retries,
                        max,
                        retry_after = ?retry_after,
                        "retrying after 429"
                    );
                }
                Ok(_) => return Ok(response),
                Err(_) if status != StatusCode::TOO_MANY_REQUESTS => return Ok(response),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RatelimiterConfig;
    use crate::error::RatelimitError;
    use crate::headers::LimitScope;
    use crate::telemetry::MemorySink;
    use http::{Method, Response};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn limiter(retries: usize) -> Ratelimiter<MemorySink> {
        let config = RatelimiterConfig::builder().max_retries(retries).build().unwrap();
        Ratelimiter::new(config).with_sink(MemorySink::new())
    }

    fn route() -> Route {
        Route::new(Method::POST, "/channels/{channel_id}/messages").param("channel_id", 7)
    }

    fn ok() -> Response<()> {
        Response::builder()
            .header("x-ratelimit-remaining", "4")
            .header("x-ratelimit-reset-after", "1")
            .body(())
            .unwrap()
    }

    fn too_many(retry_after: &str) -> Response<()> {
        Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header("retry-after", retry_after)
            .header("via", "1.1 google")
            .body(())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_bucket_429_then_succeeds() {
        let limiter = limiter(10);
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let response = limiter
            .execute(&WaitContext::new(), &route(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok::<_, std::io::Error>(too_many("0.2"))
                    } else {
                        Ok(ok())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retry_budget() {
        let limiter = limiter(2);
        let calls = AtomicUsize::new(0);

        let err = limiter
            .execute(&WaitContext::new(), &route(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, std::io::Error>(too_many("0.05")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            RequestError::RateLimited { attempts, scope, retry_after } => {
                assert_eq!(attempts, 3);
                assert_eq!(scope, LimitScope::Bucket);
                assert_eq!(retry_after, Duration::from_millis(50));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(limiter
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, RatelimitEvent::RetryExhausted { attempts: 3, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_releases_bucket() {
        let limiter = limiter(10);
        let err = limiter
            .execute(&WaitContext::new(), &route(), || async {
                Err::<Response<()>, _>(std::io::Error::new(std::io::ErrorKind::Other, "reset"))
            })
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(!limiter.is_locked(&limiter.resolve(&route())));
    }

    #[tokio::test(start_paused = true)]
    async fn bad_headers_on_success_still_return_response() {
        let limiter = limiter(10);
        let response = limiter
            .execute(&WaitContext::new(), &route(), || async {
                Ok::<_, std::io::Error>(
                    Response::builder().header("x-ratelimit-remaining", "4").body(()).unwrap(),
                )
            })
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_429_aborts() {
        let limiter = limiter(10);
        let err = limiter
            .execute(&WaitContext::new(), &route(), || async {
                Ok::<_, std::io::Error>(
                    Response::builder().status(StatusCode::TOO_MANY_REQUESTS).body(()).unwrap(),
                )
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.as_ratelimit(),
            Some(&RatelimitError::MissingHeader { name: "Retry-After" })
        );
        assert!(!limiter.is_locked(&limiter.resolve(&route())));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_shorter_than_backoff_fails_fast() {
        let limiter = limiter(10);
        let ctx = WaitContext::with_timeout(Duration::from_millis(100));
        let err = limiter
            .execute(&ctx, &route(), || async { Ok::<_, std::io::Error>(too_many("5")) })
            .await
            .unwrap_err();
        assert!(err.as_ratelimit().is_some_and(RatelimitError::is_deadline_exceeded));
    }
}
