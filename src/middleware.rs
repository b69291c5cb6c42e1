//! Tower middleware that routes HTTP requests through a [`Ratelimiter`].
//!
//! The limiter needs to know which route template a request was built from, which a URI
//! alone cannot tell it. Attach a [`Route`] to the request's extensions; requests without
//! one pass through unlimited. An optional [`WaitContext`] extension bounds the wait.
//!
//! Retrying a 429 re-sends the request, so the body type must be `Clone`.

use crate::context::WaitContext;
use crate::error::RequestError;
use crate::limiter::Ratelimiter;
use crate::route::Route;
use crate::telemetry::{LogSink, TelemetrySink};
use futures::future::BoxFuture;
use http::{Request, Response};
use std::task::{Context, Poll};
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;
use tracing::trace;

/// A layer that wraps services in [`RatelimitService`].
#[derive(Clone, Debug)]
pub struct RatelimitLayer<S = LogSink> {
    limiter: Ratelimiter<S>,
}

impl<S> RatelimitLayer<S> {
    pub fn new(limiter: Ratelimiter<S>) -> Self {
        Self { limiter }
    }
}

impl<Svc, S: Clone> Layer<Svc> for RatelimitLayer<S> {
    type Service = RatelimitService<Svc, S>;

    fn layer(&self, service: Svc) -> Self::Service {
        RatelimitService { inner: service, limiter: self.limiter.clone() }
    }
}

/// Middleware service that waits on each request's bucket and retries 429s.
#[derive(Clone, Debug)]
pub struct RatelimitService<Svc, S = LogSink> {
    inner: Svc,
    limiter: Ratelimiter<S>,
}

impl<Svc, S> RatelimitService<Svc, S> {
    pub fn limiter(&self) -> &Ratelimiter<S> {
        &self.limiter
    }
}

impl<Svc, S, ReqBody, ResBody> Service<Request<ReqBody>> for RatelimitService<Svc, S>
where
    Svc: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    Svc::Future: Send + 'static,
    Svc::Error: Send + 'static,
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
    ReqBody: Clone + Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = RequestError<Svc::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(RequestError::Transport)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let limiter = self.limiter.clone();
        let inner = self.inner.clone();

        Box::pin(async move {
            let Some(route) = req.extensions().get::<Route>().cloned() else {
                trace!(target: "paceline::middleware", uri = %req.uri(), "no route attached; not limited");
                return inner.oneshot(req).await.map_err(RequestError::Transport);
            };
            let ctx = req.extensions().get::<WaitContext>().cloned().unwrap_or_default();

            limiter
                .execute(&ctx, &route, move || inner.clone().oneshot(clone_request(&req)))
                .await
        })
    }
}

fn clone_request<B: Clone>(req: &Request<B>) -> Request<B> {
    let mut clone = Request::new(req.body().clone());
    *clone.method_mut() = req.method().clone();
    *clone.uri_mut() = req.uri().clone();
    *clone.version_mut() = req.version();
    *clone.headers_mut() = req.headers().clone();
    *clone.extensions_mut() = req.extensions().clone();
    clone
}
