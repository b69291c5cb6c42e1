use http::{HeaderName, HeaderValue, Response, StatusCode};
use paceline::telemetry::MemorySink;
use paceline::{BucketKey, Ratelimiter, RatelimiterConfig, Route};

pub fn limiter() -> Ratelimiter<MemorySink> {
    Ratelimiter::new(RatelimiterConfig::default()).with_sink(MemorySink::new())
}

pub fn response(status: StatusCode, headers: &[(&'static str, &'static str)]) -> Response<()> {
    let mut response = Response::new(());
    *response.status_mut() = status;
    for &(name, value) in headers {
        response
            .headers_mut()
            .insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    response
}

pub fn ok(headers: &[(&'static str, &'static str)]) -> Response<()> {
    response(StatusCode::OK, headers)
}

pub fn channel_messages(channel: u64) -> Route {
    Route::new(http::Method::POST, "/channels/{channel_id}/messages").param("channel_id", channel)
}

pub fn key(limiter: &Ratelimiter<MemorySink>, channel: u64) -> BucketKey {
    limiter.resolve(&channel_messages(channel))
}
