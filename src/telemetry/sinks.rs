use super::events::RatelimitEvent;
use futures::future::BoxFuture;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// A telemetry sink that consumes limiter events.
pub trait TelemetrySink:
    tower::Service<RatelimitEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// Telemetry never fails a limiter operation: a sink that is not ready or errors simply
/// loses the event.
pub async fn emit_best_effort<S>(sink: S, event: RatelimitEvent)
where
    S: tower::Service<RatelimitEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

type SinkFuture = BoxFuture<'static, Result<(), Infallible>>;

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<RatelimitEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: RatelimitEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// A telemetry sink that logs events using the `tracing` crate.
///
/// Limit hits, malformed headers and exhausted retries log at WARN; everything else at TRACE.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<RatelimitEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: RatelimitEvent) -> Self::Future {
        if event.is_warning() {
            tracing::warn!(target: "paceline::telemetry", event = %event, "ratelimit_event");
        } else {
            tracing::trace!(target: "paceline::telemetry", event = %event, "ratelimit_event");
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A telemetry sink that stores events in memory.
///
/// Bounded; the oldest events are evicted once `capacity` is reached.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<RatelimitEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Creates a bounded memory sink (default cap: 10,000).
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<RatelimitEvent> {
        self.events.lock().expect("memory sink poisoned").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("memory sink poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("memory sink poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().expect("memory sink poisoned").is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<RatelimitEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: RatelimitEvent) -> Self::Future {
        let mut events = self.events.lock().expect("memory sink poisoned");
        if events.len() >= self.capacity {
            events.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        events.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

/// A streaming telemetry sink that broadcasts events to any number of subscribers.
///
/// Events sent while nobody is subscribed are counted as dropped.
#[derive(Clone, Debug)]
pub struct StreamingSink {
    sender: Arc<tokio::sync::broadcast::Sender<RatelimitEvent>>,
    dropped: Arc<AtomicU64>,
}

impl StreamingSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { sender: Arc::new(sender), dropped: Arc::new(AtomicU64::new(0)) }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RatelimitEvent> {
        self.sender.subscribe()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Service<RatelimitEvent> for StreamingSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: RatelimitEvent) -> Self::Future {
        if self.sender.send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for StreamingSink {
    type SinkError = Infallible;
}
