use tokio::time::Instant;

/// An immutable value captured from a sensor at a point in time.
///
/// `captured_at` uses tokio's clock so paused-time tests can drive the
/// heartbeat deterministically.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading<V> {
    pub value: V,
    pub captured_at: Instant,
}

impl<V> Reading<V> {
    pub fn new(value: V, captured_at: Instant) -> Self {
        Self { value, captured_at }
    }

    pub fn now(value: V) -> Self {
        Self::new(value, Instant::now())
    }
}
