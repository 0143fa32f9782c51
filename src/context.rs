use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;

/// Arbitrary data attached to a call, consumed by the enqueue throttler.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Converts an attached payload into bytes for publication.
pub type MarshalFn = Arc<dyn Fn(&Payload) -> Result<Vec<u8>, BoxError> + Send + Sync>;

/// Per-call attributes threaded through every acquire and release.
///
/// All attributes are optional; accessors fall back to a zero value when an
/// attribute is absent. The context is immutable once built and cheap to
/// clone, so one instance can fan out across a whole throttler tree.
#[derive(Clone, Default)]
pub struct Context {
    cancellation: CancellationToken,
    priority: Option<u8>,
    key: Option<String>,
    timestamp: Option<Instant>,
    payload: Option<Payload>,
    marshaler: Option<MarshalFn>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a cancellation token honored by every blocking throttler.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Attaches a priority level; the priority throttler clamps it to its
    /// configured number of lanes.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Attaches a routing key for the pattern and keyed throttlers.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Marks when the caller's work started; latency throttlers measure
    /// against it on release.
    pub fn with_timestamp(mut self, started: Instant) -> Self {
        self.timestamp = Some(started);
        self
    }

    /// Attaches a payload for the enqueue throttler.
    pub fn with_payload(mut self, payload: impl Any + Send + Sync) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    /// Attaches a marshaler converting the payload into bytes.
    pub fn with_marshaler(mut self, marshaler: MarshalFn) -> Self {
        self.marshaler = Some(marshaler);
        self
    }

    /// Attaches a serializable payload together with a JSON marshaler, the
    /// common case for diverting calls to an external queue.
    pub fn with_json_message<T>(self, message: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.with_payload(message).with_marshaler(Arc::new(|payload: &Payload| {
            let message = payload
                .downcast_ref::<T>()
                .ok_or_else(|| BoxError::from("payload does not match marshaler"))?;
            serde_json::to_vec(message).map_err(BoxError::from)
        }))
    }

    /// Whether the call's cancellation token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub(crate) async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Priority clamped to `[1, limit]`; absent priority is the lowest lane.
    pub(crate) fn priority(&self, limit: u8) -> u8 {
        self.priority.unwrap_or(1).clamp(1, limit.max(1))
    }

    pub(crate) fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Start of the caller's work; defaults to now, yielding a zero latency.
    pub(crate) fn started(&self) -> Instant {
        self.timestamp.unwrap_or_else(Instant::now)
    }

    pub(crate) fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub(crate) fn marshaler(&self) -> Option<&MarshalFn> {
        self.marshaler.as_ref()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("priority", &self.priority)
            .field("key", &self.key)
            .field("timestamp", &self.timestamp)
            .field("payload", &self.payload.as_ref().map(|_| ".."))
            .field("marshaler", &self.marshaler.as_ref().map(|_| ".."))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_clamps_into_lane_range() {
        assert_eq!(Context::new().priority(3), 1);
        assert_eq!(Context::new().with_priority(0).priority(3), 1);
        assert_eq!(Context::new().with_priority(2).priority(3), 2);
        assert_eq!(Context::new().with_priority(200).priority(3), 3);
        // a zero-lane limit still yields a usable lane
        assert_eq!(Context::new().with_priority(2).priority(0), 1);
    }

    #[test]
    fn accessors_fall_back_when_absent() {
        let ctx = Context::new();
        assert_eq!(ctx.key(), None);
        assert!(ctx.payload().is_none());
        assert!(ctx.marshaler().is_none());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn json_message_marshals_the_payload() {
        let ctx = Context::new().with_json_message(vec![1u32, 2, 3]);
        let marshaler = ctx.marshaler().expect("marshaler attached");
        let payload = ctx.payload().expect("payload attached");
        let bytes = marshaler(payload).expect("marshal");
        assert_eq!(bytes, b"[1,2,3]");
    }

    #[test]
    fn json_marshaler_rejects_foreign_payload() {
        let ctx = Context::new().with_json_message("message");
        let marshaler = ctx.marshaler().expect("marshaler attached").clone();
        let foreign: Payload = Arc::new(17u64);
        assert!(marshaler(&foreign).is_err());
    }
}
