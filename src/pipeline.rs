//! Collaborator surface toward the host media pipeline.
//!
//! The host framework's pad, bus and clock machinery is out of scope; the
//! element only needs a consumer to push into and a monotonic time source to
//! pace against. Both are expressed as traits so any pipeline (or a test
//! harness) can plug in.

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::caps::Caps;
use crate::error::FlowResult;

/// An opaque timestamped audio unit.
///
/// Created by the WebSocket worker from an inbound binary frame. The payload
/// is never touched after creation; the pacer assigns `pts` and `duration`
/// at dequeue time.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio payload, exactly the bytes received on the wire.
    pub data: Bytes,
    /// Presentation timestamp relative to the pipeline clock.
    pub pts: Option<Duration>,
    /// Playback duration of this frame.
    pub duration: Option<Duration>,
}

impl AudioFrame {
    /// Wrap received bytes into an unstamped frame.
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            pts: None,
            duration: None,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Out-of-band events traveling alongside audio on either port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Opens a stream; carries a stable per-activation identifier.
    StreamStart {
        /// Unique stream identifier.
        id: String,
    },
    /// Negotiated media format.
    Caps(Caps),
    /// Running-time reference for the timestamps that follow. Re-emitted
    /// after every flush.
    Segment,
    /// Start of a flush: downstream discards in-flight data.
    FlushStart,
    /// End of a flush: running time resets, normal dataflow resumes.
    FlushStop,
    /// End of stream. Emitted at most once per activation.
    Eos,
}

/// Consumer attached to the source port.
///
/// Implementations are called from the pacer and WebSocket worker threads
/// and must be safe to share.
pub trait Downstream: Send + Sync {
    /// Deliver an out-of-band event. The return value only feeds logging;
    /// event delivery is not retried.
    fn push_event(&self, event: StreamEvent) -> bool;

    /// Deliver a timestamped audio frame.
    fn push_buffer(&self, frame: AudioFrame) -> FlowResult;
}

/// Monotonic time source shared with the host pipeline.
pub trait PipelineClock: Send + Sync {
    /// Current monotonic time.
    fn now(&self) -> Duration;
}

/// Default clock: monotonic time since construction.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// New clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineClock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Answer to a latency query on the source port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyInfo {
    /// The element is a live source; its output cannot be prerolled.
    pub live: bool,
    /// Minimum latency: one frame duration.
    pub min: Duration,
    /// Maximum latency: a full receive queue.
    pub max: Duration,
}
