//! Shared runtime state between the element shell, the WebSocket worker and
//! the output pacer.
//!
//! Lock order, strictly top-down: `state` then `queue` then `timing`. No
//! path in this crate nests them; each guard is released before the next is
//! taken, which keeps the order trivially satisfied.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::caps::{AudioParams, Caps};
use crate::config::TransceiverConfig;
use crate::pipeline::{Downstream, PipelineClock, StreamEvent};
use crate::queue::ReceiveQueue;

/// Cloneable handle for pushing outbound binary frames into the transport.
///
/// Callers clone the handle out of [`ConnectionState::Connected`] under the
/// state lock and use it after releasing the lock, so transport teardown can
/// never free the send path underneath an in-flight call.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    tx: mpsc::Sender<Bytes>,
}

impl OutboundHandle {
    pub(crate) fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Enqueue a binary frame without blocking. Returns false when the frame
    /// was dropped (channel full or transport gone).
    pub(crate) fn try_send(&self, data: Bytes) -> bool {
        match self.tx.try_send(data) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("outbound channel full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("outbound channel closed, dropping frame");
                false
            }
        }
    }
}

/// Connection lifecycle as observed by the rest of the element.
#[derive(Debug, Clone, Default)]
pub(crate) enum ConnectionState {
    #[default]
    Disconnected,
    Connecting {
        attempt: u32,
    },
    Connected(OutboundHandle),
    Closing,
    Closed,
}

impl ConnectionState {
    pub(crate) fn handle(&self) -> Option<OutboundHandle> {
        match self {
            ConnectionState::Connected(handle) => Some(handle.clone()),
            _ => None,
        }
    }
}

/// Fields guarded by the state lock.
#[derive(Default)]
pub(crate) struct StateInner {
    pub connection: ConnectionState,
    pub connected: bool,
    pub eos_sent: bool,
    pub caps_ready: bool,
    /// Negotiated audio parameters; pre-negotiation values until `caps_ready`.
    pub params: AudioParams,
    /// Caps mirrored onto the source port.
    pub src_caps: Option<Caps>,
}

/// Pacer timing, guarded by the timing lock.
#[derive(Debug, Default)]
pub(crate) struct TimingState {
    /// Pipeline-clock tick at which pacing started. Cleared by a flush so
    /// the pacer re-anchors on the next frame.
    pub base_timestamp: Option<Duration>,
    /// Cumulative offset since the base.
    pub next_timestamp: Duration,
    /// A segment must precede the next buffer push.
    pub need_segment: bool,
    /// The pacer has emitted stream-start for this activation.
    pub stream_opened: bool,
}

/// State shared across the three workers of an active element.
pub(crate) struct SharedState {
    pub state: Mutex<StateInner>,
    /// Signalled when the transport reaches `Connected`.
    pub connect_cond: Condvar,
    /// Signalled when caps negotiation completes.
    pub caps_cond: Condvar,
    pub queue: ReceiveQueue,
    pub timing: Mutex<TimingState>,
    /// Wakes the pacer out of its deadline wait.
    pub output_cond: Condvar,
    pub downstream: Mutex<Option<Arc<dyn Downstream>>>,
    pub clock: Mutex<Option<Arc<dyn PipelineClock>>>,
    pub ws_running: AtomicBool,
    pub pacer_running: AtomicBool,
    /// The reconnect policy gave up; the connection is permanently gone.
    pub transport_gone: AtomicBool,
}

impl SharedState {
    pub(crate) fn new(config: &TransceiverConfig) -> Self {
        Self {
            state: Mutex::new(StateInner {
                params: AudioParams::from_config(config),
                ..Default::default()
            }),
            connect_cond: Condvar::new(),
            caps_cond: Condvar::new(),
            queue: ReceiveQueue::new(config.max_queue_size),
            timing: Mutex::new(TimingState::default()),
            output_cond: Condvar::new(),
            downstream: Mutex::new(None),
            clock: Mutex::new(None),
            ws_running: AtomicBool::new(false),
            pacer_running: AtomicBool::new(false),
            transport_gone: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_transport_gone(&self) -> bool {
        self.transport_gone.load(Ordering::SeqCst)
    }

    /// Barge-in flush: drop queued audio, reset pacing, tell downstream to
    /// discard in-flight data, and require a fresh segment before the next
    /// buffer. Invoked on a `clear` control message and on every successful
    /// (re)connect, where previously queued audio is stale.
    pub(crate) fn flush_and_resegment(&self) {
        let downstream = self.downstream.lock().clone();

        let drained = self.queue.flush();
        if drained > 0 {
            debug!(drained, "flushed receive queue");
        }

        // Holding the timing lock across the event pair keeps the flush
        // atomic with respect to the pacer's stamp-and-push cycle.
        let mut timing = self.timing.lock();
        timing.base_timestamp = None;
        timing.next_timestamp = Duration::ZERO;
        if timing.stream_opened {
            if let Some(downstream) = &downstream {
                downstream.push_event(StreamEvent::FlushStart);
                downstream.push_event(StreamEvent::FlushStop);
                debug!("flush-start/flush-stop pushed downstream");
            }
        }
        timing.need_segment = true;
        drop(timing);

        self.output_cond.notify_all();
    }

    /// Wake every blocked worker. Used at shutdown after clearing the
    /// running flags.
    pub(crate) fn broadcast_all(&self) {
        self.connect_cond.notify_all();
        self.caps_cond.notify_all();
        self.output_cond.notify_all();
        self.queue.notify_waiters();
    }
}
