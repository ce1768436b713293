//! Element shell: configuration access, lifecycle, sink and source ports.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::caps::{AudioParams, Caps};
use crate::config::TransceiverConfig;
use crate::error::{FlowError, TransceiverError, TransceiverResult};
use crate::pacer;
use crate::pipeline::{Downstream, LatencyInfo, MonotonicClock, PipelineClock, StreamEvent};
use crate::state::{ConnectionState, SharedState, TimingState};
use crate::transport::worker;

/// How long entering `Prepared` waits for the first connection. A timeout is
/// not fatal; the element stays usable while reconnect attempts proceed.
const CONNECT_WAIT: Duration = Duration::from_secs(5);

/// Slice for lifecycle condition waits.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Lifecycle position of the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ElementState {
    /// Nothing is running.
    Inactive,
    /// The WebSocket worker is up (or reconnecting).
    Prepared,
    /// The output pacer is delivering audio downstream.
    Paused,
}

/// Snapshot of the transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection and no attempt in flight.
    Disconnected,
    /// A handshake is in flight.
    Connecting {
        /// Reconnect attempts made so far this activation.
        attempt: u32,
    },
    /// The transport is up.
    Connected,
    /// The connection is shutting down.
    Closing,
    /// The connection ended; the reconnect policy decides what happens next.
    Closed,
}

/// Bidirectional WebSocket audio transceiver.
///
/// Audio units presented through [`chain`](Self::chain) are sent to the
/// remote as binary WebSocket frames; binary frames received from the remote
/// are queued and delivered to the linked [`Downstream`] at a steady cadence.
/// See the crate documentation for the full dataflow picture.
pub struct WsTransceiver {
    config: Mutex<TransceiverConfig>,
    shared: Arc<SharedState>,
    lifecycle: Mutex<Lifecycle>,
}

struct Lifecycle {
    state: ElementState,
    ws_thread: Option<JoinHandle<()>>,
    pacer_thread: Option<JoinHandle<()>>,
    shutdown: Arc<Notify>,
}

impl WsTransceiver {
    /// Create an element with the given configuration. Validation happens on
    /// entry to `Prepared`, not here.
    pub fn new(config: TransceiverConfig) -> Self {
        let shared = Arc::new(SharedState::new(&config));
        Self {
            config: Mutex::new(config),
            shared,
            lifecycle: Mutex::new(Lifecycle {
                state: ElementState::Inactive,
                ws_thread: None,
                pacer_thread: None,
                shutdown: Arc::new(Notify::new()),
            }),
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> TransceiverConfig {
        self.config.lock().clone()
    }

    /// Set the WebSocket URI. Ignored once the transport is running.
    pub fn set_uri(&self, uri: impl Into<String>) {
        if !self.transport_config_mutable() {
            return;
        }
        self.config.lock().uri = Some(uri.into());
    }

    /// Set the audio sample rate; the derived frame size follows. Once caps
    /// are negotiated the active parameters are frozen until the next
    /// lifecycle reset.
    pub fn set_sample_rate(&self, rate: u32) {
        self.config.lock().sample_rate = rate;
        let mut state = self.shared.state.lock();
        if !state.caps_ready {
            state.params.rate = rate;
        }
    }

    /// Set the channel count; the derived frame size follows.
    pub fn set_channels(&self, channels: u32) {
        self.config.lock().channels = channels;
        let mut state = self.shared.state.lock();
        if !state.caps_ready {
            state.params.channels = channels;
        }
    }

    /// Set the frame duration; the derived frame size follows.
    pub fn set_frame_duration_ms(&self, frame_duration_ms: u32) {
        self.config.lock().frame_duration_ms = frame_duration_ms;
        let mut state = self.shared.state.lock();
        if !state.caps_ready {
            state.params.frame_duration_ms = frame_duration_ms;
        }
    }

    /// Set the receive queue capacity.
    pub fn set_max_queue_size(&self, max_queue_size: usize) {
        self.config.lock().max_queue_size = max_queue_size;
        self.shared.queue.set_capacity(max_queue_size);
    }

    /// Set the jitter reserve size (0 disables it).
    pub fn set_initial_buffer_count(&self, count: usize) {
        self.config.lock().initial_buffer_count = count;
    }

    /// Configure the reconnect policy. Ignored once the transport is running.
    pub fn set_reconnect_policy(
        &self,
        enabled: bool,
        initial_delay_ms: u64,
        max_backoff_ms: u64,
        max_reconnects: u32,
    ) {
        if !self.transport_config_mutable() {
            return;
        }
        let mut config = self.config.lock();
        config.reconnect_enabled = enabled;
        config.initial_reconnect_delay_ms = initial_delay_ms;
        config.max_backoff_ms = max_backoff_ms;
        config.max_reconnects = max_reconnects;
    }

    fn transport_config_mutable(&self) -> bool {
        let state = self.lifecycle.lock().state;
        if state != ElementState::Inactive {
            warn!(?state, "transport options are frozen while active, ignoring");
            return false;
        }
        true
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ElementState {
        self.lifecycle.lock().state
    }

    /// Walk the lifecycle to `target`, applying every intermediate
    /// transition in order.
    pub fn set_state(&self, target: ElementState) -> TransceiverResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        while lifecycle.state != target {
            match (lifecycle.state, target) {
                (ElementState::Inactive, _) => {
                    self.prepare(&mut lifecycle)?;
                    lifecycle.state = ElementState::Prepared;
                }
                (ElementState::Prepared, ElementState::Paused) => {
                    self.start_pacer(&mut lifecycle)?;
                    lifecycle.state = ElementState::Paused;
                }
                (ElementState::Prepared, _) => {
                    self.stop_transport(&mut lifecycle);
                    lifecycle.state = ElementState::Inactive;
                }
                (ElementState::Paused, _) => {
                    self.stop_pacer(&mut lifecycle);
                    lifecycle.state = ElementState::Prepared;
                }
            }
        }
        Ok(())
    }

    /// Inactive to Prepared: validate, start the WebSocket worker, wait a
    /// bounded time for the first connection.
    fn prepare(&self, lifecycle: &mut Lifecycle) -> TransceiverResult<()> {
        let config = self.config.lock().clone();
        config.validate()?;

        {
            let mut state = self.shared.state.lock();
            state.connection = ConnectionState::Disconnected;
            state.connected = false;
        }
        self.shared.transport_gone.store(false, Ordering::SeqCst);

        lifecycle.shutdown = Arc::new(Notify::new());
        self.shared.ws_running.store(true, Ordering::SeqCst);
        let handle = worker::spawn(self.shared.clone(), config, lifecycle.shutdown.clone())
            .map_err(|e| {
                self.shared.ws_running.store(false, Ordering::SeqCst);
                TransceiverError::Transport(format!("failed to spawn websocket worker: {e}"))
            })?;
        lifecycle.ws_thread = Some(handle);

        let deadline = Instant::now() + CONNECT_WAIT;
        let mut state = self.shared.state.lock();
        while !state.connected && !self.shared.is_transport_gone() {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    timeout_s = CONNECT_WAIT.as_secs(),
                    "websocket not connected yet, continuing while reconnects proceed"
                );
                break;
            }
            let remaining = deadline - now;
            self.shared
                .connect_cond
                .wait_for(&mut state, remaining.min(WAIT_SLICE));
        }
        Ok(())
    }

    /// Prepared to Paused: reset the per-activation flags, install a clock
    /// if the host never provided one, start the pacer.
    fn start_pacer(&self, lifecycle: &mut Lifecycle) -> TransceiverResult<()> {
        {
            let mut state = self.shared.state.lock();
            state.eos_sent = false;
            state.caps_ready = false;
        }

        {
            let mut clock = self.shared.clock.lock();
            if clock.is_none() {
                info!("no pipeline clock provided, using the monotonic clock");
                *clock = Some(Arc::new(MonotonicClock::new()));
            }
        }

        let config = self.config.lock().clone();
        self.shared.pacer_running.store(true, Ordering::SeqCst);
        let handle = pacer::spawn(self.shared.clone(), config).map_err(|e| {
            self.shared.pacer_running.store(false, Ordering::SeqCst);
            TransceiverError::Transport(format!("failed to spawn output pacer: {e}"))
        })?;
        lifecycle.pacer_thread = Some(handle);
        Ok(())
    }

    /// Paused to Prepared: stop and join the pacer, reset timing.
    fn stop_pacer(&self, lifecycle: &mut Lifecycle) {
        self.shared.pacer_running.store(false, Ordering::SeqCst);
        self.shared.broadcast_all();
        if let Some(handle) = lifecycle.pacer_thread.take() {
            if handle.join().is_err() {
                warn!("output pacer panicked");
            }
        }
        *self.shared.timing.lock() = TimingState::default();
        debug!("output pacer joined, timing reset");
    }

    /// Prepared to Inactive: stop and join the worker, drain the queue,
    /// clear connection state.
    fn stop_transport(&self, lifecycle: &mut Lifecycle) {
        self.shared.ws_running.store(false, Ordering::SeqCst);
        lifecycle.shutdown.notify_waiters();
        lifecycle.shutdown.notify_one();
        if let Some(handle) = lifecycle.ws_thread.take() {
            if handle.join().is_err() {
                warn!("websocket worker panicked");
            }
        }

        let drained = self.shared.queue.flush();
        if drained > 0 {
            debug!(drained, "receive queue drained at teardown");
        }

        let mut state = self.shared.state.lock();
        state.connection = ConnectionState::Disconnected;
        state.connected = false;
        state.eos_sent = false;
        state.caps_ready = false;
        drop(state);
        self.shared.transport_gone.store(false, Ordering::SeqCst);
        debug!("websocket worker joined, connection state cleared");
    }

    /// Link the downstream consumer of the source port.
    pub fn set_downstream(&self, downstream: Arc<dyn Downstream>) {
        *self.shared.downstream.lock() = Some(downstream);
    }

    /// Provide the pipeline clock the pacer schedules against.
    pub fn set_clock(&self, clock: Arc<dyn PipelineClock>) {
        *self.shared.clock.lock() = Some(clock);
    }

    /// Answer a latency query: the element is live, with one frame of
    /// minimum latency and a full queue of maximum latency.
    pub fn latency(&self) -> LatencyInfo {
        let config = self.config.lock();
        let frame = config.frame_duration();
        LatencyInfo {
            live: true,
            min: frame,
            max: frame * config.max_queue_size as u32,
        }
    }

    /// Handle an event arriving on the sink port.
    ///
    /// Caps are resolved and mirrored onto the source port. End-of-stream is
    /// absorbed: the input stream ending says nothing about the remote, so
    /// source EOS follows only from transport close.
    pub fn sink_event(&self, event: StreamEvent) -> TransceiverResult<()> {
        match event {
            StreamEvent::Caps(caps) => self.apply_caps(caps),
            StreamEvent::Eos => {
                info!("sink eos absorbed, source eos follows the transport");
                Ok(())
            }
            other => {
                debug!(event = ?other, "sink event accepted");
                Ok(())
            }
        }
    }

    fn apply_caps(&self, caps: Caps) -> TransceiverResult<()> {
        let frame_duration_ms = self.config.lock().frame_duration_ms;
        let params = AudioParams::from_caps(&caps, frame_duration_ms)?;
        info!(
            media_type = %params.media_type,
            rate = params.rate,
            channels = params.channels,
            bytes_per_sample = params.bytes_per_sample,
            frame_size = params.frame_size_bytes(),
            "caps negotiated"
        );

        {
            let mut state = self.shared.state.lock();
            state.params = params;
            state.src_caps = Some(caps);
            state.caps_ready = true;
        }
        self.shared.caps_cond.notify_all();
        Ok(())
    }

    /// Accept one audio unit on the sink port and forward it to the remote
    /// as a binary frame.
    ///
    /// Never creates backpressure: when the transport is down the unit is
    /// dropped and `Ok` is returned, so upstream keeps flowing.
    pub fn chain(&self, data: Bytes) -> Result<(), FlowError> {
        let handle = {
            let state = self.shared.state.lock();
            if state.connected {
                state.connection.handle()
            } else {
                None
            }
        };

        // Lock released before any I/O.
        match handle {
            Some(handle) => {
                handle.try_send(data);
            }
            None => {
                debug!("websocket not connected, dropping buffer");
            }
        }
        Ok(())
    }

    /// Whether the transport is currently connected.
    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }

    /// Snapshot of the transport connection state.
    pub fn connection_status(&self) -> ConnectionStatus {
        match &self.shared.state.lock().connection {
            ConnectionState::Disconnected => ConnectionStatus::Disconnected,
            ConnectionState::Connecting { attempt } => ConnectionStatus::Connecting {
                attempt: *attempt,
            },
            ConnectionState::Connected(_) => ConnectionStatus::Connected,
            ConnectionState::Closing => ConnectionStatus::Closing,
            ConnectionState::Closed => ConnectionStatus::Closed,
        }
    }

    /// Negotiated audio parameters (pre-negotiation values before caps).
    pub fn audio_params(&self) -> AudioParams {
        self.shared.state.lock().params.clone()
    }

    /// Current receive queue statistics.
    pub fn queue_stats(&self) -> crate::queue::QueueStats {
        self.shared.queue.stats()
    }
}

impl Drop for WsTransceiver {
    fn drop(&mut self) {
        let _ = self.set_state(ElementState::Inactive);
    }
}
