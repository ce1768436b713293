//! Output pacer: opens the downstream stream, then delivers received audio
//! on a monotonic cadence derived from the pipeline clock.
//!
//! One thread, one state machine:
//!
//! 1. open the stream (stream-start with a per-activation id)
//! 2. acquire the pipeline clock and anchor the pacing base
//! 3. accumulate the initial jitter reserve
//! 4. push caps, then a segment
//! 5. steady state: wait for the next output slot, pop, stamp, push;
//!    advance the schedule even across gaps so timestamps stay monotonic
//!
//! When the transport is permanently gone the pacer drains what is queued
//! and emits exactly one end-of-stream.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::caps::Caps;
use crate::config::TransceiverConfig;
use crate::error::FlowError;
use crate::pipeline::{AudioFrame, Downstream, PipelineClock, StreamEvent};
use crate::state::SharedState;

/// Poll interval while waiting for the clock or the downstream port.
const SETUP_POLL: Duration = Duration::from_millis(10);
/// Upper bound on any condition wait so the running flag stays observed.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Spawn the pacer thread.
pub(crate) fn spawn(
    shared: Arc<SharedState>,
    config: TransceiverConfig,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("ws-transceiver-output".to_string())
        .spawn(move || run(shared, config))
}

fn run(shared: Arc<SharedState>, config: TransceiverConfig) {
    let frame_duration = config.frame_duration();
    debug!("output pacer started");

    // Open the stream.
    let Some(downstream) = wait_for_downstream(&shared) else {
        debug!("output pacer stopped before a downstream was linked");
        return;
    };
    let stream_id = format!("ws-transceiver-{}", Uuid::new_v4());
    downstream.push_event(StreamEvent::StreamStart {
        id: stream_id.clone(),
    });
    shared.timing.lock().stream_opened = true;
    debug!(stream_id = %stream_id, "stream opened");

    // Acquire the clock and anchor the schedule.
    let Some(clock) = wait_for_clock(&shared) else {
        debug!("output pacer stopped before a clock was available");
        return;
    };
    let base = clock.now();
    let mut next_output_time = base + frame_duration;
    {
        let mut timing = shared.timing.lock();
        timing.base_timestamp = Some(base);
        timing.next_timestamp = Duration::ZERO;
    }
    debug!(base_ms = base.as_millis() as u64, "pacing anchored");

    // Initial jitter reserve: absorb early arrival-time variance without
    // adding steady-state latency.
    if config.initial_buffer_count > 0 {
        let target = config.initial_buffer_count;
        let reached = shared
            .queue
            .wait_len_at_least(target, || running(&shared) && !shared.is_transport_gone());
        if reached {
            info!(frames = target, "initial buffering complete");
        }
    }
    if !running(&shared) {
        debug!("output pacer stopped during initial buffering");
        return;
    }

    // Caps, then segment.
    if let Some(caps) = wait_for_caps(&shared) {
        downstream.push_event(StreamEvent::Caps(caps));
        debug!("caps event pushed");
    }
    if running(&shared) {
        downstream.push_event(StreamEvent::Segment);
        shared.timing.lock().need_segment = false;
        debug!("segment event pushed");
    }

    // Steady state.
    while running(&shared) {
        if shared.state.lock().eos_sent {
            break;
        }

        wait_until(&shared, &*clock, next_output_time);
        if !running(&shared) {
            break;
        }

        match shared.queue.pop() {
            Some(frame) => {
                let result = stamp_and_push(
                    &shared,
                    downstream.as_ref(),
                    &*clock,
                    frame,
                    frame_duration,
                    &mut next_output_time,
                );
                next_output_time += frame_duration;
                match result {
                    Ok(()) => {}
                    Err(FlowError::Eos) => {
                        warn!("downstream reached end-of-stream, stopping pacer");
                        break;
                    }
                    Err(FlowError::Flushing) if !running(&shared) => break,
                    Err(e) => warn!(result = %e, "downstream push failed"),
                }
            }
            None => {
                let send_eos = {
                    let mut state = shared.state.lock();
                    if shared.is_transport_gone() && !state.connected && !state.eos_sent {
                        state.eos_sent = true;
                        true
                    } else {
                        false
                    }
                };
                if send_eos {
                    info!("queue drained and connection gone, sending eos");
                    downstream.push_event(StreamEvent::Eos);
                    break;
                }
                // Keep the schedule monotonic across gaps. A flush cleared
                // the anchor; the next frame re-anchors at offset zero, so
                // there is no schedule to advance until then.
                trace!("no frame available, advancing schedule");
                let mut timing = shared.timing.lock();
                if timing.base_timestamp.is_some() {
                    timing.next_timestamp += frame_duration;
                }
                drop(timing);
                next_output_time += frame_duration;
            }
        }
    }

    debug!("output pacer stopped");
}

fn running(shared: &SharedState) -> bool {
    shared.pacer_running.load(Ordering::SeqCst)
}

fn wait_for_downstream(shared: &SharedState) -> Option<Arc<dyn Downstream>> {
    loop {
        if let Some(downstream) = shared.downstream.lock().clone() {
            return Some(downstream);
        }
        if !running(shared) {
            return None;
        }
        std::thread::sleep(SETUP_POLL);
    }
}

fn wait_for_clock(shared: &SharedState) -> Option<Arc<dyn PipelineClock>> {
    loop {
        if let Some(clock) = shared.clock.lock().clone() {
            return Some(clock);
        }
        if !running(shared) {
            return None;
        }
        std::thread::sleep(SETUP_POLL);
    }
}

/// Wait (bounded) until caps negotiation completes. Gives up when the
/// element stops or the transport is permanently gone, so the end-of-stream
/// path is never starved by missing caps.
fn wait_for_caps(shared: &SharedState) -> Option<Caps> {
    let mut state = shared.state.lock();
    loop {
        if state.caps_ready {
            return state.src_caps.clone();
        }
        if !running(shared) || shared.is_transport_gone() {
            return None;
        }
        shared.caps_cond.wait_for(&mut state, WAIT_SLICE);
    }
}

/// Sleep on the pipeline clock until `deadline`. Wakes early on flushes and
/// shutdown broadcasts; slices every wait so the running flag is observed.
fn wait_until(shared: &SharedState, clock: &dyn PipelineClock, deadline: Duration) {
    let mut timing = shared.timing.lock();
    loop {
        let now = clock.now();
        if now >= deadline || !running(shared) {
            return;
        }
        let remaining = deadline - now;
        shared
            .output_cond
            .wait_for(&mut timing, remaining.min(WAIT_SLICE));
    }
}

/// Assign pts and duration under the timing lock, re-emitting a segment
/// first when a flush demanded one, then push the frame downstream. Holding
/// the lock across the push keeps the flush protocol ordered with respect
/// to delivery.
fn stamp_and_push(
    shared: &SharedState,
    downstream: &dyn Downstream,
    clock: &dyn PipelineClock,
    mut frame: AudioFrame,
    frame_duration: Duration,
    next_output_time: &mut Duration,
) -> Result<(), FlowError> {
    let mut timing = shared.timing.lock();

    let base = match timing.base_timestamp {
        Some(base) => base,
        None => {
            // Re-anchor after a flush.
            let base = clock.now();
            timing.base_timestamp = Some(base);
            *next_output_time = base;
            base
        }
    };

    if timing.need_segment {
        downstream.push_event(StreamEvent::Segment);
        timing.need_segment = false;
        debug!("segment re-emitted after flush");
    }

    frame.pts = Some(base + timing.next_timestamp);
    frame.duration = Some(frame_duration);
    timing.next_timestamp += frame_duration;

    trace!(
        pts_ms = frame.pts.map(|p| p.as_millis() as u64),
        bytes = frame.len(),
        "pushing frame downstream"
    );
    downstream.push_buffer(frame)
}
