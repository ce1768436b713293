//! WebSocket worker: a pinned event loop driving connect, full-duplex I/O
//! and the reconnect cycle.
//!
//! The worker owns a current-thread tokio runtime on a dedicated OS thread,
//! so the transport never depends on an ambient executor. Inbound binary
//! frames become queued audio; inbound text frames are control messages;
//! outbound audio arrives through a bounded channel whose sender lives in
//! the shared connection state.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};

use crate::config::TransceiverConfig;
use crate::pipeline::AudioFrame;
use crate::state::{ConnectionState, OutboundHandle, SharedState};
use crate::transport::control::{ControlAction, parse_control};
use crate::transport::reconnect::ReconnectState;

/// Capacity of the outbound binary frame channel.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Spawn the worker thread with its pinned single-thread runtime.
pub(crate) fn spawn(
    shared: Arc<SharedState>,
    config: TransceiverConfig,
    shutdown: Arc<Notify>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("ws-transceiver-io".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(error = %e, "failed to build transport runtime");
                    shared.transport_gone.store(true, Ordering::SeqCst);
                    shared.broadcast_all();
                    return;
                }
            };
            runtime.block_on(connect_loop(shared, config, shutdown));
        })
}

/// Outer connect loop: one iteration per connection attempt, with backoff
/// between failures until the policy gives up or the element stops.
async fn connect_loop(shared: Arc<SharedState>, config: TransceiverConfig, shutdown: Arc<Notify>) {
    // Validated before the worker is spawned.
    let uri = config.uri.clone().unwrap_or_default();
    let mut reconnect = ReconnectState::new(&config);

    debug!("websocket worker started");

    while shared.ws_running.load(Ordering::SeqCst) {
        {
            shared.state.lock().connection = ConnectionState::Connecting {
                attempt: reconnect.attempts_made(),
            };
        }
        info!(uri = %uri, attempt = reconnect.attempts_made(), "connecting websocket");

        let handshake = tokio::select! {
            result = connect_async(uri.as_str()) => Some(result),
            _ = shutdown.notified() => None,
        };
        let Some(handshake) = handshake else { break };

        match handshake {
            Ok((stream, response)) => {
                debug!(status = %response.status(), "websocket handshake complete");
                run_connection(&shared, stream, &shutdown).await;
                let mut state = shared.state.lock();
                state.connection = ConnectionState::Closed;
            }
            Err(e) => {
                warn!(error = %e, "websocket handshake failed");
                shared.state.lock().connection = ConnectionState::Disconnected;
            }
        }

        if !shared.ws_running.load(Ordering::SeqCst) {
            break;
        }

        match reconnect.next_delay() {
            Some(delay) => {
                info!(
                    attempt = reconnect.attempts_made(),
                    delay_ms = delay.as_millis() as u64,
                    "scheduling websocket reconnect"
                );
                shared.state.lock().connection = ConnectionState::Disconnected;
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.notified() => break,
                }
            }
            None => {
                warn!(
                    attempts = reconnect.attempts_made(),
                    "websocket reconnect disabled or exhausted, connection is gone"
                );
                shared.state.lock().connection = ConnectionState::Closed;
                shared.transport_gone.store(true, Ordering::SeqCst);
                break;
            }
        }
    }

    {
        let mut state = shared.state.lock();
        state.connected = false;
        if !shared.is_transport_gone() {
            state.connection = ConnectionState::Disconnected;
        }
    }
    // Unblock anyone waiting on connect, caps or pacing so they can observe
    // the disconnect.
    shared.broadcast_all();
    debug!("websocket worker stopped");
}

/// Drive one established connection until it closes, errors out or the
/// element shuts down.
async fn run_connection(
    shared: &Arc<SharedState>,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    shutdown: &Notify,
) {
    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::channel::<Bytes>(OUTBOUND_CHANNEL_CAPACITY);

    {
        let mut state = shared.state.lock();
        state.connection = ConnectionState::Connected(OutboundHandle::new(tx));
        state.connected = true;
    }
    shared.connect_cond.notify_all();
    info!("websocket connected");

    // Whatever was queued before this connection belongs to a previous
    // response and must not be played.
    shared.flush_and_resegment();

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("shutdown requested, closing websocket");
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            outbound = rx.recv() => match outbound {
                Some(payload) => {
                    if !send_binary(&mut sink, payload).await {
                        break;
                    }
                }
                None => break,
            },
            inbound = source.next() => {
                if !handle_inbound(shared, &mut sink, inbound).await {
                    break;
                }
            }
        }
    }

    let mut state = shared.state.lock();
    state.connected = false;
    state.connection = ConnectionState::Closing;
}

async fn send_binary(sink: &mut WsSink, payload: Bytes) -> bool {
    let bytes = payload.len();
    match sink.send(Message::Binary(payload)).await {
        Ok(()) => {
            trace!(bytes, "sent binary frame");
            true
        }
        Err(e) => {
            warn!(error = %e, "failed to send binary frame");
            false
        }
    }
}

/// Process one inbound message. Returns false when the connection is over.
async fn handle_inbound(
    shared: &Arc<SharedState>,
    sink: &mut WsSink,
    inbound: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
) -> bool {
    match inbound {
        Some(Ok(Message::Binary(data))) => {
            trace!(bytes = data.len(), "received binary frame");
            shared.queue.push(AudioFrame::new(data));
            true
        }
        Some(Ok(Message::Text(text))) => {
            if parse_control(&text) == ControlAction::Clear {
                info!("clear control received, aborting in-flight playback");
                shared.flush_and_resegment();
            }
            true
        }
        Some(Ok(Message::Ping(data))) => {
            if let Err(e) = sink.send(Message::Pong(data)).await {
                warn!(error = %e, "failed to send pong");
            }
            true
        }
        Some(Ok(Message::Close(frame))) => {
            match frame {
                Some(frame) => warn!(
                    code = %frame.code,
                    reason = %frame.reason.as_str(),
                    "websocket closed by remote"
                ),
                None => warn!("websocket closed by remote"),
            }
            false
        }
        Some(Ok(_)) => true,
        Some(Err(e)) => {
            error!(error = %e, "websocket error");
            false
        }
        None => {
            debug!("websocket stream ended");
            false
        }
    }
}
