//! Shared test harness: an in-process scriptable WebSocket server, a
//! recording downstream consumer and generated audio fixtures.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::accept_async;

use ws_audio_transceiver::{AudioFrame, Downstream, FlowResult, StreamEvent};

/// Poll step for the wait helpers.
const POLL: Duration = Duration::from_millis(10);

/// Initialize test logging once. `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Mock WebSocket Server
// =============================================================================

enum ServerCommand {
    Send(Message),
    Close,
}

struct ServerInner {
    received: Mutex<Vec<Vec<u8>>>,
    handshakes: AtomicUsize,
    refusals: AtomicUsize,
    refuse_first: usize,
    client: Mutex<Option<UnboundedSender<ServerCommand>>>,
}

/// In-process WebSocket server driven from test code.
///
/// Runs on its own thread with its own runtime so tests stay plain `#[test]`
/// functions. Can refuse the first N handshakes (by dropping the TCP stream
/// before the upgrade) to exercise the reconnect path.
pub struct MockServer {
    addr: SocketAddr,
    shutdown: Arc<Notify>,
    thread: Option<std::thread::JoinHandle<()>>,
    inner: Arc<ServerInner>,
}

impl MockServer {
    pub fn start() -> Self {
        Self::start_refusing(0)
    }

    pub fn start_refusing(refuse_first: usize) -> Self {
        let inner = Arc::new(ServerInner {
            received: Mutex::new(Vec::new()),
            handshakes: AtomicUsize::new(0),
            refusals: AtomicUsize::new(0),
            refuse_first,
            client: Mutex::new(None),
        });
        let shutdown = Arc::new(Notify::new());
        let (addr_tx, addr_rx) = std::sync::mpsc::channel();

        let thread = std::thread::spawn({
            let inner = inner.clone();
            let shutdown = shutdown.clone();
            move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("mock server runtime");
                runtime.block_on(accept_loop(inner, shutdown, addr_tx));
            }
        });

        let addr = addr_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("mock server failed to bind");
        Self {
            addr,
            shutdown,
            thread: Some(thread),
            inner,
        }
    }

    pub fn uri(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Send a binary audio frame to the connected client.
    pub fn send_binary(&self, data: Vec<u8>) {
        self.command(ServerCommand::Send(Message::Binary(Bytes::from(data))));
    }

    /// Send a text frame (control message) to the connected client.
    pub fn send_text(&self, text: &str) {
        self.command(ServerCommand::Send(Message::Text(text.to_string().into())));
    }

    /// Close the current client connection.
    pub fn close_client(&self) {
        self.command(ServerCommand::Close);
    }

    fn command(&self, command: ServerCommand) {
        let client = self.inner.client.lock().unwrap();
        client
            .as_ref()
            .expect("no client connected")
            .send(command)
            .expect("client task gone");
    }

    /// Binary payloads received from the element, in arrival order.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.inner.received.lock().unwrap().clone()
    }

    pub fn handshake_count(&self) -> usize {
        self.inner.handshakes.load(Ordering::Relaxed)
    }

    pub fn refused_count(&self) -> usize {
        self.inner.refusals.load(Ordering::Relaxed)
    }

    pub fn wait_for_received(&self, count: usize, timeout: Duration) -> bool {
        wait_for(timeout, || {
            self.inner.received.lock().unwrap().len() >= count
        })
    }

    pub fn wait_for_handshakes(&self, count: usize, timeout: Duration) -> bool {
        wait_for(timeout, || self.handshake_count() >= count)
    }

    /// Wait until a client completed the handshake and can be scripted.
    pub fn wait_for_client(&self, timeout: Duration) -> bool {
        wait_for(timeout, || self.inner.client.lock().unwrap().is_some())
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn accept_loop(
    inner: Arc<ServerInner>,
    shutdown: Arc<Notify>,
    addr_tx: std::sync::mpsc::Sender<SocketAddr>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    addr_tx
        .send(listener.local_addr().expect("local addr"))
        .expect("report addr");

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { break };
                if inner.refusals.load(Ordering::Relaxed) < inner.refuse_first {
                    inner.refusals.fetch_add(1, Ordering::Relaxed);
                    drop(stream);
                    continue;
                }
                tokio::spawn(handle_client(stream, inner.clone(), shutdown.clone()));
            }
        }
    }
}

async fn handle_client(stream: TcpStream, inner: Arc<ServerInner>, shutdown: Arc<Notify>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    inner.handshakes.fetch_add(1, Ordering::Relaxed);
    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = unbounded_channel::<ServerCommand>();
    *inner.client.lock().unwrap() = Some(tx);

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            command = rx.recv() => match command {
                Some(ServerCommand::Send(message)) => {
                    if write.send(message).await.is_err() {
                        break;
                    }
                }
                Some(ServerCommand::Close) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                None => break,
            },
            message = read.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    inner.received.lock().unwrap().push(data.to_vec());
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
}

// =============================================================================
// Recording Downstream
// =============================================================================

/// Everything the element pushed on its source port, in order.
#[derive(Debug, Clone)]
pub enum OutputItem {
    Event(StreamEvent),
    Buffer(AudioFrame),
}

/// Downstream consumer that records every event and buffer.
pub struct Recorder {
    items: Mutex<Vec<OutputItem>>,
    push_result: Mutex<FlowResult>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(Vec::new()),
            push_result: Mutex::new(Ok(())),
        })
    }

    /// Make subsequent buffer pushes return the given result.
    pub fn set_push_result(&self, result: FlowResult) {
        *self.push_result.lock().unwrap() = result;
    }

    pub fn items(&self) -> Vec<OutputItem> {
        self.items.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.items()
            .into_iter()
            .filter_map(|item| match item {
                OutputItem::Event(event) => Some(event),
                OutputItem::Buffer(_) => None,
            })
            .collect()
    }

    pub fn buffers(&self) -> Vec<AudioFrame> {
        self.items()
            .into_iter()
            .filter_map(|item| match item {
                OutputItem::Buffer(frame) => Some(frame),
                OutputItem::Event(_) => None,
            })
            .collect()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers().len()
    }

    pub fn eos_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, StreamEvent::Eos))
            .count()
    }

    pub fn wait_for_buffers(&self, count: usize, timeout: Duration) -> bool {
        wait_for(timeout, || self.buffer_count() >= count)
    }

    pub fn wait_for_event(
        &self,
        predicate: impl Fn(&StreamEvent) -> bool,
        timeout: Duration,
    ) -> bool {
        wait_for(timeout, || self.events().iter().any(&predicate))
    }
}

impl Downstream for Recorder {
    fn push_event(&self, event: StreamEvent) -> bool {
        self.items.lock().unwrap().push(OutputItem::Event(event));
        true
    }

    fn push_buffer(&self, frame: AudioFrame) -> FlowResult {
        self.items.lock().unwrap().push(OutputItem::Buffer(frame));
        *self.push_result.lock().unwrap()
    }
}

// =============================================================================
// Audio Fixtures
// =============================================================================

/// One frame of deterministic payload. The tag byte makes frames
/// distinguishable through the pipeline.
pub fn tagged_frame(size: usize, tag: u8) -> Vec<u8> {
    let mut data = vec![tag; size];
    for (i, byte) in data.iter_mut().enumerate().skip(1) {
        *byte = (i % 251) as u8;
    }
    data[0] = tag;
    data
}

/// Generate a 16-bit little-endian sine tone, mono.
pub fn sine_s16le(samples: usize, frequency: f32, rate: u32) -> Vec<u8> {
    let angular = 2.0 * std::f32::consts::PI * frequency / rate as f32;
    let mut out = Vec::with_capacity(samples * 2);
    for i in 0..samples {
        let sample = ((angular * i as f32).sin() * 0.5 * i16::MAX as f32) as i16;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL);
    }
}
