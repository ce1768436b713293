//! Bidirectional WebSocket audio transceiver for realtime voice pipelines.
//!
//! The transceiver sits between a push-style media pipeline and a remote
//! WebSocket peer. Audio presented on its sink port is forwarded to the remote
//! as binary frames; binary frames received from the remote are queued and
//! delivered on the source port at a steady cadence derived from the pipeline
//! clock. The remote can interrupt in-flight playback at any moment with a
//! `{"type":"clear"}` text message (barge-in), and lost connections are
//! re-established with exponential backoff.
//!
//! # Architecture
//!
//! ```text
//! upstream ──chain──▶ ┌──────────────────┐ ──binary──▶ remote
//!                     │  WsTransceiver   │
//! downstream ◀─paced─ │  queue + pacer   │ ◀─binary/text── remote
//!                     └──────────────────┘
//! ```
//!
//! Three workers cooperate per active element: the caller thread running
//! [`WsTransceiver::chain`], a WebSocket worker owning a pinned event loop,
//! and an output pacer that timestamps and pushes received audio downstream.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ws_audio_transceiver::{
//!     Caps, ElementState, StreamEvent, TransceiverConfig, WsTransceiver,
//! };
//!
//! let config = TransceiverConfig {
//!     uri: Some("ws://127.0.0.1:9999".to_string()),
//!     frame_duration_ms: 20,
//!     ..Default::default()
//! };
//!
//! let element = WsTransceiver::new(config);
//! element.set_downstream(my_consumer);
//! element.set_state(ElementState::Paused)?;
//!
//! element.sink_event(StreamEvent::Caps(Caps::raw("S16LE", 16000, 1)))?;
//! element.chain(audio_bytes)?;
//! ```

pub mod caps;
pub mod config;
pub mod element;
pub mod error;
pub mod pipeline;
pub mod queue;

mod pacer;
mod state;
mod transport;

pub use caps::{AudioParams, Caps};
pub use config::TransceiverConfig;
pub use element::{ConnectionStatus, ElementState, WsTransceiver};
pub use error::{FlowError, FlowResult, TransceiverError, TransceiverResult};
pub use pipeline::{
    AudioFrame, Downstream, LatencyInfo, MonotonicClock, PipelineClock, StreamEvent,
};
pub use queue::{QueueStats, ReceiveQueue};
