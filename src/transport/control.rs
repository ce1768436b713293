//! Inbound text control protocol.
//!
//! The only defined control message is `{"type":"clear"}`, the remote's
//! barge-in signal. Anything else on the text channel is warned about and
//! dropped; a malformed control message must never take the stream down.

use serde::Deserialize;
use tracing::{debug, warn};

/// A text frame parsed as a control message.
#[derive(Debug, Deserialize)]
struct ControlMessage {
    #[serde(rename = "type")]
    kind: String,
}

/// What to do with an inbound text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlAction {
    /// Abort in-flight playback and resegment.
    Clear,
    /// Nothing; the message was unknown or malformed.
    Ignore,
}

/// Parse an inbound text frame into a control action.
pub(crate) fn parse_control(text: &str) -> ControlAction {
    match serde_json::from_str::<ControlMessage>(text) {
        Ok(msg) if msg.kind == "clear" => {
            debug!("received clear control message");
            ControlAction::Clear
        }
        Ok(msg) => {
            warn!(kind = %msg.kind, "ignoring unknown control message");
            ControlAction::Ignore
        }
        Err(e) => {
            warn!(error = %e, "ignoring malformed control message");
            ControlAction::Ignore
        }
    }
}
