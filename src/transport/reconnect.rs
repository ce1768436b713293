//! Reconnect policy: attempt bookkeeping and exponential backoff.

use std::time::Duration;

use crate::config::TransceiverConfig;

/// Retry bookkeeping for the connect loop.
///
/// The attempt counter is monotonic within an activation; a successful
/// handshake does not reset it. A fresh activation starts from a fresh
/// `ReconnectState`.
#[derive(Debug)]
pub(crate) struct ReconnectState {
    enabled: bool,
    max_reconnects: u32,
    initial_delay_ms: u64,
    max_backoff_ms: u64,
    attempts_made: u32,
    current_backoff_ms: u64,
}

impl ReconnectState {
    pub(crate) fn new(config: &TransceiverConfig) -> Self {
        Self {
            enabled: config.reconnect_enabled,
            max_reconnects: config.max_reconnects,
            initial_delay_ms: config.initial_reconnect_delay_ms,
            max_backoff_ms: config.max_backoff_ms,
            attempts_made: 0,
            current_backoff_ms: 0,
        }
    }

    /// Apply the policy after a failed attempt.
    ///
    /// Returns the backoff to sleep before retrying, or `None` when retries
    /// are disabled or exhausted. The backoff doubles each call, clamped to
    /// the configured ceiling.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        if self.max_reconnects > 0 && self.attempts_made >= self.max_reconnects {
            return None;
        }
        self.current_backoff_ms = self
            .initial_delay_ms
            .max((self.current_backoff_ms * 2).min(self.max_backoff_ms));
        self.attempts_made += 1;
        Some(Duration::from_millis(self.current_backoff_ms))
    }

    pub(crate) fn attempts_made(&self) -> u32 {
        self.attempts_made
    }
}
