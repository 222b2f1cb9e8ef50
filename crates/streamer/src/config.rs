//! # Channel configuration
//!
//! Knobs shared by both channel roles. The defaults match the baseline
//! protocol: 16 MiB frames and no call timeout.

use std::time::Duration;

/// Largest frame a channel accepts unless configured otherwise (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Per-channel settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Name attached to every log line this channel emits.
    pub peer_name: String,
    /// Upper bound on a single frame, enforced when reading and when sending.
    pub max_frame_len: u32,
    /// Optional bound on how long a client call waits for its response.
    /// `None` waits until the response arrives or the channel closes.
    pub call_timeout: Option<Duration>,
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer_name(mut self, peer_name: impl Into<String>) -> Self {
        self.peer_name = peer_name.into();
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: u32) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = Some(call_timeout);
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            peer_name: "peer".to_string(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            call_timeout: None,
        }
    }
}
