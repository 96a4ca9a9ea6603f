//! Message channel to the content server.
//!
//! Only the message contracts live here; sockets, reconnects and backoff
//! belong to whatever transport implements [`MessageChannel`].

pub mod bridge;
pub mod protocol;

pub use bridge::{TokioMessageChannel, forward_server_frames};
pub use protocol::{ChapterReady, ClientRequest, ServerMessage, WireWord};

use crate::error::Result;
use std::sync::{Arc, Mutex};

/// Outbound half of the message channel.
///
/// `send` is fire-and-forget: it must not wait for the server's reply, which
/// arrives later as a [`ServerMessage`] input. An `Err` means the channel
/// itself is unusable.
pub trait MessageChannel: Send + 'static {
    fn send(&mut self, request: ClientRequest) -> Result<()>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Channel that records requests instead of sending them.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingChannel {
    requests: Arc<Mutex<Vec<ClientRequest>>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<ClientRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Chapter numbers requested so far, in order.
    pub fn chapter_requests(&self) -> Vec<u32> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                ClientRequest::RequestNextChapter { chapter_number, .. } => Some(chapter_number),
                ClientRequest::RequestStreamingManifest { .. } => None,
            })
            .collect()
    }
}

impl MessageChannel for RecordingChannel {
    fn send(&mut self, request: ClientRequest) -> Result<()> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
