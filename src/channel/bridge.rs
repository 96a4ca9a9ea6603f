//! Glue between an async transport and the engine.
//!
//! The transport task owns the socket; it pushes raw text frames into a
//! tokio channel and drains outbound requests from another one.

use super::MessageChannel;
use super::protocol::{ClientRequest, ServerMessage};
use crate::engine::{EngineInput, InputSender};
use crate::error::{EngineError, Result};
use tokio::sync::mpsc::{Receiver, UnboundedSender};

/// Parse server frames and forward them to the engine until the stream ends.
///
/// Frames that are not valid messages are logged and skipped. If the stream
/// closes before the server reported the session complete, the engine is
/// told the transport failed. Returns early once the session has ended.
pub async fn forward_server_frames(mut frames: Receiver<String>, sender: InputSender) -> Result<()> {
    let mut complete = false;

    while let Some(frame) = frames.recv().await {
        let message = match ServerMessage::from_json(&frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable server frame");
                continue;
            }
        };
        if matches!(message, ServerMessage::SessionComplete) {
            complete = true;
        }
        deliver(&sender, message.into()).await?;
    }

    if complete {
        tracing::debug!("server stream closed after session complete");
        return Ok(());
    }
    tracing::warn!("server stream closed");
    let failed = EngineInput::TransportFailed {
        message: "server connection closed".to_string(),
    };
    deliver(&sender, failed).await
}

/// Queue `input`, waiting for room on the blocking pool when the engine's
/// queue is full so the async worker thread stays free.
async fn deliver(sender: &InputSender, input: EngineInput) -> Result<()> {
    let Some(input) = sender.try_send(input)? else {
        return Ok(());
    };
    tracing::debug!("engine input queue full, waiting for room");
    let sender = sender.clone();
    tokio::task::spawn_blocking(move || sender.send(input))
        .await
        .map_err(|e| EngineError::Other(format!("input hand-off task failed: {e}")))?
}

/// Outbound channel that serializes requests onto a tokio channel.
#[derive(Debug, Clone)]
pub struct TokioMessageChannel {
    tx: UnboundedSender<String>,
}

impl TokioMessageChannel {
    pub fn new(tx: UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl MessageChannel for TokioMessageChannel {
    fn send(&mut self, request: ClientRequest) -> Result<()> {
        let json = request.to_json()?;
        self.tx.send(json).map_err(|_| EngineError::Transport {
            message: "outbound channel closed".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "tokio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, EngineHandle, SyncEngine};
    use crate::player::RecordingPlayer;
    use crate::session::LifecycleState;
    use tokio::sync::mpsc;

    fn spawn_engine() -> (EngineHandle, mpsc::UnboundedReceiver<String>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let engine = SyncEngine::new(
            EngineConfig::default(),
            Box::new(RecordingPlayer::new()),
            Box::new(TokioMessageChannel::new(out_tx)),
        );
        (EngineHandle::spawn(engine, 64).unwrap(), out_rx)
    }

    const CHAPTER_ONE: &str = r#"{"type":"chapter_ready","chapterNumber":1,"audioDurationSeconds":10.0,"isLast":false,"words":[{"text":"Once","startSeconds":0.0,"endSeconds":0.5}]}"#;
    const MANIFEST: &str = r#"{"type":"manifest_ready","primaryPlaylistPath":"/main.m3u8"}"#;

    #[tokio::test]
    async fn test_frames_reach_engine_and_closure_fails_session() {
        let (handle, mut outbound) = spawn_engine();
        let sender = handle.start_session("book").unwrap();

        // Session start sends the manifest request, then chapter 1
        let first = outbound.recv().await.unwrap();
        assert!(first.contains("request_streaming_manifest"));
        let second = outbound.recv().await.unwrap();
        assert!(second.contains(r#""chapterNumber":1"#));

        let (tx, rx) = mpsc::channel(8);
        tx.send(MANIFEST.to_string()).await.unwrap();
        tx.send("not json".to_string()).await.unwrap();
        tx.send(CHAPTER_ONE.to_string()).await.unwrap();
        drop(tx);

        sender.ready_to_play().unwrap();
        forward_server_frames(rx, sender).await.unwrap();

        let snapshot = handle.snapshot().unwrap();
        assert_eq!(snapshot.word_count, 1);
        assert_eq!(snapshot.lifecycle, LifecycleState::Error);
        handle.stop();
    }

    #[tokio::test]
    async fn test_closure_after_complete_is_clean() {
        let (handle, _outbound) = spawn_engine();
        let sender = handle.start_session("book").unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(MANIFEST.to_string()).await.unwrap();
        tx.send(r#"{"type":"session_complete"}"#.to_string())
            .await
            .unwrap();
        drop(tx);
        forward_server_frames(rx, sender).await.unwrap();

        let snapshot = handle.snapshot().unwrap();
        assert_eq!(snapshot.lifecycle, LifecycleState::Ready);
        assert!(snapshot.last_chapter_reached);
        handle.stop();
    }

    #[tokio::test]
    async fn test_stale_session_stops_forwarding() {
        let (handle, _outbound) = spawn_engine();
        let old = handle.start_session("old").unwrap();
        let _new = handle.start_session("new").unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(MANIFEST.to_string()).await.unwrap();
        drop(tx);

        let result = forward_server_frames(rx, old).await;
        assert!(matches!(result, Err(EngineError::SessionEnded { .. })));
        handle.stop();
    }

    #[tokio::test]
    async fn test_full_queue_does_not_stall_runtime() {
        let (sender, queue) = InputSender::detached(1);
        sender.server(ServerMessage::SessionComplete).unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(MANIFEST.to_string()).await.unwrap();
        drop(tx);
        let forward = tokio::spawn(forward_server_frames(rx, sender));

        // Single-threaded runtime: this only runs if the forwarder yielded
        let other = tokio::spawn(async { 7 });
        assert_eq!(other.await.unwrap(), 7);
        assert!(!forward.is_finished());

        let drain = std::thread::spawn(move || queue.iter().take(3).count());
        forward.await.unwrap().unwrap();
        assert_eq!(drain.join().unwrap(), 3);
    }

    #[test]
    fn test_closed_outbound_is_transport_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut channel = TokioMessageChannel::new(tx);
        let err = channel
            .send(ClientRequest::RequestStreamingManifest {
                content_id: "c".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport { .. }));
    }
}
