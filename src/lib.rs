//! chapterflow - gapless chapter streaming with word-level playback sync
//!
//! Chapters arrive one at a time from a content server; the engine stitches
//! them into one continuous timeline, prefetches the next chapter before the
//! audio runs out, highlights the word under the playhead, and recovers from
//! playback stalls.

// No panicking shortcuts outside tests
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod channel;
pub mod chapters;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod model;
pub mod player;
pub mod replay;
pub mod session;
pub mod stall;
pub mod sync;
pub mod timeline;

// Seams (player, server channel, observers)
pub use channel::{MessageChannel, RecordingChannel, TokioMessageChannel, forward_server_frames};
pub use engine::{EngineHandle, EngineObserver, ErrorReporter, InputSender, SyncEngine};
pub use player::{MediaPlayer, PlayerSignal, RecordingPlayer};

// Session state
pub use chapters::{ChapterPayload, ChapterPipeline};
pub use model::{Chapter, RelativeWord, WordSpan};
pub use session::{LifecycleState, SessionSnapshot};
pub use sync::PositionSynchronizer;
pub use timeline::WordTimeline;

// Error handling
pub use error::{EngineError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
