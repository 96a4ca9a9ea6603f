//! The platform media player, seen from the engine.
//!
//! Decoding and output belong to the player; the engine only sends commands
//! and receives [`PlayerSignal`]s through its input queue.

use crate::error::Result;
use std::sync::{Arc, Mutex};

/// Commands the engine sends to the player.
///
/// Implementations must return quickly; the engine calls them from its
/// single processing thread.
pub trait MediaPlayer: Send + 'static {
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    /// Load the streaming manifest at `url`.
    fn load(&mut self, url: &str) -> Result<()>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "player"
    }
}

/// Signals the player reports back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerSignal {
    /// Current global playback position in seconds.
    PositionTick(f64),
    /// Playback stopped without a user pause.
    Stalled,
    /// Reached the end of everything loaded so far.
    EndOfMedia,
    /// The player finished loading and can start.
    ReadyToPlay,
}

/// A command as received by [`RecordingPlayer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCommand {
    Play,
    Pause,
    Load(String),
}

/// Player that records every command it receives.
///
/// Clones share the same log, so a test can keep one clone and hand the
/// other to the engine.
#[derive(Debug, Clone, Default)]
pub struct RecordingPlayer {
    commands: Arc<Mutex<Vec<PlayerCommand>>>,
}

impl RecordingPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all commands received so far.
    pub fn commands(&self) -> Vec<PlayerCommand> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }

    fn record(&self, command: PlayerCommand) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command);
        }
    }
}

impl MediaPlayer for RecordingPlayer {
    fn play(&mut self) -> Result<()> {
        self.record(PlayerCommand::Play);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.record(PlayerCommand::Pause);
        Ok(())
    }

    fn load(&mut self, url: &str) -> Result<()> {
        self.record(PlayerCommand::Load(url.to_string()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
