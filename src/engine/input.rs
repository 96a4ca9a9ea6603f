//! Everything that can enter the engine's queue.

use crate::channel::ServerMessage;
use crate::player::PlayerSignal;
use crate::session::SessionSnapshot;
use crossbeam_channel::Sender;

/// User intent from the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    Play,
    Pause,
    Toggle,
}

/// One input for the current session.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineInput {
    Server(ServerMessage),
    /// The message channel broke; fatal for the session.
    TransportFailed { message: String },
    Player(PlayerSignal),
    User(UserCommand),
}

impl EngineInput {
    /// Position ticks may be dropped under backpressure; nothing else may.
    pub fn is_droppable(&self) -> bool {
        matches!(self, EngineInput::Player(PlayerSignal::PositionTick(_)))
    }
}

impl From<ServerMessage> for EngineInput {
    fn from(message: ServerMessage) -> Self {
        EngineInput::Server(message)
    }
}

impl From<PlayerSignal> for EngineInput {
    fn from(signal: PlayerSignal) -> Self {
        EngineInput::Player(signal)
    }
}

impl From<UserCommand> for EngineInput {
    fn from(command: UserCommand) -> Self {
        EngineInput::User(command)
    }
}

/// Messages on the engine thread's queue.
#[derive(Debug)]
pub(crate) enum Envelope {
    /// Input stamped with the session it belongs to.
    Input { epoch: u64, input: EngineInput },
    StartSession {
        epoch: u64,
        content_id: String,
        ack: Sender<()>,
    },
    EndSession { epoch: u64, ack: Sender<()> },
    Snapshot { reply: Sender<SessionSnapshot> },
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_ticks_are_droppable() {
        assert!(EngineInput::from(PlayerSignal::PositionTick(1.0)).is_droppable());
        assert!(!EngineInput::from(PlayerSignal::Stalled).is_droppable());
        assert!(!EngineInput::from(ServerMessage::SessionComplete).is_droppable());
        assert!(!EngineInput::from(UserCommand::Toggle).is_droppable());
    }
}
