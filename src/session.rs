//! Session lifecycle state machine and the session state snapshot.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Outward-facing lifecycle of a listening session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    FetchingLinks,
    Ready,
    Playing,
    Paused,
    Buffering,
    Completed,
    Error,
}

impl LifecycleState {
    /// `completed` and `error` end the session for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Completed | LifecycleState::Error)
    }

    /// States in which the engine expects the player to be moving.
    pub fn expects_playback(self) -> bool {
        matches!(self, LifecycleState::Playing | LifecycleState::Buffering)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::FetchingLinks => "fetching_links",
            LifecycleState::Ready => "ready",
            LifecycleState::Playing => "playing",
            LifecycleState::Paused => "paused",
            LifecycleState::Buffering => "buffering",
            LifecycleState::Completed => "completed",
            LifecycleState::Error => "error",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that drive lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session started for some content.
    Start,
    /// The streaming manifest arrived.
    LinksFetched,
    /// A chapter was merged into the timeline.
    ChapterArrived,
    Play,
    Pause,
    Toggle,
    /// The player paused without user intent.
    Stalled,
    /// Playback is advancing again after a stall.
    StallCleared,
    /// The player reached the end of the loaded media.
    EndOfMedia { last_chapter_reached: bool },
    /// Unrecoverable failure (transport, link fetch).
    Fatal,
}

/// An accepted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

/// Lifecycle transitions, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionMachine {
    state: LifecycleState,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Idle,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = LifecycleState::Idle;
    }

    /// Target state for `event`, without applying it.
    pub fn next_state(&self, event: SessionEvent) -> Option<LifecycleState> {
        use LifecycleState as S;
        use SessionEvent as E;

        if self.state.is_terminal() {
            return None;
        }

        let next = match (self.state, event) {
            (_, E::Fatal) => S::Error,

            (S::Idle, E::Start) => S::FetchingLinks,
            (S::FetchingLinks, E::LinksFetched) => S::Ready,

            (S::Ready | S::Paused, E::Play | E::Toggle) => S::Playing,
            (S::Playing | S::Buffering, E::Pause | E::Toggle) => S::Paused,

            (S::Playing, E::Stalled) => S::Buffering,
            (S::Buffering, E::StallCleared) => S::Playing,

            (S::Playing | S::Buffering, E::EndOfMedia { last_chapter_reached: true }) => {
                S::Completed
            }
            // Audio ran out before the next chapter arrived.
            (S::Playing, E::EndOfMedia { last_chapter_reached: false }) => S::Buffering,

            _ => return None,
        };
        Some(next)
    }

    /// Apply `event`; returns the change if the state moved.
    pub fn apply(&mut self, event: SessionEvent) -> Option<StateChange> {
        let to = self.next_state(event)?;
        if to == self.state {
            return None;
        }
        let change = StateChange {
            from: self.state,
            to,
        };
        self.state = to;
        Some(change)
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a session, published to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub epoch: u64,
    pub content_id: Option<String>,
    pub lifecycle: LifecycleState,
    pub current_chapter_number: u32,
    pub requested_chapter_numbers: BTreeSet<u32>,
    pub durations_so_far: f64,
    pub next_prefetch_threshold: Option<f64>,
    pub last_chapter_reached: bool,
    pub is_stalled: bool,
    /// `None` when no word has been highlighted yet.
    pub current_word_index: Option<usize>,
    pub word_count: usize,
    pub chapter_count: usize,
}
