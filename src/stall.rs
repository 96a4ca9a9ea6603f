//! Stall recovery supervisor.
//!
//! A stall is a pause the user did not ask for, usually because playback ran
//! past the audio received so far. Once the missing chapter arrives the
//! supervisor tries, once per episode: resume, verify, then a pause/resume
//! cycle (which makes some adaptive-streaming players refresh their
//! manifest), and verify again. Failure is reported, never fatal.
//!
//! The supervisor is a pure state machine: it returns actions and timer
//! requests, the engine executes them.

use crate::defaults;
use std::time::Duration;

/// Recovery timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StallConfig {
    /// Wait after `resume` before checking progress.
    pub verify_delay: Duration,
    /// Wait between `pause` and `resume` in the cycle.
    pub cycle_delay: Duration,
    /// Forward movement (seconds) that counts as advancing.
    pub advance_epsilon: f64,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            verify_delay: Duration::from_millis(defaults::STALL_VERIFY_DELAY_MS),
            cycle_delay: Duration::from_millis(defaults::STALL_CYCLE_DELAY_MS),
            advance_epsilon: defaults::ADVANCE_EPSILON_SECS,
        }
    }
}

/// Where the current episode is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallPhase {
    /// Not stalled.
    Idle,
    /// Stalled, waiting for the next chapter's audio.
    AwaitingChapter,
    /// Resumed; waiting to verify progress.
    VerifyingResume,
    /// Paused as part of the cycle; waiting to resume.
    Cycling,
    /// Resumed after the cycle; waiting for the final check.
    VerifyingCycle,
    /// Both attempts failed; waiting for playback to recover on its own.
    Exhausted,
}

/// Something the engine must do on the supervisor's behalf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StallAction {
    /// Call `play()` on the player.
    Resume,
    /// Call `pause()` on the player.
    Pause,
    /// Call `on_timer(episode)` after `after` has elapsed.
    ScheduleCheck { after: Duration, episode: u64 },
    /// Playback is advancing again; the episode is over.
    Recovered,
    /// The recovery sequence did not get playback moving.
    Unrecovered { position: f64 },
}

#[derive(Debug, Clone)]
pub struct StallSupervisor {
    config: StallConfig,
    phase: StallPhase,
    episode: u64,
    last_position: Option<f64>,
    /// Position when the current step began.
    checkpoint: Option<f64>,
    /// Furthest position seen since the checkpoint.
    furthest_since: Option<f64>,
}

impl StallSupervisor {
    pub fn new(config: StallConfig) -> Self {
        Self {
            config,
            phase: StallPhase::Idle,
            episode: 0,
            last_position: None,
            checkpoint: None,
            furthest_since: None,
        }
    }

    /// Back to idle. The episode counter keeps growing so old timers stay stale.
    pub fn reset(&mut self) {
        self.phase = StallPhase::Idle;
        self.episode += 1;
        self.last_position = None;
        self.checkpoint = None;
        self.furthest_since = None;
    }

    pub fn phase(&self) -> StallPhase {
        self.phase
    }

    pub fn episode(&self) -> u64 {
        self.episode
    }

    /// Stalled and still waiting for audio.
    pub fn is_stalled(&self) -> bool {
        self.phase == StallPhase::AwaitingChapter
    }

    /// Any episode in progress, including recovery steps.
    pub fn in_episode(&self) -> bool {
        self.phase != StallPhase::Idle
    }

    /// The player paused on its own. Returns true if this opened a new episode.
    pub fn on_stalled(&mut self) -> bool {
        if self.phase != StallPhase::Idle {
            return false;
        }
        self.episode += 1;
        self.phase = StallPhase::AwaitingChapter;
        self.set_checkpoint();
        true
    }

    /// A new chapter's audio is available.
    pub fn on_chapter_ready(&mut self) -> Vec<StallAction> {
        if self.phase != StallPhase::AwaitingChapter {
            return Vec::new();
        }
        self.phase = StallPhase::VerifyingResume;
        self.set_checkpoint();
        vec![
            StallAction::Resume,
            StallAction::ScheduleCheck {
                after: self.config.verify_delay,
                episode: self.episode,
            },
        ]
    }

    /// Feed every position report, debounced or not.
    ///
    /// While waiting for audio, or after recovery gave up, forward movement
    /// ends the episode on its own.
    pub fn on_position(&mut self, t: f64) -> Option<StallAction> {
        if !t.is_finite() {
            return None;
        }
        self.last_position = Some(t);
        self.furthest_since = Some(self.furthest_since.map_or(t, |f| f.max(t)));

        match self.phase {
            StallPhase::AwaitingChapter | StallPhase::Exhausted if self.advanced() => {
                self.phase = StallPhase::Idle;
                Some(StallAction::Recovered)
            }
            _ => None,
        }
    }

    /// A scheduled check fired.
    pub fn on_timer(&mut self, episode: u64) -> Vec<StallAction> {
        if episode != self.episode {
            return Vec::new();
        }
        match self.phase {
            StallPhase::VerifyingResume => {
                if self.advanced() {
                    self.phase = StallPhase::Idle;
                    vec![StallAction::Recovered]
                } else {
                    self.phase = StallPhase::Cycling;
                    vec![
                        StallAction::Pause,
                        StallAction::ScheduleCheck {
                            after: self.config.cycle_delay,
                            episode: self.episode,
                        },
                    ]
                }
            }
            StallPhase::Cycling => {
                self.phase = StallPhase::VerifyingCycle;
                self.set_checkpoint();
                vec![
                    StallAction::Resume,
                    StallAction::ScheduleCheck {
                        after: self.config.verify_delay,
                        episode: self.episode,
                    },
                ]
            }
            StallPhase::VerifyingCycle => {
                if self.advanced() {
                    self.phase = StallPhase::Idle;
                    vec![StallAction::Recovered]
                } else {
                    self.phase = StallPhase::Exhausted;
                    self.set_checkpoint();
                    vec![StallAction::Unrecovered {
                        position: self.last_position.unwrap_or(0.0),
                    }]
                }
            }
            StallPhase::Idle | StallPhase::AwaitingChapter | StallPhase::Exhausted => Vec::new(),
        }
    }

    fn set_checkpoint(&mut self) {
        self.checkpoint = self.last_position;
        self.furthest_since = None;
    }

    fn advanced(&self) -> bool {
        match (self.furthest_since, self.checkpoint) {
            (Some(furthest), Some(checkpoint)) => furthest > checkpoint + self.config.advance_epsilon,
            // First position ever reported arrived during the episode.
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

impl Default for StallSupervisor {
    fn default() -> Self {
        Self::new(StallConfig::default())
    }
}
