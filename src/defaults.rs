//! Default configuration constants for chapterflow.
//!
//! Shared by the config layer and the engine components so both agree on
//! the same tuning values.

/// Minimum lead time, in seconds, between requesting the next chapter and
/// the end of the current one.
///
/// Applied when `duration − 2 × generation_latency` is smaller, so a chapter
/// that is shorter than its own generation time still triggers a request
/// before playback reaches its end.
pub const PREFETCH_FLOOR_SECS: f64 = 5.0;

/// Position ticks closer than this to the last processed tick are ignored.
///
/// The player reports at roughly 10 Hz; 80ms drops duplicate and jittered
/// callbacks while still reacting within one tick.
pub const TICK_EPSILON_SECS: f64 = 0.08;

/// Proximity window for zero-duration marker spans (`start == end`).
pub const MARKER_EPSILON_SECS: f64 = 0.08;

/// Spans scanned on each side of the candidate index during disambiguation.
pub const SEARCH_WINDOW: usize = 2;

/// Delay after `resume` before checking the player is advancing again.
pub const STALL_VERIFY_DELAY_MS: u64 = 500;

/// Delay between `pause` and `resume` in the pause/play cycle.
pub const STALL_CYCLE_DELAY_MS: u64 = 100;

/// Minimum forward movement that counts as "advancing" during recovery.
pub const ADVANCE_EPSILON_SECS: f64 = 0.05;

/// Capacity of the engine's input queue.
///
/// Ticks are dropped when the queue is full; everything else waits.
pub const INPUT_BUFFER: usize = 1024;

/// Capacity of the outbound event channel used by `ChannelObserver`.
pub const EVENT_BUFFER: usize = 256;

/// How long `EngineHandle` waits for the actor to acknowledge a session reset.
pub const RESET_ACK_TIMEOUT_MS: u64 = 1000;

/// Whether chapter requests ask the server to include audio.
pub const WANT_AUDIO: bool = true;
