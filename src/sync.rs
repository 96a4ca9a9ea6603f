//! Position synchronizer: maps the player's clock to the highlighted word.
//!
//! Forward playback walks a cursor along the timeline (amortized O(1) per
//! tick); a backward seek re-anchors the cursor with a binary search. Either
//! way the final choice is made by a small window scan so both paths resolve
//! exactly like a full linear scan would.

use crate::defaults;
use crate::timeline::WordTimeline;

/// Tuning for tick handling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncConfig {
    /// Ticks closer than this to the last processed one are ignored.
    pub tick_epsilon: f64,
    /// Proximity window for zero-duration marker spans.
    pub marker_epsilon: f64,
    /// Spans scanned on each side of the candidate.
    pub window: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_epsilon: defaults::TICK_EPSILON_SECS,
            marker_epsilon: defaults::MARKER_EPSILON_SECS,
            window: defaults::SEARCH_WINDOW,
        }
    }
}

/// The current word moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexChange {
    pub previous: Option<usize>,
    pub current: usize,
}

/// What a position tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Within epsilon of the last processed tick.
    Debounced,
    /// Processed; the current word did not change.
    Unchanged,
    /// Processed; the current word changed.
    Changed(IndexChange),
}

#[derive(Debug, Clone)]
pub struct PositionSynchronizer {
    config: SyncConfig,
    cursor: usize,
    last_processed: Option<f64>,
    current_index: Option<usize>,
}

impl PositionSynchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            cursor: 0,
            last_processed: None,
            current_index: None,
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.last_processed = None;
        self.current_index = None;
    }

    /// Index of the highlighted word, if any.
    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    /// Last tick time that was not debounced.
    pub fn last_processed(&self) -> Option<f64> {
        self.last_processed
    }

    /// Whether a tick at `t` would be processed.
    pub fn accepts(&self, t: f64) -> bool {
        match self.last_processed {
            Some(last) => (t - last).abs() >= self.config.tick_epsilon,
            None => true,
        }
    }

    /// Handle one position tick.
    ///
    /// Non-finite positions are ignored like debounced ticks.
    pub fn on_position_tick(&mut self, t: f64, timeline: &WordTimeline) -> TickOutcome {
        if !t.is_finite() || !self.accepts(t) {
            return TickOutcome::Debounced;
        }
        self.last_processed = Some(t);

        match self.resolve(t, timeline) {
            Some(index) => match self.apply_index_if_changed(index) {
                Some(change) => TickOutcome::Changed(change),
                None => TickOutcome::Unchanged,
            },
            // Gap between words: keep the previous highlight.
            None => TickOutcome::Unchanged,
        }
    }

    /// Record `index` as current; returns the change only if it differs.
    ///
    /// This is the only place the current index moves, so each word is
    /// reported at most once per visit.
    pub fn apply_index_if_changed(&mut self, index: usize) -> Option<IndexChange> {
        if self.current_index == Some(index) {
            return None;
        }
        let change = IndexChange {
            previous: self.current_index,
            current: index,
        };
        self.current_index = Some(index);
        Some(change)
    }

    /// Resolve `t` to a word index, moving the cursor.
    pub fn resolve(&mut self, t: f64, timeline: &WordTimeline) -> Option<usize> {
        let spans = timeline.spans();
        if spans.is_empty() {
            return None;
        }
        let last = spans.len() - 1;
        let mut index = self.cursor.min(last);

        if t >= spans[index].end {
            // Forward playback
            while index < last && t >= spans[index].end {
                index += 1;
            }
            self.cursor = index;
            let span = &spans[index];
            let next_starts_later = spans.get(index + 1).is_none_or(|next| next.start > t);
            if span.start <= t && t < span.end && next_starts_later {
                // Starts are sorted, so no later span contains t.
                return Some(index);
            }
        } else if t < spans[index].start {
            // Seek backward
            index = timeline.last_starting_at_or_before(t).unwrap_or(0);
            self.cursor = index;
        }

        timeline.best_match_near(index, self.config.window, t, self.config.marker_epsilon)
    }
}

impl Default for PositionSynchronizer {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}
