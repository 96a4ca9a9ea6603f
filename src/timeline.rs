//! Global word timeline: every word received so far, sorted by start time.
//!
//! Chapters are only ever appended in increasing order, so the timeline grows
//! at the tail and `original_index` values never move once assigned.

use crate::error::{EngineError, Result};
use crate::model::{RelativeWord, WordSpan};
use std::ops::Range;

/// Append-only, time-sorted collection of word spans.
#[derive(Debug, Clone, Default)]
pub struct WordTimeline {
    spans: Vec<WordSpan>,
    /// `max_end[i]` is the largest `end` among `spans[..=i]`.
    max_end: Vec<f64>,
}

impl WordTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&WordSpan> {
        self.spans.get(index)
    }

    pub fn spans(&self) -> &[WordSpan] {
        &self.spans
    }

    pub fn last(&self) -> Option<&WordSpan> {
        self.spans.last()
    }

    /// Drop every span (session reset).
    pub fn clear(&mut self) {
        self.spans.clear();
        self.max_end.clear();
    }

    /// Append one chapter's words, shifted by `offset` seconds onto the global axis.
    ///
    /// Words are stably sorted by start within the chapter, and `end` is clamped
    /// to be at least `start`. The whole chapter is rejected (nothing appended)
    /// if its earliest word would start before the current tail.
    ///
    /// Returns the index range the new spans occupy.
    pub fn append_chapter(
        &mut self,
        chapter_number: u32,
        offset: f64,
        mut words: Vec<RelativeWord>,
    ) -> Result<Range<usize>> {
        words.sort_by(|a, b| a.start.total_cmp(&b.start));

        if let (Some(tail), Some(first)) = (self.spans.last(), words.first()) {
            let first_start = first.start + offset;
            if first_start < tail.start {
                return Err(EngineError::TimelineOrder {
                    number: chapter_number,
                    first_start,
                    tail_start: tail.start,
                });
            }
        }

        let begin = self.spans.len();
        self.spans.reserve(words.len());
        self.max_end.reserve(words.len());
        for (i, word) in words.into_iter().enumerate() {
            let start = word.start + offset;
            let end = (word.end + offset).max(start);
            let reach = self.max_end.last().map_or(end, |m| m.max(end));
            self.max_end.push(reach);
            self.spans.push(WordSpan {
                start,
                end,
                text: word.text,
                original_index: begin + i,
                chapter_number,
            });
        }
        Ok(begin..self.spans.len())
    }

    /// Index of the first span whose start is `>= t` (insertion point for `t`).
    pub fn insertion_point(&self, t: f64) -> usize {
        self.spans.partition_point(|span| span.start < t)
    }

    /// Index of the last span whose start is `<= t`, if any.
    pub fn last_starting_at_or_before(&self, t: f64) -> Option<usize> {
        self.spans
            .partition_point(|span| span.start <= t)
            .checked_sub(1)
    }

    /// Best span for `t` among `range`.
    ///
    /// A span containing `t` always beats a zero-duration marker within
    /// `marker_epsilon`; ties go to the highest index in both cases.
    pub fn best_match(&self, range: Range<usize>, t: f64, marker_epsilon: f64) -> Option<usize> {
        let end = range.end.min(self.spans.len());
        let start = range.start.min(end);

        let mut containing = None;
        let mut marker = None;
        for (i, span) in self.spans[start..end].iter().enumerate() {
            let index = start + i;
            if span.contains(t) {
                containing = Some(index);
            } else if span.is_marker() && (t - span.start).abs() <= marker_epsilon {
                marker = Some(index);
            }
        }
        containing.or(marker)
    }

    /// Best span for `t`, scanning `window` spans either side of `center`.
    ///
    /// The scan widens past the window only where a wider scan could change
    /// the answer: upward over spans starting within `marker_epsilon` of `t`,
    /// downward while an earlier span still reaches `t`. The result always
    /// equals [`word_at`](Self::word_at).
    pub fn best_match_near(
        &self,
        center: usize,
        window: usize,
        t: f64,
        marker_epsilon: f64,
    ) -> Option<usize> {
        let len = self.spans.len();
        if len == 0 {
            return None;
        }
        let center = center.min(len - 1);

        let mut hi = (center + window + 1).min(len);
        while hi < len && self.spans[hi].start <= t + marker_epsilon {
            hi += 1;
        }

        let mut lo = center.saturating_sub(window);
        let local = self.best_match(lo..hi, t, marker_epsilon);
        if local.is_some_and(|i| self.spans[i].contains(t)) {
            // Nothing below the window can outrank a containing span.
            return local;
        }

        while lo > 0 && self.max_end[lo - 1] >= t - marker_epsilon {
            lo -= 1;
        }
        self.best_match(lo..hi, t, marker_epsilon)
    }

    /// Reference O(n) lookup over the whole timeline.
    pub fn word_at(&self, t: f64, marker_epsilon: f64) -> Option<usize> {
        self.best_match(0..self.spans.len(), t, marker_epsilon)
    }

    /// Start of the first span and end of the last, if any words exist.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        Some((self.spans.first()?.start, self.spans.last()?.end))
    }
}
